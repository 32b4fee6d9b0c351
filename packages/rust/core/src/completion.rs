//! Cached, retried, decoded text completion.
//!
//! Every structured AI call goes through [`StructuredCompletion::request`]:
//! look up the response cache, otherwise call the completion service under
//! the retry policy, then decode the reply. Only replies that decode are
//! written back to the cache.

use std::sync::Arc;

use serde::de::DeserializeOwned;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use coursebuilder_services::TextCompletion;
use coursebuilder_shared::Result;
use coursebuilder_storage::{CacheKey, Storage};
use coursebuilder_text::decode_json;

use crate::retry::RetryPolicy;

/// Cache purposes, one per prompt family.
pub const PURPOSE_OUTLINE: &str = "outline";
pub const PURPOSE_STRUCTURE: &str = "course_structure";
pub const PURPOSE_CHAPTER: &str = "chapter_content";

/// A decoded completion and where it came from.
#[derive(Debug, Clone)]
pub struct Completed<T> {
    pub value: T,
    pub cache_hit: bool,
}

pub struct StructuredCompletion {
    storage: Arc<Storage>,
    completion: Arc<dyn TextCompletion>,
    retry: RetryPolicy,
}

impl StructuredCompletion {
    pub fn new(storage: Arc<Storage>, completion: Arc<dyn TextCompletion>, retry: RetryPolicy) -> Self {
        Self {
            storage,
            completion,
            retry,
        }
    }

    pub fn model_id(&self) -> &str {
        self.completion.model_id()
    }

    pub async fn request<T: DeserializeOwned>(
        &self,
        document_id: &str,
        purpose: &str,
        prompt: &str,
    ) -> Result<Completed<T>> {
        let hash = prompt_hash(prompt);
        let key = CacheKey {
            document_id,
            purpose,
            prompt_hash: &hash,
            model_id: self.completion.model_id(),
        };

        match self.storage.get_cached_completion(key).await {
            Ok(Some(cached)) => match decode_json::<T>(&cached).into_result() {
                Ok(value) => {
                    debug!(document_id, purpose, "completion cache hit");
                    return Ok(Completed {
                        value,
                        cache_hit: true,
                    });
                }
                Err(e) => warn!(document_id, purpose, error = %e, "ignoring undecodable cache entry"),
            },
            Ok(None) => {}
            Err(e) => warn!(document_id, purpose, error = %e, "completion cache lookup failed"),
        }

        let raw = self
            .retry
            .run(purpose, |_| self.completion.complete(prompt))
            .await?;
        let value = decode_json::<T>(&raw).into_result()?;

        if let Err(e) = self.storage.put_cached_completion(key, &raw).await {
            warn!(document_id, purpose, error = %e, "failed to cache completion");
        }
        Ok(Completed {
            value,
            cache_hit: false,
        })
    }
}

/// Hex SHA-256 of a prompt.
pub fn prompt_hash(prompt: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(prompt.as_bytes());
    format!("{:x}", hasher.finalize())
}
