//! Text-completion response cache.
//!
//! Keyed by `(document_id, purpose, prompt_hash, model_id)`. Re-running a
//! stage with an unchanged prompt reuses the stored response instead of
//! calling the completion service again.

use coursebuilder_shared::{Result, new_id};
use libsql::params;

use crate::{Storage, col_text, db_err, now};

/// Identifies one cached completion.
#[derive(Debug, Clone, Copy)]
pub struct CacheKey<'a> {
    pub document_id: &'a str,
    pub purpose: &'a str,
    pub prompt_hash: &'a str,
    pub model_id: &'a str,
}

impl Storage {
    /// Look up a cached completion response.
    pub async fn get_cached_completion(&self, key: CacheKey<'_>) -> Result<Option<String>> {
        let mut rows = self
            .conn
            .query(
                "SELECT response FROM completion_cache
                 WHERE document_id = ?1 AND purpose = ?2 AND prompt_hash = ?3 AND model_id = ?4",
                params![key.document_id, key.purpose, key.prompt_hash, key.model_id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(col_text(&row, 0)?)),
            None => Ok(None),
        }
    }

    /// Store (or overwrite) a completion response.
    pub async fn put_cached_completion(&self, key: CacheKey<'_>, response: &str) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO completion_cache
                     (id, document_id, purpose, prompt_hash, model_id, response, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
                 ON CONFLICT(document_id, purpose, prompt_hash, model_id) DO UPDATE SET
                     response = excluded.response,
                     created_at = excluded.created_at",
                params![
                    new_id(),
                    key.document_id,
                    key.purpose,
                    key.prompt_hash,
                    key.model_id,
                    response,
                    now()
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use crate::test_support::test_storage;

    use super::*;

    fn key<'a>(model: &'a str) -> CacheKey<'a> {
        CacheKey {
            document_id: "doc-1",
            purpose: "chapter:ch-1",
            prompt_hash: "abc123",
            model_id: model,
        }
    }

    #[tokio::test]
    async fn cache_miss_then_hit() {
        let storage = test_storage().await;
        assert!(storage.get_cached_completion(key("m1")).await.unwrap().is_none());

        storage
            .put_cached_completion(key("m1"), "{\"lessons\": []}")
            .await
            .unwrap();
        assert_eq!(
            storage.get_cached_completion(key("m1")).await.unwrap().as_deref(),
            Some("{\"lessons\": []}")
        );
    }

    #[tokio::test]
    async fn model_is_part_of_the_key() {
        let storage = test_storage().await;
        storage.put_cached_completion(key("m1"), "a").await.unwrap();
        assert!(storage.get_cached_completion(key("m2")).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn put_overwrites() {
        let storage = test_storage().await;
        storage.put_cached_completion(key("m1"), "a").await.unwrap();
        storage.put_cached_completion(key("m1"), "b").await.unwrap();
        assert_eq!(
            storage.get_cached_completion(key("m1")).await.unwrap().as_deref(),
            Some("b")
        );
    }
}
