//! Lesson illustrations.

use std::time::Duration;

use tracing::{info, instrument, warn};

use coursebuilder_services::{ImageGenerator, ImageSize};
use coursebuilder_shared::{
    CourseBuilderError, Document, DocumentStatus, ImageItem, ImageManifest, Result,
};
use coursebuilder_storage::Storage;

use crate::prompts::image_prompt;

/// Generate one illustration per lesson and store the manifest.
///
/// Single failures are recorded in the manifest and never abort the batch.
/// The document advances to `visuals_generated` only when at least one
/// image was produced.
#[instrument(skip_all, fields(document_id = %document.id))]
pub async fn generate_visuals(
    storage: &Storage,
    images: &dyn ImageGenerator,
    document: &Document,
    delay: Duration,
) -> Result<ImageManifest> {
    let structure = document.course_structure.as_ref().ok_or_else(|| {
        CourseBuilderError::validation(format!("document {} has no course structure", document.id))
    })?;
    let course_title = if structure.title.is_empty() {
        document.title.as_str()
    } else {
        structure.title.as_str()
    };

    let mut manifest = ImageManifest::default();
    for chapter in &structure.chapters {
        for lesson in &chapter.lessons {
            if !manifest.items.is_empty() && !delay.is_zero() {
                tokio::time::sleep(delay).await;
            }

            let prompt = image_prompt(course_title, chapter, lesson);
            let mut item = ImageItem {
                chapter_id: chapter.id.clone(),
                lesson_id: lesson.id.clone(),
                prompt,
                url: None,
                model: None,
                generation_time_secs: None,
                error: None,
            };
            match images.generate(&item.prompt, ImageSize::LANDSCAPE).await {
                Ok(image) => {
                    item.url = Some(image.url);
                    item.model = Some(image.model);
                    item.generation_time_secs = Some(image.generation_time_secs);
                    manifest.succeeded += 1;
                }
                Err(e) => {
                    warn!(lesson = %lesson.id, error = %e, "image generation failed");
                    item.error = Some(e.to_string());
                    manifest.failed += 1;
                }
            }
            manifest.items.push(item);
        }
    }

    storage.set_image_manifest(&document.id, &manifest).await?;
    if manifest.succeeded > 0 {
        storage
            .update_document_status(&document.id, DocumentStatus::VisualsGenerated)
            .await?;
    }
    info!(
        succeeded = manifest.succeeded,
        failed = manifest.failed,
        success_rate = manifest.success_rate(),
        "visuals generated"
    );
    Ok(manifest)
}
