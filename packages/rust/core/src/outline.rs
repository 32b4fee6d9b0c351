//! Document understanding: first pages in, outline out.

use tracing::{info, instrument};

use coursebuilder_services::DocumentExtractor;
use coursebuilder_shared::{CourseBuilderError, Document, DocumentStatus, Outline, Result};
use coursebuilder_storage::Storage;

use crate::completion::{PURPOSE_OUTLINE, StructuredCompletion};
use crate::prompts::outline_prompt;

/// Pages read to find the table of contents.
pub const UNDERSTANDING_PAGES: u32 = 12;

/// Ask the model for an outline of `document` and store it.
///
/// Sections pointing outside the document are clamped; inverted or fully
/// out-of-range sections are dropped. An outline without sections is kept,
/// the planner pages such documents at fixed width.
#[instrument(skip_all, fields(document_id = %document.id))]
pub async fn extract_outline(
    storage: &Storage,
    extractor: &dyn DocumentExtractor,
    completion: &StructuredCompletion,
    document: &Document,
) -> Result<Outline> {
    if document.page_count == 0 {
        return Err(CourseBuilderError::validation(format!(
            "document {} has no pages",
            document.id
        )));
    }

    let last = document.page_count.min(UNDERSTANDING_PAGES);
    let range = extractor.extract(document, 1, last).await?;
    let prompt = outline_prompt(&range.text, document.page_count);

    let mut outline: Outline = completion
        .request(&document.id, PURPOSE_OUTLINE, &prompt)
        .await?
        .value;
    sanitize(&mut outline, document.page_count);

    storage.set_outline(&document.id, &outline).await?;
    storage
        .update_document_status(&document.id, DocumentStatus::OutlineExtracted)
        .await?;
    info!(sections = outline.sections.len(), "outline extracted");
    Ok(outline)
}

fn sanitize(outline: &mut Outline, page_count: u32) {
    outline.sections.retain(|s| s.start_page >= 1 && s.start_page <= s.end_page && s.start_page <= page_count);
    for section in &mut outline.sections {
        section.end_page = section.end_page.min(page_count);
    }
    outline.sections.sort_by_key(|s| s.start_page);
}
