//! Course structure generation.

use std::collections::HashSet;

use tracing::{info, instrument, warn};

use coursebuilder_shared::{CourseBuilderError, CourseStructure, Document, DocumentStatus, Result};
use coursebuilder_storage::Storage;

use crate::completion::{PURPOSE_STRUCTURE, StructuredCompletion};
use crate::prompts::structure_prompt;
use crate::resolver::SegmentAssignmentResolver;

/// Generate, repair, and store the chapter/lesson skeleton of `document`.
///
/// Requires an outline and at least one segment.
#[instrument(skip_all, fields(document_id = %document.id))]
pub async fn generate_structure(
    storage: &Storage,
    completion: &StructuredCompletion,
    resolver: &dyn SegmentAssignmentResolver,
    document: &Document,
) -> Result<CourseStructure> {
    let outline = document.outline.as_ref().ok_or_else(|| {
        CourseBuilderError::validation(format!("document {} has no outline", document.id))
    })?;
    let segments = storage.list_segments(&document.id).await?;
    if segments.is_empty() {
        return Err(CourseBuilderError::validation(format!(
            "document {} has no segments",
            document.id
        )));
    }

    let prompt = structure_prompt(outline, &segments);
    let mut structure: CourseStructure = completion
        .request(&document.id, PURPOSE_STRUCTURE, &prompt)
        .await?
        .value;
    if structure.chapters.is_empty() {
        return Err(CourseBuilderError::response_parse(
            "course structure has no chapters",
            serde_json::to_string(&structure).unwrap_or_default(),
        ));
    }

    if structure.title.is_empty() {
        structure.title = if outline.title.is_empty() {
            document.title.clone()
        } else {
            outline.title.clone()
        };
    }
    assign_ids(&mut structure);

    let unresolved = resolver.resolve(&mut structure, &segments);
    if unresolved > 0 {
        warn!(unresolved, "lessons left without source segments");
    }

    storage.set_course_structure(&document.id, &structure).await?;
    storage
        .update_document_status(&document.id, DocumentStatus::CourseStructureGenerated)
        .await?;
    info!(
        chapters = structure.chapters.len(),
        lessons = structure.chapters.iter().map(|c| c.lessons.len()).sum::<usize>(),
        "course structure generated"
    );
    Ok(structure)
}

/// Fill empty or duplicate ids with positional `ch-N` / `ch-N-l-M`.
///
/// The first occurrence of each explicit id is kept, and generated ids skip
/// every id already taken, gaining a `-2`, `-3` suffix when needed.
pub fn assign_ids(structure: &mut CourseStructure) {
    let mut seen = HashSet::new();
    for chapter in &mut structure.chapters {
        if !chapter.id.is_empty() && !seen.insert(chapter.id.clone()) {
            chapter.id.clear();
        }
        for lesson in &mut chapter.lessons {
            if !lesson.id.is_empty() && !seen.insert(lesson.id.clone()) {
                lesson.id.clear();
            }
        }
    }

    for (c, chapter) in structure.chapters.iter_mut().enumerate() {
        if chapter.id.is_empty() {
            chapter.id = unused_id(format!("ch-{}", c + 1), &mut seen);
        }
        for (l, lesson) in chapter.lessons.iter_mut().enumerate() {
            if lesson.id.is_empty() {
                lesson.id = unused_id(format!("{}-l-{}", chapter.id, l + 1), &mut seen);
            }
        }
    }
}

fn unused_id(base: String, seen: &mut HashSet<String>) -> String {
    let mut candidate = base.clone();
    let mut n = 1;
    while !seen.insert(candidate.clone()) {
        n += 1;
        candidate = format!("{base}-{n}");
    }
    candidate
}
