//! Segment assignment for generated course structures.
//!
//! The model does not always fill `segment_ids`, and sometimes invents ids.
//! A [`SegmentAssignmentResolver`] repairs the lesson → segment links after
//! the structure is decoded.

use std::collections::HashSet;

use coursebuilder_shared::{CourseStructure, Segment};
use coursebuilder_text::fold_case;

pub trait SegmentAssignmentResolver: Send + Sync {
    /// Fix lesson segment links in place. Returns the number of lessons left
    /// without any segment.
    fn resolve(&self, structure: &mut CourseStructure, segments: &[Segment]) -> usize;
}

/// Keeps valid ids; otherwise matches titles by case-insensitive substring
/// (either direction), falling back to the first segment not yet assigned.
#[derive(Debug, Clone, Copy, Default)]
pub struct TitleMatchResolver;

impl SegmentAssignmentResolver for TitleMatchResolver {
    fn resolve(&self, structure: &mut CourseStructure, segments: &[Segment]) -> usize {
        let known: HashSet<&str> = segments.iter().map(|s| s.id.as_str()).collect();

        for lesson in structure.chapters.iter_mut().flat_map(|c| c.lessons.iter_mut()) {
            lesson.segment_ids.retain(|id| known.contains(id.as_str()));
        }

        let mut assigned: HashSet<String> = structure
            .chapters
            .iter()
            .flat_map(|c| &c.lessons)
            .flat_map(|l| l.segment_ids.iter().cloned())
            .collect();

        let mut unresolved = 0;
        for lesson in structure.chapters.iter_mut().flat_map(|c| c.lessons.iter_mut()) {
            if !lesson.segment_ids.is_empty() {
                continue;
            }
            let title = fold_case(&lesson.title);
            let by_title = segments.iter().find(|s| {
                let seg_title = fold_case(&s.title);
                !seg_title.is_empty()
                    && !title.is_empty()
                    && (seg_title.contains(&title) || title.contains(&seg_title))
            });
            let chosen = by_title.or_else(|| segments.iter().find(|s| !assigned.contains(&s.id)));

            match chosen {
                Some(segment) => {
                    lesson.segment_ids.push(segment.id.clone());
                    assigned.insert(segment.id.clone());
                }
                None => unresolved += 1,
            }
        }
        unresolved
    }
}
