//! Course generation pipeline for CourseBuilder.
//!
//! Turns an uploaded textbook into an outline, page segments, a chapter and
//! lesson structure, generated lesson content, illustrations and narration.
//! Segment work is also exposed as a persistent task queue so extraction can
//! run in separate worker processes.

pub mod completion;
pub mod context;
pub mod generator;
pub mod knowledge;
pub mod narration;
pub mod outline;
pub mod pipeline;
pub mod prompts;
pub mod quality;
pub mod queue;
pub mod resolver;
pub mod retry;
pub mod search;
pub mod structure;
pub mod visuals;
pub mod worker;

#[cfg(test)]
mod testing;
