//! Shared types, error model, and configuration for CourseBuilder.
//!
//! This crate is the foundation depended on by all other CourseBuilder crates.
//! It provides:
//! - [`CourseBuilderError`]: the unified error type
//! - Domain types ([`Document`], [`Segment`], [`Task`], [`CourseStructure`],
//!   [`EnhancedContent`], [`Concept`])
//! - Configuration ([`AppConfig`], config loading)

pub mod config;
pub mod error;
pub mod types;

// Re-export public API at crate root for ergonomic imports.
pub use config::{
    AppConfig, DefaultsConfig, GenerationConfig, ProviderConfig, QueueConfig, SegmentationConfig,
    config_dir, config_file_path, init_config, load_config, load_config_from, resolve_api_key,
    validate_api_key,
};
pub use error::{CourseBuilderError, Result};
pub use types::{
    Chapter, ChapterContent, ChapterMetadata, ChapterQuality, CodeExample, Concept,
    ConceptRelationship, ContentTable, CourseStructure, CrossReference, Document, DocumentStatus,
    EnhancedContent, EnhancedLesson, ExtractedImage, ExtractedTable, ImageItem, ImageManifest,
    Lesson, Outline, OutlineSection, PracticalExample, ProcessingStatus, QualityReport, Segment,
    Task, TaskType, new_id, nullable,
};
