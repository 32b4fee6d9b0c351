//! SQL migration definitions for the CourseBuilder database.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: documents, segments, tasks",
            sql: r#"
-- Schema version tracking
CREATE TABLE IF NOT EXISTS schema_migrations (
    version   INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- Uploaded source documents and their generated artifacts
CREATE TABLE IF NOT EXISTS documents (
    id                            TEXT PRIMARY KEY,
    owner                         TEXT NOT NULL,
    title                         TEXT NOT NULL,
    file_path                     TEXT NOT NULL,
    page_count                    INTEGER NOT NULL,
    status                        TEXT NOT NULL,
    outline_json                  TEXT,
    course_structure_json         TEXT,
    enhanced_content_json         TEXT,
    images_json                   TEXT,
    created_at                    TEXT NOT NULL,
    updated_at                    TEXT NOT NULL,
    outline_extracted_at          TEXT,
    structure_generated_at        TEXT,
    enhanced_content_generated_at TEXT,
    images_generated_at           TEXT
);

CREATE INDEX IF NOT EXISTS idx_documents_owner ON documents(owner);

-- Page-range segments of a document
CREATE TABLE IF NOT EXISTS segments (
    id                   TEXT PRIMARY KEY,
    document_id          TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    seg_no               INTEGER NOT NULL,
    title                TEXT NOT NULL,
    p_start              INTEGER NOT NULL,
    p_end                INTEGER NOT NULL,
    content_type         TEXT NOT NULL,
    source_sections_json TEXT NOT NULL DEFAULT '[]',
    text                 TEXT,
    images_json          TEXT NOT NULL DEFAULT '[]',
    tables_json          TEXT NOT NULL DEFAULT '[]',
    text_status          TEXT NOT NULL DEFAULT 'PENDING',
    img_status           TEXT NOT NULL DEFAULT 'PENDING',
    UNIQUE(document_id, seg_no)
);

CREATE INDEX IF NOT EXISTS idx_segments_document ON segments(document_id);

-- Lease-based work queue
CREATE TABLE IF NOT EXISTS tasks (
    id                 TEXT PRIMARY KEY,
    document_id        TEXT NOT NULL REFERENCES documents(id) ON DELETE CASCADE,
    segment_id         TEXT NOT NULL,
    task_type          TEXT NOT NULL,
    priority           INTEGER NOT NULL,
    status             TEXT NOT NULL DEFAULT 'PENDING',
    worker_id          TEXT,
    started_at         TEXT,
    completed_at       TEXT,
    error_message      TEXT,
    error_details_json TEXT,
    metadata_json      TEXT NOT NULL DEFAULT '{}',
    result_json        TEXT,
    created_at         TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_tasks_pending ON tasks(status, priority DESC, created_at);
CREATE INDEX IF NOT EXISTS idx_tasks_document ON tasks(document_id);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Knowledge base: concepts, relationships, content segments, completion cache",
            sql: r#"
-- Keyword-derived concepts (not deduplicated)
CREATE TABLE IF NOT EXISTS concepts (
    id              TEXT PRIMARY KEY,
    name            TEXT NOT NULL,
    description     TEXT NOT NULL,
    relevance_score REAL NOT NULL,
    document_id     TEXT NOT NULL,
    chapter_id      TEXT NOT NULL,
    lesson_id       TEXT NOT NULL,
    created_at      TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_concepts_name ON concepts(name);

-- Scored co-occurrence edges between concept names
CREATE TABLE IF NOT EXISTS concept_relationships (
    id          TEXT PRIMARY KEY,
    concept_a   TEXT NOT NULL,
    concept_b   TEXT NOT NULL,
    score       REAL NOT NULL,
    document_id TEXT NOT NULL,
    chapter_id  TEXT NOT NULL,
    created_at  TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_relationships_document ON concept_relationships(document_id);

-- Plain-text lesson blobs for retrieval
CREATE TABLE IF NOT EXISTS content_segments (
    id             TEXT PRIMARY KEY,
    document_id    TEXT NOT NULL,
    chapter_id     TEXT NOT NULL,
    lesson_id      TEXT NOT NULL,
    content        TEXT NOT NULL,
    metadata_json  TEXT NOT NULL DEFAULT '{}',
    embedding_json TEXT,
    created_at     TEXT NOT NULL,
    UNIQUE(document_id, lesson_id)
);

CREATE INDEX IF NOT EXISTS idx_content_segments_document ON content_segments(document_id);

-- Text-completion response cache
CREATE TABLE IF NOT EXISTS completion_cache (
    id          TEXT PRIMARY KEY,
    document_id TEXT NOT NULL,
    purpose     TEXT NOT NULL,
    prompt_hash TEXT NOT NULL,
    model_id    TEXT NOT NULL,
    response    TEXT NOT NULL,
    created_at  TEXT NOT NULL,
    UNIQUE(document_id, purpose, prompt_hash, model_id)
);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
