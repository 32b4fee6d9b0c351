//! Document records and their generated artifacts.

use coursebuilder_shared::{
    CourseBuilderError, CourseStructure, Document, DocumentStatus, EnhancedContent,
    ImageManifest, Outline, Result,
};
use libsql::{Row, params};

use crate::{
    Storage, col_i64, col_opt_json, col_opt_timestamp, col_text, col_timestamp, db_err, now,
    timestamp, to_json,
};

const DOCUMENT_COLUMNS: &str = "id, owner, title, file_path, page_count, status, \
     outline_json, course_structure_json, enhanced_content_json, images_json, \
     created_at, updated_at, outline_extracted_at, structure_generated_at, \
     enhanced_content_generated_at, images_generated_at";

/// Artifact column paired with the timestamp column it stamps.
#[derive(Clone, Copy)]
enum Artifact {
    Outline,
    CourseStructure,
    EnhancedContent,
    Images,
}

impl Artifact {
    fn columns(self) -> (&'static str, &'static str) {
        match self {
            Self::Outline => ("outline_json", "outline_extracted_at"),
            Self::CourseStructure => ("course_structure_json", "structure_generated_at"),
            Self::EnhancedContent => ("enhanced_content_json", "enhanced_content_generated_at"),
            Self::Images => ("images_json", "images_generated_at"),
        }
    }
}

impl Storage {
    // -----------------------------------------------------------------------
    // Document operations
    // -----------------------------------------------------------------------

    /// Insert a newly uploaded document.
    pub async fn insert_document(&self, doc: &Document) -> Result<()> {
        self.check_writable()?;
        let outline = doc.outline.as_ref().map(to_json).transpose()?;
        let structure = doc.course_structure.as_ref().map(to_json).transpose()?;
        let enhanced = doc.enhanced_content.as_ref().map(to_json).transpose()?;
        let images = doc.images.as_ref().map(to_json).transpose()?;

        self.conn
            .execute(
                &format!(
                    "INSERT INTO documents ({DOCUMENT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16)"
                ),
                params![
                    doc.id.as_str(),
                    doc.owner.as_str(),
                    doc.title.as_str(),
                    doc.file_path.as_str(),
                    doc.page_count as i64,
                    doc.status.as_str(),
                    outline,
                    structure,
                    enhanced,
                    images,
                    timestamp(doc.created_at),
                    timestamp(doc.updated_at),
                    doc.outline_extracted_at.map(timestamp),
                    doc.structure_generated_at.map(timestamp),
                    doc.enhanced_content_generated_at.map(timestamp),
                    doc.images_generated_at.map(timestamp),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Get a document by ID.
    pub async fn get_document(&self, id: &str) -> Result<Option<Document>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {DOCUMENT_COLUMNS} FROM documents WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_document(&row)?)),
            None => Ok(None),
        }
    }

    /// Get a document by ID, failing with `NotFound` when absent.
    pub async fn require_document(&self, id: &str) -> Result<Document> {
        self.get_document(id)
            .await?
            .ok_or_else(|| CourseBuilderError::not_found("document", id))
    }

    /// List documents, newest first, optionally restricted to one owner.
    pub async fn list_documents(&self, owner: Option<&str>) -> Result<Vec<Document>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {DOCUMENT_COLUMNS} FROM documents
                     WHERE ?1 IS NULL OR owner = ?1
                     ORDER BY created_at DESC"
                ),
                params![owner],
            )
            .await
            .map_err(db_err)?;

        let mut docs = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            docs.push(row_to_document(&row)?);
        }
        Ok(docs)
    }

    /// Move a document to a new lifecycle status.
    pub async fn update_document_status(&self, id: &str, status: DocumentStatus) -> Result<()> {
        self.check_writable()?;
        let affected = self
            .conn
            .execute(
                "UPDATE documents SET status = ?1, updated_at = ?2 WHERE id = ?3",
                params![status.as_str(), now(), id],
            )
            .await
            .map_err(db_err)?;
        if affected == 0 {
            return Err(CourseBuilderError::not_found("document", id));
        }
        Ok(())
    }

    /// Store the outline and stamp `outline_extracted_at`.
    pub async fn set_outline(&self, id: &str, outline: &Outline) -> Result<()> {
        self.set_artifact(id, Artifact::Outline, to_json(outline)?).await
    }

    /// Store the course structure and stamp `structure_generated_at`.
    pub async fn set_course_structure(&self, id: &str, structure: &CourseStructure) -> Result<()> {
        self.set_artifact(id, Artifact::CourseStructure, to_json(structure)?)
            .await
    }

    /// Store the enhanced content and stamp `enhanced_content_generated_at`.
    pub async fn set_enhanced_content(&self, id: &str, content: &EnhancedContent) -> Result<()> {
        self.set_artifact(id, Artifact::EnhancedContent, to_json(content)?)
            .await
    }

    /// Store the image manifest and stamp `images_generated_at`.
    pub async fn set_image_manifest(&self, id: &str, manifest: &ImageManifest) -> Result<()> {
        self.set_artifact(id, Artifact::Images, to_json(manifest)?)
            .await
    }

    async fn set_artifact(&self, id: &str, artifact: Artifact, json: String) -> Result<()> {
        self.check_writable()?;
        let (column, stamp) = artifact.columns();
        let at = now();
        let affected = self
            .conn
            .execute(
                &format!(
                    "UPDATE documents SET {column} = ?1, {stamp} = ?2, updated_at = ?2 WHERE id = ?3"
                ),
                params![json, at, id],
            )
            .await
            .map_err(db_err)?;
        if affected == 0 {
            return Err(CourseBuilderError::not_found("document", id));
        }
        tracing::debug!(document_id = id, column, "stored artifact");
        Ok(())
    }
}

fn row_to_document(row: &Row) -> Result<Document> {
    let status_raw = col_text(row, 5)?;
    let status = DocumentStatus::parse(&status_raw).ok_or_else(|| {
        CourseBuilderError::Storage(format!("unknown document status {status_raw:?}"))
    })?;

    Ok(Document {
        id: col_text(row, 0)?,
        owner: col_text(row, 1)?,
        title: col_text(row, 2)?,
        file_path: col_text(row, 3)?,
        page_count: col_i64(row, 4)? as u32,
        status,
        outline: col_opt_json(row, 6)?,
        course_structure: col_opt_json(row, 7)?,
        enhanced_content: col_opt_json(row, 8)?,
        images: col_opt_json(row, 9)?,
        created_at: col_timestamp(row, 10)?,
        updated_at: col_timestamp(row, 11)?,
        outline_extracted_at: col_opt_timestamp(row, 12)?,
        structure_generated_at: col_opt_timestamp(row, 13)?,
        enhanced_content_generated_at: col_opt_timestamp(row, 14)?,
        images_generated_at: col_opt_timestamp(row, 15)?,
    })
}
