//! Page-range segments and their extraction results.

use coursebuilder_shared::{
    CourseBuilderError, ExtractedImage, ExtractedTable, ProcessingStatus, Result, Segment,
};
use libsql::{Connection, Row, params};

use crate::{Storage, col_i64, col_opt_text, col_text, db_err, from_json, to_json};

const SEGMENT_COLUMNS: &str = "id, document_id, seg_no, title, p_start, p_end, content_type, \
     source_sections_json, text, images_json, tables_json, text_status, img_status";

impl Storage {
    // -----------------------------------------------------------------------
    // Segment operations
    // -----------------------------------------------------------------------

    /// Replace every segment of a document in one transaction.
    ///
    /// Tasks bound to the old segments are removed with them.
    pub async fn replace_segments(&self, document_id: &str, segments: &[Segment]) -> Result<()> {
        self.check_writable()?;
        if let Some(stray) = segments.iter().find(|s| s.document_id != document_id) {
            return Err(CourseBuilderError::validation(format!(
                "segment {} belongs to document {}, not {document_id}",
                stray.id, stray.document_id
            )));
        }

        let tx = self.conn.transaction().await.map_err(db_err)?;
        tx.execute("DELETE FROM tasks WHERE document_id = ?1", params![document_id])
            .await
            .map_err(db_err)?;
        tx.execute(
            "DELETE FROM segments WHERE document_id = ?1",
            params![document_id],
        )
        .await
        .map_err(db_err)?;
        for segment in segments {
            insert_segment(&tx, segment).await?;
        }
        tx.commit().await.map_err(db_err)?;

        tracing::debug!(document_id, count = segments.len(), "replaced segments");
        Ok(())
    }

    /// All segments of a document ordered by `seg_no`.
    pub async fn list_segments(&self, document_id: &str) -> Result<Vec<Segment>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {SEGMENT_COLUMNS} FROM segments WHERE document_id = ?1 ORDER BY seg_no"
                ),
                params![document_id],
            )
            .await
            .map_err(db_err)?;

        let mut segments = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            segments.push(row_to_segment(&row)?);
        }
        Ok(segments)
    }

    /// Get a segment by ID.
    pub async fn get_segment(&self, id: &str) -> Result<Option<Segment>> {
        let mut rows = self
            .conn
            .query(
                &format!("SELECT {SEGMENT_COLUMNS} FROM segments WHERE id = ?1"),
                params![id],
            )
            .await
            .map_err(db_err)?;

        match rows.next().await.map_err(db_err)? {
            Some(row) => Ok(Some(row_to_segment(&row)?)),
            None => Ok(None),
        }
    }

    /// Persist extracted text and tables and mark text extraction complete.
    pub async fn set_segment_text(
        &self,
        id: &str,
        text: &str,
        tables: &[ExtractedTable],
    ) -> Result<()> {
        self.check_writable()?;
        let affected = self
            .conn
            .execute(
                "UPDATE segments SET text = ?1, tables_json = ?2, text_status = ?3 WHERE id = ?4",
                params![
                    text,
                    to_json(tables)?,
                    ProcessingStatus::Completed.as_str(),
                    id
                ],
            )
            .await
            .map_err(db_err)?;
        ensure_found(affected, id)
    }

    /// Persist extracted images and mark image extraction complete.
    pub async fn set_segment_images(&self, id: &str, images: &[ExtractedImage]) -> Result<()> {
        self.check_writable()?;
        let affected = self
            .conn
            .execute(
                "UPDATE segments SET images_json = ?1, img_status = ?2 WHERE id = ?3",
                params![to_json(images)?, ProcessingStatus::Completed.as_str(), id],
            )
            .await
            .map_err(db_err)?;
        ensure_found(affected, id)
    }

    pub async fn set_segment_text_status(&self, id: &str, status: ProcessingStatus) -> Result<()> {
        self.check_writable()?;
        let affected = self
            .conn
            .execute(
                "UPDATE segments SET text_status = ?1 WHERE id = ?2",
                params![status.as_str(), id],
            )
            .await
            .map_err(db_err)?;
        ensure_found(affected, id)
    }

    pub async fn set_segment_img_status(&self, id: &str, status: ProcessingStatus) -> Result<()> {
        self.check_writable()?;
        let affected = self
            .conn
            .execute(
                "UPDATE segments SET img_status = ?1 WHERE id = ?2",
                params![status.as_str(), id],
            )
            .await
            .map_err(db_err)?;
        ensure_found(affected, id)
    }
}

async fn insert_segment(conn: &Connection, segment: &Segment) -> Result<()> {
    conn.execute(
        &format!(
            "INSERT INTO segments ({SEGMENT_COLUMNS})
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)"
        ),
        params![
            segment.id.as_str(),
            segment.document_id.as_str(),
            segment.seg_no as i64,
            segment.title.as_str(),
            segment.p_start as i64,
            segment.p_end as i64,
            segment.content_type.as_str(),
            to_json(&segment.source_sections)?,
            segment.text.as_deref(),
            to_json(&segment.images)?,
            to_json(&segment.tables)?,
            segment.text_status.as_str(),
            segment.img_status.as_str(),
        ],
    )
    .await
    .map_err(db_err)?;
    Ok(())
}

fn ensure_found(affected: u64, id: &str) -> Result<()> {
    if affected == 0 {
        return Err(CourseBuilderError::not_found("segment", id));
    }
    Ok(())
}

fn parse_status(raw: &str) -> Result<ProcessingStatus> {
    ProcessingStatus::parse(raw)
        .ok_or_else(|| CourseBuilderError::Storage(format!("unknown processing status {raw:?}")))
}

fn row_to_segment(row: &Row) -> Result<Segment> {
    Ok(Segment {
        id: col_text(row, 0)?,
        document_id: col_text(row, 1)?,
        seg_no: col_i64(row, 2)? as u32,
        title: col_text(row, 3)?,
        p_start: col_i64(row, 4)? as u32,
        p_end: col_i64(row, 5)? as u32,
        content_type: col_text(row, 6)?,
        source_sections: from_json(&col_text(row, 7)?)?,
        text: col_opt_text(row, 8),
        images: from_json(&col_text(row, 9)?)?,
        tables: from_json(&col_text(row, 10)?)?,
        text_status: parse_status(&col_text(row, 11)?)?,
        img_status: parse_status(&col_text(row, 12)?)?,
    })
}
