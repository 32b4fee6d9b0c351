//! Knowledge base tables: concepts, relationships, and content segments.

use coursebuilder_shared::{Concept, ConceptRelationship, Result, new_id};
use libsql::{Row, Value, params, params_from_iter};
use serde::{Deserialize, Serialize};

use crate::{
    Storage, col_f64, col_opt_json, col_text, col_timestamp, db_err, from_json, now, timestamp,
    to_json,
};

/// Plain-text rendering of one generated lesson, kept for retrieval.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StoredContentSegment {
    pub document_id: String,
    pub chapter_id: String,
    pub lesson_id: String,
    pub content: String,
    #[serde(default)]
    pub metadata: serde_json::Value,
    /// Present only when an embedding service was available.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub embedding: Option<Vec<f32>>,
}

const CONCEPT_COLUMNS: &str =
    "id, name, description, relevance_score, document_id, chapter_id, lesson_id, created_at";

impl Storage {
    // -----------------------------------------------------------------------
    // Concepts
    // -----------------------------------------------------------------------

    pub async fn insert_concept(&self, concept: &Concept) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                &format!(
                    "INSERT INTO concepts ({CONCEPT_COLUMNS})
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)"
                ),
                params![
                    concept.id.as_str(),
                    concept.name.as_str(),
                    concept.description.as_str(),
                    concept.relevance_score,
                    concept.document_id.as_str(),
                    concept.chapter_id.as_str(),
                    concept.lesson_id.as_str(),
                    timestamp(concept.created_at),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Concepts whose name or description mentions any of `keywords`,
    /// most relevant first.
    pub async fn find_concepts(&self, keywords: &[String], limit: usize) -> Result<Vec<Concept>> {
        if keywords.is_empty() || limit == 0 {
            return Ok(Vec::new());
        }

        let mut clauses = Vec::with_capacity(keywords.len());
        let mut values: Vec<Value> = Vec::with_capacity(keywords.len() + 1);
        for (i, keyword) in keywords.iter().enumerate() {
            let n = i + 1;
            clauses.push(format!("name LIKE ?{n} OR description LIKE ?{n}"));
            values.push(Value::Text(format!("%{}%", keyword.replace('İ', "i").to_lowercase())));
        }
        let limit_idx = keywords.len() + 1;
        values.push(Value::Integer(limit as i64));

        let sql = format!(
            "SELECT {CONCEPT_COLUMNS} FROM concepts WHERE {}
             ORDER BY relevance_score DESC, created_at ASC LIMIT ?{limit_idx}",
            clauses.join(" OR ")
        );
        let mut rows = self
            .conn
            .query(&sql, params_from_iter(values))
            .await
            .map_err(db_err)?;

        let mut concepts = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            concepts.push(row_to_concept(&row)?);
        }
        Ok(concepts)
    }

    pub async fn list_concepts(&self, document_id: &str) -> Result<Vec<Concept>> {
        let mut rows = self
            .conn
            .query(
                &format!(
                    "SELECT {CONCEPT_COLUMNS} FROM concepts WHERE document_id = ?1
                     ORDER BY chapter_id, lesson_id, relevance_score DESC"
                ),
                params![document_id],
            )
            .await
            .map_err(db_err)?;

        let mut concepts = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            concepts.push(row_to_concept(&row)?);
        }
        Ok(concepts)
    }

    // -----------------------------------------------------------------------
    // Relationships
    // -----------------------------------------------------------------------

    pub async fn insert_relationship(&self, rel: &ConceptRelationship) -> Result<()> {
        self.check_writable()?;
        self.conn
            .execute(
                "INSERT INTO concept_relationships
                     (id, concept_a, concept_b, score, document_id, chapter_id, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                params![
                    rel.id.as_str(),
                    rel.concept_a.as_str(),
                    rel.concept_b.as_str(),
                    rel.score,
                    rel.document_id.as_str(),
                    rel.chapter_id.as_str(),
                    timestamp(rel.created_at),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    pub async fn list_relationships(&self, document_id: &str) -> Result<Vec<ConceptRelationship>> {
        let mut rows = self
            .conn
            .query(
                "SELECT id, concept_a, concept_b, score, document_id, chapter_id, created_at
                 FROM concept_relationships WHERE document_id = ?1
                 ORDER BY score DESC",
                params![document_id],
            )
            .await
            .map_err(db_err)?;

        let mut rels = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            rels.push(ConceptRelationship {
                id: col_text(&row, 0)?,
                concept_a: col_text(&row, 1)?,
                concept_b: col_text(&row, 2)?,
                score: col_f64(&row, 3)?,
                document_id: col_text(&row, 4)?,
                chapter_id: col_text(&row, 5)?,
                created_at: col_timestamp(&row, 6)?,
            });
        }
        Ok(rels)
    }

    // -----------------------------------------------------------------------
    // Content segments
    // -----------------------------------------------------------------------

    /// Insert or replace the stored text of one lesson.
    pub async fn upsert_content_segment(&self, segment: &StoredContentSegment) -> Result<()> {
        self.check_writable()?;
        let embedding = segment.embedding.as_ref().map(to_json).transpose()?;
        self.conn
            .execute(
                "INSERT INTO content_segments
                     (id, document_id, chapter_id, lesson_id, content, metadata_json,
                      embedding_json, created_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
                 ON CONFLICT(document_id, lesson_id) DO UPDATE SET
                     chapter_id = excluded.chapter_id,
                     content = excluded.content,
                     metadata_json = excluded.metadata_json,
                     embedding_json = excluded.embedding_json,
                     created_at = excluded.created_at",
                params![
                    new_id(),
                    segment.document_id.as_str(),
                    segment.chapter_id.as_str(),
                    segment.lesson_id.as_str(),
                    segment.content.as_str(),
                    to_json(&segment.metadata)?,
                    embedding,
                    now(),
                ],
            )
            .await
            .map_err(db_err)?;
        Ok(())
    }

    /// Stored lesson texts, for one document or the whole knowledge base.
    pub async fn list_content_segments(
        &self,
        document_id: Option<&str>,
    ) -> Result<Vec<StoredContentSegment>> {
        let mut rows = self
            .conn
            .query(
                "SELECT document_id, chapter_id, lesson_id, content, metadata_json, embedding_json
                 FROM content_segments
                 WHERE ?1 IS NULL OR document_id = ?1
                 ORDER BY created_at, rowid",
                params![document_id],
            )
            .await
            .map_err(db_err)?;

        let mut segments = Vec::new();
        while let Some(row) = rows.next().await.map_err(db_err)? {
            segments.push(StoredContentSegment {
                document_id: col_text(&row, 0)?,
                chapter_id: col_text(&row, 1)?,
                lesson_id: col_text(&row, 2)?,
                content: col_text(&row, 3)?,
                metadata: from_json(&col_text(&row, 4)?)?,
                embedding: col_opt_json(&row, 5)?,
            });
        }
        Ok(segments)
    }
}

fn row_to_concept(row: &Row) -> Result<Concept> {
    Ok(Concept {
        id: col_text(row, 0)?,
        name: col_text(row, 1)?,
        description: col_text(row, 2)?,
        relevance_score: col_f64(row, 3)?,
        document_id: col_text(row, 4)?,
        chapter_id: col_text(row, 5)?,
        lesson_id: col_text(row, 6)?,
        created_at: col_timestamp(row, 7)?,
    })
}

#[cfg(test)]
mod tests {
    use crate::test_support::test_storage;
    use chrono::Utc;
    use serde_json::json;

    use super::*;

    fn concept(name: &str, description: &str, score: f64) -> Concept {
        Concept {
            id: new_id(),
            name: name.into(),
            description: description.into(),
            relevance_score: score,
            document_id: "doc-1".into(),
            chapter_id: "ch-1".into(),
            lesson_id: "ch-1-l-1".into(),
            created_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn finds_concepts_by_keyword_in_name_or_description() {
        let storage = test_storage().await;
        storage
            .insert_concept(&concept("değişken", "Değer tutan isimli alan.", 0.4))
            .await
            .unwrap();
        storage
            .insert_concept(&concept("döngü", "Tekrar eden blok; değişken günceller.", 0.9))
            .await
            .unwrap();
        storage
            .insert_concept(&concept("fonksiyon", "Yeniden kullanılabilir kod.", 0.7))
            .await
            .unwrap();

        let found = storage
            .find_concepts(&["değişken".to_string()], 10)
            .await
            .unwrap();
        let names: Vec<&str> = found.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["döngü", "değişken"]);

        let limited = storage
            .find_concepts(&["değişken".to_string(), "kod".to_string()], 1)
            .await
            .unwrap();
        assert_eq!(limited.len(), 1);
        assert_eq!(limited[0].name, "döngü");
    }

    #[tokio::test]
    async fn empty_keywords_find_nothing() {
        let storage = test_storage().await;
        storage
            .insert_concept(&concept("döngü", "Tekrar.", 0.9))
            .await
            .unwrap();
        assert!(storage.find_concepts(&[], 5).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn relationships_roundtrip() {
        let storage = test_storage().await;
        let rel = ConceptRelationship {
            id: new_id(),
            concept_a: "döngü".into(),
            concept_b: "değişken".into(),
            score: 0.8,
            document_id: "doc-1".into(),
            chapter_id: "ch-1".into(),
            created_at: Utc::now(),
        };
        storage.insert_relationship(&rel).await.unwrap();

        let listed = storage.list_relationships("doc-1").await.unwrap();
        assert_eq!(listed.len(), 1);
        assert_eq!(listed[0].concept_a, "döngü");
        assert!((listed[0].score - 0.8).abs() < f64::EPSILON);
    }

    #[tokio::test]
    async fn content_segment_upsert_replaces_by_lesson() {
        let storage = test_storage().await;
        let mut seg = StoredContentSegment {
            document_id: "doc-1".into(),
            chapter_id: "ch-1".into(),
            lesson_id: "ch-1-l-1".into(),
            content: "ilk".into(),
            metadata: json!({ "title": "Giriş" }),
            embedding: None,
        };
        storage.upsert_content_segment(&seg).await.unwrap();

        seg.content = "ikinci".into();
        seg.embedding = Some(vec![0.1, 0.2]);
        storage.upsert_content_segment(&seg).await.unwrap();

        let stored = storage.list_content_segments(Some("doc-1")).await.unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].content, "ikinci");
        assert_eq!(stored[0].embedding, Some(vec![0.1, 0.2]));
        assert!(storage.list_content_segments(Some("doc-2")).await.unwrap().is_empty());
        assert_eq!(storage.list_content_segments(None).await.unwrap().len(), 1);
    }
}
