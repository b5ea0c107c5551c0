//! PYQ paper persistence: one transaction per document, matching the
//! existing paper row by `document_id` and replacing its questions/choices
//! in place, the same transactional shape as the syllabus writer.

use async_trait::async_trait;
#[cfg(feature = "postgres-store")]
use sqlx::{PgPool, Row};
#[cfg(feature = "postgres-store")]
use uuid::Uuid;

use crate::domain::PyqPaper;
use crate::error::EngineError;
#[cfg(feature = "postgres-store")]
use crate::persistence::advisory_lock_key;

#[async_trait]
pub trait PyqStore: Send + Sync {
    /// Persist `paper` for `document_id`, returning the paper row id.
    async fn save_paper(&self, document_id: &str, paper: &PyqPaper) -> Result<String, EngineError>;
}

#[cfg(feature = "postgres-store")]
pub struct PgPyqStore {
    pool: PgPool,
}

#[cfg(feature = "postgres-store")]
impl PgPyqStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[cfg(feature = "postgres-store")]
#[async_trait]
impl PyqStore for PgPyqStore {
    async fn save_paper(&self, document_id: &str, paper: &PyqPaper) -> Result<String, EngineError> {
        let mut tx = self.pool.begin().await.map_err(|e| EngineError::Database(e.to_string()))?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(advisory_lock_key(document_id))
            .execute(&mut *tx)
            .await
            .map_err(|e| EngineError::Database(e.to_string()))?;

        let existing: Option<Uuid> = sqlx::query("SELECT id FROM papers WHERE document_id = $1")
            .bind(document_id)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| EngineError::Database(e.to_string()))?
            .map(|row| row.get("id"));

        let paper_id = match existing {
            Some(id) => {
                sqlx::query(
                    "UPDATE papers SET year = $1, month = $2, exam_type = $3, total_marks = $4, \
                     duration = $5, instructions = $6, updated_at = now() WHERE id = $7",
                )
                .bind(&paper.year)
                .bind(&paper.month)
                .bind(&paper.exam_type)
                .bind(paper.total_marks.map(|m| m as i32))
                .bind(&paper.duration)
                .bind(&paper.instructions)
                .bind(id)
                .execute(&mut *tx)
                .await
                .map_err(|e| EngineError::Database(e.to_string()))?;
                id
            }
            None => {
                let row = sqlx::query(
                    "INSERT INTO papers (id, document_id, year, month, exam_type, total_marks, duration, instructions) \
                     VALUES ($1, $2, $3, $4, $5, $6, $7, $8) RETURNING id",
                )
                .bind(Uuid::new_v4())
                .bind(document_id)
                .bind(&paper.year)
                .bind(&paper.month)
                .bind(&paper.exam_type)
                .bind(paper.total_marks.map(|m| m as i32))
                .bind(&paper.duration)
                .bind(&paper.instructions)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| EngineError::Database(e.to_string()))?;
                row.get("id")
            }
        };

        // Replace this paper's questions wholesale — choices cascade from
        // the FK, so deleting questions is enough to drop stale choices too.
        sqlx::query("DELETE FROM questions WHERE paper_id = $1")
            .bind(paper_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| EngineError::Database(e.to_string()))?;

        for question in &paper.questions {
            let question_row = sqlx::query(
                "INSERT INTO questions \
                 (id, paper_id, question_number, section, text, marks, is_compulsory, has_choices, \
                  choice_group, unit_number, topic_keywords) \
                 VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11) RETURNING id",
            )
            .bind(Uuid::new_v4())
            .bind(paper_id)
            .bind(&question.question_number)
            .bind(&question.section)
            .bind(&question.text)
            .bind(question.marks as i32)
            .bind(question.is_compulsory)
            .bind(question.has_choices)
            .bind(&question.choice_group)
            .bind(question.unit_number.map(|n| n as i32))
            .bind(&question.topic_keywords)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| EngineError::Database(e.to_string()))?;
            let question_id: Uuid = question_row.get("id");

            for choice in &question.choices {
                sqlx::query(
                    "INSERT INTO choices (id, question_id, label, text, marks_override) \
                     VALUES ($1, $2, $3, $4, $5)",
                )
                .bind(Uuid::new_v4())
                .bind(question_id)
                .bind(&choice.label)
                .bind(&choice.text)
                .bind(choice.marks_override.map(|m| m as i32))
                .execute(&mut *tx)
                .await
                .map_err(|e| EngineError::Database(e.to_string()))?;
            }
        }

        tx.commit().await.map_err(|e| EngineError::Database(e.to_string()))?;
        Ok(paper_id.to_string())
    }
}
