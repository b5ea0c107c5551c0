//! Syllabus persistence: one transaction per document, advisory-locked,
//! delete-then-insert per subject.

use async_trait::async_trait;
#[cfg(feature = "postgres-store")]
use sqlx::{PgPool, Row};
#[cfg(feature = "postgres-store")]
use uuid::Uuid;

use crate::domain::Subject;
use crate::error::EngineError;
#[cfg(feature = "postgres-store")]
use crate::persistence::advisory_lock_key;

#[async_trait]
pub trait SyllabusStore: Send + Sync {
    /// Persist the merged subjects for `document_id` under `semester_id`,
    /// returning the created/updated syllabus row ids.
    async fn save_subjects(
        &self,
        document_id: &str,
        semester_id: &str,
        subjects: &[Subject],
    ) -> Result<Vec<String>, EngineError>;
}

#[cfg(feature = "postgres-store")]
pub struct PgSyllabusStore {
    pool: PgPool,
}

#[cfg(feature = "postgres-store")]
impl PgSyllabusStore {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[cfg(feature = "postgres-store")]
#[async_trait]
impl SyllabusStore for PgSyllabusStore {
    async fn save_subjects(
        &self,
        document_id: &str,
        semester_id: &str,
        subjects: &[Subject],
    ) -> Result<Vec<String>, EngineError> {
        let mut tx = self.pool.begin().await.map_err(|e| EngineError::Database(e.to_string()))?;

        sqlx::query("SELECT pg_advisory_xact_lock($1)")
            .bind(advisory_lock_key(document_id))
            .execute(&mut *tx)
            .await
            .map_err(|e| EngineError::Database(e.to_string()))?;

        let mut syllabus_ids = Vec::with_capacity(subjects.len());

        for subject in subjects {
            let normalized_name = subject.name.trim().to_lowercase();

            let existing_subject_id: Option<Uuid> = sqlx::query(
                "SELECT id FROM subjects WHERE semester_id = $1 AND lower(trim(name)) = $2",
            )
            .bind(semester_id)
            .bind(&normalized_name)
            .fetch_optional(&mut *tx)
            .await
            .map_err(|e| EngineError::Database(e.to_string()))?
            .map(|row| row.get("id"));

            let subject_id = match existing_subject_id {
                Some(id) => {
                    sqlx::query("UPDATE subjects SET code = COALESCE($1, code) WHERE id = $2")
                        .bind(&subject.code)
                        .bind(id)
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| EngineError::Database(e.to_string()))?;
                    id
                }
                None => {
                    let row = sqlx::query(
                        "INSERT INTO subjects (id, semester_id, name, code) VALUES ($1, $2, $3, $4) RETURNING id",
                    )
                    .bind(Uuid::new_v4())
                    .bind(semester_id)
                    .bind(&subject.name)
                    .bind(&subject.code)
                    .fetch_one(&mut *tx)
                    .await
                    .map_err(|e| EngineError::Database(e.to_string()))?;
                    row.get("id")
                }
            };

            let syllabus_row = sqlx::query(
                "INSERT INTO syllabi (id, subject_id, document_id) VALUES ($1, $2, $3) \
                 ON CONFLICT (document_id, subject_id) DO UPDATE SET updated_at = now() \
                 RETURNING id",
            )
            .bind(Uuid::new_v4())
            .bind(subject_id)
            .bind(document_id)
            .fetch_one(&mut *tx)
            .await
            .map_err(|e| EngineError::Database(e.to_string()))?;
            let syllabus_id: Uuid = syllabus_row.get("id");

            sqlx::query("DELETE FROM units WHERE syllabus_id = $1")
                .bind(syllabus_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| EngineError::Database(e.to_string()))?;
            sqlx::query("DELETE FROM book_references WHERE syllabus_id = $1")
                .bind(syllabus_id)
                .execute(&mut *tx)
                .await
                .map_err(|e| EngineError::Database(e.to_string()))?;

            for unit in &subject.units {
                let unit_row = sqlx::query(
                    "INSERT INTO units (id, syllabus_id, number, title) VALUES ($1, $2, $3, $4) RETURNING id",
                )
                .bind(Uuid::new_v4())
                .bind(syllabus_id)
                .bind(unit.number as i32)
                .bind(&unit.title)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| EngineError::Database(e.to_string()))?;
                let unit_id: Uuid = unit_row.get("id");

                for topic in &unit.topics {
                    sqlx::query("INSERT INTO topics (id, unit_id, title, keywords) VALUES ($1, $2, $3, $4)")
                        .bind(Uuid::new_v4())
                        .bind(unit_id)
                        .bind(&topic.title)
                        .bind(&topic.keywords)
                        .execute(&mut *tx)
                        .await
                        .map_err(|e| EngineError::Database(e.to_string()))?;
                }
            }

            for book in &subject.books {
                sqlx::query(
                    "INSERT INTO book_references (id, syllabus_id, title, authors, publisher, edition) \
                     VALUES ($1, $2, $3, $4, $5, $6)",
                )
                .bind(Uuid::new_v4())
                .bind(syllabus_id)
                .bind(&book.title)
                .bind(&book.authors)
                .bind(&book.publisher)
                .bind(&book.edition)
                .execute(&mut *tx)
                .await
                .map_err(|e| EngineError::Database(e.to_string()))?;
            }

            syllabus_ids.push(syllabus_id.to_string());
        }

        tx.commit().await.map_err(|e| EngineError::Database(e.to_string()))?;
        Ok(syllabus_ids)
    }
}
