use mastery_core::model::{CourseId, QuestionId, StudentId};

use super::{SqliteRepository, mapping};
use crate::repository::{ProgressRecord, ProgressRepository, StorageError};

fn conn<E: core::fmt::Display>(e: E) -> StorageError {
    StorageError::Connection(e.to_string())
}

fn insert_err(e: sqlx::Error) -> StorageError {
    if e.as_database_error().is_some_and(|db| db.is_unique_violation()) {
        StorageError::Conflict
    } else {
        conn(e)
    }
}

#[async_trait::async_trait]
impl ProgressRepository for SqliteRepository {
    async fn get_progress(
        &self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<Vec<ProgressRecord>, StorageError> {
        let rows = sqlx::query(
            r"
            SELECT
                student_id, course_id, question_id, streak, is_active,
                is_mastered, version, created_at, updated_at
            FROM question_progress
            WHERE student_id = ?1 AND course_id = ?2
            ORDER BY question_id ASC
            ",
        )
        .bind(mapping::id_to_i64("student_id", student_id.value())?)
        .bind(mapping::id_to_i64("course_id", course_id.value())?)
        .fetch_all(&self.pool)
        .await
        .map_err(conn)?;

        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            records.push(mapping::map_progress_row(&row)?);
        }
        Ok(records)
    }

    async fn insert_progress(&self, records: &[ProgressRecord]) -> Result<(), StorageError> {
        if records.is_empty() {
            return Ok(());
        }

        let mut tx = self.pool.begin().await.map_err(conn)?;

        for record in records {
            sqlx::query(
                r"
                INSERT INTO question_progress (
                    student_id, course_id, question_id, streak, is_active,
                    is_mastered, version, created_at, updated_at
                )
                VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
                ",
            )
            .bind(mapping::id_to_i64("student_id", record.student_id.value())?)
            .bind(mapping::id_to_i64("course_id", record.course_id.value())?)
            .bind(mapping::id_to_i64(
                "question_id",
                record.question_id.value(),
            )?)
            .bind(i64::from(record.streak))
            .bind(record.is_active)
            .bind(record.is_mastered)
            .bind(record.version)
            .bind(record.created_at)
            .bind(record.updated_at)
            .execute(&mut *tx)
            .await
            .map_err(insert_err)?;
        }

        tx.commit().await.map_err(conn)
    }

    async fn update_answer(
        &self,
        update: &ProgressRecord,
        activate: &[QuestionId],
    ) -> Result<(), StorageError> {
        let student = mapping::id_to_i64("student_id", update.student_id.value())?;
        let course = mapping::id_to_i64("course_id", update.course_id.value())?;
        let question = mapping::id_to_i64("question_id", update.question_id.value())?;

        let mut tx = self.pool.begin().await.map_err(conn)?;

        let updated = sqlx::query(
            r"
            UPDATE question_progress SET
                streak = ?5,
                is_active = ?6,
                is_mastered = ?7,
                updated_at = ?8,
                version = version + 1
            WHERE student_id = ?1 AND course_id = ?2 AND question_id = ?3
              AND version = ?4
            ",
        )
        .bind(student)
        .bind(course)
        .bind(question)
        .bind(update.version)
        .bind(i64::from(update.streak))
        .bind(update.is_active)
        .bind(update.is_mastered)
        .bind(update.updated_at)
        .execute(&mut *tx)
        .await
        .map_err(conn)?;

        if updated.rows_affected() != 1 {
            // Distinguish a missing row from a lost version race.
            let exists = sqlx::query(
                r"
                SELECT 1 FROM question_progress
                WHERE student_id = ?1 AND course_id = ?2 AND question_id = ?3
                ",
            )
            .bind(student)
            .bind(course)
            .bind(question)
            .fetch_optional(&mut *tx)
            .await
            .map_err(conn)?;

            return Err(if exists.is_some() {
                StorageError::Conflict
            } else {
                StorageError::NotFound
            });
        }

        if !activate.is_empty() {
            let mut sql = String::from(
                r"
                UPDATE question_progress SET
                    is_active = 1,
                    updated_at = ?3,
                    version = version + 1
                WHERE student_id = ?1 AND course_id = ?2
                  AND is_active = 0 AND is_mastered = 0
                  AND question_id IN (
                ",
            );
            for i in 0..activate.len() {
                if i > 0 {
                    sql.push_str(", ");
                }
                sql.push('?');
                sql.push_str(&(i + 4).to_string());
            }
            sql.push_str(")\n");

            let mut q = sqlx::query(&sql)
                .bind(student)
                .bind(course)
                .bind(update.updated_at);
            for id in activate {
                q = q.bind(mapping::id_to_i64("question_id", id.value())?);
            }

            let promoted = q.execute(&mut *tx).await.map_err(conn)?;
            if promoted.rows_affected() != activate.len() as u64 {
                // A concurrent writer already promoted or mastered one of the
                // targets; abort so the caller recomputes from fresh state.
                return Err(StorageError::Conflict);
            }
        }

        tx.commit().await.map_err(conn)
    }
}
