use async_trait::async_trait;
use chrono::{DateTime, Utc};
use mastery_core::model::{CourseId, ProgressError, QuestionId, QuestionProgress, StudentId};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::sync::{Arc, Mutex};
use thiserror::Error;

/// Errors surfaced by storage adapters.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum StorageError {
    #[error("not found")]
    NotFound,

    #[error("conflict")]
    Conflict,

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),
}

/// Persisted shape for one question's progress, keyed by student and course.
///
/// This mirrors the domain `QuestionProgress` plus the storage-only concerns:
/// the optimistic-concurrency `version` token and timestamps. Repositories
/// serialize/deserialize this shape so storage details never leak into the
/// domain layer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub student_id: StudentId,
    pub course_id: CourseId,
    pub question_id: QuestionId,
    pub streak: u32,
    pub is_active: bool,
    pub is_mastered: bool,
    /// Starts at 1 on insert; every committed update bumps it by one.
    pub version: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl ProgressRecord {
    /// Builds a brand-new record (version 1) from domain progress.
    #[must_use]
    pub fn new(
        student_id: StudentId,
        course_id: CourseId,
        progress: &QuestionProgress,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            student_id,
            course_id,
            question_id: progress.question_id(),
            streak: progress.streak(),
            is_active: progress.is_active(),
            is_mastered: progress.is_mastered(),
            version: 1,
            created_at: now,
            updated_at: now,
        }
    }

    /// Carries updated domain progress into this record, preserving identity,
    /// `created_at`, and the version the caller read.
    #[must_use]
    pub fn with_progress(&self, progress: &QuestionProgress, now: DateTime<Utc>) -> Self {
        Self {
            streak: progress.streak(),
            is_active: progress.is_active(),
            is_mastered: progress.is_mastered(),
            updated_at: now,
            ..self.clone()
        }
    }

    /// Convert the record back into domain `QuestionProgress`.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError` if the stored flags violate the
    /// mastered-implies-inactive invariant.
    pub fn to_progress(&self) -> Result<QuestionProgress, ProgressError> {
        QuestionProgress::from_persisted(
            self.question_id,
            self.streak,
            self.is_active,
            self.is_mastered,
        )
    }
}

/// Repository contract for per-question progress.
///
/// Updates to one (student, course, question) key are serialized through a
/// compare-and-swap on `version`: a writer passes back the version it read,
/// and the store commits only if that version is still current. `update_answer`
/// additionally applies active-set promotions inside the same atomic unit, so
/// a mastery and its replenishment commit or fail together.
#[async_trait]
pub trait ProgressRepository: Send + Sync {
    /// Fetch all progress records for a (student, course) pair, ordered by
    /// question id.
    ///
    /// Returns an empty vec when the pair has never been initialized.
    ///
    /// # Errors
    ///
    /// Returns `StorageError` if the records cannot be read.
    async fn get_progress(
        &self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<Vec<ProgressRecord>, StorageError>;

    /// Persist the initial records for a (student, course) pair.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::Conflict` if any of the records already exist
    /// (e.g. a concurrent initialize won); nothing is written in that case.
    async fn insert_progress(&self, records: &[ProgressRecord]) -> Result<(), StorageError>;

    /// Commit one answered question plus any active-set promotions atomically.
    ///
    /// The answered record is compare-and-swapped on `update.version`; the
    /// `activate` questions are flipped to active only while still inactive
    /// and un-mastered. If the CAS misses or any promotion target is no
    /// longer eligible, the whole unit rolls back.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::NotFound` if the answered record does not
    /// exist, `StorageError::Conflict` on a lost race, or other storage
    /// errors.
    async fn update_answer(
        &self,
        update: &ProgressRecord,
        activate: &[QuestionId],
    ) -> Result<(), StorageError>;
}

type PairKey = (StudentId, CourseId);

/// Simple in-memory repository implementation for testing and prototyping.
///
/// Honors the same compare-and-swap semantics as the SQLite adapter so
/// service-level concurrency handling can be exercised without a database.
#[derive(Clone, Default)]
pub struct InMemoryRepository {
    records: Arc<Mutex<HashMap<PairKey, BTreeMap<QuestionId, ProgressRecord>>>>,
}

impl InMemoryRepository {
    #[must_use]
    pub fn new() -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
        }
    }
}

#[async_trait]
impl ProgressRepository for InMemoryRepository {
    async fn get_progress(
        &self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<Vec<ProgressRecord>, StorageError> {
        let guard = self
            .records
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;
        Ok(guard
            .get(&(student_id, course_id))
            .map(|pair| pair.values().cloned().collect())
            .unwrap_or_default())
    }

    async fn insert_progress(&self, records: &[ProgressRecord]) -> Result<(), StorageError> {
        let mut guard = self
            .records
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        for record in records {
            let pair = guard
                .get(&(record.student_id, record.course_id));
            if pair.is_some_and(|p| p.contains_key(&record.question_id)) {
                return Err(StorageError::Conflict);
            }
        }

        for record in records {
            guard
                .entry((record.student_id, record.course_id))
                .or_default()
                .insert(record.question_id, record.clone());
        }
        Ok(())
    }

    async fn update_answer(
        &self,
        update: &ProgressRecord,
        activate: &[QuestionId],
    ) -> Result<(), StorageError> {
        let mut guard = self
            .records
            .lock()
            .map_err(|e| StorageError::Connection(e.to_string()))?;

        let pair = guard
            .get_mut(&(update.student_id, update.course_id))
            .ok_or(StorageError::NotFound)?;

        let current = pair.get(&update.question_id).ok_or(StorageError::NotFound)?;
        if current.version != update.version {
            return Err(StorageError::Conflict);
        }

        for id in activate {
            let target = pair.get(id).ok_or(StorageError::Conflict)?;
            if target.is_active || target.is_mastered {
                return Err(StorageError::Conflict);
            }
        }

        let mut committed = update.clone();
        committed.version += 1;
        let stamp = update.updated_at;
        pair.insert(update.question_id, committed);

        for id in activate {
            if let Some(target) = pair.get_mut(id) {
                target.is_active = true;
                target.version += 1;
                target.updated_at = stamp;
            }
        }

        Ok(())
    }
}

/// Aggregates the progress repository behind a trait object for easy backend
/// swapping.
#[derive(Clone)]
pub struct Storage {
    pub progress: Arc<dyn ProgressRepository>,
}

impl Storage {
    #[must_use]
    pub fn in_memory() -> Self {
        let repo = InMemoryRepository::new();
        let progress: Arc<dyn ProgressRepository> = Arc::new(repo);
        Self { progress }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mastery_core::time::fixed_now;

    fn record(student: u64, course: u64, question: u64, active: bool) -> ProgressRecord {
        let progress = if active {
            QuestionProgress::new_active(QuestionId::new(question))
        } else {
            QuestionProgress::new_inactive(QuestionId::new(question))
        };
        ProgressRecord::new(
            StudentId::new(student),
            CourseId::new(course),
            &progress,
            fixed_now(),
        )
    }

    #[tokio::test]
    async fn get_returns_empty_for_unknown_pair() {
        let repo = InMemoryRepository::new();
        let found = repo
            .get_progress(StudentId::new(1), CourseId::new(1))
            .await
            .unwrap();
        assert!(found.is_empty());
    }

    #[tokio::test]
    async fn insert_then_get_round_trips_in_question_order() {
        let repo = InMemoryRepository::new();
        repo.insert_progress(&[
            record(1, 1, 3, false),
            record(1, 1, 1, true),
            record(1, 1, 2, true),
        ])
        .await
        .unwrap();

        let found = repo
            .get_progress(StudentId::new(1), CourseId::new(1))
            .await
            .unwrap();
        let ids: Vec<u64> = found.iter().map(|r| r.question_id.value()).collect();
        assert_eq!(ids, vec![1, 2, 3]);
        assert!(found.iter().all(|r| r.version == 1));
    }

    #[tokio::test]
    async fn double_insert_conflicts() {
        let repo = InMemoryRepository::new();
        repo.insert_progress(&[record(1, 1, 1, true)]).await.unwrap();

        let err = repo
            .insert_progress(&[record(1, 1, 1, true)])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict));
    }

    #[tokio::test]
    async fn update_answer_bumps_version_and_activates() {
        let repo = InMemoryRepository::new();
        repo.insert_progress(&[record(1, 1, 1, true), record(1, 1, 2, false)])
            .await
            .unwrap();

        let stored = repo
            .get_progress(StudentId::new(1), CourseId::new(1))
            .await
            .unwrap();
        let mut update = stored[0].clone();
        update.streak = 3;
        update.is_mastered = true;
        update.is_active = false;

        repo.update_answer(&update, &[QuestionId::new(2)])
            .await
            .unwrap();

        let after = repo
            .get_progress(StudentId::new(1), CourseId::new(1))
            .await
            .unwrap();
        assert!(after[0].is_mastered);
        assert_eq!(after[0].version, 2);
        assert!(after[1].is_active);
        assert_eq!(after[1].version, 2);
    }

    #[tokio::test]
    async fn stale_version_conflicts_without_side_effects() {
        let repo = InMemoryRepository::new();
        repo.insert_progress(&[record(1, 1, 1, true), record(1, 1, 2, false)])
            .await
            .unwrap();

        let stored = repo
            .get_progress(StudentId::new(1), CourseId::new(1))
            .await
            .unwrap();
        let mut first = stored[0].clone();
        first.streak = 1;
        repo.update_answer(&first, &[]).await.unwrap();

        // Same read, second writer: its version token is now stale.
        let mut second = stored[0].clone();
        second.streak = 1;
        let err = repo
            .update_answer(&second, &[QuestionId::new(2)])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict));

        let after = repo
            .get_progress(StudentId::new(1), CourseId::new(1))
            .await
            .unwrap();
        assert_eq!(after[0].streak, 1);
        assert_eq!(after[0].version, 2);
        assert!(!after[1].is_active, "losing writer must not promote");
    }

    #[tokio::test]
    async fn ineligible_activation_target_aborts_the_unit() {
        let repo = InMemoryRepository::new();
        repo.insert_progress(&[record(1, 1, 1, true), record(1, 1, 2, true)])
            .await
            .unwrap();

        let stored = repo
            .get_progress(StudentId::new(1), CourseId::new(1))
            .await
            .unwrap();
        let mut update = stored[0].clone();
        update.streak = 3;
        update.is_mastered = true;
        update.is_active = false;

        // q2 is already active, so promoting it again must fail atomically.
        let err = repo
            .update_answer(&update, &[QuestionId::new(2)])
            .await
            .unwrap_err();
        assert!(matches!(err, StorageError::Conflict));

        let after = repo
            .get_progress(StudentId::new(1), CourseId::new(1))
            .await
            .unwrap();
        assert!(!after[0].is_mastered, "rolled back with its promotions");
    }

    #[tokio::test]
    async fn update_unknown_record_is_not_found() {
        let repo = InMemoryRepository::new();
        let ghost = record(1, 1, 1, true);
        let err = repo.update_answer(&ghost, &[]).await.unwrap_err();
        assert!(matches!(err, StorageError::NotFound));
    }

    #[test]
    fn record_round_trips_through_domain_progress() {
        let rec = record(1, 2, 3, true);
        let progress = rec.to_progress().unwrap();
        assert_eq!(progress.question_id(), QuestionId::new(3));
        assert!(progress.is_active());

        let updated = rec.with_progress(&progress, fixed_now());
        assert_eq!(updated.version, rec.version);
        assert_eq!(updated.created_at, rec.created_at);
    }
}
