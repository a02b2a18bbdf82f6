use std::collections::HashSet;
use std::sync::Arc;

use mastery_core::Clock;
use mastery_core::model::{CourseId, MasterySettings, QuestionId, StudentId};
use mastery_core::scheduler::{AnswerTransition, MasteryScheduler};
use serde::{Deserialize, Serialize};
use storage::repository::{ProgressRecord, ProgressRepository, StorageError};

use super::snapshot::SessionSnapshot;
use crate::error::SessionError;

/// Bounded retries for the read-modify-write cycle when a concurrent submit
/// wins the version race.
const MAX_COMMIT_ATTEMPTS: u32 = 4;

//
// ─── ANSWER OUTCOME ────────────────────────────────────────────────────────────
//

/// Result of submitting a single answer.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AnswerOutcome {
    /// True when this answer pushed the question over the mastery threshold.
    pub mastered: bool,
    /// Standing after the answer committed, including the (possibly
    /// replenished) active set.
    pub snapshot: SessionSnapshot,
}

//
// ─── SESSION SERVICE ───────────────────────────────────────────────────────────
//

/// Orchestrates the mastery scheduler against the progress store.
///
/// State machine per (student, course): uninitialized until the first
/// `initialize`, then active until every question is mastered, after which
/// only reads succeed and further answers fail with
/// [`SessionError::CourseCompleted`].
///
/// The question catalog is an external collaborator, so callers pass the
/// course's ordered question ids on every call; the service stores only
/// per-question progress and never sees question content.
#[derive(Clone)]
pub struct SessionService {
    clock: Clock,
    scheduler: MasteryScheduler,
    progress: Arc<dyn ProgressRepository>,
}

impl SessionService {
    #[must_use]
    pub fn new(
        clock: Clock,
        scheduler: MasteryScheduler,
        progress: Arc<dyn ProgressRepository>,
    ) -> Self {
        Self {
            clock,
            scheduler,
            progress,
        }
    }

    #[must_use]
    pub fn settings(&self) -> &MasterySettings {
        self.scheduler.settings()
    }

    /// Start or resume a session for a (student, course) pair.
    ///
    /// On first contact, creates one progress record per catalog question with
    /// the first `capacity` questions active. On a resumed session, returns
    /// the stored standing untouched: the call is idempotent and has no side
    /// effects on existing progress. A completed course is reported via
    /// `is_complete` on the snapshot.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::EmptyCourse` if the catalog is empty, or a
    /// storage error if records cannot be read or written.
    pub async fn initialize(
        &self,
        student_id: StudentId,
        course_id: CourseId,
        all_questions: &[QuestionId],
    ) -> Result<SessionSnapshot, SessionError> {
        if all_questions.is_empty() {
            return Err(SessionError::EmptyCourse);
        }

        let records = self.progress.get_progress(student_id, course_id).await?;
        if !records.is_empty() {
            return Ok(SessionSnapshot::from_records(&records, all_questions));
        }

        let now = self.clock.now();
        let active: HashSet<QuestionId> = self
            .scheduler
            .initial_active_set(all_questions)
            .into_iter()
            .collect();
        let new_records: Vec<ProgressRecord> = all_questions
            .iter()
            .map(|id| {
                let progress = if active.contains(id) {
                    mastery_core::model::QuestionProgress::new_active(*id)
                } else {
                    mastery_core::model::QuestionProgress::new_inactive(*id)
                };
                ProgressRecord::new(student_id, course_id, &progress, now)
            })
            .collect();

        match self.progress.insert_progress(&new_records).await {
            Ok(()) => {
                tracing::info!(
                    %student_id,
                    %course_id,
                    questions = new_records.len(),
                    active = active.len(),
                    "initialized course progress"
                );
                Ok(SessionSnapshot::from_records(&new_records, all_questions))
            }
            Err(StorageError::Conflict) => {
                // A concurrent initialize won the insert; its records are the
                // session, so fall back to the stored state.
                let records = self.progress.get_progress(student_id, course_id).await?;
                if records.is_empty() {
                    return Err(SessionError::Storage(StorageError::Conflict));
                }
                Ok(SessionSnapshot::from_records(&records, all_questions))
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Record an answer and return the updated standing.
    ///
    /// Applies the streak transition, and on mastery retires the question and
    /// promotes replacements in the same atomic storage unit. A lost
    /// concurrent race is retried from a fresh read, so submits from multiple
    /// devices of the same student serialize instead of double-counting.
    ///
    /// # Errors
    ///
    /// - `SessionError::UnknownQuestion` if the question is not part of the
    ///   course.
    /// - `SessionError::NotInitialized` if `initialize` was never called for
    ///   the pair.
    /// - `SessionError::CourseCompleted` once every question is mastered.
    /// - `SessionError::AlreadyMastered` when a stale client re-submits a
    ///   retired question.
    /// - `SessionError::Storage` for store failures, including a conflict
    ///   that persisted through all retry attempts.
    pub async fn submit_answer(
        &self,
        student_id: StudentId,
        course_id: CourseId,
        question_id: QuestionId,
        is_correct: bool,
        all_questions: &[QuestionId],
    ) -> Result<AnswerOutcome, SessionError> {
        if !all_questions.contains(&question_id) {
            return Err(SessionError::UnknownQuestion(question_id));
        }

        for attempt in 1..=MAX_COMMIT_ATTEMPTS {
            let records = self.progress.get_progress(student_id, course_id).await?;
            if records.is_empty() {
                return Err(SessionError::NotInitialized);
            }

            let mastered_count = records.iter().filter(|r| r.is_mastered).count();
            if mastered_count == records.len() {
                return Err(SessionError::CourseCompleted);
            }

            let record = records
                .iter()
                .find(|r| r.question_id == question_id)
                .ok_or(SessionError::UnknownQuestion(question_id))?;
            let progress = record.to_progress()?;
            if progress.is_mastered() {
                return Err(SessionError::AlreadyMastered(question_id));
            }

            let (next, transition) = self.scheduler.answer(&progress, is_correct)?;
            let now = self.clock.now();
            let update = record.with_progress(&next, now);

            let activate = if transition == AnswerTransition::Mastered {
                // Replenish from the state as it stands the moment this
                // mastery commits; the store aborts if that state moved.
                let active: HashSet<QuestionId> = records
                    .iter()
                    .filter(|r| r.is_active && r.question_id != question_id)
                    .map(|r| r.question_id)
                    .collect();
                let mastered: HashSet<QuestionId> = records
                    .iter()
                    .filter(|r| r.is_mastered)
                    .map(|r| r.question_id)
                    .chain(std::iter::once(question_id))
                    .collect();
                self.scheduler.replenish(&active, &mastered, all_questions)
            } else {
                Vec::new()
            };

            match self.progress.update_answer(&update, &activate).await {
                Ok(()) => {
                    let snapshot = committed_snapshot(records, &update, &activate, all_questions);
                    if transition == AnswerTransition::Mastered {
                        tracing::info!(
                            %student_id,
                            %course_id,
                            %question_id,
                            mastered_count = snapshot.mastered_count,
                            promoted = activate.len(),
                            "question mastered"
                        );
                    }
                    if snapshot.is_complete {
                        tracing::info!(%student_id, %course_id, "course completed");
                    }
                    return Ok(AnswerOutcome {
                        mastered: transition == AnswerTransition::Mastered,
                        snapshot,
                    });
                }
                Err(StorageError::Conflict) => {
                    tracing::debug!(
                        %student_id,
                        %course_id,
                        %question_id,
                        attempt,
                        "answer lost an update race, retrying"
                    );
                }
                Err(e) => return Err(e.into()),
            }
        }

        Err(SessionError::Storage(StorageError::Conflict))
    }

    /// Current standing for a pair without side effects.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotInitialized` if the pair has no records, or
    /// a storage error.
    pub async fn snapshot(
        &self,
        student_id: StudentId,
        course_id: CourseId,
        all_questions: &[QuestionId],
    ) -> Result<SessionSnapshot, SessionError> {
        let records = self.progress.get_progress(student_id, course_id).await?;
        if records.is_empty() {
            return Err(SessionError::NotInitialized);
        }
        Ok(SessionSnapshot::from_records(&records, all_questions))
    }

    /// Per-question streak and mastery listing for a pair.
    ///
    /// # Errors
    ///
    /// Returns `SessionError::NotInitialized` if the pair has no records, or
    /// a storage error.
    pub async fn progress_records(
        &self,
        student_id: StudentId,
        course_id: CourseId,
    ) -> Result<Vec<ProgressRecord>, SessionError> {
        let records = self.progress.get_progress(student_id, course_id).await?;
        if records.is_empty() {
            return Err(SessionError::NotInitialized);
        }
        Ok(records)
    }
}

/// Projects the committed write onto the records that were read, avoiding a
/// second round trip for the response snapshot.
fn committed_snapshot(
    mut records: Vec<ProgressRecord>,
    update: &ProgressRecord,
    activate: &[QuestionId],
    all_questions: &[QuestionId],
) -> SessionSnapshot {
    for record in &mut records {
        if record.question_id == update.question_id {
            *record = update.clone();
            record.version += 1;
        } else if activate.contains(&record.question_id) {
            record.is_active = true;
            record.version += 1;
            record.updated_at = update.updated_at;
        }
    }
    SessionSnapshot::from_records(&records, all_questions)
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;
    use mastery_core::time::fixed_clock;
    use storage::repository::InMemoryRepository;

    fn ids(values: &[u64]) -> Vec<QuestionId> {
        values.iter().copied().map(QuestionId::new).collect()
    }

    fn service(capacity: u32, threshold: u32) -> SessionService {
        let scheduler =
            MasteryScheduler::with_settings(MasterySettings::new(capacity, threshold).unwrap());
        SessionService::new(
            fixed_clock(),
            scheduler,
            Arc::new(InMemoryRepository::new()),
        )
    }

    fn student() -> StudentId {
        StudentId::new(1)
    }

    fn course() -> CourseId {
        CourseId::new(10)
    }

    #[tokio::test]
    async fn initialize_activates_first_capacity_questions() {
        let svc = service(3, 3);
        let catalog = ids(&[1, 2, 3, 4, 5]);

        let snapshot = svc.initialize(student(), course(), &catalog).await.unwrap();
        assert_eq!(snapshot.active_set, ids(&[1, 2, 3]));
        assert_eq!(snapshot.mastered_count, 0);
        assert_eq!(snapshot.total_questions, 5);
        assert!(!snapshot.is_complete);
    }

    #[tokio::test]
    async fn initialize_with_small_catalog_activates_everything() {
        let svc = service(5, 3);
        let catalog = ids(&[1, 2]);

        let snapshot = svc.initialize(student(), course(), &catalog).await.unwrap();
        assert_eq!(snapshot.active_set, ids(&[1, 2]));
    }

    #[tokio::test]
    async fn initialize_is_idempotent() {
        let svc = service(3, 3);
        let catalog = ids(&[1, 2, 3, 4, 5]);

        let first = svc.initialize(student(), course(), &catalog).await.unwrap();
        // Progress made between the two calls must survive untouched.
        svc.submit_answer(student(), course(), QuestionId::new(1), true, &catalog)
            .await
            .unwrap();
        let second = svc.initialize(student(), course(), &catalog).await.unwrap();
        assert_eq!(first.active_set, second.active_set);
        assert_eq!(first.mastered_count, second.mastered_count);

        let third = svc.initialize(student(), course(), &catalog).await.unwrap();
        assert_eq!(second, third);
    }

    #[tokio::test]
    async fn initialize_rejects_empty_catalog() {
        let svc = service(3, 3);
        let err = svc.initialize(student(), course(), &[]).await.unwrap_err();
        assert!(matches!(err, SessionError::EmptyCourse));
    }

    #[tokio::test]
    async fn mastery_replaces_question_with_next_in_catalog() {
        let svc = service(3, 3);
        let catalog = ids(&[1, 2, 3, 4, 5]);
        svc.initialize(student(), course(), &catalog).await.unwrap();

        for _ in 0..2 {
            let outcome = svc
                .submit_answer(student(), course(), QuestionId::new(1), true, &catalog)
                .await
                .unwrap();
            assert!(!outcome.mastered);
            assert_eq!(outcome.snapshot.active_set, ids(&[1, 2, 3]));
        }

        let outcome = svc
            .submit_answer(student(), course(), QuestionId::new(1), true, &catalog)
            .await
            .unwrap();
        assert!(outcome.mastered);
        assert_eq!(outcome.snapshot.mastered_count, 1);
        assert_eq!(outcome.snapshot.active_set, ids(&[2, 3, 4]));
    }

    #[tokio::test]
    async fn incorrect_answer_resets_streak_and_keeps_set() {
        let svc = service(3, 3);
        let catalog = ids(&[1, 2, 3, 4, 5]);
        svc.initialize(student(), course(), &catalog).await.unwrap();

        svc.submit_answer(student(), course(), QuestionId::new(2), true, &catalog)
            .await
            .unwrap();
        let outcome = svc
            .submit_answer(student(), course(), QuestionId::new(2), false, &catalog)
            .await
            .unwrap();
        assert!(!outcome.mastered);
        assert_eq!(outcome.snapshot.active_set, ids(&[1, 2, 3]));

        let records = svc.progress_records(student(), course()).await.unwrap();
        let q2 = records
            .iter()
            .find(|r| r.question_id == QuestionId::new(2))
            .unwrap();
        assert_eq!(q2.streak, 0);
        assert!(q2.is_active);
    }

    #[tokio::test]
    async fn submitting_for_unknown_question_fails() {
        let svc = service(3, 3);
        let catalog = ids(&[1, 2, 3]);
        svc.initialize(student(), course(), &catalog).await.unwrap();

        let err = svc
            .submit_answer(student(), course(), QuestionId::new(99), true, &catalog)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::UnknownQuestion(q) if q == QuestionId::new(99)));
    }

    #[tokio::test]
    async fn submitting_before_initialize_fails() {
        let svc = service(3, 3);
        let catalog = ids(&[1, 2, 3]);

        let err = svc
            .submit_answer(student(), course(), QuestionId::new(1), true, &catalog)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::NotInitialized));
    }

    #[tokio::test]
    async fn submitting_for_mastered_question_fails() {
        let svc = service(3, 1);
        let catalog = ids(&[1, 2, 3, 4]);
        svc.initialize(student(), course(), &catalog).await.unwrap();

        let outcome = svc
            .submit_answer(student(), course(), QuestionId::new(1), true, &catalog)
            .await
            .unwrap();
        assert!(outcome.mastered);

        let err = svc
            .submit_answer(student(), course(), QuestionId::new(1), true, &catalog)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::AlreadyMastered(q) if q == QuestionId::new(1)));
    }

    #[tokio::test]
    async fn completed_course_rejects_further_answers() {
        let svc = service(2, 1);
        let catalog = ids(&[1, 2]);
        svc.initialize(student(), course(), &catalog).await.unwrap();

        svc.submit_answer(student(), course(), QuestionId::new(1), true, &catalog)
            .await
            .unwrap();
        let outcome = svc
            .submit_answer(student(), course(), QuestionId::new(2), true, &catalog)
            .await
            .unwrap();
        assert!(outcome.snapshot.is_complete);
        assert!(outcome.snapshot.active_set.is_empty());

        let err = svc
            .submit_answer(student(), course(), QuestionId::new(1), true, &catalog)
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::CourseCompleted));

        // Reads still work and report completion.
        let snapshot = svc.snapshot(student(), course(), &catalog).await.unwrap();
        assert!(snapshot.is_complete);
        let resumed = svc.initialize(student(), course(), &catalog).await.unwrap();
        assert!(resumed.is_complete);
    }

    #[tokio::test]
    async fn snapshot_before_initialize_fails() {
        let svc = service(3, 3);
        let catalog = ids(&[1, 2, 3]);

        let err = svc.snapshot(student(), course(), &catalog).await.unwrap_err();
        assert!(matches!(err, SessionError::NotInitialized));
        let err = svc.progress_records(student(), course()).await.unwrap_err();
        assert!(matches!(err, SessionError::NotInitialized));
    }

    #[tokio::test]
    async fn students_progress_independently() {
        let svc = service(2, 1);
        let catalog = ids(&[1, 2, 3]);
        let other = StudentId::new(2);

        svc.initialize(student(), course(), &catalog).await.unwrap();
        svc.initialize(other, course(), &catalog).await.unwrap();

        svc.submit_answer(student(), course(), QuestionId::new(1), true, &catalog)
            .await
            .unwrap();

        let mine = svc.snapshot(student(), course(), &catalog).await.unwrap();
        let theirs = svc.snapshot(other, course(), &catalog).await.unwrap();
        assert_eq!(mine.mastered_count, 1);
        assert_eq!(theirs.mastered_count, 0);
    }
}
