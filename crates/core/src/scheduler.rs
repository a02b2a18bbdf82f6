use std::collections::HashSet;

use thiserror::Error;

use crate::model::{MasterySettings, QuestionId, QuestionProgress};

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SchedulerError {
    #[error("question {0} is already mastered and must not be answered again")]
    AlreadyMastered(QuestionId),
}

//
// ─── TRANSITIONS ───────────────────────────────────────────────────────────────
//

/// What happened to a question's state as a result of one answer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AnswerTransition {
    /// Correct answer below the threshold; the streak grew, nothing else moved.
    Unchanged,
    /// The streak reached the threshold; the question left the active set.
    Mastered,
    /// Incorrect answer; the streak dropped back to zero.
    Reset,
}

//
// ─── SCHEDULER ─────────────────────────────────────────────────────────────────
//

/// Pure transition logic for the rotating active set.
///
/// The scheduler owns no state beyond its settings. Callers pass in the
/// current progress values and persist whatever comes back; every method is
/// deterministic, so two students with identical answer sequences converge on
/// identical schedules.
///
/// # Examples
///
/// ```
/// # use mastery_core::model::{QuestionId, QuestionProgress};
/// # use mastery_core::scheduler::{AnswerTransition, MasteryScheduler};
/// let scheduler = MasteryScheduler::new();
/// let progress = QuestionProgress::new_active(QuestionId::new(1));
///
/// let (next, transition) = scheduler.answer(&progress, true)?;
/// assert_eq!(next.streak(), 1);
/// assert_eq!(transition, AnswerTransition::Unchanged);
/// # Ok::<(), mastery_core::scheduler::SchedulerError>(())
/// ```
#[derive(Debug, Clone)]
pub struct MasteryScheduler {
    settings: MasterySettings,
}

impl MasteryScheduler {
    /// Create a scheduler with the recommended default settings.
    #[must_use]
    pub fn new() -> Self {
        Self::with_settings(MasterySettings::default_limits())
    }

    /// Create a scheduler with custom capacity and threshold settings.
    #[must_use]
    pub fn with_settings(settings: MasterySettings) -> Self {
        Self { settings }
    }

    #[must_use]
    pub fn settings(&self) -> &MasterySettings {
        &self.settings
    }

    /// Select the initial active set for a course.
    ///
    /// Takes the first `min(capacity, pool size)` identifiers in catalog
    /// order. The selection is deliberately deterministic: it keeps schedules
    /// reproducible for tests and support sessions, and any display-order
    /// shuffling is layered on by the client, not here.
    #[must_use]
    pub fn initial_active_set(&self, all_questions: &[QuestionId]) -> Vec<QuestionId> {
        let capacity = self.capacity();
        all_questions.iter().copied().take(capacity).collect()
    }

    /// Apply one answer to a question's progress.
    ///
    /// - Correct: the streak grows; reaching the threshold masters the
    ///   question and retires it from the active set.
    /// - Incorrect: the streak resets to zero and the question keeps its
    ///   active slot. A wrong answer never evicts a question.
    ///
    /// # Errors
    ///
    /// Returns `SchedulerError::AlreadyMastered` if `progress` is already
    /// mastered. That is a caller contract violation (a retired question was
    /// presented again) and must surface, not be ignored.
    pub fn answer(
        &self,
        progress: &QuestionProgress,
        is_correct: bool,
    ) -> Result<(QuestionProgress, AnswerTransition), SchedulerError> {
        if progress.is_mastered() {
            return Err(SchedulerError::AlreadyMastered(progress.question_id()));
        }

        if !is_correct {
            return Ok((progress.with_streak(0), AnswerTransition::Reset));
        }

        let streak = progress.streak().saturating_add(1);
        let next = progress.with_streak(streak);

        if streak >= self.settings.mastery_threshold() {
            Ok((next.into_mastered(), AnswerTransition::Mastered))
        } else {
            Ok((next, AnswerTransition::Unchanged))
        }
    }

    /// Choose questions to promote into the active set after a mastery.
    ///
    /// Walks `all_questions` in catalog order and returns ids that are
    /// neither active nor mastered, until the active set would again hold
    /// `min(capacity, un-mastered pool)` members. Returns an empty vec when
    /// the set is already full or the pool is exhausted.
    #[must_use]
    pub fn replenish(
        &self,
        active: &HashSet<QuestionId>,
        mastered: &HashSet<QuestionId>,
        all_questions: &[QuestionId],
    ) -> Vec<QuestionId> {
        let unmastered = all_questions
            .iter()
            .filter(|id| !mastered.contains(id))
            .count();
        let target = self.capacity().min(unmastered);
        let need = target.saturating_sub(active.len());

        all_questions
            .iter()
            .copied()
            .filter(|id| !active.contains(id) && !mastered.contains(id))
            .take(need)
            .collect()
    }

    fn capacity(&self) -> usize {
        usize::try_from(self.settings.active_set_capacity()).unwrap_or(usize::MAX)
    }
}

impl Default for MasteryScheduler {
    fn default() -> Self {
        Self::new()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
