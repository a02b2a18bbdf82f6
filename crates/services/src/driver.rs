//! Client-side session driving: question selection and the answer loop.
//!
//! Display order is the one place randomness belongs. The scheduler itself is
//! deterministic, so the picker keeps its RNG separately seedable for
//! reproducible runs.

use mastery_core::model::{CourseId, QuestionId, StudentId};
use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

use crate::error::SessionError;
use crate::sessions::{SessionService, SessionSnapshot};

//
// ─── QUESTION PICKER ───────────────────────────────────────────────────────────
//

/// Uniform selection over the current active set.
pub struct QuestionPicker {
    rng: StdRng,
}

impl QuestionPicker {
    /// Picker seeded from OS entropy.
    #[must_use]
    pub fn new() -> Self {
        Self {
            rng: StdRng::from_os_rng(),
        }
    }

    /// Picker with a fixed seed; identical seeds replay identical choices.
    #[must_use]
    pub fn seeded(seed: u64) -> Self {
        Self {
            rng: StdRng::seed_from_u64(seed),
        }
    }

    /// Choose one question uniformly at random, or `None` for an empty set.
    pub fn pick(&mut self, active_set: &[QuestionId]) -> Option<QuestionId> {
        if active_set.is_empty() {
            return None;
        }
        let index = self.rng.random_range(0..active_set.len());
        Some(active_set[index])
    }
}

impl Default for QuestionPicker {
    fn default() -> Self {
        Self::new()
    }
}

//
// ─── SESSION DRIVER ────────────────────────────────────────────────────────────
//

/// Summary of a driven session run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DriveSummary {
    pub answers_submitted: usize,
    pub snapshot: SessionSnapshot,
}

/// Runs the answer loop against a [`SessionService`].
///
/// Initializes (or resumes) the session, repeatedly picks a question from the
/// active set, grades it through the caller-supplied oracle, and submits,
/// stopping once the course is complete. When a submit fails, the in-flight
/// question is kept: a resumed run re-presents the same question instead of
/// assuming the answer landed.
pub struct SessionDriver<'a> {
    service: &'a SessionService,
    picker: QuestionPicker,
    pending: Option<QuestionId>,
}

impl<'a> SessionDriver<'a> {
    #[must_use]
    pub fn new(service: &'a SessionService, picker: QuestionPicker) -> Self {
        Self {
            service,
            picker,
            pending: None,
        }
    }

    /// Drive the session to completion.
    ///
    /// `grade` receives each presented question and returns whether the
    /// student answered it correctly.
    ///
    /// # Errors
    ///
    /// Propagates any `SessionError` from the service. The failed question
    /// stays pending, so calling `run` again re-presents it first.
    pub async fn run<F>(
        &mut self,
        student_id: StudentId,
        course_id: CourseId,
        all_questions: &[QuestionId],
        mut grade: F,
    ) -> Result<DriveSummary, SessionError>
    where
        F: FnMut(QuestionId) -> bool,
    {
        let mut snapshot = self
            .service
            .initialize(student_id, course_id, all_questions)
            .await?;
        let mut answers_submitted = 0;

        while !snapshot.is_complete {
            let Some(question_id) = self.next_question(&snapshot.active_set) else {
                break;
            };
            let is_correct = grade(question_id);
            let outcome = self
                .service
                .submit_answer(student_id, course_id, question_id, is_correct, all_questions)
                .await?;
            self.pending = None;
            answers_submitted += 1;
            snapshot = outcome.snapshot;
        }

        Ok(DriveSummary {
            answers_submitted,
            snapshot,
        })
    }

    fn next_question(&mut self, active_set: &[QuestionId]) -> Option<QuestionId> {
        if let Some(pending) = self.pending {
            return Some(pending);
        }
        let picked = self.picker.pick(active_set);
        self.pending = picked;
        picked
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//

#[cfg(test)]
mod tests {
    use super::*;

    fn ids(values: &[u64]) -> Vec<QuestionId> {
        values.iter().copied().map(QuestionId::new).collect()
    }

    #[test]
    fn pick_returns_none_for_empty_set() {
        let mut picker = QuestionPicker::seeded(7);
        assert_eq!(picker.pick(&[]), None);
    }

    #[test]
    fn pick_only_returns_members() {
        let mut picker = QuestionPicker::seeded(7);
        let set = ids(&[3, 5, 9]);
        for _ in 0..50 {
            let picked = picker.pick(&set).unwrap();
            assert!(set.contains(&picked));
        }
    }

    #[test]
    fn identical_seeds_replay_identical_choices() {
        let mut a = QuestionPicker::seeded(42);
        let mut b = QuestionPicker::seeded(42);
        let set = ids(&[1, 2, 3, 4, 5]);

        let from_a: Vec<_> = (0..20).map(|_| a.pick(&set).unwrap()).collect();
        let from_b: Vec<_> = (0..20).map(|_| b.pick(&set).unwrap()).collect();
        assert_eq!(from_a, from_b);
    }

    #[test]
    fn different_seeds_eventually_diverge() {
        let mut a = QuestionPicker::seeded(1);
        let mut b = QuestionPicker::seeded(2);
        let set = ids(&[1, 2, 3, 4, 5, 6, 7, 8]);

        let from_a: Vec<_> = (0..50).map(|_| a.pick(&set).unwrap()).collect();
        let from_b: Vec<_> = (0..50).map(|_| b.pick(&set).unwrap()).collect();
        assert_ne!(from_a, from_b);
    }
}
