use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::model::ids::QuestionId;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

/// Errors raised when loading or constructing progress state.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum ProgressError {
    #[error("question {0} is mastered but still marked active")]
    MasteredButActive(QuestionId),
}

//
// ─── QUESTION PROGRESS ─────────────────────────────────────────────────────────
//

/// Per-question learning state for one student in one course.
///
/// Tracks the consecutive-correct streak, whether the question currently
/// occupies an active-set slot, and whether it has been mastered. Mastery is
/// terminal: there is no API path that clears the flag, and a mastered
/// question never holds an active slot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QuestionProgress {
    question_id: QuestionId,
    streak: u32,
    is_active: bool,
    is_mastered: bool,
}

impl QuestionProgress {
    /// Creates fresh progress for a question holding an active-set slot.
    #[must_use]
    pub fn new_active(question_id: QuestionId) -> Self {
        Self {
            question_id,
            streak: 0,
            is_active: true,
            is_mastered: false,
        }
    }

    /// Creates fresh progress for a question waiting in the pool.
    #[must_use]
    pub fn new_inactive(question_id: QuestionId) -> Self {
        Self {
            question_id,
            streak: 0,
            is_active: false,
            is_mastered: false,
        }
    }

    /// Rebuilds progress from persisted state.
    ///
    /// # Errors
    ///
    /// Returns `ProgressError::MasteredButActive` if the stored flags violate
    /// the mastered-implies-inactive invariant.
    pub fn from_persisted(
        question_id: QuestionId,
        streak: u32,
        is_active: bool,
        is_mastered: bool,
    ) -> Result<Self, ProgressError> {
        if is_mastered && is_active {
            return Err(ProgressError::MasteredButActive(question_id));
        }

        Ok(Self {
            question_id,
            streak,
            is_active,
            is_mastered,
        })
    }

    #[must_use]
    pub fn question_id(&self) -> QuestionId {
        self.question_id
    }

    /// Consecutive correct answers since the last incorrect one.
    #[must_use]
    pub fn streak(&self) -> u32 {
        self.streak
    }

    #[must_use]
    pub fn is_active(&self) -> bool {
        self.is_active
    }

    #[must_use]
    pub fn is_mastered(&self) -> bool {
        self.is_mastered
    }

    // Transition constructors. Only the scheduler builds these, so the
    // invariants stay enforceable in one place.

    pub(crate) fn with_streak(&self, streak: u32) -> Self {
        Self {
            streak,
            ..self.clone()
        }
    }

    pub(crate) fn into_mastered(self) -> Self {
        Self {
            is_active: false,
            is_mastered: true,
            ..self
        }
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
