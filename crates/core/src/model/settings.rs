use serde::{Deserialize, Serialize};
use thiserror::Error;

//
// ─── ERRORS ────────────────────────────────────────────────────────────────────
//

#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[non_exhaustive]
pub enum SettingsError {
    #[error("active set capacity must be > 0")]
    InvalidCapacity,

    #[error("mastery threshold must be > 0")]
    InvalidThreshold,
}

//
// ─── SETTINGS ──────────────────────────────────────────────────────────────────
//

/// Tuning knobs for the mastery scheduler.
///
/// Both values are deployment configuration, not algorithm constants; the
/// defaults reflect a comfortable drill cadence rather than anything the
/// algorithm requires.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MasterySettings {
    active_set_capacity: u32,
    mastery_threshold: u32,
}

impl MasterySettings {
    /// Creates the recommended defaults: 5 questions in rotation, mastered
    /// after 3 consecutive correct answers.
    #[must_use]
    pub fn default_limits() -> Self {
        Self {
            active_set_capacity: 5,
            mastery_threshold: 3,
        }
    }

    /// Creates custom settings.
    ///
    /// # Errors
    ///
    /// Returns an error if either parameter is zero.
    pub fn new(active_set_capacity: u32, mastery_threshold: u32) -> Result<Self, SettingsError> {
        if active_set_capacity == 0 {
            return Err(SettingsError::InvalidCapacity);
        }
        if mastery_threshold == 0 {
            return Err(SettingsError::InvalidThreshold);
        }

        Ok(Self {
            active_set_capacity,
            mastery_threshold,
        })
    }

    /// Target number of questions kept in rotation.
    #[must_use]
    pub fn active_set_capacity(&self) -> u32 {
        self.active_set_capacity
    }

    /// Consecutive correct answers required to master a question.
    #[must_use]
    pub fn mastery_threshold(&self) -> u32 {
        self.mastery_threshold
    }
}

impl Default for MasterySettings {
    fn default() -> Self {
        Self::default_limits()
    }
}

//
// ─── TESTS ─────────────────────────────────────────────────────────────────────
//
