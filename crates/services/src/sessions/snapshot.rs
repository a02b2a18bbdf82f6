use mastery_core::model::QuestionId;
use serde::{Deserialize, Serialize};
use storage::repository::ProgressRecord;

/// Aggregated view of one student's standing in a course.
///
/// Derived from stored progress on demand, never persisted. The active set is
/// reported in catalog order so identical histories always render identically.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSnapshot {
    pub active_set: Vec<QuestionId>,
    pub mastered_count: usize,
    pub total_questions: usize,
    pub is_complete: bool,
}

impl SessionSnapshot {
    /// Builds a snapshot from stored records, ordering the active set by the
    /// catalog sequence.
    #[must_use]
    pub(crate) fn from_records(records: &[ProgressRecord], all_questions: &[QuestionId]) -> Self {
        let active: std::collections::HashSet<QuestionId> = records
            .iter()
            .filter(|r| r.is_active)
            .map(|r| r.question_id)
            .collect();

        let active_set: Vec<QuestionId> = all_questions
            .iter()
            .copied()
            .filter(|id| active.contains(id))
            .collect();

        let mastered_count = records.iter().filter(|r| r.is_mastered).count();
        let total_questions = records.len();

        Self {
            active_set,
            mastered_count,
            total_questions,
            is_complete: total_questions > 0 && mastered_count == total_questions,
        }
    }
}
