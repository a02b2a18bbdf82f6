mod ids;
mod progress;
mod settings;

pub use ids::{CourseId, ParseIdError, QuestionId, StudentId};
pub use progress::{ProgressError, QuestionProgress};
pub use settings::{MasterySettings, SettingsError};
