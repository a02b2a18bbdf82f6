#![forbid(unsafe_code)]

pub mod driver;
pub mod error;
pub mod sessions;

pub use mastery_core::Clock;

pub use driver::{DriveSummary, QuestionPicker, SessionDriver};
pub use error::SessionError;
pub use sessions::{AnswerOutcome, SessionService, SessionSnapshot};
