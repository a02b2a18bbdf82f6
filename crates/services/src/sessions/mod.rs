mod service;
mod snapshot;

// Public API of the session subsystem.
pub use crate::error::SessionError;
pub use service::{AnswerOutcome, SessionService};
pub use snapshot::SessionSnapshot;
