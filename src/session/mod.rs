//! Study session orchestration
//!
//! A [`StudySession`] drives one user through the working list of a deck:
//! it loads the list through the selector, presents one card at a time,
//! schedules and persists each grade, and tracks the day's progress so an
//! interrupted session can be resumed.

mod orchestrator;
mod state;

pub use orchestrator::{deck_prompt, GradeOutcome, SessionError, StudySession};
pub use state::{study_prompt, SessionPhase, SessionState, SessionView, StudyPrompt};
