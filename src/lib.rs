//! Spaced-repetition study engine
//!
//! FSRS scheduling, due-card selection, a session state machine over a
//! pluggable local store, and a sync boundary to a remote store.

pub mod config;
pub mod flashcards;
pub mod session;
pub mod storage;
pub mod sync;

pub use config::StudyConfig;
pub use flashcards::{Card, CardMemoryState, Deck, Grade, StudyMode};
pub use session::{SessionError, SessionView, StudyPrompt, StudySession};
pub use storage::{FileStorage, MemoryStorage, StorageError, StorageInterface};
