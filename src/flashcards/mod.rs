//! Flashcards and spaced repetition
//!
//! This module provides:
//! - Deck and card models with per-user memory state
//! - FSRS scheduling for the two-grade (Again/Good) flow
//! - Due-card selection with a daily new-card cap
//! - CSV card import

pub mod algorithm;
pub mod import;
pub mod models;
pub mod selector;

pub use algorithm::{schedule, ScheduleResult, SchedulerParams};
pub use import::{parse_cards_csv, read_cards_csv, ImportError};
pub use models::*;
pub use selector::{
    plan_session, select_session, DailyLedger, Selection, SelectionRequest, SessionPlan, StudyMode,
};
