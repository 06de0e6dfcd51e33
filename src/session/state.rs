use serde::Serialize;
use uuid::Uuid;

use crate::flashcards::{Card, StudyMode};

/// Where a study session is in its lifecycle
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "phase", rename_all = "camelCase")]
pub enum SessionPhase {
    Loading,
    /// A card is presented; `showing` is false while its grade is being written
    Active { showing: bool },
    Complete,
    /// Loading failed; `reload` may recover
    Failed { message: String },
}

impl SessionPhase {
    pub fn name(&self) -> &'static str {
        match self {
            SessionPhase::Loading => "loading",
            SessionPhase::Active { showing: true } => "showing",
            SessionPhase::Active { showing: false } => "hidden",
            SessionPhase::Complete => "complete",
            SessionPhase::Failed { .. } => "failed",
        }
    }
}

/// State owned by one study session
#[derive(Debug, Clone)]
pub struct SessionState {
    pub deck_id: Option<Uuid>,
    pub mode: StudyMode,
    pub phase: SessionPhase,
    /// Working list in presentation order
    pub cards: Vec<Card>,
    pub current_index: usize,
    /// Cards already studied today before this list was selected
    pub resumed_from: usize,
    pub new_today: usize,
    pub reviews_today: usize,
    /// Extra-study grades; never counted toward the daily totals
    pub replayed: usize,
    /// Selection fell back to an empty list because the store was offline
    pub offline: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            deck_id: None,
            mode: StudyMode::Normal,
            phase: SessionPhase::Loading,
            cards: Vec::new(),
            current_index: 0,
            resumed_from: 0,
            new_today: 0,
            reviews_today: 0,
            replayed: 0,
            offline: false,
        }
    }
}

impl SessionState {
    pub fn loading(deck_id: Uuid, mode: StudyMode) -> Self {
        Self {
            deck_id: Some(deck_id),
            mode,
            ..Default::default()
        }
    }

    pub fn current_card(&self) -> Option<&Card> {
        match self.phase {
            SessionPhase::Active { .. } => self.cards.get(self.current_index),
            _ => None,
        }
    }

    pub fn can_grade(&self) -> bool {
        self.phase == SessionPhase::Active { showing: true } && self.current_card().is_some()
    }

    pub fn is_complete(&self) -> bool {
        self.phase == SessionPhase::Complete
    }

    /// Move past the current card, completing the session after the last one
    pub(crate) fn advance(&mut self) {
        self.current_index += 1;
        self.phase = if self.current_index >= self.cards.len() {
            SessionPhase::Complete
        } else {
            SessionPhase::Active { showing: true }
        };
    }

    pub fn view(&self) -> SessionView {
        let error = match &self.phase {
            SessionPhase::Failed { message } => Some(message.clone()),
            _ => None,
        };
        SessionView {
            current_card: self.current_card().cloned(),
            showing_card: self.phase == SessionPhase::Active { showing: true },
            is_complete: self.is_complete(),
            is_loading: self.phase == SessionPhase::Loading,
            mode: self.mode,
            position: self.resumed_from + (self.current_index + 1).min(self.cards.len()),
            total: self.resumed_from + self.cards.len(),
            new_today: self.new_today,
            reviews_today: self.reviews_today,
            offline: self.offline,
            error,
        }
    }
}

/// Snapshot handed to the UI
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionView {
    pub current_card: Option<Card>,
    pub showing_card: bool,
    pub is_complete: bool,
    pub is_loading: bool,
    pub mode: StudyMode,
    /// 1-based position among today's cards
    pub position: usize,
    pub total: usize,
    pub new_today: usize,
    pub reviews_today: usize,
    pub offline: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Label for the entry point of a deck
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum StudyPrompt {
    Study,
    /// An interrupted session can be resumed
    Continue,
    /// Nothing left for today; extra-study is available
    StudyAgain,
}

/// Decide which entry point to offer for a deck
pub fn study_prompt(
    last_index_today: usize,
    new_graded_today: usize,
    new_card_cap: usize,
    remaining: usize,
    graded_today: usize,
) -> StudyPrompt {
    if remaining > 0 && last_index_today > 0 && new_graded_today < new_card_cap {
        StudyPrompt::Continue
    } else if remaining == 0 && graded_today > 0 {
        StudyPrompt::StudyAgain
    } else {
        StudyPrompt::Study
    }
}
