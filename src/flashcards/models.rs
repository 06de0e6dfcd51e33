//! Data models for the flashcard system

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::algorithm::DEFAULT_DIFFICULTY;

/// A deck is an ordered collection of flashcards
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Deck {
    pub id: Uuid,
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub description: Option<String>,
    #[serde(default)]
    pub card_count: usize,
    /// Daily cap on cards admitted for the first time
    #[serde(default = "default_new_cards_per_day")]
    pub new_cards_per_day: usize,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

pub(crate) fn default_new_cards_per_day() -> usize {
    20
}

impl Deck {
    pub fn new(name: String) -> Self {
        let now = Utc::now();
        Self {
            id: Uuid::new_v4(),
            name,
            description: None,
            card_count: 0,
            new_cards_per_day: default_new_cards_per_day(),
            created_at: now,
            updated_at: now,
        }
    }
}

/// A flashcard with question (front) and answer (back). Read-only to the scheduler.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Card {
    pub id: Uuid,
    pub deck_id: Uuid,
    pub front: String,
    pub back: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub media: Option<String>,
    #[serde(default)]
    pub sort_order: i32,
    pub created_at: DateTime<Utc>,
}

impl Card {
    pub fn new(deck_id: Uuid, front: String, back: String, sort_order: i32) -> Self {
        Self {
            id: Uuid::new_v4(),
            deck_id,
            front,
            back,
            media: None,
            sort_order,
            created_at: Utc::now(),
        }
    }
}

/// Outcome of a single review
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Grade {
    /// Failed recall
    Again,
    /// Successful recall
    Good,
}

impl Grade {
    /// Position on the four-point FSRS rating scale
    pub fn rating(self) -> f64 {
        match self {
            Grade::Again => 1.0,
            Grade::Good => 3.0,
        }
    }
}

/// Memory state of one card for one user
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CardMemoryState {
    pub card_id: Uuid,
    pub deck_id: Uuid,
    #[serde(default = "default_difficulty")]
    pub difficulty: f64,
    /// Days until recall probability decays to the retention target
    #[serde(default)]
    pub stability: f64,
    /// Recall probability at the last review
    #[serde(default = "default_retrievability")]
    pub retrievability: f64,
    /// Total graded presentations
    #[serde(default)]
    pub reps: u32,
    /// Number of `Again` grades
    #[serde(default)]
    pub lapses: u32,
    /// Days from the last review until the card is due
    #[serde(default)]
    pub interval: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub review_date: Option<DateTime<Utc>>,
    pub next_review: DateTime<Utc>,
}

fn default_difficulty() -> f64 {
    DEFAULT_DIFFICULTY
}

fn default_retrievability() -> f64 {
    1.0
}

impl CardMemoryState {
    /// Default state for a card admitted into a session but not yet graded
    pub fn seed(card: &Card, now: DateTime<Utc>) -> Self {
        Self {
            card_id: card.id,
            deck_id: card.deck_id,
            difficulty: DEFAULT_DIFFICULTY,
            stability: 0.0,
            retrievability: 1.0,
            reps: 0,
            lapses: 0,
            interval: 0.0,
            review_date: None,
            next_review: now,
        }
    }

    /// True until the card has been graded once
    pub fn is_new(&self) -> bool {
        self.reps == 0
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        self.next_review <= now
    }

    /// Whether the last grade happened on the given (UTC) day
    pub fn graded_on(&self, day: NaiveDate) -> bool {
        self.review_date
            .map(|at| at.date_naive() == day)
            .unwrap_or(false)
    }

    /// Fractional days since the last grade, 0 for a card never graded
    pub fn elapsed_days(&self, now: DateTime<Utc>) -> f64 {
        match self.review_date {
            Some(at) => ((now - at).num_seconds() as f64 / 86_400.0).max(0.0),
            None => 0.0,
        }
    }
}

/// Position reached in today's study of a deck
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LastStudied {
    pub index: usize,
    pub day: NaiveDate,
}

impl LastStudied {
    /// The recorded index if it belongs to `day`, otherwise 0
    pub fn index_on(&self, day: NaiveDate) -> usize {
        if self.day == day {
            self.index
        } else {
            0
        }
    }
}

/// Statistics for a deck
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ReviewStats {
    pub total_cards: usize,
    /// Cards with no memory state at all
    pub new_cards: usize,
    /// Cards admitted into a session but never graded
    pub admitted_cards: usize,
    pub due_cards: usize,
    pub graded_today: usize,
    pub new_today: usize,
}

impl ReviewStats {
    pub fn compute<'a>(
        cards: &[Card],
        states: impl Fn(Uuid) -> Option<&'a CardMemoryState>,
        now: DateTime<Utc>,
    ) -> Self {
        let today = now.date_naive();
        let mut stats = ReviewStats {
            total_cards: cards.len(),
            ..Default::default()
        };

        for card in cards {
            match states(card.id) {
                None => stats.new_cards += 1,
                Some(state) if state.is_new() => stats.admitted_cards += 1,
                Some(state) => {
                    if state.graded_on(today) {
                        stats.graded_today += 1;
                        if state.reps == 1 {
                            stats.new_today += 1;
                        }
                    } else if state.is_due(now) {
                        stats.due_cards += 1;
                    }
                }
            }
        }

        stats
    }
}
