//! Local durable storage for decks, cards and per-user memory state
//!
//! The session and selection code depend only on [`StorageInterface`]; the
//! concrete backend is constructed by the caller and passed in.

mod file_storage;
mod memory;
mod retry;

use std::collections::HashMap;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::flashcards::{Card, CardMemoryState, Deck, LastStudied};

pub use file_storage::FileStorage;
pub use memory::MemoryStorage;
pub use retry::RetryPolicy;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Deck not found: {0}")]
    DeckNotFound(Uuid),

    /// The store is busy (closing, reopening, locked); the operation may succeed if retried
    #[error("Storage contention: {0}")]
    Contention(String),

    #[error("Storage is offline")]
    Offline,

    #[error("Data directory not found")]
    DataDirNotFound,
}

impl StorageError {
    /// Whether retrying the same operation can succeed
    pub fn is_retryable(&self) -> bool {
        matches!(self, StorageError::Contention(_))
    }

    pub fn is_not_found(&self) -> bool {
        matches!(self, StorageError::DeckNotFound(_))
    }
}

pub type Result<T> = std::result::Result<T, StorageError>;

/// Read/write contract against the local store.
///
/// Memory state is keyed by `(user_id, card_id)`. Markers (last studied
/// position, last sync time) are keyed by `(user_id, deck_id)`.
#[async_trait]
pub trait StorageInterface: Send + Sync {
    async fn list_decks(&self) -> Result<Vec<Deck>>;

    async fn get_deck(&self, deck_id: Uuid) -> Result<Deck>;

    /// Insert or replace a deck
    async fn store_deck(&self, deck: &Deck) -> Result<()>;

    /// Insert or replace cards, keeping deck card counts current
    async fn store_cards(&self, cards: &[Card]) -> Result<()>;

    async fn get_cards_for_deck(&self, deck_id: Uuid) -> Result<Vec<Card>>;

    async fn get_card_progress(
        &self,
        user_id: &str,
        card_id: Uuid,
    ) -> Result<Option<CardMemoryState>>;

    /// All memory state of a user
    async fn list_progress(&self, user_id: &str) -> Result<Vec<CardMemoryState>>;

    /// Insert or replace one memory state
    async fn update_card_progress(&self, user_id: &str, state: &CardMemoryState) -> Result<()>;

    /// Insert the states whose card has no memory state yet; an existing
    /// state is never overwritten. Returns the ids that were inserted.
    async fn seed_progress(&self, user_id: &str, states: &[CardMemoryState]) -> Result<Vec<Uuid>>;

    /// Remove a user's memory state for every card of a deck, along with its
    /// markers. Returns the number of states removed.
    async fn clear_progress(&self, user_id: &str, deck_id: Uuid) -> Result<usize>;

    async fn last_studied(&self, user_id: &str, deck_id: Uuid) -> Result<Option<LastStudied>>;

    async fn set_last_studied(&self, user_id: &str, deck_id: Uuid, marker: LastStudied)
        -> Result<()>;

    async fn last_synced(&self, user_id: &str, deck_id: Uuid) -> Result<Option<DateTime<Utc>>>;

    async fn set_last_synced(&self, user_id: &str, deck_id: Uuid, at: DateTime<Utc>)
        -> Result<()>;

    /// Memory state of a user for one deck, keyed by card id
    async fn deck_progress(
        &self,
        user_id: &str,
        deck_id: Uuid,
    ) -> Result<HashMap<Uuid, CardMemoryState>> {
        Ok(self
            .list_progress(user_id)
            .await?
            .into_iter()
            .filter(|state| state.deck_id == deck_id)
            .map(|state| (state.card_id, state))
            .collect())
    }

    /// Cards of a deck that have been graded and whose next review has passed,
    /// oldest due first
    async fn get_due_cards(
        &self,
        user_id: &str,
        deck_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Vec<Card>> {
        let progress = self.deck_progress(user_id, deck_id).await?;
        let mut due: Vec<(DateTime<Utc>, Card)> = self
            .get_cards_for_deck(deck_id)
            .await?
            .into_iter()
            .filter_map(|card| {
                progress
                    .get(&card.id)
                    .filter(|state| !state.is_new() && state.is_due(now))
                    .map(|state| (state.next_review, card))
            })
            .collect();
        due.sort_by(|(a_due, a), (b_due, b)| {
            a_due.cmp(b_due).then(a.sort_order.cmp(&b.sort_order))
        });
        Ok(due.into_iter().map(|(_, card)| card).collect())
    }
}
