//! In-memory storage, used for tests and offline-only runs

use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use super::{Result, StorageError, StorageInterface};
use crate::flashcards::{Card, CardMemoryState, Deck, LastStudied};

#[derive(Default)]
struct Inner {
    decks: HashMap<Uuid, Deck>,
    cards: HashMap<Uuid, Card>,
    progress: HashMap<(String, Uuid), CardMemoryState>,
    last_studied: HashMap<(String, Uuid), LastStudied>,
    last_synced: HashMap<(String, Uuid), DateTime<Utc>>,
    /// Pending simulated contention failures
    failing_reads: usize,
    failing_writes: usize,
    offline: bool,
    /// Latency added to every memory-state write
    progress_write_delay: Option<Duration>,
}

/// Storage held entirely in memory
#[derive(Default)]
pub struct MemoryStorage {
    inner: Mutex<Inner>,
}

impl MemoryStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make the next `count` reads fail with a retryable contention error
    pub fn fail_next_reads(&self, count: usize) {
        self.lock().failing_reads = count;
    }

    /// Make the next `count` writes fail with a retryable contention error
    pub fn fail_next_writes(&self, count: usize) {
        self.lock().failing_writes = count;
    }

    /// Hold each `update_card_progress` for `delay` before it applies
    pub fn delay_progress_writes(&self, delay: Duration) {
        self.lock().progress_write_delay = Some(delay);
    }

    /// Make every operation fail with [`StorageError::Offline`]
    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn read(&self) -> Result<MutexGuard<'_, Inner>> {
        let mut inner = self.lock();
        if inner.offline {
            return Err(StorageError::Offline);
        }
        if inner.failing_reads > 0 {
            inner.failing_reads -= 1;
            return Err(StorageError::Contention("store is closing".to_string()));
        }
        Ok(inner)
    }

    fn write(&self) -> Result<MutexGuard<'_, Inner>> {
        let mut inner = self.lock();
        if inner.offline {
            return Err(StorageError::Offline);
        }
        if inner.failing_writes > 0 {
            inner.failing_writes -= 1;
            return Err(StorageError::Contention("store is closing".to_string()));
        }
        Ok(inner)
    }
}

fn key(user_id: &str, id: Uuid) -> (String, Uuid) {
    (user_id.to_string(), id)
}

#[async_trait]
impl StorageInterface for MemoryStorage {
    async fn list_decks(&self) -> Result<Vec<Deck>> {
        let mut decks: Vec<Deck> = self.read()?.decks.values().cloned().collect();
        decks.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(decks)
    }

    async fn get_deck(&self, deck_id: Uuid) -> Result<Deck> {
        self.read()?
            .decks
            .get(&deck_id)
            .cloned()
            .ok_or(StorageError::DeckNotFound(deck_id))
    }

    async fn store_deck(&self, deck: &Deck) -> Result<()> {
        self.write()?.decks.insert(deck.id, deck.clone());
        Ok(())
    }

    async fn store_cards(&self, cards: &[Card]) -> Result<()> {
        let mut inner = self.write()?;
        for card in cards {
            inner.cards.insert(card.id, card.clone());
        }
        let Inner {
            decks,
            cards: stored,
            ..
        } = &mut *inner;
        for deck in decks.values_mut() {
            deck.card_count = stored.values().filter(|c| c.deck_id == deck.id).count();
        }
        Ok(())
    }

    async fn get_cards_for_deck(&self, deck_id: Uuid) -> Result<Vec<Card>> {
        let mut cards: Vec<Card> = self
            .read()?
            .cards
            .values()
            .filter(|c| c.deck_id == deck_id)
            .cloned()
            .collect();
        cards.sort_by_key(|c| c.sort_order);
        Ok(cards)
    }

    async fn get_card_progress(
        &self,
        user_id: &str,
        card_id: Uuid,
    ) -> Result<Option<CardMemoryState>> {
        Ok(self.read()?.progress.get(&key(user_id, card_id)).cloned())
    }

    async fn list_progress(&self, user_id: &str) -> Result<Vec<CardMemoryState>> {
        Ok(self
            .read()?
            .progress
            .iter()
            .filter(|((user, _), _)| user == user_id)
            .map(|(_, state)| state.clone())
            .collect())
    }

    async fn update_card_progress(&self, user_id: &str, state: &CardMemoryState) -> Result<()> {
        let delay = self.lock().progress_write_delay;
        if let Some(delay) = delay {
            tokio::time::sleep(delay).await;
        }
        self.write()?
            .progress
            .insert(key(user_id, state.card_id), state.clone());
        Ok(())
    }

    async fn seed_progress(&self, user_id: &str, states: &[CardMemoryState]) -> Result<Vec<Uuid>> {
        let mut inner = self.write()?;
        let mut inserted = Vec::new();
        for state in states {
            let k = key(user_id, state.card_id);
            if !inner.progress.contains_key(&k) {
                inner.progress.insert(k, state.clone());
                inserted.push(state.card_id);
            }
        }
        Ok(inserted)
    }

    async fn clear_progress(&self, user_id: &str, deck_id: Uuid) -> Result<usize> {
        let mut inner = self.write()?;
        let before = inner.progress.len();
        inner
            .progress
            .retain(|(user, _), state| !(user == user_id && state.deck_id == deck_id));
        let removed = before - inner.progress.len();
        inner.last_studied.remove(&key(user_id, deck_id));
        inner.last_synced.remove(&key(user_id, deck_id));
        Ok(removed)
    }

    async fn last_studied(&self, user_id: &str, deck_id: Uuid) -> Result<Option<LastStudied>> {
        Ok(self
            .read()?
            .last_studied
            .get(&key(user_id, deck_id))
            .copied())
    }

    async fn set_last_studied(
        &self,
        user_id: &str,
        deck_id: Uuid,
        marker: LastStudied,
    ) -> Result<()> {
        self.write()?
            .last_studied
            .insert(key(user_id, deck_id), marker);
        Ok(())
    }

    async fn last_synced(&self, user_id: &str, deck_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        Ok(self.read()?.last_synced.get(&key(user_id, deck_id)).copied())
    }

    async fn set_last_synced(
        &self,
        user_id: &str,
        deck_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<()> {
        self.write()?.last_synced.insert(key(user_id, deck_id), at);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_injected_failures_are_retryable() {
        let store = MemoryStorage::new();
        store.fail_next_reads(1);

        let err = store.list_decks().await.unwrap_err();
        assert!(err.is_retryable());
        assert!(store.list_decks().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_offline_is_not_retryable() {
        let store = MemoryStorage::new();
        store.set_offline(true);

        let err = store.list_progress("u").await.unwrap_err();
        assert!(matches!(err, StorageError::Offline));
        assert!(!err.is_retryable());
    }

    #[tokio::test]
    async fn test_progress_is_scoped_per_user() {
        let store = MemoryStorage::new();
        let deck = Deck::new("d".to_string());
        let card = Card::new(deck.id, "q".into(), "a".into(), 0);
        store.store_deck(&deck).await.unwrap();
        store.store_cards(&[card.clone()]).await.unwrap();
        store
            .seed_progress("a", &[CardMemoryState::seed(&card, Utc::now())])
            .await
            .unwrap();

        assert_eq!(store.list_progress("a").await.unwrap().len(), 1);
        assert!(store.get_card_progress("b", card.id).await.unwrap().is_none());
        assert_eq!(store.get_deck(deck.id).await.unwrap().card_count, 1);
    }

    #[tokio::test]
    async fn test_due_cards_skip_seeded_and_future() {
        let store = MemoryStorage::new();
        let deck = Deck::new("d".to_string());
        let now = Utc::now();
        let cards: Vec<Card> = (0..4)
            .map(|i| Card::new(deck.id, format!("q{}", i), "a".into(), i))
            .collect();
        store.store_deck(&deck).await.unwrap();
        store.store_cards(&cards).await.unwrap();

        let graded = |card: &Card, due_in_days: i64| {
            let mut state = CardMemoryState::seed(card, now);
            state.reps = 1;
            state.review_date = Some(now - chrono::Duration::days(3));
            state.next_review = now + chrono::Duration::days(due_in_days);
            state
        };
        store
            .seed_progress(
                "u",
                &[
                    graded(&cards[0], -1),
                    graded(&cards[1], -2),
                    graded(&cards[2], 2),
                    CardMemoryState::seed(&cards[3], now),
                ],
            )
            .await
            .unwrap();

        let due = store.get_due_cards("u", deck.id, now).await.unwrap();
        let ids: Vec<Uuid> = due.iter().map(|card| card.id).collect();
        assert_eq!(ids, vec![cards[1].id, cards[0].id]);
    }
}
