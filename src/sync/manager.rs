use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use super::remote::{RemoteError, RemoteRecord, RemoteStore};
use crate::storage::{RetryPolicy, StorageError, StorageInterface};

#[derive(Error, Debug)]
pub enum SyncError {
    #[error("Remote error: {0}")]
    Remote(#[from] RemoteError),
    #[error("Storage error: {0}")]
    Storage(#[from] StorageError),
}

/// Result of one sync pass over a deck
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncReport {
    /// Remote records overwritten with newer local state
    pub updated: usize,
    /// Remote records that already matched local state
    pub unchanged: usize,
    pub inserted: usize,
    /// Records that could not be written; local progress is kept
    pub failed: usize,
    /// The remote store could not be reached; nothing was written
    pub offline: bool,
    /// Set when the deck was stamped as synced
    #[serde(skip_serializing_if = "Option::is_none")]
    pub synced_at: Option<DateTime<Utc>>,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub errors: Vec<String>,
}

impl SyncReport {
    fn offline() -> Self {
        Self {
            offline: true,
            ..Default::default()
        }
    }
}

/// Sync state of a deck for one user
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SyncStatus {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_sync: Option<DateTime<Utc>>,
    /// Graded cards changed since the last sync
    pub pending_changes: usize,
}

/// Pushes locally accumulated progress to a remote store
pub struct SyncManager<L: ?Sized, R: ?Sized> {
    local: Arc<L>,
    remote: Arc<R>,
    retry: RetryPolicy,
}

impl<L, R> SyncManager<L, R>
where
    L: StorageInterface + ?Sized,
    R: RemoteStore + ?Sized,
{
    pub fn new(local: Arc<L>, remote: Arc<R>) -> Self {
        Self {
            local,
            remote,
            retry: RetryPolicy::default(),
        }
    }

    /// Retry policy for the local store. Remote calls are never retried.
    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub async fn sync(&self, user_id: &str, deck_id: Uuid) -> Result<SyncReport, SyncError> {
        self.sync_at(user_id, deck_id, Utc::now()).await
    }

    /// Upsert every graded card of the deck by card id.
    ///
    /// Existing remote records are updated, the rest are inserted in bulk.
    /// The deck is stamped as synced only when no insert failed.
    pub async fn sync_at(
        &self,
        user_id: &str,
        deck_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<SyncReport, SyncError> {
        let local = self.local.as_ref();
        let mut states: Vec<_> = self
            .retry
            .run("deck_progress", || local.deck_progress(user_id, deck_id))
            .await?
            .into_values()
            .filter(|state| !state.is_new())
            .collect();
        states.sort_by_key(|state| state.card_id);

        let existing = match self.remote.list_existing(user_id, deck_id).await {
            Ok(existing) => existing,
            Err(RemoteError::Offline) => {
                log::warn!("sync: remote unreachable, deck {} stays local", deck_id);
                return Ok(SyncReport::offline());
            }
            Err(err) => return Err(err.into()),
        };

        let mut report = SyncReport::default();
        let mut to_insert = Vec::new();

        for state in &states {
            let remote = match existing.get(&state.card_id) {
                Some(remote) => remote,
                None => {
                    to_insert.push(RemoteRecord::from_state(user_id, state));
                    continue;
                }
            };
            if remote.holds(state) {
                report.unchanged += 1;
                continue;
            }
            let Some(id) = remote.id.as_deref() else {
                report.failed += 1;
                report
                    .errors
                    .push(format!("remote record for card {} has no id", state.card_id));
                continue;
            };
            match self
                .remote
                .update(id, &RemoteRecord::from_state(user_id, state))
                .await
            {
                Ok(()) => report.updated += 1,
                Err(RemoteError::Offline) => {
                    log::warn!("sync: remote went offline during updates");
                    report.offline = true;
                    report.failed += 1;
                    return Ok(report);
                }
                Err(err) => {
                    log::warn!("sync: update of card {} failed: {}", state.card_id, err);
                    report.failed += 1;
                    report.errors.push(format!("card {}: {}", state.card_id, err));
                }
            }
        }

        let mut insert_failures = 0;
        if !to_insert.is_empty() {
            match self.remote.insert_many(&to_insert).await {
                Ok(inserted) => {
                    report.inserted += inserted.succeeded;
                    insert_failures = inserted.failed;
                    report.errors.extend(inserted.errors);
                }
                Err(RemoteError::Offline) => {
                    log::warn!("sync: remote went offline before inserts");
                    report.offline = true;
                    insert_failures = to_insert.len();
                }
                Err(err) => {
                    insert_failures = to_insert.len();
                    report.errors.push(err.to_string());
                }
            }
        }
        report.failed += insert_failures;

        if insert_failures == 0 && !report.offline {
            self.retry
                .run("set_last_synced", || local.set_last_synced(user_id, deck_id, now))
                .await?;
            report.synced_at = Some(now);
        }

        log::info!(
            "sync: deck {}: {} updated, {} inserted, {} unchanged, {} failed",
            deck_id,
            report.updated,
            report.inserted,
            report.unchanged,
            report.failed
        );
        Ok(report)
    }

    pub async fn status(&self, user_id: &str, deck_id: Uuid) -> Result<SyncStatus, SyncError> {
        let local = self.local.as_ref();
        let last_sync = self
            .retry
            .run("last_synced", || local.last_synced(user_id, deck_id))
            .await?;
        let states = self
            .retry
            .run("deck_progress", || local.deck_progress(user_id, deck_id))
            .await?;

        let pending_changes = states
            .values()
            .filter(|state| !state.is_new())
            .filter(|state| match (state.review_date, last_sync) {
                (Some(reviewed), Some(synced)) => reviewed > synced,
                _ => true,
            })
            .count();

        Ok(SyncStatus {
            last_sync,
            pending_changes,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    use crate::flashcards::{schedule, Card, CardMemoryState, Deck, Grade, SchedulerParams};
    use crate::storage::MemoryStorage;
    use crate::sync::MemoryRemoteStore;

    const USER: &str = "learner";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()
    }

    async fn graded_deck(store: &MemoryStorage, graded: usize, seeded: usize) -> (Deck, Vec<Card>) {
        let deck = Deck::new("Biology".to_string());
        store.store_deck(&deck).await.unwrap();
        let cards: Vec<Card> = (0..graded + seeded)
            .map(|i| Card::new(deck.id, format!("q{}", i), format!("a{}", i), i as i32))
            .collect();
        store.store_cards(&cards).await.unwrap();

        for (i, card) in cards.iter().enumerate() {
            let mut state = CardMemoryState::seed(card, now());
            if i < graded {
                grade(&mut state, Grade::Good, now());
            }
            store.update_card_progress(USER, &state).await.unwrap();
        }
        (deck, cards)
    }

    fn grade(state: &mut CardMemoryState, grade: Grade, at: DateTime<Utc>) {
        let elapsed = state.elapsed_days(at);
        schedule(Some(&*state), grade, elapsed, &SchedulerParams::default()).apply(state, at);
    }

    fn manager(
        store: &Arc<MemoryStorage>,
        remote: &Arc<MemoryRemoteStore>,
    ) -> SyncManager<MemoryStorage, MemoryRemoteStore> {
        SyncManager::new(Arc::clone(store), Arc::clone(remote))
    }

    #[tokio::test]
    async fn test_second_sync_inserts_nothing() {
        let store = Arc::new(MemoryStorage::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let (deck, _) = graded_deck(&store, 3, 2).await;
        let sync = manager(&store, &remote);

        let first = sync.sync_at(USER, deck.id, now()).await.unwrap();
        assert_eq!(first.inserted, 3);
        assert_eq!(first.failed, 0);
        assert_eq!(first.synced_at, Some(now()));
        assert_eq!(store.last_synced(USER, deck.id).await.unwrap(), Some(now()));

        let second = sync.sync_at(USER, deck.id, now()).await.unwrap();
        assert_eq!(second.inserted, 0);
        assert_eq!(second.updated, 0);
        assert_eq!(second.unchanged, 3);
        assert_eq!(remote.insert_count(), 3);
    }

    #[tokio::test]
    async fn test_regraded_card_is_updated_in_place() {
        let store = Arc::new(MemoryStorage::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let (deck, cards) = graded_deck(&store, 2, 0).await;
        let sync = manager(&store, &remote);
        sync.sync_at(USER, deck.id, now()).await.unwrap();

        let later = now() + Duration::days(3);
        let mut state = store.get_card_progress(USER, cards[0].id).await.unwrap().unwrap();
        grade(&mut state, Grade::Again, later);
        store.update_card_progress(USER, &state).await.unwrap();

        let report = sync.sync_at(USER, deck.id, later).await.unwrap();
        assert_eq!(report.updated, 1);
        assert_eq!(report.inserted, 0);
        assert_eq!(remote.update_count(), 1);
        assert_eq!(remote.insert_count(), 2);
        assert_eq!(remote.records().len(), 2);
        let row = remote
            .records()
            .into_iter()
            .find(|r| r.card_id == cards[0].id)
            .unwrap();
        assert_eq!(row.lapses, 1);
    }

    #[tokio::test]
    async fn test_partial_insert_failure_leaves_deck_unstamped() {
        let store = Arc::new(MemoryStorage::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let (deck, cards) = graded_deck(&store, 3, 0).await;
        remote.reject(cards[1].id);
        let sync = manager(&store, &remote);

        let report = sync.sync_at(USER, deck.id, now()).await.unwrap();
        assert_eq!(report.inserted, 2);
        assert_eq!(report.failed, 1);
        assert!(report.synced_at.is_none());
        assert!(store.last_synced(USER, deck.id).await.unwrap().is_none());
        // Local progress is untouched
        assert_eq!(store.deck_progress(USER, deck.id).await.unwrap().len(), 3);

        remote.accept(cards[1].id);
        let retry = sync.sync_at(USER, deck.id, now()).await.unwrap();
        assert_eq!(retry.inserted, 1);
        assert_eq!(retry.unchanged, 2);
        assert!(retry.synced_at.is_some());
    }

    #[tokio::test]
    async fn test_offline_remote_degrades() {
        let store = Arc::new(MemoryStorage::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let (deck, _) = graded_deck(&store, 2, 0).await;
        remote.set_offline(true);
        let sync = manager(&store, &remote);

        let report = sync.sync_at(USER, deck.id, now()).await.unwrap();
        assert!(report.offline);
        assert_eq!(report.inserted, 0);
        assert!(store.last_synced(USER, deck.id).await.unwrap().is_none());
        assert_eq!(sync.status(USER, deck.id).await.unwrap().pending_changes, 2);
    }

    #[tokio::test]
    async fn test_status_counts_changes_since_last_sync() {
        let store = Arc::new(MemoryStorage::new());
        let remote = Arc::new(MemoryRemoteStore::new());
        let (deck, cards) = graded_deck(&store, 3, 1).await;
        let sync = manager(&store, &remote);

        assert_eq!(sync.status(USER, deck.id).await.unwrap().pending_changes, 3);
        sync.sync_at(USER, deck.id, now()).await.unwrap();
        assert_eq!(sync.status(USER, deck.id).await.unwrap().pending_changes, 0);

        let later = now() + Duration::days(4);
        let mut state = store.get_card_progress(USER, cards[2].id).await.unwrap().unwrap();
        grade(&mut state, Grade::Good, later);
        store.update_card_progress(USER, &state).await.unwrap();

        let status = sync.status(USER, deck.id).await.unwrap();
        assert_eq!(status.pending_changes, 1);
        assert_eq!(status.last_sync, Some(now()));
    }
}
