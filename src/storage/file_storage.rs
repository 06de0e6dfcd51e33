//! JSON file storage
//!
//! Directory structure:
//! ```text
//! {base}/
//! ├── decks.json                 # Array of all decks
//! ├── cards/
//! │   └── {deck-id}.json         # Cards of one deck
//! └── users/
//!     └── {user}/
//!         ├── states/
//!         │   └── {card-id}.json # Memory state of one card
//!         └── decks/
//!             └── {deck-id}/
//!                 ├── last_studied.json
//!                 └── last_synced.json
//! ```
//!
//! Every document is replaced atomically (write to a temp file, then rename),
//! so a crash mid-write leaves either the old or the new document. Memory
//! states get one file per card, so handles sharing a directory only ever
//! race on the same (user, card) key.

use std::collections::BTreeMap;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::fs;
use tokio::sync::Mutex;
use uuid::Uuid;

use super::{Result, StorageError, StorageInterface};
use crate::flashcards::{Card, CardMemoryState, Deck, LastStudied};

/// Storage manager backed by JSON files
pub struct FileStorage {
    base_path: PathBuf,
    /// Serializes deck and card catalog rewrites within this process
    write_lock: Mutex<()>,
}

impl FileStorage {
    pub fn new(base_path: PathBuf) -> Self {
        Self {
            base_path,
            write_lock: Mutex::new(()),
        }
    }

    /// Default data directory (e.g., ~/.local/share/recall)
    pub fn default_data_dir() -> Result<PathBuf> {
        dirs::data_local_dir()
            .map(|p| p.join("recall"))
            .ok_or(StorageError::DataDirNotFound)
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    /// Initialize storage directories
    pub async fn init(&self) -> Result<()> {
        fs::create_dir_all(self.base_path.join("cards"))
            .await
            .map_err(classify_io)?;
        fs::create_dir_all(self.base_path.join("users"))
            .await
            .map_err(classify_io)?;
        Ok(())
    }

    fn decks_path(&self) -> PathBuf {
        self.base_path.join("decks.json")
    }

    fn cards_path(&self, deck_id: Uuid) -> PathBuf {
        self.base_path
            .join("cards")
            .join(format!("{}.json", deck_id))
    }

    fn user_dir(&self, user_id: &str) -> PathBuf {
        self.base_path.join("users").join(user_key(user_id))
    }

    fn states_dir(&self, user_id: &str) -> PathBuf {
        self.user_dir(user_id).join("states")
    }

    fn state_path(&self, user_id: &str, card_id: Uuid) -> PathBuf {
        self.states_dir(user_id).join(format!("{}.json", card_id))
    }

    fn marker_path(&self, user_id: &str, deck_id: Uuid, name: &str) -> PathBuf {
        self.user_dir(user_id)
            .join("decks")
            .join(deck_id.to_string())
            .join(format!("{}.json", name))
    }
}

#[async_trait]
impl StorageInterface for FileStorage {
    async fn list_decks(&self) -> Result<Vec<Deck>> {
        read_json(&self.decks_path()).await
    }

    async fn get_deck(&self, deck_id: Uuid) -> Result<Deck> {
        self.list_decks()
            .await?
            .into_iter()
            .find(|d| d.id == deck_id)
            .ok_or(StorageError::DeckNotFound(deck_id))
    }

    async fn store_deck(&self, deck: &Deck) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        let path = self.decks_path();
        let mut decks: Vec<Deck> = read_json(&path).await?;
        match decks.iter_mut().find(|d| d.id == deck.id) {
            Some(existing) => *existing = deck.clone(),
            None => decks.push(deck.clone()),
        }
        write_json(&path, &decks).await
    }

    async fn store_cards(&self, cards: &[Card]) -> Result<()> {
        let _guard = self.write_lock.lock().await;

        let mut by_deck: BTreeMap<Uuid, Vec<&Card>> = BTreeMap::new();
        for card in cards {
            by_deck.entry(card.deck_id).or_default().push(card);
        }

        let decks_path = self.decks_path();
        let mut decks: Vec<Deck> = read_json(&decks_path).await?;

        for (deck_id, incoming) in by_deck {
            let path = self.cards_path(deck_id);
            let mut existing: Vec<Card> = read_json(&path).await?;
            for card in incoming {
                match existing.iter_mut().find(|c| c.id == card.id) {
                    Some(slot) => *slot = card.clone(),
                    None => existing.push(card.clone()),
                }
            }
            write_json(&path, &existing).await?;

            if let Some(deck) = decks.iter_mut().find(|d| d.id == deck_id) {
                deck.card_count = existing.len();
                deck.updated_at = Utc::now();
            }
        }

        write_json(&decks_path, &decks).await
    }

    async fn get_cards_for_deck(&self, deck_id: Uuid) -> Result<Vec<Card>> {
        let mut cards: Vec<Card> = read_json(&self.cards_path(deck_id)).await?;
        cards.sort_by_key(|c| c.sort_order);
        Ok(cards)
    }

    async fn get_card_progress(
        &self,
        user_id: &str,
        card_id: Uuid,
    ) -> Result<Option<CardMemoryState>> {
        read_json(&self.state_path(user_id, card_id)).await
    }

    async fn list_progress(&self, user_id: &str) -> Result<Vec<CardMemoryState>> {
        let mut states = Vec::new();
        for path in json_files(&self.states_dir(user_id)).await? {
            // A file removed between listing and reading was cleared concurrently
            if let Some(state) = read_json::<Option<CardMemoryState>>(&path).await? {
                states.push(state);
            }
        }
        Ok(states)
    }

    async fn update_card_progress(&self, user_id: &str, state: &CardMemoryState) -> Result<()> {
        write_json(&self.state_path(user_id, state.card_id), state).await
    }

    async fn seed_progress(&self, user_id: &str, states: &[CardMemoryState]) -> Result<Vec<Uuid>> {
        let mut inserted = Vec::new();
        for state in states {
            if create_json(&self.state_path(user_id, state.card_id), state).await? {
                inserted.push(state.card_id);
            }
        }
        Ok(inserted)
    }

    async fn clear_progress(&self, user_id: &str, deck_id: Uuid) -> Result<usize> {
        let mut removed = 0;
        for path in json_files(&self.states_dir(user_id)).await? {
            let Some(state) = read_json::<Option<CardMemoryState>>(&path).await? else {
                continue;
            };
            if state.deck_id == deck_id && remove_file(&path).await? {
                removed += 1;
            }
        }

        for name in ["last_studied", "last_synced"] {
            remove_file(&self.marker_path(user_id, deck_id, name)).await?;
        }

        Ok(removed)
    }

    async fn last_studied(&self, user_id: &str, deck_id: Uuid) -> Result<Option<LastStudied>> {
        read_json(&self.marker_path(user_id, deck_id, "last_studied")).await
    }

    async fn set_last_studied(
        &self,
        user_id: &str,
        deck_id: Uuid,
        marker: LastStudied,
    ) -> Result<()> {
        write_json(&self.marker_path(user_id, deck_id, "last_studied"), &marker).await
    }

    async fn last_synced(&self, user_id: &str, deck_id: Uuid) -> Result<Option<DateTime<Utc>>> {
        read_json(&self.marker_path(user_id, deck_id, "last_synced")).await
    }

    async fn set_last_synced(
        &self,
        user_id: &str,
        deck_id: Uuid,
        at: DateTime<Utc>,
    ) -> Result<()> {
        write_json(&self.marker_path(user_id, deck_id, "last_synced"), &at).await
    }
}

/// Directory name for a user id; ids with path-unsafe characters are hex encoded
fn user_key(user_id: &str) -> String {
    let safe = !user_id.is_empty()
        && user_id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_');
    if safe {
        user_id.to_string()
    } else {
        format!("u-{}", hex::encode(user_id))
    }
}

/// Map IO errors that indicate a busy store to the retryable kind
fn classify_io(err: std::io::Error) -> StorageError {
    match err.kind() {
        ErrorKind::Interrupted | ErrorKind::WouldBlock | ErrorKind::TimedOut => {
            StorageError::Contention(err.to_string())
        }
        _ => StorageError::Io(err),
    }
}

async fn read_json<T: DeserializeOwned + Default>(path: &Path) -> Result<T> {
    match fs::read_to_string(path).await {
        Ok(content) => Ok(serde_json::from_str(&content)?),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(T::default()),
        Err(err) => Err(classify_io(err)),
    }
}

/// `.json` documents of a directory; temp files are skipped
async fn json_files(dir: &Path) -> Result<Vec<PathBuf>> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
        Err(err) => return Err(classify_io(err)),
    };

    let mut paths = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(classify_io)? {
        let path = entry.path();
        if path.extension().map_or(false, |ext| ext == "json") {
            paths.push(path);
        }
    }
    paths.sort();
    Ok(paths)
}

/// Remove a file, reporting whether it existed
async fn remove_file(path: &Path) -> Result<bool> {
    match fs::remove_file(path).await {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::NotFound => Ok(false),
        Err(err) => Err(classify_io(err)),
    }
}

/// Write the complete document to a sibling temp file
async fn write_temp<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<PathBuf> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).await.map_err(classify_io)?;
    }
    let json = serde_json::to_string_pretty(value)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let tmp_path = path.with_file_name(format!("{}.{}.tmp", file_name, Uuid::new_v4()));
    fs::write(&tmp_path, json).await.map_err(classify_io)?;
    Ok(tmp_path)
}

async fn write_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<()> {
    let tmp_path = write_temp(path, value).await?;
    if let Err(err) = fs::rename(&tmp_path, path).await {
        let _ = fs::remove_file(&tmp_path).await;
        return Err(classify_io(err));
    }
    Ok(())
}

/// Publish a document only if none exists at `path`; false when one already does.
/// The link either installs the complete temp file or fails, so readers never
/// see a partial document.
async fn create_json<T: Serialize + ?Sized>(path: &Path, value: &T) -> Result<bool> {
    let tmp_path = write_temp(path, value).await?;
    let linked = fs::hard_link(&tmp_path, path).await;
    let _ = fs::remove_file(&tmp_path).await;
    match linked {
        Ok(()) => Ok(true),
        Err(err) if err.kind() == ErrorKind::AlreadyExists => Ok(false),
        Err(err) => Err(classify_io(err)),
    }
}
