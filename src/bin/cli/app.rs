use std::path::Path;
use std::sync::Arc;

use anyhow::{bail, Context, Result};

use recall_lib::config::StudyConfig;
use recall_lib::flashcards::Deck;
use recall_lib::session::StudySession;
use recall_lib::storage::{FileStorage, StorageInterface};
use recall_lib::sync::{RestRemoteStore, SyncManager};

/// Shared application state for CLI commands
pub struct App {
    pub config: StudyConfig,
    pub storage: Arc<FileStorage>,
    pub user_id: String,
}

impl App {
    /// Load config and open the local store
    pub async fn new(config_path: Option<&Path>, user: Option<&str>) -> Result<Self> {
        let config = StudyConfig::load(config_path).context("Failed to load config")?;
        let data_dir = config
            .data_dir()
            .context("Failed to get data directory")?;

        let storage = FileStorage::new(data_dir);
        storage
            .init()
            .await
            .context("Failed to initialize storage")?;

        let user_id = match user {
            Some(user) => user.to_string(),
            None => std::env::var("USER").unwrap_or_else(|_| "local".to_string()),
        };

        Ok(Self {
            config,
            storage: Arc::new(storage),
            user_id,
        })
    }

    /// Find a deck by name (case-insensitive prefix match)
    pub async fn find_deck(&self, name: &str) -> Result<Deck> {
        let decks = self.list_decks().await?;
        let name_lower = name.to_lowercase();

        // Exact match first
        if let Some(deck) = decks.iter().find(|d| d.name.to_lowercase() == name_lower) {
            return Ok(deck.clone());
        }

        let matches: Vec<&Deck> = decks
            .iter()
            .filter(|d| d.name.to_lowercase().starts_with(&name_lower))
            .collect();

        match matches.len() {
            0 => bail!(
                "No deck matching '{}'. Available decks:\n{}",
                name,
                decks
                    .iter()
                    .map(|d| format!("  - {}", d.name))
                    .collect::<Vec<_>>()
                    .join("\n")
            ),
            1 => Ok(matches[0].clone()),
            _ => bail!(
                "Ambiguous deck name '{}'. Matches:\n{}",
                name,
                matches
                    .iter()
                    .map(|d| format!("  - {}", d.name))
                    .collect::<Vec<_>>()
                    .join("\n")
            ),
        }
    }

    pub async fn list_decks(&self) -> Result<Vec<Deck>> {
        self.storage
            .list_decks()
            .await
            .context("Failed to list decks")
    }

    pub fn session(&self) -> StudySession<FileStorage> {
        StudySession::new(Arc::clone(&self.storage), self.user_id.clone())
            .with_params(self.config.scheduler_params())
            .with_retry(self.config.retry_policy())
    }

    /// Sync manager for the configured remote, if any
    pub fn sync_manager(&self) -> Result<Option<SyncManager<FileStorage, RestRemoteStore>>> {
        let Some(url) = self.config.remote_url.clone() else {
            return Ok(None);
        };
        let remote = RestRemoteStore::new(url, self.config.remote_api_key.clone())
            .context("Failed to create remote client")?;
        Ok(Some(
            SyncManager::new(Arc::clone(&self.storage), Arc::new(remote))
                .with_retry(self.config.retry_policy()),
        ))
    }
}
