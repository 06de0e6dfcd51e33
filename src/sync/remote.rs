use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::{Client, RequestBuilder, Response, StatusCode};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::flashcards::CardMemoryState;

/// Rows per bulk-insert request
const INSERT_CHUNK: usize = 100;

const TABLE: &str = "card_progress";

#[derive(Error, Debug)]
pub enum RemoteError {
    #[error("HTTP error: {0}")]
    Http(#[from] reqwest::Error),
    #[error("Remote store is unreachable")]
    Offline,
    #[error("Authentication failed")]
    AuthFailed,
    #[error("Server error: {status} - {message}")]
    Server { status: u16, message: String },
    #[error("Invalid URL: {0}")]
    InvalidUrl(String),
    #[error("Record rejected: {0}")]
    Rejected(String),
}

/// One row of remote progress
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteRecord {
    /// Row id assigned by the remote store
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub user_id: String,
    pub deck_id: Uuid,
    pub card_id: Uuid,
    pub difficulty: f64,
    pub stability: f64,
    pub retrievability: f64,
    pub reps: u32,
    pub lapses: u32,
    pub interval: f64,
    pub review_date: Option<DateTime<Utc>>,
    pub next_review: DateTime<Utc>,
}

impl RemoteRecord {
    pub fn from_state(user_id: &str, state: &CardMemoryState) -> Self {
        Self {
            id: None,
            user_id: user_id.to_string(),
            deck_id: state.deck_id,
            card_id: state.card_id,
            difficulty: state.difficulty,
            stability: state.stability,
            retrievability: state.retrievability,
            reps: state.reps,
            lapses: state.lapses,
            interval: state.interval,
            review_date: state.review_date,
            next_review: state.next_review,
        }
    }

    /// Whether this record already holds the given local state. Timestamps
    /// match at microsecond precision, which is what `timestamptz` keeps.
    pub fn holds(&self, state: &CardMemoryState) -> bool {
        self.reps == state.reps
            && self.lapses == state.lapses
            && self.review_date.map(|at| at.timestamp_micros())
                == state.review_date.map(|at| at.timestamp_micros())
            && self.next_review.timestamp_micros() == state.next_review.timestamp_micros()
    }
}

/// Outcome of a bulk insert
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InsertReport {
    pub succeeded: usize,
    pub failed: usize,
    pub errors: Vec<String>,
}

/// Remote collaborator holding a copy of users' progress
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Existing remote records of a user for one deck, keyed by card id
    async fn list_existing(
        &self,
        user_id: &str,
        deck_id: Uuid,
    ) -> Result<HashMap<Uuid, RemoteRecord>, RemoteError>;

    /// Insert records. Records are independent; some may fail while others land.
    async fn insert_many(&self, records: &[RemoteRecord]) -> Result<InsertReport, RemoteError>;

    /// Overwrite the record with the given remote id
    async fn update(&self, id: &str, record: &RemoteRecord) -> Result<(), RemoteError>;
}

/// Client for a relational table service exposing `card_progress` over REST
pub struct RestRemoteStore {
    client: Client,
    base_url: String,
    api_key: Option<String>,
}

impl RestRemoteStore {
    pub fn new(base_url: String, api_key: Option<String>) -> Result<Self, RemoteError> {
        let base_url = base_url.trim_end_matches('/').to_string();

        if !base_url.starts_with("http://") && !base_url.starts_with("https://") {
            return Err(RemoteError::InvalidUrl(
                "URL must start with http:// or https://".to_string(),
            ));
        }

        let client = Client::builder()
            .timeout(Duration::from_secs(60))
            .connect_timeout(Duration::from_secs(10))
            .build()?;

        Ok(Self {
            client,
            base_url,
            api_key,
        })
    }

    fn url(&self) -> String {
        format!("{}/{}", self.base_url, TABLE)
    }

    fn authorize(&self, request: RequestBuilder) -> RequestBuilder {
        match &self.api_key {
            Some(key) => request.header("apikey", key).bearer_auth(key),
            None => request,
        }
    }

    async fn send(&self, request: RequestBuilder) -> Result<Response, RemoteError> {
        let response = self.authorize(request).send().await.map_err(send_error)?;

        match response.status() {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(RemoteError::AuthFailed),
            status if !status.is_success() => Err(RemoteError::Server {
                status: status.as_u16(),
                message: response.text().await.unwrap_or_default(),
            }),
            _ => Ok(response),
        }
    }
}

fn send_error(err: reqwest::Error) -> RemoteError {
    if err.is_connect() || err.is_timeout() {
        RemoteError::Offline
    } else {
        RemoteError::Http(err)
    }
}

#[async_trait]
impl RemoteStore for RestRemoteStore {
    async fn list_existing(
        &self,
        user_id: &str,
        deck_id: Uuid,
    ) -> Result<HashMap<Uuid, RemoteRecord>, RemoteError> {
        let request = self.client.get(self.url()).query(&[
            ("user_id", format!("eq.{}", user_id)),
            ("deck_id", format!("eq.{}", deck_id)),
        ]);
        let rows: Vec<RemoteRecord> = self.send(request).await?.json().await?;
        Ok(rows.into_iter().map(|row| (row.card_id, row)).collect())
    }

    async fn insert_many(&self, records: &[RemoteRecord]) -> Result<InsertReport, RemoteError> {
        let mut report = InsertReport::default();

        for chunk in records.chunks(INSERT_CHUNK) {
            let request = self
                .client
                .post(self.url())
                .header("Prefer", "return=minimal")
                .json(chunk);
            match self.send(request).await {
                Ok(_) => report.succeeded += chunk.len(),
                // Nothing has landed yet; let the caller treat the whole sync as offline
                Err(RemoteError::Offline) if report.succeeded == 0 && report.failed == 0 => {
                    return Err(RemoteError::Offline)
                }
                Err(err) => {
                    log::warn!("insert_many: {} records failed: {}", chunk.len(), err);
                    report.failed += chunk.len();
                    report.errors.push(err.to_string());
                }
            }
        }

        Ok(report)
    }

    async fn update(&self, id: &str, record: &RemoteRecord) -> Result<(), RemoteError> {
        let body = RemoteRecord {
            id: None,
            ..record.clone()
        };
        let request = self
            .client
            .patch(self.url())
            .query(&[("id", format!("eq.{}", id))])
            .json(&body);
        self.send(request).await?;
        Ok(())
    }
}

#[derive(Default)]
struct MemoryRemoteInner {
    rows: HashMap<String, RemoteRecord>,
    next_id: u64,
    offline: bool,
    rejected: HashSet<Uuid>,
    inserts: usize,
    updates: usize,
}

/// Remote store held in memory, with switches to simulate outages and
/// rejected rows
#[derive(Default)]
pub struct MemoryRemoteStore {
    inner: Mutex<MemoryRemoteInner>,
}

impl MemoryRemoteStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_offline(&self, offline: bool) {
        self.lock().offline = offline;
    }

    /// Reject inserts of the given card until [`MemoryRemoteStore::accept`] is called
    pub fn reject(&self, card_id: Uuid) {
        self.lock().rejected.insert(card_id);
    }

    pub fn accept(&self, card_id: Uuid) {
        self.lock().rejected.remove(&card_id);
    }

    /// Every stored row
    pub fn records(&self) -> Vec<RemoteRecord> {
        self.lock().rows.values().cloned().collect()
    }

    /// Rows inserted so far
    pub fn insert_count(&self) -> usize {
        self.lock().inserts
    }

    /// Rows updated so far
    pub fn update_count(&self) -> usize {
        self.lock().updates
    }

    fn lock(&self) -> MutexGuard<'_, MemoryRemoteInner> {
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn online(&self) -> Result<MutexGuard<'_, MemoryRemoteInner>, RemoteError> {
        let inner = self.lock();
        if inner.offline {
            return Err(RemoteError::Offline);
        }
        Ok(inner)
    }
}

#[async_trait]
impl RemoteStore for MemoryRemoteStore {
    async fn list_existing(
        &self,
        user_id: &str,
        deck_id: Uuid,
    ) -> Result<HashMap<Uuid, RemoteRecord>, RemoteError> {
        Ok(self
            .online()?
            .rows
            .values()
            .filter(|row| row.user_id == user_id && row.deck_id == deck_id)
            .map(|row| (row.card_id, row.clone()))
            .collect())
    }

    async fn insert_many(&self, records: &[RemoteRecord]) -> Result<InsertReport, RemoteError> {
        let mut inner = self.online()?;
        let mut report = InsertReport::default();

        for record in records {
            if inner.rejected.contains(&record.card_id) {
                report.failed += 1;
                report
                    .errors
                    .push(RemoteError::Rejected(record.card_id.to_string()).to_string());
                continue;
            }
            inner.next_id += 1;
            let id = inner.next_id.to_string();
            inner.rows.insert(
                id.clone(),
                RemoteRecord {
                    id: Some(id),
                    ..record.clone()
                },
            );
            inner.inserts += 1;
            report.succeeded += 1;
        }

        Ok(report)
    }

    async fn update(&self, id: &str, record: &RemoteRecord) -> Result<(), RemoteError> {
        let mut inner = self.online()?;
        let row = inner.rows.get_mut(id).ok_or_else(|| RemoteError::Server {
            status: 404,
            message: format!("no row {}", id),
        })?;
        *row = RemoteRecord {
            id: Some(id.to_string()),
            ..record.clone()
        };
        inner.updates += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    use crate::flashcards::Card;

    fn state() -> CardMemoryState {
        let card = Card::new(Uuid::new_v4(), "q".into(), "a".into(), 0);
        let mut state = CardMemoryState::seed(&card, Utc::now());
        state.reps = 1;
        state.review_date = Some(Utc::now());
        state
    }

    #[test]
    fn test_rest_store_requires_http_url() {
        let err = RestRemoteStore::new("ftp://example.com".to_string(), None)
            .err()
            .unwrap();
        assert!(matches!(err, RemoteError::InvalidUrl(_)));
    }

    #[test]
    fn test_holds_ignores_sub_microsecond_precision() {
        let mut state = state();
        let at = Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0).unwrap()
            + chrono::Duration::nanoseconds(123_456_789);
        state.review_date = Some(at);
        state.next_review = at + chrono::Duration::days(2);

        // A timestamptz round-trip keeps microseconds only
        let mut stored = RemoteRecord::from_state("u", &state);
        stored.review_date = Some(at - chrono::Duration::nanoseconds(789));
        stored.next_review = state.next_review - chrono::Duration::nanoseconds(789);
        assert!(stored.holds(&state));

        state.next_review += chrono::Duration::seconds(1);
        assert!(!stored.holds(&state));
    }

    #[test]
    fn test_record_serializes_without_unassigned_id() {
        let record = RemoteRecord::from_state("u", &state());
        let json = serde_json::to_value(&record).unwrap();

        assert!(json.get("id").is_none());
        assert!(json.get("card_id").is_some());
        assert!(json.get("next_review").is_some());
    }

    #[test]
    fn test_record_holds_matching_state() {
        let mut state = state();
        let record = RemoteRecord::from_state("u", &state);
        assert!(record.holds(&state));

        state.reps += 1;
        assert!(!record.holds(&state));
    }

    #[tokio::test]
    async fn test_memory_store_rejects_marked_cards() {
        let remote = MemoryRemoteStore::new();
        let a = RemoteRecord::from_state("u", &state());
        let b = RemoteRecord::from_state("u", &state());
        remote.reject(b.card_id);

        let report = remote.insert_many(&[a.clone(), b]).await.unwrap();

        assert_eq!(report.succeeded, 1);
        assert_eq!(report.failed, 1);
        let existing = remote.list_existing("u", a.deck_id).await.unwrap();
        assert!(existing[&a.card_id].id.is_some());
    }

    #[tokio::test]
    async fn test_memory_store_offline() {
        let remote = MemoryRemoteStore::new();
        remote.set_offline(true);
        let err = remote.list_existing("u", Uuid::new_v4()).await.unwrap_err();
        assert!(matches!(err, RemoteError::Offline));
    }
}
