use std::sync::Arc;

use chrono::{DateTime, Utc};
use rand::rngs::StdRng;
use rand::SeedableRng;
use thiserror::Error;
use uuid::Uuid;

use super::state::{study_prompt, SessionPhase, SessionState, SessionView, StudyPrompt};
use crate::flashcards::algorithm::{preview_intervals, IntervalPreview};
use crate::flashcards::{
    plan_session, schedule, select_session, Card, CardMemoryState, DailyLedger, Grade,
    LastStudied, SchedulerParams, SelectionRequest, StudyMode,
};
use crate::storage::{RetryPolicy, StorageError, StorageInterface};

#[derive(Error, Debug)]
pub enum SessionError {
    #[error("Deck not found: {0}")]
    DeckNotFound(Uuid),

    #[error("Failed to load session after {attempts} attempts: {source}")]
    LoadFailed {
        attempts: u32,
        #[source]
        source: StorageError,
    },

    #[error("{operation} failed: {source}")]
    Storage {
        operation: &'static str,
        #[source]
        source: StorageError,
    },

    #[error("{operation} failed for card {card_id}: {source}")]
    Card {
        operation: &'static str,
        card_id: Uuid,
        #[source]
        source: StorageError,
    },

    #[error("Write for card {card_id} was interrupted: {message}")]
    Interrupted { card_id: Uuid, message: String },

    #[error("Cannot {action} while the session is {phase}")]
    InvalidTransition {
        action: &'static str,
        phase: &'static str,
    },
}

impl SessionError {
    /// Whether the same call may succeed if the user tries again
    pub fn is_retryable(&self) -> bool {
        match self {
            SessionError::LoadFailed { .. } | SessionError::Interrupted { .. } => true,
            SessionError::Storage { source, .. } | SessionError::Card { source, .. } => {
                source.is_retryable()
            }
            _ => false,
        }
    }
}

/// Result of a grade submission
#[derive(Debug, Clone, PartialEq)]
pub enum GradeOutcome {
    /// The grade was accepted. `state` is the persisted memory state, `None`
    /// in extra-study where nothing is written.
    Recorded {
        card_id: Uuid,
        state: Option<CardMemoryState>,
    },
    /// No card was showing; nothing happened
    Ignored,
}

impl GradeOutcome {
    pub fn is_recorded(&self) -> bool {
        matches!(self, GradeOutcome::Recorded { .. })
    }
}

/// One user's study session over one deck
pub struct StudySession<S: ?Sized> {
    store: Arc<S>,
    user_id: String,
    params: SchedulerParams,
    retry: RetryPolicy,
    rng: StdRng,
    state: SessionState,
    ledger: DailyLedger,
}

impl<S> StudySession<S>
where
    S: StorageInterface + ?Sized + 'static,
{
    pub fn new(store: Arc<S>, user_id: impl Into<String>) -> Self {
        Self {
            store,
            user_id: user_id.into(),
            params: SchedulerParams::default(),
            retry: RetryPolicy::default(),
            rng: StdRng::from_entropy(),
            state: SessionState::default(),
            ledger: DailyLedger::new(Utc::now().date_naive()),
        }
    }

    pub fn with_params(mut self, params: SchedulerParams) -> Self {
        self.params = params;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    /// Fix the shuffle of new cards, for reproducible selection
    pub fn with_rng_seed(mut self, seed: u64) -> Self {
        self.rng = StdRng::seed_from_u64(seed);
        self
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn view(&self) -> SessionView {
        self.state.view()
    }

    pub fn current_card(&self) -> Option<&Card> {
        self.state.current_card()
    }

    pub async fn start(&mut self, deck_id: Uuid, mode: StudyMode) -> Result<(), SessionError> {
        self.start_at(deck_id, mode, Utc::now()).await
    }

    /// Load the working list for a deck and present its first card
    pub async fn start_at(
        &mut self,
        deck_id: Uuid,
        mode: StudyMode,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        self.state = SessionState::loading(deck_id, mode);
        if self.ledger.day() != now.date_naive() {
            self.ledger = DailyLedger::new(now.date_naive());
        }

        match self.load(deck_id, mode, now).await {
            Ok(()) => Ok(()),
            Err(SessionError::Storage {
                source: StorageError::Offline,
                ..
            }) => {
                log::warn!("start: store offline, deck {} starts empty", deck_id);
                self.state.offline = true;
                self.state.phase = SessionPhase::Complete;
                Ok(())
            }
            Err(err) => {
                log::error!("start: failed to load deck {}: {}", deck_id, err);
                self.state.phase = SessionPhase::Failed {
                    message: err.to_string(),
                };
                Err(err)
            }
        }
    }

    async fn load(
        &mut self,
        deck_id: Uuid,
        mode: StudyMode,
        now: DateTime<Utc>,
    ) -> Result<(), SessionError> {
        let store = Arc::clone(&self.store);
        let retry = self.retry;
        let today = now.date_naive();

        let deck = retry
            .run("get_deck", || store.get_deck(deck_id))
            .await
            .map_err(|e| load_error(deck_id, "get_deck", &retry, e))?;

        let request = SelectionRequest {
            user_id: &self.user_id,
            deck_id,
            new_card_cap: deck.new_cards_per_day,
            mode,
            now,
        };
        let selection = select_session(store.as_ref(), &retry, request, &self.ledger, &mut self.rng)
            .await
            .map_err(|e| load_error(deck_id, "select_session", &retry, e))?;

        let resumed_from = match mode {
            StudyMode::Normal => retry
                .run("last_studied", || store.last_studied(&self.user_id, deck_id))
                .await
                .map_err(|e| load_error(deck_id, "last_studied", &retry, e))?
                .map(|marker| marker.index_on(today))
                .unwrap_or(0),
            StudyMode::Extra => 0,
        };

        self.ledger = selection.ledger;
        self.state.cards = selection.plan.cards;
        self.state.current_index = 0;
        self.state.resumed_from = resumed_from;
        self.state.new_today = self.ledger.new_graded();
        self.state.reviews_today = self.ledger.reviews_graded();
        self.state.phase = if self.state.cards.is_empty() {
            SessionPhase::Complete
        } else {
            SessionPhase::Active { showing: true }
        };

        log::info!(
            "start: deck '{}' ({:?}): {} cards ({} due, {} new), resumed from {}",
            deck.name,
            mode,
            self.state.cards.len(),
            selection.plan.due_count,
            selection.plan.new_count,
            resumed_from
        );
        Ok(())
    }

    pub async fn grade(&mut self, grade: Grade) -> Result<GradeOutcome, SessionError> {
        self.grade_at(grade, Utc::now()).await
    }

    /// Grade the card being shown.
    ///
    /// The card is hidden while its state is written. If the write fails the
    /// card is shown again and the error is returned; the index does not move.
    pub async fn grade_at(
        &mut self,
        grade: Grade,
        now: DateTime<Utc>,
    ) -> Result<GradeOutcome, SessionError> {
        if !self.state.can_grade() {
            log::debug!("grade: ignored while {}", self.state.phase.name());
            return Ok(GradeOutcome::Ignored);
        }
        let card = match self.state.current_card() {
            Some(card) => card.clone(),
            None => return Ok(GradeOutcome::Ignored),
        };
        self.state.phase = SessionPhase::Active { showing: false };

        if self.state.mode == StudyMode::Extra {
            self.state.replayed += 1;
            self.state.advance();
            return Ok(GradeOutcome::Recorded {
                card_id: card.id,
                state: None,
            });
        }

        let (next, was_new) = match self.record_grade(&card, grade, now).await {
            Ok(recorded) => recorded,
            Err(err) => {
                log::error!("grade: {}", err);
                self.state.phase = SessionPhase::Active { showing: true };
                return Err(err);
            }
        };

        let marker = LastStudied {
            index: self.state.resumed_from + self.state.current_index + 1,
            day: now.date_naive(),
        };
        let store = Arc::clone(&self.store);
        if let Err(err) = self
            .retry
            .run("set_last_studied", || {
                store.set_last_studied(&self.user_id, card.deck_id, marker)
            })
            .await
        {
            log::warn!("grade: could not record position {}: {}", marker.index, err);
        }

        self.state.advance();
        self.ledger.record(card.id, was_new);
        if was_new {
            self.state.new_today += 1;
        } else {
            self.state.reviews_today += 1;
        }
        if self.state.is_complete() {
            log::info!(
                "grade: session complete ({} new, {} reviews today)",
                self.state.new_today,
                self.state.reviews_today
            );
        }

        Ok(GradeOutcome::Recorded {
            card_id: card.id,
            state: Some(next),
        })
    }

    /// Schedule and persist one grade. The write runs on its own task so it
    /// completes even if this future is dropped.
    async fn record_grade(
        &self,
        card: &Card,
        grade: Grade,
        now: DateTime<Utc>,
    ) -> Result<(CardMemoryState, bool), SessionError> {
        let store = Arc::clone(&self.store);
        let retry = self.retry;
        let user_id = self.user_id.clone();
        let card_id = card.id;

        let current = retry
            .run("get_card_progress", || store.get_card_progress(&user_id, card_id))
            .await
            .map_err(|source| SessionError::Card {
                operation: "get_card_progress",
                card_id,
                source,
            })?;
        let mut state = current.unwrap_or_else(|| CardMemoryState::seed(card, now));
        let was_new = state.is_new();

        let result = schedule(Some(&state), grade, state.elapsed_days(now), &self.params);
        result.apply(&mut state, now);

        let pending = state.clone();
        let write = tokio::spawn(async move {
            retry
                .run("update_card_progress", || {
                    store.update_card_progress(&user_id, &pending)
                })
                .await
        });

        match write.await {
            Ok(Ok(())) => {}
            Ok(Err(source)) => {
                return Err(SessionError::Card {
                    operation: "update_card_progress",
                    card_id,
                    source,
                })
            }
            Err(join) => {
                return Err(SessionError::Interrupted {
                    card_id,
                    message: join.to_string(),
                })
            }
        }

        log::debug!(
            "grade: card {} {:?}: interval {:.2}d, stability {:.2}, difficulty {:.2}",
            card_id,
            grade,
            state.interval,
            state.stability,
            state.difficulty
        );
        Ok((state, was_new))
    }

    pub async fn restart(&mut self) -> Result<(), SessionError> {
        self.restart_at(Utc::now()).await
    }

    /// Begin extra-study over today's graded cards. Only valid once complete.
    pub async fn restart_at(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        let deck_id = match (self.state.deck_id, &self.state.phase) {
            (Some(deck_id), SessionPhase::Complete) => deck_id,
            _ => {
                return Err(SessionError::InvalidTransition {
                    action: "restart",
                    phase: self.state.phase.name(),
                })
            }
        };
        self.start_at(deck_id, StudyMode::Extra, now).await
    }

    pub async fn reload(&mut self) -> Result<(), SessionError> {
        self.reload_at(Utc::now()).await
    }

    /// Run selection again for the same deck and mode
    pub async fn reload_at(&mut self, now: DateTime<Utc>) -> Result<(), SessionError> {
        let deck_id = self.state.deck_id.ok_or(SessionError::InvalidTransition {
            action: "reload",
            phase: "not started",
        })?;
        let mode = self.state.mode;
        self.start_at(deck_id, mode, now).await
    }

    /// Intervals each grade would give the card being shown
    pub async fn preview_at(
        &self,
        now: DateTime<Utc>,
    ) -> Result<Option<IntervalPreview>, SessionError> {
        let card_id = match self.state.current_card() {
            Some(card) => card.id,
            None => return Ok(None),
        };
        let store = Arc::clone(&self.store);
        let state = self
            .retry
            .run("get_card_progress", || {
                store.get_card_progress(&self.user_id, card_id)
            })
            .await
            .map_err(|source| SessionError::Card {
                operation: "get_card_progress",
                card_id,
                source,
            })?;
        let elapsed = state.as_ref().map(|s| s.elapsed_days(now)).unwrap_or(0.0);
        Ok(Some(preview_intervals(state.as_ref(), elapsed, &self.params)))
    }
}

fn load_error(
    deck_id: Uuid,
    operation: &'static str,
    retry: &RetryPolicy,
    err: StorageError,
) -> SessionError {
    match err {
        StorageError::DeckNotFound(_) => SessionError::DeckNotFound(deck_id),
        err if err.is_retryable() => SessionError::LoadFailed {
            attempts: retry.max_attempts,
            source: err,
        },
        err => SessionError::Storage {
            operation,
            source: err,
        },
    }
}

/// Which entry point to offer for a deck, without starting a session
pub async fn deck_prompt<S>(
    store: &S,
    user_id: &str,
    deck_id: Uuid,
    now: DateTime<Utc>,
) -> Result<StudyPrompt, StorageError>
where
    S: StorageInterface + ?Sized,
{
    let today = now.date_naive();
    let deck = store.get_deck(deck_id).await?;
    let cards = store.get_cards_for_deck(deck_id).await?;
    let states = store.deck_progress(user_id, deck_id).await?;
    let ledger = DailyLedger::from_states(today, states.values());

    // Only the count of remaining cards matters here, not their order
    let mut rng = StdRng::seed_from_u64(0);
    let plan = plan_session(
        deck_id,
        &cards,
        &states,
        &ledger,
        deck.new_cards_per_day,
        StudyMode::Normal,
        now,
        &mut rng,
    );
    let last_index = store
        .last_studied(user_id, deck_id)
        .await?
        .map(|marker| marker.index_on(today))
        .unwrap_or(0);

    Ok(study_prompt(
        last_index,
        ledger.new_graded(),
        deck.new_cards_per_day,
        plan.cards.len(),
        ledger.graded_count(),
    ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration as StdDuration;

    use chrono::{Duration, TimeZone};

    use crate::flashcards::Deck;
    use crate::storage::MemoryStorage;

    const USER: &str = "learner";

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 10, 9, 0, 0).unwrap()
    }

    async fn deck_with(store: &MemoryStorage, n: usize, cap: usize) -> (Deck, Vec<Card>) {
        let mut deck = Deck::new("Spanish".to_string());
        deck.new_cards_per_day = cap;
        store.store_deck(&deck).await.unwrap();
        let cards: Vec<Card> = (0..n)
            .map(|i| Card::new(deck.id, format!("q{}", i), format!("a{}", i), i as i32))
            .collect();
        store.store_cards(&cards).await.unwrap();
        (deck, cards)
    }

    fn session(store: &Arc<MemoryStorage>) -> StudySession<MemoryStorage> {
        StudySession::new(Arc::clone(store), USER)
            .with_retry(RetryPolicy::new(3, StdDuration::from_millis(1)))
            .with_rng_seed(7)
    }

    #[tokio::test]
    async fn test_new_deck_all_good() {
        let store = Arc::new(MemoryStorage::new());
        let (deck, cards) = deck_with(&store, 3, 20).await;
        let mut session = session(&store);

        session.start_at(deck.id, StudyMode::Normal, now()).await.unwrap();
        let view = session.view();
        assert_eq!(view.total, 3);
        assert_eq!(view.position, 1);
        assert_eq!(view.current_card.unwrap().id, cards[0].id);

        for card in &cards {
            assert_eq!(session.current_card().unwrap().id, card.id);
            let outcome = session.grade_at(Grade::Good, now()).await.unwrap();
            assert!(outcome.is_recorded());
        }

        let view = session.view();
        assert!(view.is_complete);
        assert_eq!(view.new_today, 3);
        assert_eq!(view.reviews_today, 0);

        for card in &cards {
            let state = store.get_card_progress(USER, card.id).await.unwrap().unwrap();
            assert_eq!(state.reps, 1);
            assert_eq!(state.lapses, 0);
            assert!(state.next_review >= now() + Duration::days(1));
        }
        let marker = store.last_studied(USER, deck.id).await.unwrap().unwrap();
        assert_eq!(marker.index, 3);

        // Grading after completion is a no-op
        let outcome = session.grade_at(Grade::Good, now()).await.unwrap();
        assert_eq!(outcome, GradeOutcome::Ignored);
    }

    #[tokio::test]
    async fn test_daily_cap_then_extra_study() {
        let store = Arc::new(MemoryStorage::new());
        let (deck, _) = deck_with(&store, 25, 20).await;
        let mut session = session(&store);

        session.start_at(deck.id, StudyMode::Normal, now()).await.unwrap();
        assert_eq!(session.view().total, 20);
        while session.state().can_grade() {
            session.grade_at(Grade::Good, now()).await.unwrap();
        }
        assert!(session.view().is_complete);

        let prompt = deck_prompt(store.as_ref(), USER, deck.id, now()).await.unwrap();
        assert_eq!(prompt, StudyPrompt::StudyAgain);

        // A fresh normal session today has nothing left
        let mut later = self::session(&store);
        later.start_at(deck.id, StudyMode::Normal, now()).await.unwrap();
        assert!(later.view().is_complete);

        session.restart_at(now()).await.unwrap();
        assert_eq!(session.state().mode, StudyMode::Extra);
        let orders: Vec<i32> = session.state().cards.iter().map(|c| c.sort_order).collect();
        assert_eq!(orders, (0..20).collect::<Vec<_>>());

        let first = session.current_card().unwrap().id;
        let outcome = session.grade_at(Grade::Again, now()).await.unwrap();
        assert_eq!(
            outcome,
            GradeOutcome::Recorded {
                card_id: first,
                state: None
            }
        );
        let state = store.get_card_progress(USER, first).await.unwrap().unwrap();
        assert_eq!(state.reps, 1);
        assert_eq!(state.lapses, 0);
        assert_eq!(session.view().new_today, 20);
    }

    #[tokio::test]
    async fn test_resume_after_interruption() {
        let store = Arc::new(MemoryStorage::new());
        let (deck, cards) = deck_with(&store, 3, 20).await;

        let mut first = session(&store);
        first.start_at(deck.id, StudyMode::Normal, now()).await.unwrap();
        first.grade_at(Grade::Good, now()).await.unwrap();
        drop(first);

        let prompt = deck_prompt(store.as_ref(), USER, deck.id, now()).await.unwrap();
        assert_eq!(prompt, StudyPrompt::Continue);

        let mut resumed = session(&store);
        resumed.start_at(deck.id, StudyMode::Normal, now()).await.unwrap();
        let view = resumed.view();
        assert_eq!(view.position, 2);
        assert_eq!(view.total, 3);
        assert_eq!(view.new_today, 1);
        assert_eq!(view.current_card.unwrap().id, cards[1].id);

        resumed.grade_at(Grade::Good, now()).await.unwrap();
        let marker = store.last_studied(USER, deck.id).await.unwrap().unwrap();
        assert_eq!(marker.index, 2);
    }

    #[tokio::test]
    async fn test_failed_write_shows_card_again() {
        let store = Arc::new(MemoryStorage::new());
        let (deck, cards) = deck_with(&store, 2, 20).await;
        let mut session = session(&store).with_retry(RetryPolicy::none());
        session.start_at(deck.id, StudyMode::Normal, now()).await.unwrap();

        store.fail_next_writes(1);
        let err = session.grade_at(Grade::Good, now()).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::Card {
                operation: "update_card_progress",
                ..
            }
        ));
        assert!(err.is_retryable());

        let view = session.view();
        assert!(view.showing_card);
        assert_eq!(view.position, 1);
        assert_eq!(view.current_card.unwrap().id, cards[0].id);
        let state = store.get_card_progress(USER, cards[0].id).await.unwrap().unwrap();
        assert!(state.is_new());

        // The user grades again and it goes through
        session.grade_at(Grade::Good, now()).await.unwrap();
        assert_eq!(session.current_card().unwrap().id, cards[1].id);
    }

    #[tokio::test]
    async fn test_transient_write_contention_is_retried() {
        let store = Arc::new(MemoryStorage::new());
        let (deck, cards) = deck_with(&store, 1, 20).await;
        let mut session = session(&store);
        session.start_at(deck.id, StudyMode::Normal, now()).await.unwrap();

        store.fail_next_writes(2);
        session.grade_at(Grade::Good, now()).await.unwrap();

        assert!(session.view().is_complete);
        let state = store.get_card_progress(USER, cards[0].id).await.unwrap().unwrap();
        assert_eq!(state.reps, 1);
    }

    #[tokio::test]
    async fn test_grade_while_hidden_is_ignored() {
        let store = Arc::new(MemoryStorage::new());
        let (deck, cards) = deck_with(&store, 2, 20).await;
        let mut session = session(&store);
        session.start_at(deck.id, StudyMode::Normal, now()).await.unwrap();

        session.state.phase = SessionPhase::Active { showing: false };
        let outcome = session.grade_at(Grade::Good, now()).await.unwrap();

        assert_eq!(outcome, GradeOutcome::Ignored);
        assert_eq!(session.state().current_index, 0);
        let state = store.get_card_progress(USER, cards[0].id).await.unwrap().unwrap();
        assert!(state.is_new());
    }

    #[tokio::test]
    async fn test_again_then_good_next_day() {
        let store = Arc::new(MemoryStorage::new());
        let (deck, cards) = deck_with(&store, 1, 20).await;

        let mut day_one = session(&store);
        day_one.start_at(deck.id, StudyMode::Normal, now()).await.unwrap();
        day_one.grade_at(Grade::Again, now()).await.unwrap();
        let lapsed = store.get_card_progress(USER, cards[0].id).await.unwrap().unwrap();
        assert_eq!((lapsed.reps, lapsed.lapses), (1, 1));
        assert!(lapsed.interval <= 1.0);

        let tomorrow = now() + Duration::days(1);
        let mut day_two = session(&store);
        day_two.start_at(deck.id, StudyMode::Normal, tomorrow).await.unwrap();
        let view = day_two.view();
        assert_eq!(view.total, 1);
        assert_eq!(view.position, 1);

        day_two.grade_at(Grade::Good, tomorrow).await.unwrap();
        let state = store.get_card_progress(USER, cards[0].id).await.unwrap().unwrap();
        assert_eq!((state.reps, state.lapses), (2, 1));
        assert!(state.interval >= 1.0);
        assert_eq!(day_two.view().reviews_today, 1);
    }

    #[tokio::test]
    async fn test_unknown_deck() {
        let store = Arc::new(MemoryStorage::new());
        let mut session = session(&store);

        let err = session
            .start_at(Uuid::new_v4(), StudyMode::Normal, now())
            .await
            .unwrap_err();

        assert!(matches!(err, SessionError::DeckNotFound(_)));
        assert!(session.view().error.is_some());
        assert!(!session.view().is_loading);
    }

    #[tokio::test]
    async fn test_load_retries_exhausted_then_reload() {
        let store = Arc::new(MemoryStorage::new());
        let (deck, _) = deck_with(&store, 2, 20).await;
        let mut session = session(&store).with_retry(RetryPolicy::new(2, StdDuration::from_millis(1)));

        store.fail_next_reads(5);
        let err = session
            .start_at(deck.id, StudyMode::Normal, now())
            .await
            .unwrap_err();
        assert!(matches!(err, SessionError::LoadFailed { attempts: 2, .. }));
        assert!(matches!(session.state().phase, SessionPhase::Failed { .. }));

        store.fail_next_reads(0);
        session.reload_at(now()).await.unwrap();
        assert_eq!(session.view().total, 2);
        assert!(session.view().showing_card);
    }

    #[tokio::test]
    async fn test_offline_store_starts_empty() {
        let store = Arc::new(MemoryStorage::new());
        let (deck, _) = deck_with(&store, 2, 20).await;
        store.set_offline(true);
        let mut session = session(&store);

        session.start_at(deck.id, StudyMode::Normal, now()).await.unwrap();

        let view = session.view();
        assert!(view.offline);
        assert!(view.is_complete);
        assert!(view.current_card.is_none());
    }

    #[tokio::test]
    async fn test_restart_requires_complete_session() {
        let store = Arc::new(MemoryStorage::new());
        let (deck, _) = deck_with(&store, 2, 20).await;
        let mut session = session(&store);
        session.start_at(deck.id, StudyMode::Normal, now()).await.unwrap();

        let err = session.restart_at(now()).await.unwrap_err();
        assert!(matches!(
            err,
            SessionError::InvalidTransition {
                action: "restart",
                ..
            }
        ));
    }

    #[tokio::test]
    async fn test_dropped_grade_still_persists() {
        let store = Arc::new(MemoryStorage::new());
        let (deck, cards) = deck_with(&store, 3, 20).await;
        let mut session = session(&store);
        session.start_at(deck.id, StudyMode::Normal, now()).await.unwrap();
        let first = session.current_card().unwrap().id;

        store.delay_progress_writes(StdDuration::from_millis(100));
        let abandoned = tokio::time::timeout(
            StdDuration::from_millis(10),
            session.grade_at(Grade::Good, now()),
        )
        .await;
        assert!(abandoned.is_err());

        tokio::time::sleep(StdDuration::from_millis(300)).await;
        let state = store
            .get_card_progress(USER, first)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(state.reps, 1);
        assert!(state.next_review > now());

        // The next load carries on without the persisted card
        session.reload_at(now()).await.unwrap();
        assert_eq!(session.state().cards.len(), cards.len() - 1);
        assert!(session.state().cards.iter().all(|card| card.id != first));
    }

    #[tokio::test]
    async fn test_preview_for_new_card() {
        let store = Arc::new(MemoryStorage::new());
        let (deck, _) = deck_with(&store, 1, 20).await;
        let mut session = session(&store);
        session.start_at(deck.id, StudyMode::Normal, now()).await.unwrap();

        let preview = session.preview_at(now()).await.unwrap().unwrap();
        assert!(preview.again <= 1.0);
        assert!(preview.good >= 1.0);
    }
}
