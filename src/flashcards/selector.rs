//! Due-card selection
//!
//! Chooses the working set for a study session from the cards of a deck and
//! the user's memory states. Normal sessions take every due card plus new
//! cards up to the daily cap; extra-study replays the cards graded today.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, NaiveDate, Utc};
use rand::seq::SliceRandom;
use rand::Rng;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::models::{Card, CardMemoryState};
use crate::storage::{RetryPolicy, StorageError, StorageInterface};

/// Kind of study session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StudyMode {
    /// Capped new cards plus due reviews
    #[default]
    Normal,
    /// Replay of cards already graded today, scheduling untouched
    Extra,
}

/// Cards graded on one day, derived from memory states and in-session grades
#[derive(Debug, Clone, PartialEq)]
pub struct DailyLedger {
    day: NaiveDate,
    graded: HashSet<Uuid>,
    new_graded: HashSet<Uuid>,
}

impl DailyLedger {
    pub fn new(day: NaiveDate) -> Self {
        Self {
            day,
            graded: HashSet::new(),
            new_graded: HashSet::new(),
        }
    }

    /// Build the ledger for `day` from stored memory states.
    /// A state graded that day with a single rep was a new card that day.
    pub fn from_states<'a>(
        day: NaiveDate,
        states: impl IntoIterator<Item = &'a CardMemoryState>,
    ) -> Self {
        let mut ledger = Self::new(day);
        for state in states {
            if state.graded_on(day) {
                ledger.record(state.card_id, state.reps == 1);
            }
        }
        ledger
    }

    /// Record a grade. Recording the same card twice is a no-op for the counts.
    pub fn record(&mut self, card_id: Uuid, was_new: bool) {
        self.graded.insert(card_id);
        if was_new {
            self.new_graded.insert(card_id);
        }
    }

    /// Fold another ledger for the same day into this one
    pub fn absorb(&mut self, other: &DailyLedger) {
        if other.day != self.day {
            return;
        }
        self.graded.extend(other.graded.iter().copied());
        self.new_graded.extend(other.new_graded.iter().copied());
    }

    pub fn day(&self) -> NaiveDate {
        self.day
    }

    pub fn is_graded(&self, card_id: Uuid) -> bool {
        self.graded.contains(&card_id)
    }

    pub fn graded_count(&self) -> usize {
        self.graded.len()
    }

    pub fn new_graded(&self) -> usize {
        self.new_graded.len()
    }

    pub fn reviews_graded(&self) -> usize {
        self.graded.difference(&self.new_graded).count()
    }
}

/// Result of a selection
#[derive(Debug, Clone, Default)]
pub struct SessionPlan {
    /// Scheduling order: due cards first, then new cards
    pub queue: Vec<Card>,
    /// Presentation order, stable by `sort_order`
    pub cards: Vec<Card>,
    /// Default states for cards admitted for the first time
    pub seeds: Vec<CardMemoryState>,
    pub due_count: usize,
    pub new_count: usize,
}

impl SessionPlan {
    fn finish(queue: Vec<Card>, seeds: Vec<CardMemoryState>, due_count: usize) -> Self {
        let mut cards = queue.clone();
        cards.sort_by_key(|card| card.sort_order);
        let new_count = queue.len() - due_count;
        Self {
            queue,
            cards,
            seeds,
            due_count,
            new_count,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }
}

/// Plan a session without touching storage.
///
/// `states` holds the user's memory states keyed by card id. Cards of other
/// decks are ignored. Randomness only affects which fresh cards are admitted
/// once the deck has been studied before.
#[allow(clippy::too_many_arguments)]
pub fn plan_session<R: Rng + ?Sized>(
    deck_id: Uuid,
    cards: &[Card],
    states: &HashMap<Uuid, CardMemoryState>,
    ledger: &DailyLedger,
    new_card_cap: usize,
    mode: StudyMode,
    now: DateTime<Utc>,
    rng: &mut R,
) -> SessionPlan {
    let day = ledger.day();
    let deck_cards = cards.iter().filter(|card| card.deck_id == deck_id);
    let graded_today = |card: &Card| {
        ledger.is_graded(card.id)
            || states
                .get(&card.id)
                .map(|state| state.graded_on(day))
                .unwrap_or(false)
    };

    if mode == StudyMode::Extra {
        let queue: Vec<Card> = deck_cards.filter(|card| graded_today(*card)).cloned().collect();
        let mut plan = SessionPlan::finish(queue, Vec::new(), 0);
        plan.queue = plan.cards.clone();
        plan.new_count = 0;
        return plan;
    }

    let first_session = !cards
        .iter()
        .any(|card| card.deck_id == deck_id && states.contains_key(&card.id));

    let mut due: Vec<(&Card, DateTime<Utc>)> = Vec::new();
    let mut admitted: Vec<&Card> = Vec::new();
    let mut fresh: Vec<&Card> = Vec::new();

    for card in deck_cards {
        if graded_today(card) {
            continue;
        }
        match states.get(&card.id) {
            None => fresh.push(card),
            Some(state) if state.is_new() => admitted.push(card),
            Some(state) if state.is_due(now) => due.push((card, state.next_review)),
            Some(_) => {}
        }
    }

    due.sort_by(|(a, a_due), (b, b_due)| a_due.cmp(b_due).then(a.sort_order.cmp(&b.sort_order)));
    admitted.sort_by_key(|card| card.sort_order);
    if first_session {
        fresh.sort_by_key(|card| card.sort_order);
    } else {
        fresh.shuffle(rng);
    }

    let mut slots = new_card_cap.saturating_sub(ledger.new_graded());
    admitted.truncate(slots);
    slots -= admitted.len();
    fresh.truncate(slots);

    let seeds = fresh
        .iter()
        .map(|card| CardMemoryState::seed(card, now))
        .collect();

    let due_count = due.len();
    let queue = due
        .into_iter()
        .map(|(card, _)| card)
        .chain(admitted)
        .chain(fresh)
        .cloned()
        .collect();

    SessionPlan::finish(queue, seeds, due_count)
}

/// Parameters for [`select_session`]
#[derive(Debug, Clone, Copy)]
pub struct SelectionRequest<'a> {
    pub user_id: &'a str,
    pub deck_id: Uuid,
    pub new_card_cap: usize,
    pub mode: StudyMode,
    pub now: DateTime<Utc>,
}

/// Selected session plus the ledger it was computed against
#[derive(Debug, Clone)]
pub struct Selection {
    pub plan: SessionPlan,
    pub ledger: DailyLedger,
}

/// Read the deck and memory states, plan the session and seed the newly
/// admitted cards with one insert-if-absent write.
///
/// `session_ledger` carries grades recorded by the caller that the store may
/// not reflect yet. Transient store errors are retried per `retry`.
pub async fn select_session<S, R>(
    store: &S,
    retry: &RetryPolicy,
    request: SelectionRequest<'_>,
    session_ledger: &DailyLedger,
    rng: &mut R,
) -> Result<Selection, StorageError>
where
    S: StorageInterface + ?Sized,
    R: Rng + Send + ?Sized,
{
    let SelectionRequest {
        user_id,
        deck_id,
        new_card_cap,
        mode,
        now,
    } = request;

    let cards = retry
        .run("get_cards_for_deck", move || store.get_cards_for_deck(deck_id))
        .await?;
    let states = retry
        .run("deck_progress", move || store.deck_progress(user_id, deck_id))
        .await?;

    let mut ledger = DailyLedger::from_states(now.date_naive(), states.values());
    ledger.absorb(session_ledger);

    let mut plan = plan_session(deck_id, &cards, &states, &ledger, new_card_cap, mode, now, rng);

    if !plan.seeds.is_empty() {
        let seeds = std::mem::take(&mut plan.seeds);
        let inserted: HashSet<Uuid> = retry
            .run("seed_progress", || store.seed_progress(user_id, &seeds))
            .await?
            .into_iter()
            .collect();

        // Cards seeded concurrently elsewhere belong to that session now
        let lost: HashSet<Uuid> = seeds
            .iter()
            .map(|seed| seed.card_id)
            .filter(|id| !inserted.contains(id))
            .collect();
        if !lost.is_empty() {
            log::info!(
                "select_session: {} new cards were admitted by another session",
                lost.len()
            );
            plan.queue.retain(|card| !lost.contains(&card.id));
            plan.cards.retain(|card| !lost.contains(&card.id));
            plan.new_count -= lost.len();
        }
        plan.seeds = seeds
            .into_iter()
            .filter(|seed| inserted.contains(&seed.card_id))
            .collect();
    }

    log::debug!(
        "select_session: deck {} mode {:?}: {} due, {} new",
        deck_id,
        mode,
        plan.due_count,
        plan.new_count
    );

    Ok(Selection { plan, ledger })
}
