//! FSRS spaced repetition algorithm
//!
//! Implementation of the Free Spaced Repetition Scheduler memory model
//! (FSRS-5 equations, default weights) reduced to a two-grade scale.
//!
//! - Retrievability: R = (1 + FACTOR * t / S) ^ DECAY
//! - Interval: I = S / FACTOR * (r ^ (1 / DECAY) - 1), where r is the desired retention
//!
//! Reference: https://github.com/open-spaced-repetition/fsrs4anki

use chrono::{DateTime, Duration, Utc};

use super::models::{CardMemoryState, Grade};

/// Default FSRS-5 weights
pub const DEFAULT_WEIGHTS: [f64; 19] = [
    0.4072, 1.1829, 3.1262, 15.4722, 7.2102, 0.5316, 1.0651, 0.0234, 1.616, 0.1544, 1.0824,
    1.9813, 0.0953, 0.2975, 2.2042, 0.2407, 2.9466, 0.5034, 0.6567,
];

/// Difficulty assigned to cards that have never been graded
pub const DEFAULT_DIFFICULTY: f64 = DEFAULT_WEIGHTS[4];

pub const MIN_DIFFICULTY: f64 = 1.0;
pub const MAX_DIFFICULTY: f64 = 10.0;

/// Floor for stability, keeps retrievability well defined
pub const MIN_STABILITY: f64 = 0.01;

/// Longest interval any parameters may ask for (days)
pub const MAX_INTERVAL_DAYS: f64 = 36_500.0;

/// Upper bound for the interval after a failed review (days)
pub const RELEARN_INTERVAL: f64 = 1.0;

const DECAY: f64 = -0.5;
const FACTOR: f64 = 19.0 / 81.0;

/// Tunable scheduler parameters
#[derive(Debug, Clone, PartialEq)]
pub struct SchedulerParams {
    pub weights: [f64; 19],
    pub desired_retention: f64,
    /// Longest interval the scheduler will produce (days)
    pub maximum_interval: f64,
}

impl Default for SchedulerParams {
    fn default() -> Self {
        Self {
            weights: DEFAULT_WEIGHTS,
            desired_retention: 0.9,
            maximum_interval: MAX_INTERVAL_DAYS,
        }
    }
}

/// New memory state produced by a review
#[derive(Debug, Clone, PartialEq)]
pub struct ScheduleResult {
    pub difficulty: f64,
    pub stability: f64,
    pub retrievability: f64,
    pub reps: u32,
    pub lapses: u32,
    pub interval: f64,
}

impl ScheduleResult {
    /// Write the result into `state`, stamping the review time and next due date
    pub fn apply(&self, state: &mut CardMemoryState, now: DateTime<Utc>) {
        state.difficulty = self.difficulty;
        state.stability = self.stability;
        state.retrievability = self.retrievability;
        state.reps = self.reps;
        state.lapses = self.lapses;
        state.interval = self.interval;
        state.review_date = Some(now);
        state.next_review = now
            .checked_add_signed(interval_duration(self.interval))
            .unwrap_or(DateTime::<Utc>::MAX_UTC);
    }
}

/// Calculate the next memory state for a card
///
/// # Arguments
/// * `state` - Current memory state, `None` for a card never seen before
/// * `grade` - Review outcome
/// * `elapsed_days` - Days since the last review (0 for a first review)
///
/// Never fails: out-of-range inputs are clamped.
pub fn schedule(
    state: Option<&CardMemoryState>,
    grade: Grade,
    elapsed_days: f64,
    params: &SchedulerParams,
) -> ScheduleResult {
    let w = &params.weights;
    let rating = grade.rating();
    let elapsed = if elapsed_days.is_finite() {
        elapsed_days.max(0.0)
    } else {
        0.0
    };

    let (difficulty, stability, reps, lapses, prior_interval) = match state {
        Some(s) => (s.difficulty, s.stability, s.reps, s.lapses, s.interval),
        None => (DEFAULT_DIFFICULTY, 0.0, 0, 0, 0.0),
    };
    let first_review = reps == 0 || !(stability.is_finite() && stability > 0.0);

    let (retrievability, next_d, next_s) = if first_review {
        (1.0, initial_difficulty(w, rating), initial_stability(w, rating))
    } else {
        let difficulty = clamp_difficulty(difficulty);
        let r = retrievability(elapsed, stability);
        let s = if elapsed < 1.0 {
            short_term_stability(w, stability, rating)
        } else {
            match grade {
                Grade::Good => recall_stability(w, difficulty, stability, r),
                Grade::Again => forget_stability(w, difficulty, stability, r),
            }
        };
        (r, next_difficulty(w, difficulty, rating), s)
    };

    let stability = finite_or(next_s, MIN_STABILITY).max(MIN_STABILITY);
    let difficulty = clamp_difficulty(finite_or(next_d, DEFAULT_DIFFICULTY));
    let ideal = next_interval(stability, params.desired_retention);

    let interval = match grade {
        Grade::Good => {
            let ceiling = params.maximum_interval.max(1.0).min(MAX_INTERVAL_DAYS);
            ideal.round().clamp(1.0, ceiling)
        }
        Grade::Again => {
            let ceiling = if first_review || prior_interval <= 0.0 {
                RELEARN_INTERVAL
            } else {
                prior_interval.min(RELEARN_INTERVAL)
            };
            finite_or(ideal, 0.0).clamp(0.0, ceiling)
        }
    };

    ScheduleResult {
        difficulty,
        stability,
        retrievability: retrievability.clamp(0.0, 1.0),
        reps: reps.saturating_add(1),
        lapses: if grade == Grade::Again {
            lapses.saturating_add(1)
        } else {
            lapses
        },
        interval,
    }
}

/// Probability of recall after `elapsed_days` for a memory of the given stability
pub fn retrievability(elapsed_days: f64, stability: f64) -> f64 {
    if stability <= 0.0 {
        return 0.0;
    }
    (1.0 + FACTOR * elapsed_days.max(0.0) / stability).powf(DECAY)
}

/// Days until retrievability falls to `desired_retention`
pub fn next_interval(stability: f64, desired_retention: f64) -> f64 {
    let retention = desired_retention.clamp(0.7, 0.99);
    stability / FACTOR * (retention.powf(1.0 / DECAY) - 1.0)
}

fn initial_stability(w: &[f64; 19], rating: f64) -> f64 {
    w[(rating as usize).saturating_sub(1)].max(MIN_STABILITY)
}

fn initial_difficulty(w: &[f64; 19], rating: f64) -> f64 {
    clamp_difficulty(w[4] - (w[5] * (rating - 1.0)).exp() + 1.0)
}

fn next_difficulty(w: &[f64; 19], difficulty: f64, rating: f64) -> f64 {
    let delta = -w[6] * (rating - 3.0);
    let damped = difficulty + delta * (10.0 - difficulty) / 9.0;
    // Mean reversion toward the difficulty of an "easy" first review
    let target = w[4] - (w[5] * 3.0).exp() + 1.0;
    clamp_difficulty(w[7] * target + (1.0 - w[7]) * damped)
}

fn recall_stability(w: &[f64; 19], difficulty: f64, stability: f64, r: f64) -> f64 {
    stability
        * (w[8].exp()
            * (11.0 - difficulty)
            * stability.powf(-w[9])
            * ((w[10] * (1.0 - r)).exp() - 1.0)
            + 1.0)
}

fn forget_stability(w: &[f64; 19], difficulty: f64, stability: f64, r: f64) -> f64 {
    let s = w[11]
        * difficulty.powf(-w[12])
        * ((stability + 1.0).powf(w[13]) - 1.0)
        * (w[14] * (1.0 - r)).exp();
    s.min(stability)
}

fn short_term_stability(w: &[f64; 19], stability: f64, rating: f64) -> f64 {
    stability * (w[17] * (rating - 3.0 + w[18])).exp()
}

fn clamp_difficulty(d: f64) -> f64 {
    d.clamp(MIN_DIFFICULTY, MAX_DIFFICULTY)
}

fn finite_or(value: f64, fallback: f64) -> f64 {
    if value.is_finite() {
        value
    } else {
        fallback
    }
}

fn interval_duration(days: f64) -> Duration {
    let seconds = (days.min(MAX_INTERVAL_DAYS) * 86_400.0).round() as i64;
    Duration::try_seconds(seconds).unwrap_or(Duration::MAX)
}

/// Intervals each grade would produce, shown next to the grade buttons
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct IntervalPreview {
    pub again: f64,
    pub good: f64,
}

pub fn preview_intervals(
    state: Option<&CardMemoryState>,
    elapsed_days: f64,
    params: &SchedulerParams,
) -> IntervalPreview {
    IntervalPreview {
        again: schedule(state, Grade::Again, elapsed_days, params).interval,
        good: schedule(state, Grade::Good, elapsed_days, params).interval,
    }
}

/// Format an interval in days to a human-readable string
pub fn format_interval(days: f64) -> String {
    if days < 1.0 / 24.0 {
        return "now".to_string();
    }
    if days < 1.0 {
        return format!("{}h", (days * 24.0).round() as i64);
    }

    let days = days.round() as i64;
    if days < 7 {
        format!("{}d", days)
    } else if days < 30 {
        format!("{}w", days / 7)
    } else if days < 365 {
        format!("{}mo", days / 30)
    } else {
        format!("{}y", days / 365)
    }
}
