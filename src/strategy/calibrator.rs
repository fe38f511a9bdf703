//! Confidence Calibrator
//!
//! Keeps one bounded confidence multiplier per signal class and nudges it
//! after every settled trade. The multiplier gates whether a filtered signal
//! becomes an actionable decision.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::{debug, info, warn};

use crate::error::{BotError, Result};
use crate::persistence::{MemoryStore, StateStore};
use crate::types::{FilteredSignal, Signal};

pub const DEFAULT_CONFIDENCE: f64 = 1.0;
pub const MIN_CONFIDENCE: f64 = 0.1;
pub const MAX_CONFIDENCE: f64 = 2.0;
pub const CONFIDENCE_STEP: f64 = 0.05;

/// Below this the class is never traded
pub const HOLD_THRESHOLD: f64 = 0.5;
/// Raw/filtered agreement passes at this level
pub const AGREEMENT_THRESHOLD: f64 = 0.7;

/// Persisted confidence record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ConfidenceState {
    pub confidence: BTreeMap<Signal, f64>,
    #[serde(default)]
    pub win_trades: u64,
    #[serde(default)]
    pub loss_trades: u64,
    #[serde(default)]
    pub total_trades: u64,
}

impl Default for ConfidenceState {
    fn default() -> Self {
        Self {
            confidence: Signal::ALL
                .iter()
                .map(|s| (*s, DEFAULT_CONFIDENCE))
                .collect(),
            win_trades: 0,
            loss_trades: 0,
            total_trades: 0,
        }
    }
}

impl ConfidenceState {
    /// Fill in missing classes and clamp every value into range
    fn normalize(&mut self) {
        for signal in Signal::ALL {
            self.confidence.entry(signal).or_insert(DEFAULT_CONFIDENCE);
        }
        for value in self.confidence.values_mut() {
            *value = clamp_confidence(*value);
        }
    }

    pub fn win_rate(&self) -> f64 {
        if self.total_trades == 0 {
            0.0
        } else {
            self.win_trades as f64 / self.total_trades as f64
        }
    }
}

fn clamp_confidence(value: f64) -> f64 {
    if value.is_nan() {
        DEFAULT_CONFIDENCE
    } else {
        value.clamp(MIN_CONFIDENCE, MAX_CONFIDENCE)
    }
}

/// Self-adjusting confidence store
pub struct ConfidenceStore {
    state: ConfidenceState,
    store: Box<dyn StateStore<ConfidenceState>>,
}

impl ConfidenceStore {
    /// Load persisted confidence, reinitialising defaults when the store is
    /// empty or unreadable.
    pub fn open(store: Box<dyn StateStore<ConfidenceState>>) -> Result<Self> {
        let state = match store.load() {
            Ok(Some(mut state)) => {
                state.normalize();
                info!(
                    location = %store.location(),
                    total_trades = state.total_trades,
                    "Loaded confidence state"
                );
                state
            }
            Ok(None) => {
                info!(location = %store.location(), "No confidence state found, using defaults");
                Self::reinitialise(store.as_ref())
            }
            Err(BotError::Corrupt { path, reason }) => {
                warn!(path = %path.display(), %reason, "Confidence state corrupt, resetting to defaults");
                Self::reinitialise(store.as_ref())
            }
            Err(e) => return Err(e),
        };

        Ok(Self { state, store })
    }

    /// Fresh defaults kept only in memory
    pub fn in_memory() -> Self {
        Self {
            state: ConfidenceState::default(),
            store: Box::new(MemoryStore::new()),
        }
    }

    fn reinitialise(store: &dyn StateStore<ConfidenceState>) -> ConfidenceState {
        let state = ConfidenceState::default();
        if let Err(e) = store.save(&state) {
            warn!(error = %e, "Failed to persist default confidence state");
        }
        state
    }

    /// Current confidence for a class, 1.0 when unknown
    pub fn get(&self, signal: Signal) -> f64 {
        self.state
            .confidence
            .get(&signal)
            .copied()
            .unwrap_or(DEFAULT_CONFIDENCE)
    }

    /// Convert a filtered signal into the final decision
    pub fn decide(&self, raw: Signal, filtered: FilteredSignal) -> Signal {
        let candidate = match filtered {
            FilteredSignal::Buy => Signal::Buy,
            FilteredSignal::Sell => Signal::Sell,
            _ => return Signal::Hold,
        };

        let confidence = self.get(candidate);
        let decision = if confidence < HOLD_THRESHOLD {
            Signal::Hold
        } else if raw == candidate && confidence >= AGREEMENT_THRESHOLD {
            candidate
        } else if confidence >= HOLD_THRESHOLD {
            candidate
        } else {
            Signal::Hold
        };

        debug!(
            raw = %raw,
            filtered = %filtered,
            confidence = confidence,
            decision = %decision,
            "Confidence decision"
        );
        decision
    }

    /// Apply win/loss feedback for a class and persist.
    ///
    /// The in-memory state only changes once the write succeeded.
    pub fn feedback(&mut self, win: bool, signal: Signal) -> Result<f64> {
        let mut next = self.state.clone();
        next.total_trades += 1;
        if win {
            next.win_trades += 1;
        } else {
            next.loss_trades += 1;
        }

        let delta = if win { CONFIDENCE_STEP } else { -CONFIDENCE_STEP };
        *next
            .confidence
            .entry(signal)
            .or_insert(DEFAULT_CONFIDENCE) += delta;
        next.normalize();

        self.store.save(&next)?;
        self.state = next;

        let updated = self.get(signal);
        info!(
            signal = %signal,
            win = win,
            confidence = updated,
            total_trades = self.state.total_trades,
            "Confidence updated"
        );
        Ok(updated)
    }

    pub fn state(&self) -> &ConfidenceState {
        &self.state
    }
}
