use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EntryStatus {
    Pending,
    Confirmed,
    Failed,
}

impl EntryStatus {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Confirmed => "confirmed",
            Self::Failed => "failed",
        }
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        !matches!(self, Self::Pending)
    }
}

/// A locally-applied mutation awaiting server confirmation.
#[derive(Debug, Clone, PartialEq)]
pub struct OptimisticEntry<T> {
    pub temp_id: String,
    pub entity_id: Option<String>,
    pub payload: T,
    pub status: EntryStatus,
    pub applied_at: DateTime<Utc>,
}

/// A change to the visible aggregates, recorded together with everything
/// needed to invert it. The inverse is stored at apply time, never
/// recomputed from possibly-changed state later.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Delta {
    AdjustCount { key: String, by: i64 },
    SetFlag { key: String, value: bool, previous: bool },
}

impl Delta {
    #[must_use]
    pub fn inverse(&self) -> Self {
        match self {
            Self::AdjustCount { key, by } => Self::AdjustCount {
                key: key.clone(),
                by: -by,
            },
            Self::SetFlag {
                key,
                value,
                previous,
            } => Self::SetFlag {
                key: key.clone(),
                value: *previous,
                previous: *value,
            },
        }
    }
}

/// Displayed like-counts and saved/liked flags, keyed by entity id. Only
/// the store mutates these, by applying deltas.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Aggregates {
    counts: HashMap<String, i64>,
    flags: HashMap<String, bool>,
}

impl Aggregates {
    #[must_use]
    pub fn count(&self, key: &str) -> i64 {
        self.counts.get(key).copied().unwrap_or(0)
    }

    #[must_use]
    pub fn flag(&self, key: &str) -> bool {
        self.flags.get(key).copied().unwrap_or(false)
    }

    /// Seeds a server-provided baseline (e.g. like count from a fetch).
    pub fn seed_count(&mut self, key: impl Into<String>, value: i64) {
        self.counts.insert(key.into(), value);
    }

    pub fn seed_flag(&mut self, key: impl Into<String>, value: bool) {
        self.flags.insert(key.into(), value);
    }

    fn apply(&mut self, delta: &Delta) {
        match delta {
            Delta::AdjustCount { key, by } => {
                *self.counts.entry(key.clone()).or_insert(0) += by;
            }
            Delta::SetFlag { key, value, .. } => {
                self.flags.insert(key.clone(), *value);
            }
        }
    }
}

/// Outcome of a toggle request. `Coalesced` means a toggle for the same
/// entity is still pending, so no new network call may be issued.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ToggleOutcome {
    Issued { temp_id: String },
    Coalesced { temp_id: String },
}

struct TrackedEntry<T> {
    entry: OptimisticEntry<T>,
    // Inverses in apply order; rollback walks them in reverse.
    inverses: Vec<Delta>,
    toggle_key: Option<String>,
}

/// Generic apply/confirm/rollback engine for likes, saves, comments, and
/// messages. `Pending -> Confirmed` and `Pending -> Failed` are the only
/// legal transitions; terminal entries ignore duplicate resolutions.
pub struct OptimisticStore<T> {
    entries: HashMap<String, TrackedEntry<T>>,
    aggregates: Aggregates,
    // Temp ids whose late responses must be discarded: failed, cancelled.
    tombstones: HashSet<String>,
    // Entity key -> temp id of the toggle still pending for it.
    pending_toggles: HashMap<String, String>,
}

impl<T> Default for OptimisticStore<T> {
    fn default() -> Self {
        Self {
            entries: HashMap::new(),
            aggregates: Aggregates::default(),
            tombstones: HashSet::new(),
            pending_toggles: HashMap::new(),
        }
    }
}

impl<T> OptimisticStore<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn aggregates(&self) -> &Aggregates {
        &self.aggregates
    }

    #[must_use]
    pub fn aggregates_mut(&mut self) -> &mut Aggregates {
        &mut self.aggregates
    }

    #[must_use]
    pub fn entry(&self, temp_id: &str) -> Option<&OptimisticEntry<T>> {
        self.entries.get(temp_id).map(|tracked| &tracked.entry)
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.entries
            .values()
            .filter(|tracked| tracked.entry.status == EntryStatus::Pending)
            .count()
    }

    /// Synchronously inserts a `Pending` entry and applies its deltas to
    /// the visible aggregates, storing the inverse of each.
    pub fn apply(&mut self, payload: T, deltas: Vec<Delta>) -> String {
        self.apply_inner(payload, deltas, None)
    }

    fn apply_inner(
        &mut self,
        payload: T,
        deltas: Vec<Delta>,
        toggle_key: Option<String>,
    ) -> String {
        let temp_id = format!("tmp_{}", Uuid::new_v4().simple());
        let mut inverses = Vec::with_capacity(deltas.len());
        for delta in &deltas {
            inverses.push(delta.inverse());
            self.aggregates.apply(delta);
        }
        self.entries.insert(
            temp_id.clone(),
            TrackedEntry {
                entry: OptimisticEntry {
                    temp_id: temp_id.clone(),
                    entity_id: None,
                    payload,
                    status: EntryStatus::Pending,
                    applied_at: Utc::now(),
                },
                inverses,
                toggle_key,
            },
        );
        temp_id
    }

    /// `Pending -> Confirmed`, filling in the server-assigned identifier.
    /// Returns `false` when the resolution was ignored (unknown temp id,
    /// already terminal, or cancelled).
    pub fn confirm(&mut self, temp_id: &str, entity_id: &str) -> bool {
        if self.tombstones.contains(temp_id) {
            tracing::debug!(temp_id, "late confirm for discarded entry ignored");
            return false;
        }
        let Some(tracked) = self.entries.get_mut(temp_id) else {
            return false;
        };
        if tracked.entry.status.is_terminal() {
            return false;
        }
        tracked.entry.status = EntryStatus::Confirmed;
        tracked.entry.entity_id = Some(entity_id.to_string());
        if let Some(key) = tracked.toggle_key.take() {
            self.pending_toggles.remove(&key);
        }
        true
    }

    /// `Pending -> Failed`: applies the stored inverses (in reverse order)
    /// so the visible state matches what it would have been had the action
    /// never been attempted, then drops the entry.
    pub fn fail(&mut self, temp_id: &str) -> bool {
        if self.tombstones.contains(temp_id) {
            return false;
        }
        let Some(tracked) = self.entries.get(temp_id) else {
            return false;
        };
        if tracked.entry.status.is_terminal() {
            return false;
        }
        let Some(tracked) = self.entries.remove(temp_id) else {
            return false;
        };
        tracing::debug!(temp_id, "rolling back optimistic entry");
        for inverse in tracked.inverses.iter().rev() {
            self.aggregates.apply(inverse);
        }
        if let Some(key) = &tracked.toggle_key {
            self.pending_toggles.remove(key);
        }
        self.tombstones.insert(temp_id.to_string());
        true
    }

    /// Discards a pending entry because its owning view went away: the
    /// deltas are rolled back now and any late server resolution for this
    /// temp id is ignored rather than applied.
    pub fn cancel(&mut self, temp_id: &str) {
        if self.fail(temp_id) {
            tracing::debug!(temp_id, "optimistic entry cancelled");
        }
    }

    /// Drops confirmed entries and discard markers so a long-lived view
    /// does not accumulate per-mutation bookkeeping without bound. Pending
    /// entries are kept. Call once no responses are outstanding for this
    /// store; a tombstoned temp id pruned here loses its late-discard
    /// protection. Returns the number of entries dropped.
    pub fn compact(&mut self) -> usize {
        let before = self.entries.len();
        self.entries
            .retain(|_, tracked| tracked.entry.status == EntryStatus::Pending);
        self.tombstones.clear();
        before - self.entries.len()
    }

    /// Toggle-style mutation (like/save) with the double-toggle guard: the
    /// net effect is computed from the currently displayed flag, and while
    /// a toggle for `entity_key` is still pending a second toggle coalesces
    /// into it instead of issuing a duplicate request.
    pub fn toggle(&mut self, entity_key: &str, payload: T) -> ToggleOutcome {
        if let Some(temp_id) = self.pending_toggles.get(entity_key) {
            tracing::debug!(entity_key, "toggle coalesced into pending entry");
            return ToggleOutcome::Coalesced {
                temp_id: temp_id.clone(),
            };
        }

        let displayed = self.aggregates.flag(entity_key);
        let deltas = vec![
            Delta::SetFlag {
                key: entity_key.to_string(),
                value: !displayed,
                previous: displayed,
            },
            Delta::AdjustCount {
                key: entity_key.to_string(),
                by: if displayed { -1 } else { 1 },
            },
        ];
        let temp_id = self.apply_inner(payload, deltas, Some(entity_key.to_string()));
        self.pending_toggles
            .insert(entity_key.to_string(), temp_id.clone());
        ToggleOutcome::Issued { temp_id }
    }
}
