use std::collections::HashSet;

use chrono::{DateTime, Utc};

use crate::optimistic::OptimisticEntry;

/// A server-confirmed entry, anchored by its authoritative timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct ConfirmedItem<T> {
    pub id: String,
    pub payload: T,
    pub server_ts: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq)]
pub enum MergedItem<T> {
    Confirmed(ConfirmedItem<T>),
    Pending(OptimisticEntry<T>),
}

/// Ordered message list: the confirmed region is sorted by server
/// timestamp, pending entries display after it in local-apply order.
/// Every entry appears exactly once; confirmation supersedes the
/// placeholder with the same temp id.
pub struct ReconciledList<T> {
    confirmed: Vec<ConfirmedItem<T>>,
    pending: Vec<OptimisticEntry<T>>,
    seen_ids: HashSet<String>,
    resolved: HashSet<String>,
}

impl<T> Default for ReconciledList<T> {
    fn default() -> Self {
        Self {
            confirmed: Vec::new(),
            pending: Vec::new(),
            seen_ids: HashSet::new(),
            resolved: HashSet::new(),
        }
    }
}

impl<T: Clone> ReconciledList<T> {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Merges a server fetch into the confirmed region, skipping ids
    /// already present (a confirmed optimistic entry may arrive again in a
    /// later page).
    pub fn merge_confirmed(&mut self, items: Vec<ConfirmedItem<T>>) {
        for item in items {
            if self.seen_ids.insert(item.id.clone()) {
                self.confirmed.push(item);
            }
        }
        self.sort_confirmed();
    }

    /// Appends a pending entry at the tail, ordered by local creation
    /// time.
    pub fn append_local(&mut self, entry: OptimisticEntry<T>) {
        self.pending.push(entry);
        self.pending.sort_by_key(|entry| entry.applied_at);
    }

    /// Replaces the placeholder with the server entity and re-sorts the
    /// confirmed region by server timestamp, which may reorder it relative
    /// to other recently confirmed entries. Duplicate confirmations are
    /// ignored by temp id.
    pub fn confirm(&mut self, temp_id: &str, id: &str, server_ts: DateTime<Utc>) -> bool {
        if self.resolved.contains(temp_id) {
            return false;
        }
        let Some(position) = self
            .pending
            .iter()
            .position(|entry| entry.temp_id == temp_id)
        else {
            return false;
        };
        let entry = self.pending.remove(position);
        self.resolved.insert(temp_id.to_string());

        if self.seen_ids.insert(id.to_string()) {
            self.confirmed.push(ConfirmedItem {
                id: id.to_string(),
                payload: entry.payload,
                server_ts,
            });
            self.sort_confirmed();
        }
        true
    }

    /// Drops the placeholder. Used for both rollback and cancellation; a
    /// later resolution for the same temp id is ignored.
    pub fn fail(&mut self, temp_id: &str) -> bool {
        if self.resolved.contains(temp_id) {
            return false;
        }
        let Some(position) = self
            .pending
            .iter()
            .position(|entry| entry.temp_id == temp_id)
        else {
            return false;
        };
        self.pending.remove(position);
        self.resolved.insert(temp_id.to_string());
        true
    }

    /// Clears the resolved-placeholder markers. They only guard against a
    /// late duplicate resolution, so call this once no mutations are
    /// outstanding for this list. Confirmed ids stay tracked for refetch
    /// dedup. Returns the number of markers dropped.
    pub fn compact(&mut self) -> usize {
        let dropped = self.resolved.len();
        self.resolved.clear();
        dropped
    }

    /// The display view: confirmed entries by server time, then pending
    /// entries by local apply time.
    #[must_use]
    pub fn merged(&self) -> Vec<MergedItem<T>> {
        let mut items: Vec<MergedItem<T>> = self
            .confirmed
            .iter()
            .cloned()
            .map(MergedItem::Confirmed)
            .collect();
        items.extend(self.pending.iter().cloned().map(MergedItem::Pending));
        items
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.confirmed.len() + self.pending.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    #[must_use]
    pub fn pending_len(&self) -> usize {
        self.pending.len()
    }

    fn sort_confirmed(&mut self) {
        self.confirmed
            .sort_by(|a, b| a.server_ts.cmp(&b.server_ts).then_with(|| a.id.cmp(&b.id)));
    }
}
