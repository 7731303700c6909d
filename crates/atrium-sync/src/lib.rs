//! Optimistic mutation engine and reconciliation.
//!
//! [`OptimisticStore`] applies a local state change immediately (a like, a
//! save, a posted comment), pairing every visible delta with a stored
//! inverse so rollback is exact. [`ReconciledList`] and [`ReconciledTree`]
//! merge pending entries with server-confirmed state for display, replacing
//! temporary identifiers with server identifiers on confirmation.

pub mod list;
pub mod optimistic;
pub mod tree;

pub use list::{ConfirmedItem, MergedItem, ReconciledList};
pub use optimistic::{
    Aggregates, Delta, EntryStatus, OptimisticEntry, OptimisticStore, ToggleOutcome,
};
pub use tree::{ReconciledTree, TreeError, TreeNode};
