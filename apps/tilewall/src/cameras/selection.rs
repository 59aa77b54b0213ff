//! Selection: which cameras are on the wall and which are expanded.
//!
//! Selected ids are ordered (tile order); expanded ids are a set and always a subset of
//! the selection. Both persist as comma-separated text under two keys. The store is
//! best-effort: load failures fall back to the current selection, save failures are
//! logged by the caller and otherwise ignored.

use std::collections::{BTreeSet, HashSet};
use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;
use redis::AsyncCommands;
use serde::Serialize;
use thiserror::Error;

use crate::cameras::Camera;

pub const SELECTED_KEY: &str = "tilewall:selected_csv";
pub const EXPANDED_KEY: &str = "tilewall:expanded_csv";
/// Longest wait for a Redis connection before the store counts as unavailable.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(3);

// ────────────────────────────────────────────────────────────────────────────
// State
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SelectionState {
    pub selected: Vec<String>,
    pub expanded: BTreeSet<String>,
}

impl SelectionState {
    fn prune_expanded(&mut self) {
        let selected: HashSet<&str> = self.selected.iter().map(String::as_str).collect();
        self.expanded.retain(|id| selected.contains(id.as_str()));
    }

    pub fn set_selected(&mut self, ids: Vec<String>) {
        self.selected = dedup(ids);
        self.prune_expanded();
    }

    /// Flips expansion for a selected camera. Unselected ids are ignored.
    pub fn toggle_expanded(&mut self, id: &str) {
        if !self.expanded.remove(id) {
            self.expanded.insert(id.to_string());
        }
        self.prune_expanded();
    }

    pub fn is_selected(&self, id: &str) -> bool {
        self.selected.iter().any(|s| s == id)
    }
}

fn dedup(ids: Vec<String>) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.into_iter().filter(|id| seen.insert(id.clone())).collect()
}

// ────────────────────────────────────────────────────────────────────────────
// Persistence format
// ────────────────────────────────────────────────────────────────────────────

/// Raw values as stored. Missing keys are `None`.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PersistedSelection {
    pub selected_csv: Option<String>,
    pub expanded_csv: Option<String>,
}

impl PersistedSelection {
    pub fn from_state(state: &SelectionState) -> Self {
        Self {
            selected_csv: Some(to_csv(&state.selected)),
            expanded_csv: Some(to_csv(&state.expanded)),
        }
    }
}

pub fn parse_csv(csv: Option<&str>) -> Vec<String> {
    csv.map(|s| {
        s.split(',')
            .map(str::trim)
            .filter(|part| !part.is_empty())
            .map(String::from)
            .collect()
    })
    .unwrap_or_default()
}

pub fn to_csv<'a>(ids: impl IntoIterator<Item = &'a String>) -> String {
    ids.into_iter().map(String::as_str).collect::<Vec<_>>().join(",")
}

/// Resolves persisted ids against the fetched cameras.
///
/// Selected ids keep their stored order and drop unknown cameras; an empty result
/// selects the first camera. When the store could not be read, the current selection
/// is kept under the same rules.
pub fn apply_persisted(
    all: &[Camera],
    persisted: Option<&PersistedSelection>,
    current: &SelectionState,
) -> SelectionState {
    let known: HashSet<&str> = all.iter().map(|c| c.id.as_str()).collect();

    let (selected, expanded) = match persisted {
        Some(p) => (
            parse_csv(p.selected_csv.as_deref()),
            parse_csv(p.expanded_csv.as_deref()),
        ),
        None => (
            current.selected.clone(),
            current.expanded.iter().cloned().collect(),
        ),
    };

    let mut selected: Vec<String> = dedup(selected)
        .into_iter()
        .filter(|id| known.contains(id.as_str()))
        .collect();
    if selected.is_empty() {
        selected.extend(all.first().map(|c| c.id.clone()));
    }

    let mut state = SelectionState {
        selected,
        expanded: expanded.into_iter().collect(),
    };
    state.prune_expanded();
    state
}

// ────────────────────────────────────────────────────────────────────────────
// Draft
// ────────────────────────────────────────────────────────────────────────────

/// What a commit changed.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct SelectionDiff {
    pub added: Vec<String>,
    pub removed: Vec<String>,
}

impl SelectionDiff {
    pub fn is_empty(&self) -> bool {
        self.added.is_empty() && self.removed.is_empty()
    }
}

/// Buffered selection edited by the operator; nothing changes until `commit`.
#[derive(Debug, Clone, PartialEq)]
pub struct SelectionDraft {
    initial: Vec<String>,
    picked: HashSet<String>,
}

impl SelectionDraft {
    pub fn new(current: &SelectionState) -> Self {
        Self {
            initial: current.selected.clone(),
            picked: current.selected.iter().cloned().collect(),
        }
    }

    pub fn set(&mut self, ids: impl IntoIterator<Item = String>) {
        self.picked = ids.into_iter().collect();
    }

    /// Selection in camera-list order, plus what changed against the starting point.
    /// Ids without a camera are dropped.
    pub fn commit(&self, all: &[Camera]) -> (Vec<String>, SelectionDiff) {
        let selected: Vec<String> = all
            .iter()
            .filter(|c| self.picked.contains(&c.id))
            .map(|c| c.id.clone())
            .collect();

        let before: HashSet<&str> = self.initial.iter().map(String::as_str).collect();
        let after: HashSet<&str> = selected.iter().map(String::as_str).collect();
        let diff = SelectionDiff {
            added: selected
                .iter()
                .filter(|id| !before.contains(id.as_str()))
                .cloned()
                .collect(),
            removed: self
                .initial
                .iter()
                .filter(|id| !after.contains(id.as_str()))
                .cloned()
                .collect(),
        };
        (selected, diff)
    }
}

// ────────────────────────────────────────────────────────────────────────────
// Stores
// ────────────────────────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("Redis error: {0}")]
    Redis(#[from] redis::RedisError),

    #[error("Store unavailable: {0}")]
    Unavailable(String),
}

#[async_trait]
pub trait SelectionStore: Send + Sync {
    async fn load(&self) -> Result<PersistedSelection, StoreError>;
    async fn save(&self, selection: &PersistedSelection) -> Result<(), StoreError>;
}

/// Redis-backed store; both keys are written in one atomic pipeline.
pub struct RedisSelectionStore {
    client: redis::Client,
}

impl RedisSelectionStore {
    pub fn new(client: redis::Client) -> Self {
        Self { client }
    }

    async fn connection(&self) -> Result<redis::aio::MultiplexedConnection, StoreError> {
        tokio::time::timeout(CONNECT_TIMEOUT, self.client.get_multiplexed_async_connection())
            .await
            .map_err(|_| StoreError::Unavailable(format!("no connection within {CONNECT_TIMEOUT:?}")))?
            .map_err(StoreError::from)
    }
}

#[async_trait]
impl SelectionStore for RedisSelectionStore {
    async fn load(&self) -> Result<PersistedSelection, StoreError> {
        let mut conn = self.connection().await?;
        let selected_csv: Option<String> = conn.get(SELECTED_KEY).await?;
        let expanded_csv: Option<String> = conn.get(EXPANDED_KEY).await?;
        Ok(PersistedSelection {
            selected_csv,
            expanded_csv,
        })
    }

    async fn save(&self, selection: &PersistedSelection) -> Result<(), StoreError> {
        let mut conn = self.connection().await?;
        let mut pipe = redis::pipe();
        pipe.atomic();
        for (key, value) in [
            (SELECTED_KEY, &selection.selected_csv),
            (EXPANDED_KEY, &selection.expanded_csv),
        ] {
            match value {
                Some(v) => pipe.set(key, v).ignore(),
                None => pipe.del(key).ignore(),
            };
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(())
    }
}

/// Process-local store used when no Redis URL is configured.
#[derive(Default)]
pub struct MemorySelectionStore {
    inner: Mutex<PersistedSelection>,
}

impl MemorySelectionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SelectionStore for MemorySelectionStore {
    async fn load(&self) -> Result<PersistedSelection, StoreError> {
        Ok(self.inner.lock().unwrap_or_else(PoisonError::into_inner).clone())
    }

    async fn save(&self, selection: &PersistedSelection) -> Result<(), StoreError> {
        *self.inner.lock().unwrap_or_else(PoisonError::into_inner) = selection.clone();
        Ok(())
    }
}
