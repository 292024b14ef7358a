//! Per-record progress bookkeeping shared by every worker of an analysis run.
//!
//! Records get a stable [`RecordId`] when registered; names (case-insensitive, plus any
//! corrected names a result reports) form a secondary index onto those ids. Every
//! terminal write goes through [`ProgressTable::settle`], a revision-checked
//! compare-and-swap that applies the regression guard: once a record holds a result with
//! a positive total, a zero re-score or a failure never replaces it.

use std::collections::HashMap;
use std::fmt;

use chrono::{DateTime, Utc};
use leadscore_core::{EventRecord, NameKey, ScoreResult};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::Mutex;
use tracing::{debug, warn};

const MAX_SETTLE_ATTEMPTS: usize = 8;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct RecordId(pub usize);

impl fmt::Display for RecordId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{}", self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AnalysisStatus {
    Pending,
    Analyzing,
    Completed,
    Error,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    Data,
    RateLimit,
    Transient,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressEntry {
    pub id: RecordId,
    pub name: String,
    pub status: AnalysisStatus,
    /// Last stored result. Kept while a re-score is in flight.
    pub result: Option<ScoreResult>,
    pub error: Option<String>,
    pub error_kind: Option<ErrorKind>,
    pub revision: u64,
    pub updated_at: DateTime<Utc>,
}

impl ProgressEntry {
    fn pending(id: RecordId, name: &str) -> Self {
        Self {
            id,
            name: name.trim().to_string(),
            status: AnalysisStatus::Pending,
            result: None,
            error: None,
            error_kind: None,
            revision: 0,
            updated_at: Utc::now(),
        }
    }

    /// Total of the stored result when it is worth protecting.
    pub fn good_total(&self) -> Option<u8> {
        self.result
            .as_ref()
            .map(|r| r.total_score)
            .filter(|total| *total > 0)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Outcome {
    Scored(ScoreResult),
    Failed { kind: ErrorKind, message: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Settled {
    Completed { total: u8 },
    Errored,
    RegressionSuppressed { kept_total: u8 },
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum ProgressError {
    #[error("unknown record {0}")]
    UnknownRecord(RecordId),
}

/// Next entry for `current` given a worker outcome. Pure; the caller swaps it in.
pub fn guarded_transition(current: &ProgressEntry, outcome: &Outcome) -> (ProgressEntry, Settled) {
    let mut next = current.clone();
    next.revision = current.revision + 1;
    next.updated_at = Utc::now();

    let regresses = match outcome {
        Outcome::Scored(result) => result.total_score == 0,
        Outcome::Failed { .. } => true,
    };

    match (current.good_total(), outcome) {
        (Some(kept_total), _) if regresses => {
            next.status = AnalysisStatus::Completed;
            next.error = None;
            next.error_kind = None;
            (next, Settled::RegressionSuppressed { kept_total })
        }
        (_, Outcome::Scored(result)) => {
            next.status = AnalysisStatus::Completed;
            next.result = Some(result.clone());
            next.error = None;
            next.error_kind = None;
            (
                next,
                Settled::Completed {
                    total: result.total_score,
                },
            )
        }
        (_, Outcome::Failed { kind, message }) => {
            next.status = AnalysisStatus::Error;
            next.error = Some(message.clone());
            next.error_kind = Some(*kind);
            (next, Settled::Errored)
        }
    }
}

#[derive(Debug, Default)]
struct TableState {
    entries: Vec<ProgressEntry>,
    by_name: HashMap<NameKey, RecordId>,
}

impl TableState {
    fn insert(&mut self, name: &str) -> RecordId {
        let key = NameKey::new(name);
        if let Some(id) = self.by_name.get(&key) {
            return *id;
        }
        let id = RecordId(self.entries.len());
        self.entries.push(ProgressEntry::pending(id, name));
        self.by_name.insert(key, id);
        id
    }

    fn entry_mut(&mut self, id: RecordId) -> Result<&mut ProgressEntry, ProgressError> {
        self.entries
            .get_mut(id.0)
            .ok_or(ProgressError::UnknownRecord(id))
    }
}

/// Single source of truth for per-record analysis state.
#[derive(Debug, Default)]
pub struct ProgressTable {
    state: Mutex<TableState>,
}

impl ProgressTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register records in order. A name already present (case-insensitive) maps to its
    /// existing id, so accidental duplicates resolve to the first occurrence.
    pub async fn register(&self, records: &[EventRecord]) -> Vec<RecordId> {
        let mut state = self.state.lock().await;
        records.iter().map(|r| state.insert(&r.name)).collect()
    }

    pub async fn register_name(&self, name: &str) -> RecordId {
        self.state.lock().await.insert(name)
    }

    /// Seed a previously stored result, e.g. one restored from persistence.
    pub async fn restore_completed(&self, name: &str, result: ScoreResult) -> RecordId {
        let mut state = self.state.lock().await;
        let id = state.insert(name);
        if let Ok(entry) = state.entry_mut(id) {
            entry.status = AnalysisStatus::Completed;
            entry.result = Some(result);
            entry.error = None;
            entry.error_kind = None;
            entry.revision += 1;
            entry.updated_at = Utc::now();
        }
        id
    }

    pub async fn lookup(&self, name: &str) -> Option<RecordId> {
        self.state.lock().await.by_name.get(&NameKey::new(name)).copied()
    }

    pub async fn get(&self, id: RecordId) -> Option<ProgressEntry> {
        self.state.lock().await.entries.get(id.0).cloned()
    }

    pub async fn get_by_name(&self, name: &str) -> Option<ProgressEntry> {
        let state = self.state.lock().await;
        let id = state.by_name.get(&NameKey::new(name))?;
        state.entries.get(id.0).cloned()
    }

    /// Point-in-time copy of every entry, in registration order.
    pub async fn snapshot(&self) -> Vec<ProgressEntry> {
        self.state.lock().await.entries.clone()
    }

    pub async fn len(&self) -> usize {
        self.state.lock().await.entries.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    pub async fn mark_analyzing(&self, id: RecordId) -> Result<(), ProgressError> {
        let mut state = self.state.lock().await;
        let entry = state.entry_mut(id)?;
        entry.status = AnalysisStatus::Analyzing;
        entry.error = None;
        entry.error_kind = None;
        entry.revision += 1;
        entry.updated_at = Utc::now();
        Ok(())
    }

    /// Replace the entry only if it is still at `expected_revision`.
    /// On conflict the current entry is handed back.
    pub async fn compare_and_swap(
        &self,
        next: ProgressEntry,
        expected_revision: u64,
    ) -> Result<Result<(), ProgressEntry>, ProgressError> {
        let mut state = self.state.lock().await;
        let entry = state.entry_mut(next.id)?;
        if entry.revision != expected_revision {
            return Ok(Err(entry.clone()));
        }
        *entry = next;
        Ok(Ok(()))
    }

    /// Apply a worker outcome through the regression guard.
    pub async fn settle(&self, id: RecordId, outcome: Outcome) -> Result<Settled, ProgressError> {
        self.settle_within(id, outcome, MAX_SETTLE_ATTEMPTS).await
    }

    /// Optimistic settle with a bounded retry budget. Once the budget is spent the
    /// transition is applied while holding the table lock, so no entry is left `Analyzing`.
    async fn settle_within(
        &self,
        id: RecordId,
        outcome: Outcome,
        attempts: usize,
    ) -> Result<Settled, ProgressError> {
        for attempt in 1..=attempts {
            let current = self.get(id).await.ok_or(ProgressError::UnknownRecord(id))?;
            let (next, settled) = guarded_transition(&current, &outcome);
            match self.compare_and_swap(next, current.revision).await? {
                Ok(()) => return Ok(self.settled(id, &current.name, &outcome, settled).await),
                Err(seen) => {
                    debug!(
                        record = %seen.name,
                        %id,
                        attempt,
                        expected = current.revision,
                        found = seen.revision,
                        "progress entry moved during settle; retrying"
                    );
                }
            }
        }

        let (name, settled) = {
            let mut state = self.state.lock().await;
            let entry = state.entry_mut(id)?;
            let (next, settled) = guarded_transition(entry, &outcome);
            let name = entry.name.clone();
            *entry = next;
            (name, settled)
        };
        warn!(record = %name, %id, attempts, "settle kept losing races; applied under the lock");
        Ok(self.settled(id, &name, &outcome, settled).await)
    }

    async fn settled(&self, id: RecordId, name: &str, outcome: &Outcome, settled: Settled) -> Settled {
        if let Outcome::Scored(result) = outcome {
            self.alias(id, &result.event_name).await;
        }
        if let Settled::RegressionSuppressed { kept_total } = settled {
            warn!(
                record = %name,
                %id,
                kept_total,
                "re-score would regress a good result; keeping the stored score"
            );
        }
        settled
    }

    /// Point a corrected name at an existing record. Names owned by another record stay put.
    pub async fn alias(&self, id: RecordId, name: &str) {
        let key = NameKey::new(name);
        if key.is_empty() {
            return;
        }
        let mut state = self.state.lock().await;
        match state.by_name.get(&key) {
            Some(owner) if *owner == id => {}
            Some(owner) => {
                debug!(name, %id, owner = %owner, "name already indexed to another record");
            }
            None => {
                state.by_name.insert(key, id);
            }
        }
    }
}
