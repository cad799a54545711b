//! Global cost ledger with daily/monthly UTC accounting.
//!
//! One tracker is shared by the whole pool. Mutations are serialized behind
//! the ledger lock; exceeded-callbacks are dispatched with that lock released
//! so a callback may turn around and pause the very agent that recorded the
//! cost.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Datelike, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{debug, warn};

use crate::fs::write_json_atomic;

const COST_LOG_FILE: &str = "cost-log.json";

/// One billing record. Append-only within a process lifetime.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CostEntry {
    pub agent_id: String,
    pub cost_usd: f64,
    pub project_number: u64,
    pub timestamp: DateTime<Utc>,
}

/// Derived spend snapshot. Remaining values are clamped to zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct BudgetStatus {
    pub daily_spend: f64,
    pub monthly_spend: f64,
    pub daily_limit: f64,
    pub monthly_limit: f64,
    pub daily_remaining: f64,
    pub monthly_remaining: f64,
    pub is_within_budget: bool,
}

#[derive(Debug, Error)]
pub enum BudgetError {
    #[error("failed to persist cost log: {0}")]
    Persist(#[from] std::io::Error),
}

type ExceededCallback = Arc<dyn Fn(BudgetStatus) + Send + Sync>;

/// Per-agent cost ledger with limit-crossing callbacks.
///
/// Callbacks fire on every insert that leaves the tracker over budget
/// (level-triggered), synchronously from within the `record_cost` caller.
pub struct BudgetTracker {
    daily_limit: f64,
    monthly_limit: f64,
    session_dir: PathBuf,
    entries: Mutex<Vec<CostEntry>>,
    callbacks: Mutex<Vec<ExceededCallback>>,
}

impl std::fmt::Debug for BudgetTracker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BudgetTracker")
            .field("daily_limit", &self.daily_limit)
            .field("monthly_limit", &self.monthly_limit)
            .field("session_dir", &self.session_dir)
            .finish()
    }
}

impl BudgetTracker {
    pub fn new(daily_limit: f64, monthly_limit: f64, session_dir: PathBuf) -> Self {
        Self {
            daily_limit,
            monthly_limit,
            session_dir,
            entries: Mutex::new(Vec::new()),
            callbacks: Mutex::new(Vec::new()),
        }
    }

    /// Register a callback fired whenever an insert leaves the tracker over
    /// budget.
    pub fn on_budget_exceeded<F>(&self, callback: F)
    where
        F: Fn(BudgetStatus) + Send + Sync + 'static,
    {
        self.callbacks
            .lock()
            .expect("budget callback lock poisoned")
            .push(Arc::new(callback));
    }

    /// Append a cost entry stamped with the current UTC time.
    ///
    /// Dispatches every registered exceeded-callback when the post-insert
    /// budget predicate fails.
    pub fn record_cost(&self, agent_id: &str, cost_usd: f64, project_number: u64) {
        let status = {
            let mut entries = self.entries.lock().expect("budget ledger lock poisoned");
            entries.push(CostEntry {
                agent_id: agent_id.to_string(),
                cost_usd,
                project_number,
                timestamp: Utc::now(),
            });
            Self::status_of(&entries, self.daily_limit, self.monthly_limit)
        };

        debug!(
            agent_id = %agent_id,
            cost_usd = %cost_usd,
            daily_spend = %status.daily_spend,
            monthly_spend = %status.monthly_spend,
            "recorded cost"
        );

        if !status.is_within_budget {
            // Ledger lock is released here; callbacks are free to pause the
            // pool without re-entering the tracker.
            let callbacks = self
                .callbacks
                .lock()
                .expect("budget callback lock poisoned")
                .clone();
            for callback in callbacks {
                callback(status.clone());
            }
        }
    }

    /// Strict predicate: both daily and monthly spend must be below their
    /// limits.
    pub fn is_within_budget(&self) -> bool {
        self.get_budget_status().is_within_budget
    }

    pub fn get_daily_spend(&self) -> f64 {
        self.get_budget_status().daily_spend
    }

    pub fn get_monthly_spend(&self) -> f64 {
        self.get_budget_status().monthly_spend
    }

    pub fn get_budget_status(&self) -> BudgetStatus {
        let entries = self.entries.lock().expect("budget ledger lock poisoned");
        Self::status_of(&entries, self.daily_limit, self.monthly_limit)
    }

    fn status_of(entries: &[CostEntry], daily_limit: f64, monthly_limit: f64) -> BudgetStatus {
        let now = Utc::now();
        let today = now.date_naive();
        let month = (now.year(), now.month());

        let mut daily_spend = 0.0;
        let mut monthly_spend = 0.0;
        for entry in entries {
            if (entry.timestamp.year(), entry.timestamp.month()) == month {
                monthly_spend += entry.cost_usd;
                if entry.timestamp.date_naive() == today {
                    daily_spend += entry.cost_usd;
                }
            }
        }

        BudgetStatus {
            daily_spend,
            monthly_spend,
            daily_limit,
            monthly_limit,
            daily_remaining: (daily_limit - daily_spend).max(0.0),
            monthly_remaining: (monthly_limit - monthly_spend).max(0.0),
            is_within_budget: daily_spend < daily_limit && monthly_spend < monthly_limit,
        }
    }

    /// Write the ledger to `<dir>/cost-log.json` atomically.
    pub async fn persist_to_file(&self) -> Result<(), BudgetError> {
        let snapshot = self
            .entries
            .lock()
            .expect("budget ledger lock poisoned")
            .clone();
        let path = self.session_dir.join(COST_LOG_FILE);
        write_json_atomic(&path, &snapshot).await?;
        debug!(path = %path.display(), entries = snapshot.len(), "persisted cost log");
        Ok(())
    }

    /// Load a previously persisted ledger.
    ///
    /// Missing file is a no-op; a malformed file resets to an empty ledger
    /// with a warning. Never fails the caller.
    pub async fn load_from_file(&self) {
        let path = self.session_dir.join(COST_LOG_FILE);
        let bytes = match tokio::fs::read(&path).await {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return,
            Err(e) => {
                warn!(path = %path.display(), error = %e, "failed to read cost log");
                return;
            }
        };

        let mut entries = self.entries.lock().expect("budget ledger lock poisoned");
        match serde_json::from_slice::<Vec<CostEntry>>(&bytes) {
            Ok(loaded) => {
                debug!(path = %path.display(), entries = loaded.len(), "loaded cost log");
                *entries = loaded;
            }
            Err(e) => {
                warn!(path = %path.display(), error = %e, "cost log unparsable, resetting ledger");
                entries.clear();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn tracker_in(dir: &tempfile::TempDir, daily: f64, monthly: f64) -> BudgetTracker {
        BudgetTracker::new(daily, monthly, dir.path().to_path_buf())
    }

    #[test]
    fn daily_spend_sums_same_day_entries() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(&dir, 100.0, 1000.0);

        tracker.record_cost("agent-1", 0.25, 1);
        tracker.record_cost("agent-2", 0.50, 2);

        let status = tracker.get_budget_status();
        assert!((status.daily_spend - 0.75).abs() < 1e-9);
        assert!((status.monthly_spend - 0.75).abs() < 1e-9);
        assert!(status.is_within_budget);
    }

    #[test]
    fn exceeded_callbacks_fire_on_crossing_insert() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(&dir, 1.0, 1000.0);
        let fired = Arc::new(AtomicU32::new(0));
        let seen = Arc::new(Mutex::new(Vec::new()));

        {
            let fired = Arc::clone(&fired);
            let seen = Arc::clone(&seen);
            tracker.on_budget_exceeded(move |status| {
                fired.fetch_add(1, Ordering::SeqCst);
                seen.lock().unwrap().push(status);
            });
        }

        tracker.record_cost("agent-1", 0.80, 1);
        assert_eq!(fired.load(Ordering::SeqCst), 0);
        assert!(tracker.is_within_budget());

        tracker.record_cost("agent-1", 0.30, 1);
        assert_eq!(fired.load(Ordering::SeqCst), 1);
        assert!(!tracker.is_within_budget());

        let statuses = seen.lock().unwrap();
        assert!((statuses[0].daily_spend - 1.10).abs() < 1e-9);
        assert!(!statuses[0].is_within_budget);
        assert_eq!(statuses[0].daily_remaining, 0.0);
    }

    #[test]
    fn every_registered_callback_is_dispatched() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(&dir, 0.5, 1000.0);
        let fired = Arc::new(AtomicU32::new(0));

        for _ in 0..3 {
            let fired = Arc::clone(&fired);
            tracker.on_budget_exceeded(move |_| {
                fired.fetch_add(1, Ordering::SeqCst);
            });
        }

        tracker.record_cost("agent-1", 1.0, 1);
        assert_eq!(fired.load(Ordering::SeqCst), 3);
    }

    #[test]
    fn remaining_is_clamped_to_zero() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(&dir, 1.0, 2.0);
        tracker.record_cost("agent-1", 5.0, 1);

        let status = tracker.get_budget_status();
        assert_eq!(status.daily_remaining, 0.0);
        assert_eq!(status.monthly_remaining, 0.0);
    }

    #[tokio::test]
    async fn persist_then_load_preserves_spend() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(&dir, 100.0, 1000.0);
        tracker.record_cost("agent-1", 0.10, 1);
        tracker.record_cost("agent-2", 0.35, 2);
        tracker.persist_to_file().await.unwrap();

        let fresh = tracker_in(&dir, 100.0, 1000.0);
        fresh.load_from_file().await;

        assert!((fresh.get_daily_spend() - tracker.get_daily_spend()).abs() < 1e-9);
        assert!((fresh.get_monthly_spend() - tracker.get_monthly_spend()).abs() < 1e-9);
    }

    #[tokio::test]
    async fn load_missing_file_is_noop() {
        let dir = tempfile::tempdir().unwrap();
        let tracker = tracker_in(&dir, 100.0, 1000.0);
        tracker.load_from_file().await;
        assert_eq!(tracker.get_daily_spend(), 0.0);
    }

    #[tokio::test]
    async fn load_corrupt_file_resets_ledger() {
        let dir = tempfile::tempdir().unwrap();
        tokio::fs::write(dir.path().join(COST_LOG_FILE), b"not json at all")
            .await
            .unwrap();

        let tracker = tracker_in(&dir, 100.0, 1000.0);
        tracker.record_cost("agent-1", 0.10, 1);
        tracker.load_from_file().await;
        assert_eq!(tracker.get_daily_spend(), 0.0);
    }

    #[tokio::test]
    async fn stale_entries_age_out_of_daily_bucket() {
        let dir = tempfile::tempdir().unwrap();
        let yesterday = Utc::now() - chrono::Duration::days(1);
        let entries = vec![
            CostEntry {
                agent_id: "agent-1".to_string(),
                cost_usd: 2.0,
                project_number: 1,
                timestamp: yesterday,
            },
            CostEntry {
                agent_id: "agent-1".to_string(),
                cost_usd: 0.5,
                project_number: 1,
                timestamp: Utc::now(),
            },
        ];
        tokio::fs::write(
            dir.path().join(COST_LOG_FILE),
            serde_json::to_vec(&entries).unwrap(),
        )
        .await
        .unwrap();

        let tracker = tracker_in(&dir, 100.0, 1000.0);
        tracker.load_from_file().await;

        assert!((tracker.get_daily_spend() - 0.5).abs() < 1e-9);
        // Yesterday may or may not share the month; monthly spend must at
        // least cover today's entry.
        assert!(tracker.get_monthly_spend() >= 0.5);
    }
}
