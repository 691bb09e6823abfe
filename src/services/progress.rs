use crate::error::{Result, StorageError};
use chrono::{DateTime, Utc};
use serde::Serialize;
use tokio::sync::watch;

/// Point-in-time view of a single transfer.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ProgressSnapshot {
    pub bytes_transferred: u64,
    pub total_bytes: Option<u64>,
    /// 0-100, never decreases
    pub percentage: f64,
    pub time_last_updated: DateTime<Utc>,
    pub complete: bool,
}

impl ProgressSnapshot {
    fn started(total_bytes: Option<u64>) -> Self {
        Self {
            bytes_transferred: 0,
            total_bytes,
            percentage: 0.0,
            time_last_updated: Utc::now(),
            complete: false,
        }
    }

    fn recompute(&mut self) {
        if let Some(total) = self.total_bytes.filter(|t| *t > 0) {
            let pct = self.bytes_transferred as f64 * 100.0 / total as f64;
            self.percentage = self.percentage.max(pct.min(100.0));
        }
        self.time_last_updated = Utc::now();
    }
}

/// Writer side of a transfer's progress. Owned by whoever moves the bytes.
///
/// Updates are published over a watch channel, so any number of
/// [`ProgressHandle`]s can poll without locking the transfer.
#[derive(Debug)]
pub struct ProgressTracker {
    tx: watch::Sender<ProgressSnapshot>,
}

impl ProgressTracker {
    pub fn new(total_bytes: Option<u64>) -> Self {
        let (tx, _rx) = watch::channel(ProgressSnapshot::started(total_bytes));
        Self { tx }
    }

    pub fn handle(&self) -> ProgressHandle {
        ProgressHandle {
            rx: self.tx.subscribe(),
        }
    }

    /// Records the total once it is known. Ignored if a total is already set.
    pub fn set_total(&self, total_bytes: u64) {
        self.tx.send_if_modified(|snap| {
            if snap.complete || snap.total_bytes.is_some() {
                return false;
            }
            snap.total_bytes = Some(total_bytes);
            snap.recompute();
            true
        });
    }

    /// Adds `bytes` acknowledged by the destination.
    pub fn advance(&self, bytes: u64) {
        self.tx.send_if_modified(|snap| {
            if snap.complete {
                return false;
            }
            snap.bytes_transferred += bytes;
            snap.recompute();
            true
        });
    }

    /// Marks the transfer done. The snapshot is frozen from here on.
    pub fn finish(&self) {
        self.tx.send_if_modified(|snap| {
            if snap.complete {
                return false;
            }
            snap.total_bytes = Some(snap.total_bytes.unwrap_or(snap.bytes_transferred));
            snap.percentage = 100.0;
            snap.complete = true;
            snap.time_last_updated = Utc::now();
            true
        });
    }
}

/// Reader side of a transfer's progress, returned to callers of `write`.
#[derive(Debug, Clone)]
pub struct ProgressHandle {
    rx: watch::Receiver<ProgressSnapshot>,
}

impl ProgressHandle {
    /// Non-blocking read of the latest state.
    pub fn snapshot(&self) -> ProgressSnapshot {
        self.rx.borrow().clone()
    }

    pub fn percentage(&self) -> f64 {
        self.rx.borrow().percentage
    }

    pub fn bytes_transferred(&self) -> u64 {
        self.rx.borrow().bytes_transferred
    }

    pub fn time_last_updated(&self) -> DateTime<Utc> {
        self.rx.borrow().time_last_updated
    }

    pub fn is_complete(&self) -> bool {
        self.rx.borrow().complete
    }

    /// Waits until the transfer completes. Fails if the tracker was dropped
    /// without finishing, which is how an aborted transfer shows up here.
    pub async fn wait(&self) -> Result<ProgressSnapshot> {
        let mut rx = self.rx.clone();
        let snap = rx
            .wait_for(|snap| snap.complete)
            .await
            .map_err(|_| StorageError::transfer("Progress", "transfer ended before completion"))?;
        Ok(snap.clone())
    }
}
