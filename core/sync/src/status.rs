//! Status model for the UI adapter.

use chrono::{DateTime, Utc};
use serde::Serialize;
use std::fmt;

use crate::connectivity::Connectivity;
use crate::queue::QueueCounts;
use crate::synchronizer::SyncProgress;

/// Everything a status bar needs: queue counts, online badge, last sync
/// time and live progress.
///
/// Queued records are never described as synced; only an empty queue is.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatusView {
    pub connectivity: Connectivity,
    pub counts: QueueCounts,
    pub last_sync: Option<DateTime<Utc>>,
    pub progress: SyncProgress,
}

impl StatusView {
    /// Records waiting for delivery, whatever their status.
    pub fn pending_count(&self) -> usize {
        self.counts.total()
    }

    /// Whether any record needs user attention.
    pub fn needs_attention(&self) -> bool {
        self.counts.failed > 0 || self.counts.abandoned > 0
    }

    /// Short online/offline badge.
    pub fn badge(&self) -> &'static str {
        match self.connectivity {
            Connectivity::Online => "[online]",
            Connectivity::Offline => "[offline]",
        }
    }
}

impl fmt::Display for StatusView {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ", self.badge())?;

        let pending = self.pending_count();
        if pending == 0 {
            write!(f, "all records synced")?;
        } else {
            write!(f, "{} queued, not yet synced", pending)?;
            if self.needs_attention() {
                write!(
                    f,
                    " ({} failed, {} abandoned)",
                    self.counts.failed, self.counts.abandoned
                )?;
            }
        }

        match self.last_sync {
            Some(time) => write!(f, " | last sync {}", time.format("%Y-%m-%d %H:%M:%S UTC"))?,
            None => write!(f, " | never synced")?,
        }

        if self.progress.running {
            write!(
                f,
                " | syncing {}/{}",
                self.progress.current, self.progress.total
            )?;
        }
        Ok(())
    }
}
