//! Cleanup tools
//!
//! On-demand cleanup of expired attachments and cleanup task status.

use crate::cleanup::{CleanupStats, CleanupTaskManager, CleanupTaskState};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{info, instrument};

/// Result from the cleanup_expired_files tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupFilesResult {
    pub files_removed: u64,
    pub bytes_removed: u64,
    /// Expired files that could not be deleted this time
    pub failed: u64,
    /// True when another pass was already running
    pub skipped: bool,
    /// Files still tracked after the pass
    pub remaining_files: usize,
    pub message: String,
}

impl CleanupFilesResult {
    fn from_stats(stats: CleanupStats, remaining_files: usize) -> Self {
        let message = if stats.skipped {
            "A cleanup pass is already running; nothing was done".to_string()
        } else if stats.files_removed == 0 && stats.failed == 0 {
            "No expired files to remove".to_string()
        } else {
            let mut message = format!(
                "Removed {} expired file(s), {} bytes",
                stats.files_removed, stats.bytes_removed
            );
            if stats.failed > 0 {
                message.push_str(&format!(
                    "; {} file(s) could not be deleted and will be retried",
                    stats.failed
                ));
            }
            message
        };

        Self {
            files_removed: stats.files_removed,
            bytes_removed: stats.bytes_removed,
            failed: stats.failed,
            skipped: stats.skipped,
            remaining_files,
            message,
        }
    }
}

/// Implementation of the cleanup tools
pub struct CleanupFilesTool {
    cleanup: Arc<CleanupTaskManager>,
}

impl CleanupFilesTool {
    pub fn new(cleanup: Arc<CleanupTaskManager>) -> Self {
        Self { cleanup }
    }

    /// Run one cleanup pass now, independent of the schedule
    #[instrument(skip(self))]
    pub async fn execute(&self) -> CleanupFilesResult {
        info!("Executing cleanup_expired_files tool");

        let stats = self.cleanup.sweeper().sweep().await;
        let remaining = self.cleanup.status().tracked_files;

        CleanupFilesResult::from_stats(stats, remaining)
    }

    pub fn status(&self) -> CleanupTaskState {
        self.cleanup.status()
    }
}
