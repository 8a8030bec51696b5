//! Expiry sweeping for stored attachments
//!
//! [`CleanupSweeper`] performs one pass over the registry and reclaims every
//! expired file. Only one pass runs at a time per process; a second caller
//! gets a `skipped` result instead of a concurrent scan.
//!
//! [`CleanupTaskManager`] owns the recurring loop. It is started lazily by the
//! first tool call or health check, at most once per process, and can be shut
//! down without interrupting a pass that is already running.

use crate::registry::{AttachmentRegistry, Clock};
use crate::storage::StorageDirectory;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, error, info, warn};

/// Outcome of one cleanup pass
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct CleanupStats {
    pub files_removed: u64,
    pub bytes_removed: u64,
    /// Expired files whose deletion failed; retried on the next pass
    pub failed: u64,
    /// Another pass was already running, nothing was done
    pub skipped: bool,
}

/// Snapshot of the cleanup task for status endpoints
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CleanupTaskState {
    pub enabled: bool,
    pub running: bool,
    pub interval_seconds: u64,
    pub sweep_in_progress: bool,
    pub last_run_at: Option<DateTime<Utc>>,
    pub last_run_stats: Option<CleanupStats>,
    pub total_runs: u64,
    pub total_files_removed: u64,
    pub total_bytes_removed: u64,
    pub tracked_files: usize,
    pub tracked_bytes: u64,
}

#[derive(Debug, Clone, Default)]
struct SweepHistory {
    last_run_at: Option<DateTime<Utc>>,
    last_run_stats: Option<CleanupStats>,
    total_runs: u64,
    total_files_removed: u64,
    total_bytes_removed: u64,
}

/// Resets the in-progress flag even if the pass is cancelled
struct SweepGuard<'a>(&'a AtomicBool);

impl<'a> SweepGuard<'a> {
    fn acquire(flag: &'a AtomicBool) -> Option<Self> {
        flag.compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| Self(flag))
    }
}

impl Drop for SweepGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

/// Removes expired attachments from disk and from the registry
#[derive(Debug)]
pub struct CleanupSweeper {
    registry: Arc<AttachmentRegistry>,
    storage: Arc<StorageDirectory>,
    clock: Arc<dyn Clock>,
    in_progress: AtomicBool,
    history: Mutex<SweepHistory>,
}

impl CleanupSweeper {
    pub fn new(
        registry: Arc<AttachmentRegistry>,
        storage: Arc<StorageDirectory>,
        clock: Arc<dyn Clock>,
    ) -> Self {
        Self {
            registry,
            storage,
            clock,
            in_progress: AtomicBool::new(false),
            history: Mutex::new(SweepHistory::default()),
        }
    }

    /// Run one pass.
    ///
    /// Each expired record is deregistered first and its file deleted second,
    /// so an interrupted pass can at worst leave an untracked file behind,
    /// never a record pointing at a deleted file. A failed deletion puts the
    /// record back for the next pass and does not stop the batch.
    pub async fn sweep(&self) -> CleanupStats {
        let Some(_guard) = SweepGuard::acquire(&self.in_progress) else {
            debug!("Cleanup pass already in progress, skipping");
            return CleanupStats {
                skipped: true,
                ..Default::default()
            };
        };

        let now = self.clock.now();
        let mut stats = CleanupStats::default();

        for expired in self.registry.expired(now) {
            let Some(record) = self.registry.remove(&expired.id) else {
                continue;
            };

            match self.storage.remove(&record.stored_path).await {
                Ok(existed) => {
                    if !existed {
                        debug!("File for {} was already gone", record.id);
                    }
                    stats.files_removed += 1;
                    stats.bytes_removed += record.size_bytes;
                }
                Err(e) => {
                    warn!(
                        file_id = %record.id,
                        error = %e,
                        "Failed to delete expired attachment, will retry next pass"
                    );
                    stats.failed += 1;
                    let id = record.id;
                    if let Err(e) = self.registry.insert(record) {
                        error!(file_id = %id, error = %e, "Could not re-register attachment");
                    }
                }
            }
        }

        self.record_run(now, stats);

        if stats.files_removed > 0 || stats.failed > 0 {
            info!(
                files_removed = stats.files_removed,
                bytes_removed = stats.bytes_removed,
                failed = stats.failed,
                "Cleanup pass completed"
            );
        }

        stats
    }

    pub fn is_sweeping(&self) -> bool {
        self.in_progress.load(Ordering::Acquire)
    }

    fn record_run(&self, at: DateTime<Utc>, stats: CleanupStats) {
        if let Ok(mut history) = self.history.lock() {
            history.last_run_at = Some(at);
            history.last_run_stats = Some(stats);
            history.total_runs += 1;
            history.total_files_removed += stats.files_removed;
            history.total_bytes_removed += stats.bytes_removed;
        }
    }

    fn history(&self) -> SweepHistory {
        self.history
            .lock()
            .map(|history| history.clone())
            .unwrap_or_default()
    }
}

struct ScheduledLoop {
    handle: JoinHandle<()>,
    shutdown: watch::Sender<bool>,
}

enum LoopState {
    NotStarted,
    Running(ScheduledLoop),
    Stopped,
}

/// Owns the recurring cleanup loop
pub struct CleanupTaskManager {
    sweeper: Arc<CleanupSweeper>,
    registry: Arc<AttachmentRegistry>,
    clock: Arc<dyn Clock>,
    interval: Duration,
    enabled: bool,
    state: Mutex<LoopState>,
}

impl std::fmt::Debug for CleanupTaskManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CleanupTaskManager")
            .field("interval", &self.interval)
            .field("enabled", &self.enabled)
            .field("running", &self.is_running())
            .finish()
    }
}

impl CleanupTaskManager {
    pub fn new(
        sweeper: Arc<CleanupSweeper>,
        registry: Arc<AttachmentRegistry>,
        clock: Arc<dyn Clock>,
        interval: Duration,
        enabled: bool,
    ) -> Self {
        Self {
            sweeper,
            registry,
            clock,
            interval,
            enabled,
            state: Mutex::new(LoopState::NotStarted),
        }
    }

    /// The sweeper, for on-demand passes
    pub fn sweeper(&self) -> &Arc<CleanupSweeper> {
        &self.sweeper
    }

    /// Start the recurring loop if it has never been started.
    ///
    /// Idempotent. Returns whether the loop is running after the call. Does
    /// nothing when automatic cleanup is disabled, after `shutdown`, or when
    /// called outside a tokio runtime.
    pub fn ensure_started(&self) -> bool {
        if !self.enabled || self.interval.is_zero() {
            return false;
        }

        let Ok(mut state) = self.state.lock() else {
            error!("Cleanup task state lock poisoned");
            return false;
        };

        match &*state {
            LoopState::Running(_) => true,
            LoopState::Stopped => false,
            LoopState::NotStarted => {
                let Ok(runtime) = tokio::runtime::Handle::try_current() else {
                    warn!("No async runtime available, cleanup loop not started");
                    return false;
                };

                let Some(first_sweep) = Instant::now().checked_add(self.interval) else {
                    warn!(
                        "Cleanup interval of {}s is out of range, cleanup loop not started",
                        self.interval.as_secs()
                    );
                    return false;
                };

                let (shutdown, shutdown_rx) = watch::channel(false);
                let handle = runtime.spawn(run_loop(
                    Arc::clone(&self.sweeper),
                    first_sweep,
                    self.interval,
                    shutdown_rx,
                ));

                info!(
                    "Started attachment cleanup loop (every {}s)",
                    self.interval.as_secs()
                );
                *state = LoopState::Running(ScheduledLoop { handle, shutdown });
                true
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.state
            .lock()
            .map(|state| match &*state {
                LoopState::Running(scheduled) => !scheduled.handle.is_finished(),
                _ => false,
            })
            .unwrap_or(false)
    }

    /// Stop the recurring loop. A pass already in flight finishes first.
    pub async fn shutdown(&self) {
        let scheduled = match self.state.lock() {
            Ok(mut state) => match std::mem::replace(&mut *state, LoopState::Stopped) {
                LoopState::Running(scheduled) => Some(scheduled),
                _ => None,
            },
            Err(_) => None,
        };

        let Some(scheduled) = scheduled else {
            return;
        };

        let _ = scheduled.shutdown.send(true);
        if let Err(e) = scheduled.handle.await {
            warn!("Cleanup loop ended abnormally: {}", e);
        }
        info!("Attachment cleanup loop stopped");
    }

    pub fn status(&self) -> CleanupTaskState {
        let history = self.sweeper.history();
        let registry = self.registry.stats(self.clock.now());

        CleanupTaskState {
            enabled: self.enabled,
            running: self.is_running(),
            interval_seconds: self.interval.as_secs(),
            sweep_in_progress: self.sweeper.is_sweeping(),
            last_run_at: history.last_run_at,
            last_run_stats: history.last_run_stats,
            total_runs: history.total_runs,
            total_files_removed: history.total_files_removed,
            total_bytes_removed: history.total_bytes_removed,
            tracked_files: registry.tracked_files,
            tracked_bytes: registry.tracked_bytes,
        }
    }
}

async fn run_loop(
    sweeper: Arc<CleanupSweeper>,
    first_sweep: Instant,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) {
    let mut ticker = tokio::time::interval_at(first_sweep, interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            _ = ticker.tick() => {
                sweeper.sweep().await;
            }
            changed = shutdown.changed() => {
                if changed.is_err() || *shutdown.borrow() {
                    debug!("Cleanup loop received shutdown");
                    break;
                }
            }
        }
    }
}
