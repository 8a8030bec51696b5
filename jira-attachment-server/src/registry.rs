//! In-memory registry of published attachments
//!
//! The registry is the source of truth for what may be served and when it
//! expires. Records are write-once: inserted after the file is fully on disk,
//! read any number of times, removed once by the cleanup sweeper.

use crate::error::{AttachmentServerError, AttachmentServerResult};
use crate::file_id::FileId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::RwLock;
use tracing::debug;

/// Source of the current time, injectable so expiry can be tested
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// Wall clock
#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Metadata for one stored attachment
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AttachmentRecord {
    pub id: FileId,
    /// Display name from JIRA, untrusted
    pub original_filename: String,
    /// MIME type from JIRA, untrusted
    pub content_type: String,
    pub size_bytes: u64,
    /// Derived from `id` only, always inside the storage root
    pub stored_path: PathBuf,
    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    /// JIRA attachment id this file was downloaded from
    pub source_attachment_id: String,
}

impl AttachmentRecord {
    /// Expiry is inclusive: a record is gone at exactly `expires_at`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }
}

/// Registry statistics
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RegistryStats {
    pub tracked_files: usize,
    pub tracked_bytes: u64,
    pub expired_files: usize,
}

/// Map from file identifier to attachment metadata
#[derive(Debug, Default)]
pub struct AttachmentRegistry {
    entries: RwLock<HashMap<FileId, AttachmentRecord>>,
}

impl AttachmentRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a record whose file is already fully written.
    ///
    /// Fails if the identifier is already present; identifiers are never reused.
    pub fn insert(&self, record: AttachmentRecord) -> AttachmentServerResult<()> {
        let mut entries = self
            .entries
            .write()
            .map_err(|_| AttachmentServerError::internal("Attachment registry lock poisoned"))?;

        if entries.contains_key(&record.id) {
            return Err(AttachmentServerError::internal(format!(
                "File identifier {} is already registered",
                record.id
            )));
        }

        debug!("Registered attachment {}", record.id);
        entries.insert(record.id, record);
        Ok(())
    }

    /// Whether an identifier is currently registered, expired or not
    pub fn contains(&self, id: &FileId) -> bool {
        self.entries
            .read()
            .map(|entries| entries.contains_key(id))
            .unwrap_or(false)
    }

    /// Look up a record that may still be served at `now`
    pub fn get_live(&self, id: &FileId, now: DateTime<Utc>) -> Option<AttachmentRecord> {
        let entries = self.entries.read().ok()?;
        let record = entries.get(id)?;

        if record.is_expired(now) {
            None
        } else {
            Some(record.clone())
        }
    }

    /// Snapshot of every record expired at `now`
    pub fn expired(&self, now: DateTime<Utc>) -> Vec<AttachmentRecord> {
        self.entries
            .read()
            .map(|entries| {
                entries
                    .values()
                    .filter(|record| record.is_expired(now))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Remove a record. Returns it only to the caller that actually removed it.
    pub fn remove(&self, id: &FileId) -> Option<AttachmentRecord> {
        self.entries.write().ok()?.remove(id)
    }

    pub fn len(&self) -> usize {
        self.entries.read().map(|entries| entries.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn stats(&self, now: DateTime<Utc>) -> RegistryStats {
        self.entries
            .read()
            .map(|entries| RegistryStats {
                tracked_files: entries.len(),
                tracked_bytes: entries.values().map(|r| r.size_bytes).sum(),
                expired_files: entries.values().filter(|r| r.is_expired(now)).count(),
            })
            .unwrap_or_default()
    }
}
