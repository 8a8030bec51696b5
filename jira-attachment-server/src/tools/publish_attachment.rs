//! Publish attachment tool
//!
//! Downloads a JIRA attachment into local storage and returns a time-limited
//! HTTP URL for it.

use crate::config::{FileServiceConfig, MAX_EXPIRY_MINUTES};
use crate::error::{AttachmentServerError, AttachmentServerResult};
use crate::file_id::FileId;
use crate::jira_client::{AttachmentSource, UpstreamAttachment};
use crate::registry::{AttachmentRecord, AttachmentRegistry, Clock};
use crate::storage::{safe_extension, StorageDirectory};
use chrono::{DateTime, Duration, Utc};
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info, instrument, warn};

/// Attempts at finding an unused identifier
const MAX_ID_ATTEMPTS: usize = 3;

/// Parameters for the publish_attachment tool
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
#[serde(deny_unknown_fields)]
pub struct PublishAttachmentParams {
    /// JIRA attachment ID (required)
    /// Attachment IDs are listed in the issue's attachment field
    pub attachment_id: String,

    /// Minutes the download link stays valid (optional, default from server config)
    /// 0 makes the link expire immediately; maximum is 10080 (one week)
    pub expires_in_minutes: Option<u64>,
}

/// Result from the publish_attachment tool
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishAttachmentResult {
    /// Opaque identifier of the stored file
    pub id: String,

    /// URL the file can be downloaded from until `expires_at`
    pub public_url: String,

    /// Original filename from JIRA
    pub filename: String,

    /// MIME type served with the file
    pub content_type: String,

    /// Size in bytes
    pub size: u64,

    pub created_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,

    /// JIRA attachment ID the file was downloaded from
    pub source_attachment_id: String,

    /// Performance information
    pub performance: PublishPerformance,

    /// Success message
    pub message: String,
}

/// Performance metrics for publish operations
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PublishPerformance {
    /// Time taken in milliseconds
    pub duration_ms: u64,

    /// Number of JIRA API calls made
    pub api_calls: u32,
}

/// Implementation of the publish_attachment tool
pub struct PublishAttachmentTool {
    source: Arc<dyn AttachmentSource>,
    registry: Arc<AttachmentRegistry>,
    storage: Arc<StorageDirectory>,
    clock: Arc<dyn Clock>,
    files: Arc<FileServiceConfig>,
}

impl PublishAttachmentTool {
    /// Create a new publish attachment tool
    pub fn new(
        source: Arc<dyn AttachmentSource>,
        registry: Arc<AttachmentRegistry>,
        storage: Arc<StorageDirectory>,
        clock: Arc<dyn Clock>,
        files: Arc<FileServiceConfig>,
    ) -> Self {
        Self {
            source,
            registry,
            storage,
            clock,
            files,
        }
    }

    /// Execute the publish_attachment tool
    #[instrument(skip(self), fields(attachment_id = %params.attachment_id))]
    pub async fn execute(
        &self,
        params: PublishAttachmentParams,
    ) -> AttachmentServerResult<PublishAttachmentResult> {
        let start_time = std::time::Instant::now();
        let mut api_calls = 0u32;

        info!(
            "Executing publish_attachment tool for attachment: {}",
            params.attachment_id
        );

        self.validate_params(&params)?;

        let attachment_id = params.attachment_id.trim();
        let expiry = match params.expires_in_minutes {
            Some(minutes) => Duration::minutes(minutes as i64),
            None => self.files.default_expiry(),
        };

        // Metadata first: unknown ids and oversized files fail before download
        let metadata = self.source.attachment_metadata(attachment_id).await?;
        api_calls += 1;
        self.check_size(metadata.size)?;

        let content = self.source.download_attachment(attachment_id).await?;
        api_calls += 1;
        self.check_size(content.len() as u64)?;

        if content.len() as u64 != metadata.size {
            warn!(
                "JIRA reported {} bytes for attachment {} but sent {}",
                metadata.size,
                attachment_id,
                content.len()
            );
        }

        let extension = safe_extension(&metadata.filename);
        let id = self.unused_id(extension.as_deref()).await?;
        let record = self
            .store(id, extension.as_deref(), &metadata, &content, expiry)
            .await?;

        let public_url = format!("{}/files/{}", self.files.public_base_url(), record.id);
        let duration = start_time.elapsed();

        info!(
            "Published attachment {} as {} ({} bytes, expires {})",
            attachment_id, record.id, record.size_bytes, record.expires_at
        );

        Ok(PublishAttachmentResult {
            id: record.id.to_string(),
            public_url,
            message: format!(
                "Attachment '{}' ({} bytes) is available until {}",
                record.original_filename,
                record.size_bytes,
                record.expires_at.to_rfc3339()
            ),
            filename: record.original_filename,
            content_type: record.content_type,
            size: record.size_bytes,
            created_at: record.created_at,
            expires_at: record.expires_at,
            source_attachment_id: record.source_attachment_id,
            performance: PublishPerformance {
                duration_ms: duration.as_millis() as u64,
                api_calls,
            },
        })
    }

    /// Write the content, then register it. The record only becomes visible
    /// once the file is complete on disk; if registration fails the file is
    /// removed again.
    async fn store(
        &self,
        id: FileId,
        extension: Option<&str>,
        metadata: &UpstreamAttachment,
        content: &[u8],
        expiry: Duration,
    ) -> AttachmentServerResult<AttachmentRecord> {
        let stored_path = self.storage.path_for(&id, extension);

        self.storage.write(&stored_path, content).await?;

        let created_at = self.clock.now();
        let record = AttachmentRecord {
            id,
            original_filename: metadata.filename.clone(),
            content_type: resolve_content_type(&metadata.content_type, &metadata.filename),
            size_bytes: content.len() as u64,
            stored_path,
            created_at,
            expires_at: created_at + expiry,
            source_attachment_id: metadata.id.clone(),
        };

        if let Err(e) = self.registry.insert(record.clone()) {
            error!("Failed to register {}: {}", id, e);
            if let Err(remove_err) = self.storage.remove(&record.stored_path).await {
                warn!(
                    "Could not remove unregistered file {}: {}",
                    record.stored_path.display(),
                    remove_err
                );
            }
            return Err(e);
        }

        Ok(record)
    }

    /// A fresh identifier that is neither registered nor present on disk
    async fn unused_id(&self, extension: Option<&str>) -> AttachmentServerResult<FileId> {
        for _ in 0..MAX_ID_ATTEMPTS {
            let id = FileId::generate();
            if self.registry.contains(&id) {
                continue;
            }

            let path = self.storage.path_for(&id, extension);
            if !self.storage.is_occupied(&path).await? {
                return Ok(id);
            }
            warn!("Identifier {} already present on disk, generating another", id);
        }

        Err(AttachmentServerError::internal(
            "Could not allocate an unused file identifier",
        ))
    }

    fn check_size(&self, size: u64) -> AttachmentServerResult<()> {
        if size > self.files.max_attachment_bytes {
            return Err(AttachmentServerError::invalid_param(
                "attachment_size",
                format!(
                    "Attachment size ({} bytes) exceeds maximum allowed size ({} bytes)",
                    size, self.files.max_attachment_bytes
                ),
            ));
        }
        Ok(())
    }

    /// Validate publish attachment parameters
    fn validate_params(&self, params: &PublishAttachmentParams) -> AttachmentServerResult<()> {
        if params.attachment_id.trim().is_empty() {
            return Err(AttachmentServerError::invalid_param(
                "attachment_id",
                "Attachment ID is required. Attachment IDs are listed on the JIRA issue.",
            ));
        }

        if let Some(minutes) = params.expires_in_minutes {
            if minutes > MAX_EXPIRY_MINUTES {
                return Err(AttachmentServerError::invalid_param(
                    "expires_in_minutes",
                    format!("expires_in_minutes cannot exceed {} (one week)", MAX_EXPIRY_MINUTES),
                ));
            }
        }

        Ok(())
    }
}

/// Use JIRA's MIME type when it has one, otherwise guess from the filename
fn resolve_content_type(reported: &str, filename: &str) -> String {
    let reported = reported.trim();
    if !reported.is_empty() {
        return reported.to_string();
    }

    mime_guess::from_path(filename)
        .first_raw()
        .unwrap_or("application/octet-stream")
        .to_string()
}
