//! JIRA client wrapper around gouqi
//!
//! Exposes the small part of the JIRA API this server needs (attachment
//! metadata, attachment content and the current session) behind the
//! [`AttachmentSource`] trait so the rest of the crate can be tested without
//! a JIRA instance.

use crate::config::ServerConfig;
use crate::error::{AttachmentServerError, AttachmentServerResult};
use async_trait::async_trait;
use gouqi::r#async::Jira;
use gouqi::Session;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::timeout;
use tracing::{debug, error, info, instrument};

/// Attachment metadata as reported by JIRA
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct UpstreamAttachment {
    pub id: String,
    pub filename: String,
    /// May be empty when JIRA does not know the type
    pub content_type: String,
    pub size: u64,
    pub author: String,
    pub created: String,
}

/// User information
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserInfo {
    pub account_id: String,
    pub display_name: String,
    pub email_address: Option<String>,
    pub active: bool,
}

/// Where attachments come from
#[async_trait]
pub trait AttachmentSource: Send + Sync {
    /// Metadata for an attachment; `UpstreamNotFound` if the id is unknown
    async fn attachment_metadata(&self, attachment_id: &str)
        -> AttachmentServerResult<UpstreamAttachment>;

    /// Raw attachment content
    async fn download_attachment(&self, attachment_id: &str) -> AttachmentServerResult<Vec<u8>>;

    /// The user the source is authenticated as
    async fn current_user(&self) -> AttachmentServerResult<UserInfo>;
}

/// JIRA client wrapper
#[derive(Debug, Clone)]
pub struct JiraClient {
    client: Arc<Jira>,
    config: Arc<ServerConfig>,
}

impl JiraClient {
    /// Create a new JIRA client with the given configuration
    #[instrument(skip_all)]
    pub async fn new(config: Arc<ServerConfig>) -> AttachmentServerResult<Self> {
        info!("Initializing JIRA client for URL: {}", config.jira_url);

        let credentials = config.to_gouqi_credentials();

        let client = timeout(Duration::from_secs(config.request_timeout_seconds), async {
            Jira::new(&config.jira_url, credentials)
        })
        .await
        .map_err(|_| AttachmentServerError::network("Timeout connecting to JIRA instance"))?
        .map_err(AttachmentServerError::from)?;

        let jira_client = Self {
            client: Arc::new(client),
            config,
        };

        jira_client.test_connection().await?;

        info!("JIRA client initialized successfully");
        Ok(jira_client)
    }

    #[instrument(skip_all)]
    async fn test_connection(&self) -> AttachmentServerResult<()> {
        debug!("Testing JIRA connection");

        match self.get_current_user().await {
            Ok(user) => {
                info!(
                    "Connection test successful, authenticated as: {}",
                    user.display_name
                );
                Ok(())
            }
            Err(e) => {
                error!("Connection test failed: {}", e);
                Err(e)
            }
        }
    }

    /// Get current user information
    #[instrument(skip_all)]
    pub async fn get_current_user(&self) -> AttachmentServerResult<UserInfo> {
        debug!("Fetching current user information");

        let session = timeout(self.request_timeout(), async {
            self.client.session().await
        })
        .await
        .map_err(|_| AttachmentServerError::network("Timeout getting current user"))?
        .map_err(AttachmentServerError::from)?;

        Ok(convert_session_to_user_info(&session))
    }

    fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.config.request_timeout_seconds)
    }
}

#[async_trait]
impl AttachmentSource for JiraClient {
    #[instrument(skip(self))]
    async fn attachment_metadata(
        &self,
        attachment_id: &str,
    ) -> AttachmentServerResult<UpstreamAttachment> {
        let attachment = timeout(self.request_timeout(), async {
            self.client.attachments().get(attachment_id).await
        })
        .await
        .map_err(|_| {
            AttachmentServerError::network(format!(
                "Timeout getting attachment {}",
                attachment_id
            ))
        })?
        .map_err(|e| map_attachment_error(e, attachment_id))?;

        Ok(UpstreamAttachment {
            id: attachment_id.to_string(),
            filename: attachment.filename,
            content_type: attachment.mime_type,
            size: attachment.size,
            author: attachment.author.display_name,
            created: attachment.created,
        })
    }

    #[instrument(skip(self))]
    async fn download_attachment(&self, attachment_id: &str) -> AttachmentServerResult<Vec<u8>> {
        // The async client's download future is not Send; use the sync client
        // on the blocking pool instead.
        let jira_url = self.config.jira_url.clone();
        let credentials = self.config.to_gouqi_credentials();
        let id = attachment_id.to_string();

        let download = tokio::task::spawn_blocking(move || {
            let sync_client = gouqi::Jira::new(&jira_url, credentials)?;
            sync_client.attachments().download(&id)
        });

        let content = timeout(self.request_timeout(), download)
            .await
            .map_err(|_| {
                AttachmentServerError::network(format!(
                    "Timeout downloading attachment {}",
                    attachment_id
                ))
            })?
            .map_err(|e| AttachmentServerError::internal(format!("Task join error: {}", e)))?
            .map_err(|e| map_attachment_error(e, attachment_id))?;

        debug!(
            "Downloaded {} bytes for attachment {}",
            content.len(),
            attachment_id
        );
        Ok(content)
    }

    async fn current_user(&self) -> AttachmentServerResult<UserInfo> {
        self.get_current_user().await
    }
}

fn map_attachment_error(err: gouqi::Error, attachment_id: &str) -> AttachmentServerError {
    let text = err.to_string();
    if matches!(err, gouqi::Error::NotFound) || text.contains("404") || text.contains("Not Found")
    {
        AttachmentServerError::not_found("attachment", attachment_id)
    } else {
        AttachmentServerError::from(err)
    }
}

fn convert_session_to_user_info(session: &Session) -> UserInfo {
    UserInfo {
        account_id: session.name.clone(),
        display_name: session.name.clone(),
        email_address: None,
        active: true,
    }
}
