//! JIRA Attachment Server Library
//!
//! An MCP server that mirrors JIRA attachments into a local directory and
//! hands out expiring HTTP download links for them.
//!
//! ## Features
//!
//! - **Publishing**: Download an attachment once, serve it by an unguessable URL
//! - **Expiry**: Links stop working at their expiry time, checked on every request
//! - **Cleanup**: A background task reclaims expired files; also available on demand
//! - **Error Handling**: MCP-compliant error codes and uniform HTTP 404s

use crate::cleanup::{CleanupSweeper, CleanupTaskManager, CleanupTaskState};
use crate::config::ServerConfig;
use crate::error::{AttachmentServerError, AttachmentServerResult};
use crate::file_server::FileServerState;
use crate::jira_client::{AttachmentSource, JiraClient};
use crate::registry::{AttachmentRegistry, Clock, RegistryStats, SystemClock};
use crate::storage::StorageDirectory;
use crate::tools::{
    CleanupFilesResult, CleanupFilesTool, PublishAttachmentParams, PublishAttachmentResult,
    PublishAttachmentTool,
};

use pulseengine_mcp_macros::{mcp_server, mcp_tools};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Instant;
use tracing::{error, info, instrument};

// Re-export modules for external use
pub mod cleanup;
pub mod config;
pub mod error;
pub mod file_id;
pub mod file_server;
pub mod jira_client;
pub mod registry;
pub mod storage;
pub mod tools;

/// Server status information
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct AttachmentServerStatus {
    pub server_name: String,
    pub version: String,
    pub uptime_seconds: u64,
    pub jira_url: String,
    pub jira_connection_status: String,
    pub authenticated_user: Option<String>,
    pub storage_dir: String,
    pub public_base_url: String,
    pub registry_stats: RegistryStats,
    pub cleanup: CleanupTaskState,
    pub tools_count: usize,
}

/// JIRA Attachment MCP Server
///
/// Uses the #[mcp_server] macro for automatic MCP infrastructure generation.
#[mcp_server(
    name = "JIRA Attachment Server",
    version = "0.1.0",
    description = "Publishes JIRA attachments as expiring HTTP download links",
    auth = "disabled"
)]
#[derive(Clone)]
pub struct AttachmentMcpServer {
    /// Server start time for uptime calculation
    start_time: Instant,

    config: Arc<ServerConfig>,

    /// Where attachments are downloaded from
    source: Arc<dyn AttachmentSource>,

    registry: Arc<AttachmentRegistry>,
    storage: Arc<StorageDirectory>,
    clock: Arc<dyn Clock>,
    cleanup: Arc<CleanupTaskManager>,

    /// Tool implementations
    publish_tool: Arc<PublishAttachmentTool>,
    cleanup_tool: Arc<CleanupFilesTool>,
}

impl Default for AttachmentMcpServer {
    fn default() -> Self {
        // Construction needs a config and a JIRA connection
        panic!("AttachmentMcpServer cannot be created with default(). Use AttachmentMcpServer::new() instead.")
    }
}

impl AttachmentMcpServer {
    /// Create a new server from environment/TOML configuration
    #[instrument]
    pub async fn new() -> AttachmentServerResult<Self> {
        info!("Initializing JIRA Attachment Server");

        let config = Arc::new(ServerConfig::load()?);
        info!("Configuration loaded successfully");

        let jira_client = Arc::new(JiraClient::new(Arc::clone(&config)).await?);
        info!("JIRA client initialized");

        Self::with_components(config, jira_client, Arc::new(SystemClock)).await
    }

    /// Create a server around an existing attachment source and clock (for testing)
    #[instrument(skip_all)]
    pub async fn with_components(
        config: Arc<ServerConfig>,
        source: Arc<dyn AttachmentSource>,
        clock: Arc<dyn Clock>,
    ) -> AttachmentServerResult<Self> {
        config
            .files
            .validate()
            .map_err(|e| AttachmentServerError::config(format!("{:#}", e)))?;

        let storage = Arc::new(StorageDirectory::open(&config.files.storage_dir).await?);

        let registry = Arc::new(AttachmentRegistry::new());

        let sweeper = Arc::new(CleanupSweeper::new(
            Arc::clone(&registry),
            Arc::clone(&storage),
            Arc::clone(&clock),
        ));

        let cleanup = Arc::new(CleanupTaskManager::new(
            sweeper,
            Arc::clone(&registry),
            Arc::clone(&clock),
            config.files.cleanup_interval(),
            config.files.auto_cleanup_enabled,
        ));

        let publish_tool = Arc::new(PublishAttachmentTool::new(
            Arc::clone(&source),
            Arc::clone(&registry),
            Arc::clone(&storage),
            Arc::clone(&clock),
            Arc::new(config.files.clone()),
        ));

        let cleanup_tool = Arc::new(CleanupFilesTool::new(Arc::clone(&cleanup)));

        info!("JIRA Attachment Server initialized successfully");

        Ok(Self {
            start_time: Instant::now(),
            config,
            source,
            registry,
            storage,
            clock,
            cleanup,
            publish_tool,
            cleanup_tool,
        })
    }

    /// State shared with the HTTP file server
    pub fn file_server_state(&self) -> FileServerState {
        FileServerState {
            registry: Arc::clone(&self.registry),
            storage: Arc::clone(&self.storage),
            clock: Arc::clone(&self.clock),
            cleanup: Arc::clone(&self.cleanup),
        }
    }

    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    pub fn cleanup_manager(&self) -> &Arc<CleanupTaskManager> {
        &self.cleanup
    }

    pub fn registry(&self) -> &Arc<AttachmentRegistry> {
        &self.registry
    }

    /// Get server uptime in seconds
    fn get_uptime_seconds(&self) -> u64 {
        self.start_time.elapsed().as_secs()
    }

    /// Every tool call makes sure the cleanup loop is running
    fn touch_cleanup(&self) {
        self.cleanup.ensure_started();
    }
}

/// All public methods in this impl block become MCP tools automatically
/// The #[mcp_tools] macro discovers these methods and exposes them via MCP
#[mcp_tools]
impl AttachmentMcpServer {
    /// Publish a JIRA attachment as a temporary download link
    ///
    /// Downloads the attachment into server storage and returns a URL that serves
    /// it until the link expires. Expired links return 404.
    ///
    /// # Examples
    /// - Publish with the default expiry: `{"attachment_id": "10042"}`
    /// - Publish for 15 minutes: `{"attachment_id": "10042", "expires_in_minutes": 15}`
    #[instrument(skip(self))]
    pub async fn publish_attachment(
        &self,
        params: PublishAttachmentParams,
    ) -> anyhow::Result<PublishAttachmentResult> {
        self.touch_cleanup();

        self.publish_tool.execute(params).await.map_err(|e| {
            error!("publish_attachment failed: {}", e);
            anyhow::anyhow!(e)
        })
    }

    /// Remove expired attachments now
    ///
    /// Runs one cleanup pass immediately, independent of the background schedule.
    /// Returns how many files and bytes were reclaimed.
    #[instrument(skip(self))]
    pub async fn cleanup_expired_files(&self) -> anyhow::Result<CleanupFilesResult> {
        self.touch_cleanup();

        let result = self.cleanup_tool.execute().await;
        info!("cleanup_expired_files: {}", result.message);
        Ok(result)
    }

    /// Get the state of the background cleanup task
    ///
    /// Reports whether the task is running, its interval, the last pass and totals.
    #[instrument(skip(self))]
    pub async fn get_cleanup_status(&self) -> anyhow::Result<CleanupTaskState> {
        self.touch_cleanup();
        Ok(self.cleanup_tool.status())
    }

    /// Get server status and connection information
    ///
    /// Returns the JIRA connection, storage location, tracked attachments and
    /// cleanup task state.
    #[instrument(skip(self))]
    pub async fn get_server_status(&self) -> anyhow::Result<AttachmentServerStatus> {
        info!("Getting server status");
        self.touch_cleanup();

        let (connection_status, authenticated_user) = match self.source.current_user().await {
            Ok(user) => ("Connected".to_string(), Some(user.display_name)),
            Err(e) => (format!("Connection Error: {}", e), None),
        };

        Ok(AttachmentServerStatus {
            server_name: "JIRA Attachment Server".to_string(),
            version: env!("CARGO_PKG_VERSION").to_string(),
            uptime_seconds: self.get_uptime_seconds(),
            jira_url: self.config.jira_url.clone(),
            jira_connection_status: connection_status,
            authenticated_user,
            storage_dir: self.storage.root().display().to_string(),
            public_base_url: self.config.files.public_base_url(),
            registry_stats: self.registry.stats(self.clock.now()),
            cleanup: self.cleanup.status(),
            tools_count: 5, // publish_attachment, cleanup_expired_files, get_cleanup_status, get_server_status, test_connection
        })
    }

    /// Test JIRA connection and authentication
    #[instrument(skip(self))]
    pub async fn test_connection(&self) -> anyhow::Result<String> {
        info!("Testing JIRA connection");
        self.touch_cleanup();

        match self.source.current_user().await {
            Ok(user) => {
                info!("Connection test successful for user: {}", user.display_name);
                Ok(format!(
                    "✅ Connection successful!\n\
                     JIRA URL: {}\n\
                     Authenticated as: {}\n\
                     Account ID: {}",
                    self.config.jira_url, user.display_name, user.account_id
                ))
            }
            Err(e) => {
                error!("Connection test failed: {}", e);
                Ok(format!(
                    "❌ Connection failed!\n\
                     JIRA URL: {}\n\
                     Error: {}\n\
                     \n\
                     Please check:\n\
                     - JIRA URL is correct and accessible\n\
                     - Authentication credentials are valid\n\
                     - Network connectivity to JIRA instance",
                    self.config.jira_url, e
                ))
            }
        }
    }
}
