/// Common utilities for JIRA attachment server integration tests
use async_trait::async_trait;
use axum::body::Body;
use axum::http::{HeaderMap, Request, StatusCode};
use chrono::{DateTime, Utc};
use jira_attachment_server::config::{FileServiceConfig, ServerConfig};
use jira_attachment_server::error::{AttachmentServerError, AttachmentServerResult};
use jira_attachment_server::file_server;
use jira_attachment_server::jira_client::{AttachmentSource, UpstreamAttachment, UserInfo};
use jira_attachment_server::registry::Clock;
use jira_attachment_server::tools::{PublishAttachmentParams, PublishAttachmentResult};
use jira_attachment_server::AttachmentMcpServer;
use serde_json::{json, Value};
use std::collections::HashMap;
use std::io::{BufRead, BufReader, Write};
use std::process::{Child, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use tempfile::TempDir;
use tower::ServiceExt;

static REQUEST_ID: AtomicU64 = AtomicU64::new(1);

/// Clock that only moves when told to
#[derive(Debug)]
pub struct ManualClock {
    now: Mutex<DateTime<Utc>>,
}

#[allow(dead_code)]
impl ManualClock {
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Mutex::new(start),
        }
    }

    pub fn advance(&self, by: chrono::Duration) {
        *self.now.lock().unwrap() += by;
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap()
    }
}

/// In-memory stand-in for JIRA
#[derive(Default)]
pub struct MockAttachmentSource {
    attachments: Mutex<HashMap<String, (UpstreamAttachment, Vec<u8>)>>,
    downloads: AtomicUsize,
}

#[allow(dead_code)]
impl MockAttachmentSource {
    pub fn add(&self, id: &str, filename: &str, content_type: &str, content: Vec<u8>) {
        let metadata = UpstreamAttachment {
            id: id.to_string(),
            filename: filename.to_string(),
            content_type: content_type.to_string(),
            size: content.len() as u64,
            author: "Test User".to_string(),
            created: "2024-01-01T00:00:00.000+0000".to_string(),
        };
        self.attachments
            .lock()
            .unwrap()
            .insert(id.to_string(), (metadata, content));
    }

    /// Number of content downloads requested so far
    pub fn downloads(&self) -> usize {
        self.downloads.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl AttachmentSource for MockAttachmentSource {
    async fn attachment_metadata(
        &self,
        attachment_id: &str,
    ) -> AttachmentServerResult<UpstreamAttachment> {
        self.attachments
            .lock()
            .unwrap()
            .get(attachment_id)
            .map(|(metadata, _)| metadata.clone())
            .ok_or_else(|| AttachmentServerError::not_found("attachment", attachment_id))
    }

    async fn download_attachment(&self, attachment_id: &str) -> AttachmentServerResult<Vec<u8>> {
        self.downloads.fetch_add(1, Ordering::SeqCst);
        self.attachments
            .lock()
            .unwrap()
            .get(attachment_id)
            .map(|(_, content)| content.clone())
            .ok_or_else(|| AttachmentServerError::not_found("attachment", attachment_id))
    }

    async fn current_user(&self) -> AttachmentServerResult<UserInfo> {
        Ok(UserInfo {
            account_id: "test-user".to_string(),
            display_name: "Test User".to_string(),
            email_address: None,
            active: true,
        })
    }
}

/// A server wired to a mock JIRA, a temporary storage directory and a manual clock
#[allow(dead_code)]
pub struct TestHarness {
    pub dir: TempDir,
    pub server: AttachmentMcpServer,
    pub source: Arc<MockAttachmentSource>,
    pub clock: Arc<ManualClock>,
}

#[allow(dead_code)]
impl TestHarness {
    pub async fn new() -> Self {
        Self::with_files(FileServiceConfig::default()).await
    }

    /// Build a harness; `storage_dir` is always replaced by a temporary directory
    pub async fn with_files(files: FileServiceConfig) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = ServerConfig {
            jira_url: "https://jira.example.com".to_string(),
            files: FileServiceConfig {
                storage_dir: dir.path().join("attachments"),
                public_host: "files.test".to_string(),
                ..files
            },
            ..Default::default()
        };

        let source = Arc::new(MockAttachmentSource::default());
        let clock = Arc::new(ManualClock::new(Utc::now()));

        let server = AttachmentMcpServer::with_components(
            Arc::new(config),
            source.clone(),
            clock.clone(),
        )
        .await
        .unwrap();

        Self {
            dir,
            server,
            source,
            clock,
        }
    }

    pub async fn publish(
        &self,
        attachment_id: &str,
        expires_in_minutes: Option<u64>,
    ) -> anyhow::Result<PublishAttachmentResult> {
        self.server
            .publish_attachment(PublishAttachmentParams {
                attachment_id: attachment_id.to_string(),
                expires_in_minutes,
            })
            .await
    }

    /// GET `path` against the file server router
    pub async fn get(&self, path: &str) -> (StatusCode, HeaderMap, Vec<u8>) {
        let router = file_server::router(self.server.file_server_state());
        let response = router
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();

        let status = response.status();
        let headers = response.headers().clone();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, headers, body.to_vec())
    }

    pub async fn get_json(&self, path: &str) -> (StatusCode, Value) {
        let (status, _, body) = self.get(path).await;
        (status, serde_json::from_slice(&body).unwrap())
    }

    /// Number of files in the storage directory
    pub fn stored_files(&self) -> usize {
        std::fs::read_dir(self.dir.path().join("attachments"))
            .map(|entries| entries.count())
            .unwrap_or(0)
    }
}

/// Path part of a published URL
#[allow(dead_code)]
pub fn url_path(result: &PublishAttachmentResult) -> String {
    format!("/files/{}", result.id)
}

/// MCP Test Client for sending JSON-RPC requests to a spawned server
#[allow(dead_code)]
pub struct McpTestClient {
    child: Child,
    stdin: ChildStdin,
    stdout: BufReader<ChildStdout>,
    _storage: TempDir,
}

#[allow(dead_code)]
impl McpTestClient {
    /// Create a new test client by spawning the server against a real JIRA
    pub fn new() -> Result<Self, Box<dyn std::error::Error>> {
        // Tests run from the workspace root, so .env is in the current directory
        dotenv::from_filename(".env").ok();

        let jira_url = std::env::var("JIRA_URL")?;
        let jira_auth_type = std::env::var("JIRA_AUTH_TYPE")?;
        let jira_username = std::env::var("JIRA_USERNAME")?;
        let jira_password = std::env::var("JIRA_PASSWORD")?;

        let binary_path = [
            "target/debug/jira-attachment-server",
            "target/release/jira-attachment-server",
            "../target/debug/jira-attachment-server",
            "../target/release/jira-attachment-server",
        ]
        .into_iter()
        .find(|path| std::path::Path::new(path).exists())
        .ok_or_else(|| {
            let cwd = std::env::current_dir().unwrap_or_default();
            format!(
                "Server binary not found. Current dir: {:?}. Looked in target/debug and target/release",
                cwd
            )
        })?;

        let storage = tempfile::tempdir()?;

        let mut child = Command::new(binary_path)
            .env("JIRA_URL", jira_url)
            .env("JIRA_AUTH_TYPE", jira_auth_type)
            .env("JIRA_USERNAME", jira_username)
            .env("JIRA_PASSWORD", jira_password)
            .env("ATTACHMENTS_DIR", storage.path())
            .env("SERVER_PORT", "0")
            .env("RUST_LOG", "error")
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .spawn()?;

        let stdin = child.stdin.take().ok_or("Failed to open stdin")?;
        let stdout = BufReader::new(child.stdout.take().ok_or("Failed to open stdout")?);

        let mut client = Self {
            child,
            stdin,
            stdout,
            _storage: storage,
        };

        client.initialize()?;

        Ok(client)
    }

    /// Initialize the MCP session
    fn initialize(&mut self) -> Result<(), Box<dyn std::error::Error>> {
        let request = json!({
            "jsonrpc": "2.0",
            "id": 0,
            "method": "initialize",
            "params": {
                "protocolVersion": "2024-11-05",
                "capabilities": {},
                "clientInfo": {
                    "name": "rust-test-client",
                    "version": "1.0.0"
                }
            }
        });

        self.send_request(&request)?;
        let response = self.read_response()?;

        if response.get("error").is_some() {
            return Err(format!("Initialization failed: {:?}", response["error"]).into());
        }

        Ok(())
    }

    /// Call an MCP tool
    pub fn call_tool(
        &mut self,
        tool_name: &str,
        arguments: Value,
    ) -> Result<Value, Box<dyn std::error::Error>> {
        let request_id = REQUEST_ID.fetch_add(1, Ordering::SeqCst);

        let request = json!({
            "jsonrpc": "2.0",
            "id": request_id,
            "method": "tools/call",
            "params": {
                "name": tool_name,
                "arguments": arguments
            }
        });

        self.send_request(&request)?;
        self.read_response()
    }

    fn send_request(&mut self, request: &Value) -> Result<(), Box<dyn std::error::Error>> {
        writeln!(self.stdin, "{}", serde_json::to_string(request)?)?;
        self.stdin.flush()?;
        Ok(())
    }

    fn read_response(&mut self) -> Result<Value, Box<dyn std::error::Error>> {
        let mut line = String::new();
        self.stdout.read_line(&mut line)?;

        if line.is_empty() {
            return Err("Server closed connection".into());
        }

        Ok(serde_json::from_str(&line)?)
    }

    /// Extract the JSON tool result from a tools/call response
    pub fn extract_tool_result(response: &Value) -> Result<Value, String> {
        if let Some(error) = response.get("error") {
            return Err(format!("Tool call failed: {:?}", error));
        }

        let text = response
            .get("result")
            .and_then(|result| result.get("content"))
            .and_then(|content| content.as_array())
            .and_then(|content| {
                content
                    .iter()
                    .find(|item| item.get("type") == Some(&Value::String("text".to_string())))
            })
            .and_then(|item| item.get("text"))
            .and_then(|text| text.as_str())
            .ok_or("No text content in result")?;

        serde_json::from_str(text)
            .map_err(|e| format!("Failed to parse tool result JSON: {}. Text was: {}", e, text))
    }
}

impl Drop for McpTestClient {
    fn drop(&mut self) {
        let _ = self.child.kill();
        let _ = self.child.wait();
    }
}

/// Attachment id to publish in live tests
#[allow(dead_code)]
pub fn test_attachment_id() -> Option<String> {
    std::env::var("TEST_ATTACHMENT_ID").ok()
}
