//! Configuration management for the JIRA attachment server
//!
//! Handles loading configuration from environment variables, TOML files,
//! and provides sensible defaults for all settings.

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info, warn};

/// Longest expiry a caller may request for a single attachment (one week)
pub const MAX_EXPIRY_MINUTES: u64 = 7 * 24 * 60;

/// Main configuration structure for the attachment server
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// JIRA instance URL (required)
    pub jira_url: String,

    /// Authentication configuration
    pub auth: AuthConfig,

    /// HTTP request timeout in seconds (default: 30)
    pub request_timeout_seconds: u64,

    /// Attachment storage and HTTP serving
    pub files: FileServiceConfig,
}

/// Authentication configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum AuthConfig {
    /// Personal Access Token (recommended)
    PersonalAccessToken(String),

    /// Basic authentication (username + password)
    Basic { username: String, password: String },

    /// Bearer token
    Bearer(String),

    /// Anonymous access (limited functionality)
    Anonymous,
}

/// Settings for the attachment store, the cleanup task and the file endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FileServiceConfig {
    /// Root directory for downloaded attachments
    pub storage_dir: PathBuf,

    /// Whether the recurring cleanup loop runs at all
    pub auto_cleanup_enabled: bool,

    /// Minutes between cleanup sweeps (default: 10)
    pub cleanup_interval_minutes: u64,

    /// Minutes a published attachment stays downloadable (default: 60)
    pub default_expiry_minutes: u64,

    /// Largest attachment that will be mirrored locally
    pub max_attachment_bytes: u64,

    /// Address the HTTP listener binds to
    pub bind_host: String,

    /// Port the HTTP listener binds to
    pub bind_port: u16,

    /// Host used when building public download URLs
    pub public_host: String,

    /// Port used when building public download URLs (defaults to bind_port)
    pub public_port: Option<u16>,

    /// Scheme used when building public download URLs
    pub public_scheme: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        AuthConfig::Anonymous
    }
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            jira_url: String::new(),
            auth: AuthConfig::Anonymous,
            request_timeout_seconds: 30,
            files: FileServiceConfig::default(),
        }
    }
}

impl Default for FileServiceConfig {
    fn default() -> Self {
        Self {
            storage_dir: PathBuf::from("attachments"),
            auto_cleanup_enabled: true,
            cleanup_interval_minutes: 10,
            default_expiry_minutes: 60,
            max_attachment_bytes: 50 * 1024 * 1024, // 50MB
            bind_host: "0.0.0.0".to_string(),
            bind_port: 8000,
            public_host: "localhost".to_string(),
            public_port: None,
            public_scheme: "http".to_string(),
        }
    }
}

impl FileServiceConfig {
    /// Interval between scheduled sweeps
    pub fn cleanup_interval(&self) -> Duration {
        Duration::from_secs(self.cleanup_interval_minutes.saturating_mul(60))
    }

    /// Expiry window applied when the caller does not override it
    pub fn default_expiry(&self) -> chrono::Duration {
        chrono::Duration::minutes(self.default_expiry_minutes as i64)
    }

    /// Address for the HTTP listener, e.g. `0.0.0.0:8000`
    pub fn bind_address(&self) -> String {
        format!("{}:{}", self.bind_host, self.bind_port)
    }

    /// Base of every public download URL, without a trailing slash.
    ///
    /// Built from the public host/port rather than the bind address so links
    /// stay valid behind a reverse proxy or container port mapping.
    pub fn public_base_url(&self) -> String {
        let port = self.public_port.unwrap_or(self.bind_port);
        let default_port = matches!(
            (self.public_scheme.as_str(), port),
            ("http", 80) | ("https", 443)
        );

        if default_port {
            format!("{}://{}", self.public_scheme, self.public_host)
        } else {
            format!("{}://{}:{}", self.public_scheme, self.public_host, port)
        }
    }
}

impl ServerConfig {
    /// Load configuration from environment variables, TOML file, and defaults
    /// Priority: env vars > TOML file > defaults
    pub fn load() -> Result<Self> {
        let mut config = Self::default();

        if let Ok(file_config) = Self::load_from_file("config/jira-attachment-server.toml") {
            info!("Loaded configuration from TOML file");
            config = file_config;
        } else if let Ok(file_config) = Self::load_from_file("jira-attachment-server.toml") {
            info!("Loaded configuration from TOML file in current directory");
            config = file_config;
        } else {
            debug!("No TOML configuration file found, using defaults and environment variables");
        }

        config.load_from_env()?;
        config.validate()?;

        Ok(config)
    }

    /// Load configuration from a TOML file
    fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let content = std::fs::read_to_string(path.as_ref())
            .with_context(|| format!("Failed to read config file: {}", path.as_ref().display()))?;

        let config: Self = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.as_ref().display()))?;

        Ok(config)
    }

    /// Load configuration from environment variables
    fn load_from_env(&mut self) -> Result<()> {
        if let Ok(url) = env::var("JIRA_URL") {
            self.jira_url = url;
            debug!("Loaded JIRA_URL from environment");
        }

        if let Ok(auth_type) = env::var("JIRA_AUTH_TYPE") {
            match auth_type.to_lowercase().as_str() {
                "pat" | "personal_access_token" => {
                    if let Ok(token) = env::var("JIRA_TOKEN") {
                        self.auth = AuthConfig::PersonalAccessToken(token);
                        debug!("Configured Personal Access Token authentication from environment");
                    }
                }
                "basic" => {
                    let username = env::var("JIRA_USERNAME")
                        .context("JIRA_USERNAME required for basic authentication")?;
                    let password = env::var("JIRA_PASSWORD")
                        .context("JIRA_PASSWORD required for basic authentication")?;
                    self.auth = AuthConfig::Basic { username, password };
                    debug!("Configured basic authentication from environment");
                }
                "bearer" => {
                    if let Ok(token) = env::var("JIRA_TOKEN") {
                        self.auth = AuthConfig::Bearer(token);
                        debug!("Configured bearer token authentication from environment");
                    }
                }
                "anonymous" => {
                    self.auth = AuthConfig::Anonymous;
                    debug!("Configured anonymous authentication from environment");
                }
                _ => {
                    warn!("Unknown JIRA_AUTH_TYPE: {}, using default", auth_type);
                }
            }
        }

        if let Some(timeout_seconds) = parse_env::<u64>("JIRA_REQUEST_TIMEOUT") {
            self.request_timeout_seconds = timeout_seconds;
            debug!(
                "Set request timeout to {} seconds from environment",
                timeout_seconds
            );
        }

        let files = &mut self.files;

        if let Ok(dir) = env::var("ATTACHMENTS_DIR") {
            files.storage_dir = PathBuf::from(dir);
            debug!("Loaded ATTACHMENTS_DIR from environment");
        }

        if let Ok(raw) = env::var("AUTO_CLEANUP_ENABLED") {
            match parse_bool(&raw) {
                Some(enabled) => {
                    files.auto_cleanup_enabled = enabled;
                    debug!("Set auto cleanup to {} from environment", enabled);
                }
                None => warn!("Ignoring unparseable AUTO_CLEANUP_ENABLED: {}", raw),
            }
        }

        if let Some(minutes) = parse_env::<u64>("CLEANUP_INTERVAL_MINUTES") {
            files.cleanup_interval_minutes = minutes;
            debug!("Set cleanup interval to {} minutes from environment", minutes);
        }

        if let Some(minutes) = parse_env::<u64>("ATTACHMENT_EXPIRES_MINUTES") {
            files.default_expiry_minutes = minutes;
            debug!("Set attachment expiry to {} minutes from environment", minutes);
        }

        if let Some(bytes) = parse_env::<u64>("ATTACHMENT_MAX_BYTES") {
            files.max_attachment_bytes = bytes;
            debug!("Set max attachment size to {} bytes from environment", bytes);
        }

        if let Ok(host) = env::var("SERVER_HOST") {
            files.bind_host = host;
        }

        if let Some(port) = parse_env::<u16>("SERVER_PORT") {
            files.bind_port = port;
        }

        if let Ok(host) = env::var("PUBLIC_HOST") {
            files.public_host = host;
        }

        if let Some(port) = parse_env::<u16>("PUBLIC_PORT") {
            files.public_port = Some(port);
        }

        if let Ok(scheme) = env::var("PUBLIC_SCHEME") {
            files.public_scheme = scheme.to_lowercase();
        }

        Ok(())
    }

    /// Validate the configuration
    fn validate(&self) -> Result<()> {
        if self.jira_url.is_empty() {
            return Err(anyhow::anyhow!(
                "JIRA URL is required. Set JIRA_URL environment variable or configure in TOML file."
            ));
        }

        if !self.jira_url.starts_with("http://") && !self.jira_url.starts_with("https://") {
            return Err(anyhow::anyhow!(
                "JIRA URL must start with http:// or https://. Got: {}",
                self.jira_url
            ));
        }

        match &self.auth {
            AuthConfig::PersonalAccessToken(token) => {
                if token.is_empty() {
                    return Err(anyhow::anyhow!("Personal access token cannot be empty"));
                }
            }
            AuthConfig::Basic { username, password } => {
                if username.is_empty() || password.is_empty() {
                    return Err(anyhow::anyhow!(
                        "Username and password cannot be empty for basic auth"
                    ));
                }
            }
            AuthConfig::Bearer(token) => {
                if token.is_empty() {
                    return Err(anyhow::anyhow!("Bearer token cannot be empty"));
                }
            }
            AuthConfig::Anonymous => {
                info!("Using anonymous authentication - functionality may be limited");
            }
        }

        self.files.validate()?;

        info!("Configuration validation successful");
        Ok(())
    }

    /// Get the gouqi Credentials from AuthConfig
    pub fn to_gouqi_credentials(&self) -> gouqi::Credentials {
        match &self.auth {
            AuthConfig::PersonalAccessToken(token) => gouqi::Credentials::Bearer(token.clone()),
            AuthConfig::Basic { username, password } => {
                gouqi::Credentials::Basic(username.clone(), password.clone())
            }
            AuthConfig::Bearer(token) => gouqi::Credentials::Bearer(token.clone()),
            AuthConfig::Anonymous => gouqi::Credentials::Anonymous,
        }
    }
}

impl FileServiceConfig {
    pub fn validate(&self) -> Result<()> {
        if self.storage_dir.as_os_str().is_empty() {
            return Err(anyhow::anyhow!("Attachment storage directory cannot be empty"));
        }

        if self.cleanup_interval_minutes == 0 {
            return Err(anyhow::anyhow!(
                "cleanup_interval_minutes must be greater than 0 (disable the loop with AUTO_CLEANUP_ENABLED=false instead)"
            ));
        }

        if self.cleanup_interval_minutes > MAX_EXPIRY_MINUTES {
            return Err(anyhow::anyhow!(
                "cleanup_interval_minutes cannot exceed {} (one week)",
                MAX_EXPIRY_MINUTES
            ));
        }

        if self.default_expiry_minutes > MAX_EXPIRY_MINUTES {
            return Err(anyhow::anyhow!(
                "default_expiry_minutes cannot exceed {} (one week)",
                MAX_EXPIRY_MINUTES
            ));
        }

        if self.max_attachment_bytes == 0 {
            return Err(anyhow::anyhow!("max_attachment_bytes must be greater than 0"));
        }

        if self.public_scheme != "http" && self.public_scheme != "https" {
            return Err(anyhow::anyhow!(
                "public_scheme must be http or https. Got: {}",
                self.public_scheme
            ));
        }

        if self.public_host.trim().is_empty() {
            return Err(anyhow::anyhow!("public_host cannot be empty"));
        }

        if !self.auto_cleanup_enabled {
            warn!("Automatic cleanup is disabled; expired files are only removed on demand");
        }

        Ok(())
    }
}

fn parse_env<T: std::str::FromStr>(name: &str) -> Option<T> {
    let raw = env::var(name).ok()?;
    match raw.trim().parse::<T>() {
        Ok(value) => Some(value),
        Err(_) => {
            warn!("Ignoring unparseable {}: {}", name, raw);
            None
        }
    }
}

fn parse_bool(raw: &str) -> Option<bool> {
    match raw.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}
