//! Configuration for PerMail

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable naming an explicit configuration file
pub const CONFIG_PATH_ENV: &str = "PERMAIL_CONFIG";

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    /// Server configuration
    #[serde(default)]
    pub server: ServerConfig,

    /// Database configuration; the in-memory store is used when absent
    pub database: Option<DatabaseConfig>,

    /// Process-wide outbound SMTP defaults
    #[serde(default)]
    pub outbound: OutboundConfig,

    /// From-rewriting policy parameters
    #[serde(default)]
    pub mail: MailPolicyConfig,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Server configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Hostname used in EHLO and generated Message-IDs
    #[serde(default = "default_hostname")]
    pub hostname: String,

    /// Open real network connections; when off every send is a dry run
    #[serde(default = "default_live_mode")]
    pub live_mode: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            hostname: default_hostname(),
            live_mode: default_live_mode(),
        }
    }
}

fn default_live_mode() -> bool {
    true
}

fn default_hostname() -> String {
    "localhost".to_string()
}

/// Database configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    /// Database URL
    pub url: String,

    /// Maximum connections
    #[serde(default = "default_max_connections")]
    pub max_connections: u32,

    /// Minimum connections
    #[serde(default = "default_min_connections")]
    pub min_connections: u32,
}

fn default_max_connections() -> u32 {
    5
}

fn default_min_connections() -> u32 {
    1
}

/// Outbound SMTP defaults, used when no stored server applies
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OutboundConfig {
    /// Fallback SMTP host
    pub smtp_server: Option<String>,

    /// Fallback SMTP port
    #[serde(default = "default_smtp_port")]
    pub smtp_port: u16,

    /// Fallback SMTP username
    pub smtp_user: Option<String>,

    /// Fallback SMTP password
    pub smtp_password: Option<String>,

    /// Upgrade fallback connections with STARTTLS
    #[serde(default)]
    pub smtp_ssl: bool,

    /// Skip certificate verification on TLS sessions (self-signed relays)
    #[serde(default)]
    pub tls_accept_invalid_certs: bool,

    /// Timeout applied to every network step, in seconds
    #[serde(default = "default_timeout")]
    pub timeout_secs: u64,

    /// Sender used when a message has no explicit From
    pub default_from: Option<String>,

    /// Recipient used by connection probes; never receives any content
    #[serde(default = "default_probe_recipient")]
    pub probe_recipient: String,
}

impl Default for OutboundConfig {
    fn default() -> Self {
        Self {
            smtp_server: None,
            smtp_port: default_smtp_port(),
            smtp_user: None,
            smtp_password: None,
            smtp_ssl: false,
            tls_accept_invalid_certs: false,
            timeout_secs: default_timeout(),
            default_from: None,
            probe_recipient: default_probe_recipient(),
        }
    }
}

fn default_smtp_port() -> u16 {
    25
}

fn default_timeout() -> u64 {
    60
}

fn default_probe_recipient() -> String {
    "noreply@permail.invalid".to_string()
}

/// From-rewriting policy parameters
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MailPolicyConfig {
    /// Address used to encapsulate senders outside the catchall domain
    pub dynamic_from: Option<String>,

    /// Organizational domain
    pub catchall_domain: Option<String>,
}

/// Logging configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Log level
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log format: "json" or "text"
    #[serde(default = "default_log_format")]
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: default_log_format(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_format() -> String {
    "text".to_string()
}

impl Config {
    /// Load configuration from file
    pub fn from_file(path: &Path) -> crate::Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| crate::Error::Config(format!("Failed to read config file: {}", e)))?;

        let config: Config = toml::from_str(&content)
            .map_err(|e| crate::Error::Config(format!("Failed to parse config: {}", e)))?;

        Ok(config)
    }

    /// Load configuration from an optional file plus `PERMAIL__*` environment overrides
    ///
    /// The file is `$PERMAIL_CONFIG` when set, else the first existing default
    /// location. Without any file the defaults apply.
    pub fn load() -> crate::Result<Self> {
        let path = std::env::var_os(CONFIG_PATH_ENV)
            .map(PathBuf::from)
            .or_else(|| {
                [
                    PathBuf::from("./config.toml"),
                    PathBuf::from("/etc/permail/config.toml"),
                ]
                .into_iter()
                .find(|p| p.exists())
            });

        let mut builder = config::Config::builder();
        if let Some(path) = path {
            tracing::debug!(path = %path.display(), "Loading configuration file");
            builder = builder.add_source(config::File::from(path));
        }
        builder = builder.add_source(
            config::Environment::with_prefix("PERMAIL")
                .prefix_separator("__")
                .separator("__")
                .try_parsing(true),
        );

        builder
            .build()
            .and_then(|c| c.try_deserialize::<Config>())
            .map_err(|e| crate::Error::Config(format!("Failed to load config: {}", e)))
    }
}
