//! Configuration records

use chrono::{DateTime, Utc};
use permail_common::types::{Encryption, MailServerId, PersonalConfigId, UserId};
use permail_common::{Error, Result};
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Shared outgoing mail server
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct MailServer {
    pub id: MailServerId,
    pub name: String,
    /// Lower sequence wins when no server is named explicitly
    pub sequence: i32,
    pub active: bool,
    pub smtp_host: String,
    pub smtp_port: i32,
    pub smtp_encryption: String,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
    pub smtp_debug: bool,
    /// Forced From for everything sent while this is the first active server
    pub from_filter: Option<String>,
    /// User whose personal configuration produced this entry
    pub owner_id: Option<UserId>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl MailServer {
    /// Parsed connection security
    pub fn encryption(&self) -> Result<Encryption> {
        self.smtp_encryption.parse()
    }

    /// Port as a TCP port number
    pub fn port(&self) -> Result<u16> {
        parse_port(self.smtp_port)
    }
}

/// Input for creating a shared mail server
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateMailServer {
    pub name: String,
    #[serde(default = "default_sequence")]
    pub sequence: i32,
    pub smtp_host: String,
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_encryption: Encryption,
    pub smtp_user: Option<String>,
    pub smtp_pass: Option<String>,
    #[serde(default)]
    pub smtp_debug: bool,
    pub from_filter: Option<String>,
    pub owner_id: Option<UserId>,
}

fn default_sequence() -> i32 {
    10
}

/// Lifecycle of a personal configuration
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PersonalConfigState {
    Draft,
    Confirmed,
}

impl PersonalConfigState {
    pub fn as_str(&self) -> &'static str {
        match self {
            PersonalConfigState::Draft => "draft",
            PersonalConfigState::Confirmed => "confirmed",
        }
    }
}

/// A user's own SMTP configuration
#[derive(Debug, Clone, FromRow, Serialize, Deserialize)]
pub struct PersonalSmtpConfig {
    pub id: PersonalConfigId,
    pub name: String,
    pub active: bool,
    pub smtp_host: String,
    pub smtp_port: i32,
    pub smtp_encryption: String,
    pub smtp_user: String,
    pub smtp_pass: String,
    pub smtp_debug: bool,
    /// User the confirmed server is routed for
    pub owner_id: UserId,
    /// User who created the record; at most one record per creator
    pub created_by: UserId,
    pub state: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PersonalSmtpConfig {
    pub fn state(&self) -> PersonalConfigState {
        match self.state.as_str() {
            "confirmed" => PersonalConfigState::Confirmed,
            _ => PersonalConfigState::Draft,
        }
    }

    pub fn encryption(&self) -> Result<Encryption> {
        self.smtp_encryption.parse()
    }

    pub fn port(&self) -> Result<u16> {
        parse_port(self.smtp_port)
    }

    /// Shared server entry materialized from this configuration
    pub fn to_mail_server(&self) -> Result<CreateMailServer> {
        Ok(CreateMailServer {
            name: self.name.clone(),
            sequence: default_sequence(),
            smtp_host: self.smtp_host.clone(),
            smtp_port: self.port()?,
            smtp_encryption: self.encryption()?,
            smtp_user: Some(self.smtp_user.clone()),
            smtp_pass: Some(self.smtp_pass.clone()),
            smtp_debug: self.smtp_debug,
            from_filter: None,
            owner_id: Some(self.owner_id),
        })
    }
}

/// Input for creating a personal configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreatePersonalSmtpConfig {
    pub name: String,
    pub smtp_host: String,
    pub smtp_port: u16,
    #[serde(default)]
    pub smtp_encryption: Encryption,
    pub smtp_user: String,
    pub smtp_pass: String,
    #[serde(default)]
    pub smtp_debug: bool,
    /// Defaults to the creating user
    pub owner_id: Option<UserId>,
}

fn parse_port(port: i32) -> Result<u16> {
    u16::try_from(port)
        .ok()
        .filter(|p| *p != 0)
        .ok_or_else(|| Error::Config(format!("Invalid SMTP port: {}", port)))
}
