//! Common types for PerMail

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Unique identifier for users of the host application
pub type UserId = Uuid;

/// Unique identifier for shared mail servers
pub type MailServerId = Uuid;

/// Unique identifier for personal SMTP configurations
pub type PersonalConfigId = Uuid;

/// Connection security for an SMTP endpoint
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Encryption {
    /// Plaintext session
    #[default]
    None,
    /// Plaintext session upgraded in place with STARTTLS
    Starttls,
    /// TLS from the first byte (SMTPS)
    Ssl,
}

impl Encryption {
    pub fn as_str(&self) -> &'static str {
        match self {
            Encryption::None => "none",
            Encryption::Starttls => "starttls",
            Encryption::Ssl => "ssl",
        }
    }
}

impl std::fmt::Display for Encryption {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl std::str::FromStr for Encryption {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "" | "none" => Ok(Encryption::None),
            "starttls" | "tls" => Ok(Encryption::Starttls),
            "ssl" | "smtps" => Ok(Encryption::Ssl),
            other => Err(crate::Error::Config(format!(
                "Unknown connection security: {}",
                other
            ))),
        }
    }
}
