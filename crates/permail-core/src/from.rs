//! From-address policy
//!
//! Decides the sender a message actually goes out with. A forced filter on
//! the first active server wins; otherwise senders outside the catchall
//! domain are encapsulated into the dynamic address.

use crate::address::{domain_of, encapsulate, extract_addresses};
use permail_common::config::MailPolicyConfig;
use permail_common::Result;
use permail_storage::MailServerRepository;
use tracing::debug;

/// Policy inputs, read once per send
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct FromPolicy {
    pub force_from: Option<String>,
    pub dynamic_from: Option<String>,
    pub catchall_domain: Option<String>,
}

impl FromPolicy {
    /// Builds the policy from the first active server's filter and the
    /// configured dynamic/catchall pair
    pub async fn from_store(
        servers: &dyn MailServerRepository,
        mail: &MailPolicyConfig,
    ) -> Result<Self> {
        let force_from = servers.find_default().await?.and_then(|s| s.from_filter);
        Ok(Self {
            force_from,
            dynamic_from: mail.dynamic_from.clone(),
            catchall_domain: mail.catchall_domain.clone(),
        })
    }
}

/// Outcome of From resolution
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedFrom {
    /// Value for the From header
    pub from: String,
    /// Envelope sender, when it must differ from the header
    pub return_path: Option<String>,
}

fn present(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

/// Resolves the effective From header and Return-Path for `from`
pub fn resolve_from(from: &str, policy: &FromPolicy) -> ResolvedFrom {
    if let Some(force) = present(&policy.force_from) {
        debug!(original = %from, "Applying forced From filter");
        return rewrite(from, force);
    }

    if let (Some(dynamic), Some(catchall)) =
        (present(&policy.dynamic_from), present(&policy.catchall_domain))
    {
        let outside = domain_of(from)
            .map(|domain| !domain.eq_ignore_ascii_case(catchall))
            .unwrap_or(true);
        if outside {
            debug!(original = %from, "Encapsulating sender outside the catchall domain");
            return rewrite(from, dynamic);
        }
    }

    ResolvedFrom {
        from: from.to_string(),
        return_path: None,
    }
}

fn rewrite(from: &str, through: &str) -> ResolvedFrom {
    ResolvedFrom {
        from: encapsulate(from, through).unwrap_or_else(|| from.to_string()),
        return_path: extract_addresses(through).into_iter().next(),
    }
}
