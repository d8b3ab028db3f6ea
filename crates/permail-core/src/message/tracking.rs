//! Message-ID generation
//!
//! Ids derived from a business object embed a recoverable reference so that
//! replies can be routed back to the record they answer.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

const MARKER: &str = "-permail";

/// Business object a message is about
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ObjectRef {
    pub model: String,
    pub id: i64,
}

impl ObjectRef {
    pub fn new(model: impl Into<String>, id: i64) -> Self {
        Self {
            model: model.into(),
            id,
        }
    }
}

fn unique_part() -> String {
    format!("{}.{}", Utc::now().timestamp(), Uuid::new_v4().simple())
}

// Model names end up in the id's local part; keep them dot-atom safe
// and free of the '-' separator.
fn sanitize_model(model: &str) -> String {
    model
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() || c == '.' || c == '_' { c } else { '_' })
        .collect()
}

/// Fresh globally unique Message-ID
pub fn generate_message_id(hostname: &str) -> String {
    format!("<{}{}@{}>", unique_part(), MARKER, hostname)
}

/// Message-ID carrying `reference`
pub fn tracking_message_id(reference: &ObjectRef, hostname: &str) -> String {
    format!(
        "<{}{}-{}-{}@{}>",
        unique_part(),
        MARKER,
        sanitize_model(&reference.model),
        reference.id,
        hostname
    )
}

/// Recovers the object reference from a tracking Message-ID
pub fn parse_tracking_reference(message_id: &str) -> Option<ObjectRef> {
    let id = message_id.trim().trim_start_matches('<').trim_end_matches('>');
    let (local, _) = id.rsplit_once('@')?;
    let (_, rest) = local.split_once(&format!("{}-", MARKER))?;
    // Sanitized models hold no '-', so the first one ends the model
    let (model, object_id) = rest.split_once('-')?;
    if model.is_empty() {
        return None;
    }
    Some(ObjectRef {
        model: model.to_string(),
        id: object_id.parse().ok()?,
    })
}
