//! Outbound messages

mod builder;
mod tracking;

pub use builder::{Attachment, MessageBuilder, MessageParams};
pub use tracking::{generate_message_id, parse_tracking_reference, tracking_message_id, ObjectRef};

use lettre::address::Envelope;
use lettre::Message;

/// A fully built message.
///
/// Immutable once built and consumed by a single send.
#[derive(Debug, Clone)]
pub struct OutboundMessage {
    message_id: String,
    /// Complete header set, Bcc included
    archived: Message,
    /// What goes on the wire
    outgoing: Message,
}

impl OutboundMessage {
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    /// Raw value of a header, matched case-insensitively
    pub fn header(&self, name: &str) -> Option<&str> {
        self.archived.headers().get_raw(name)
    }

    pub fn envelope(&self) -> &Envelope {
        self.outgoing.envelope()
    }

    /// RFC 2822 bytes including the Bcc header
    pub fn formatted(&self) -> Vec<u8> {
        self.archived.formatted()
    }

    /// Envelope and wire bytes, Bcc header stripped
    pub fn into_transmission(self) -> (Envelope, Vec<u8>) {
        let envelope = self.outgoing.envelope().clone();
        (envelope, self.outgoing.formatted())
    }
}
