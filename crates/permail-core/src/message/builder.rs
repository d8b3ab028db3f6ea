//! Outbound message assembly

use super::tracking::{generate_message_id, tracking_message_id, ObjectRef};
use super::OutboundMessage;
use crate::address::parse_mailbox;
use crate::from::{resolve_from, FromPolicy};
use lettre::address::Envelope;
use lettre::message::header::{ContentType, HeaderName, HeaderValue};
use lettre::message::{Attachment as AttachmentPart, Mailbox, Mailboxes, MultiPart, SinglePart};
use lettre::{Address, Message};
use permail_common::config::Config;
use permail_common::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::SystemTime;
use tracing::debug;

const DEFAULT_ATTACHMENT_TYPE: &str = "application/octet-stream";

/// File attached to a message
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Attachment {
    pub filename: String,
    pub content: Vec<u8>,
    /// `major/minor`; octet-stream when absent or malformed
    pub mime_type: Option<String>,
}

/// Caller input for [`MessageBuilder::build`]
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MessageParams {
    pub from: Option<String>,
    #[serde(default)]
    pub to: Vec<String>,
    #[serde(default)]
    pub cc: Vec<String>,
    #[serde(default)]
    pub bcc: Vec<String>,
    #[serde(default)]
    pub subject: String,
    #[serde(default)]
    pub body: String,
    /// Body subtype, `plain` or `html`
    #[serde(default = "default_subtype")]
    pub subtype: String,
    pub alternative: Option<String>,
    #[serde(default = "default_subtype")]
    pub alternative_subtype: String,
    pub reply_to: Option<String>,
    pub references: Option<String>,
    pub in_reply_to: Option<String>,
    pub message_id: Option<String>,
    pub object_ref: Option<ObjectRef>,
    /// Applied last; overrides any generated header of the same name
    #[serde(default)]
    pub headers: BTreeMap<String, String>,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
}

fn default_subtype() -> String {
    "plain".to_string()
}

impl Default for MessageParams {
    fn default() -> Self {
        Self {
            from: None,
            to: Vec::new(),
            cc: Vec::new(),
            bcc: Vec::new(),
            subject: String::new(),
            body: String::new(),
            subtype: default_subtype(),
            alternative: None,
            alternative_subtype: default_subtype(),
            reply_to: None,
            references: None,
            in_reply_to: None,
            message_id: None,
            object_ref: None,
            headers: BTreeMap::new(),
            attachments: Vec::new(),
        }
    }
}

/// Addresses and headers computed once and shared by both renderings
struct Draft<'a> {
    params: &'a MessageParams,
    message_id: String,
    date: SystemTime,
    from: Mailbox,
    reply_to: Mailbox,
    to: Vec<Mailbox>,
    cc: Vec<Mailbox>,
    bcc: Vec<Mailbox>,
    envelope: Envelope,
    custom: Vec<HeaderValue>,
}

/// Builds RFC 2822 messages
pub struct MessageBuilder {
    hostname: String,
    default_from: Option<String>,
}

impl MessageBuilder {
    pub fn new(hostname: impl Into<String>, default_from: Option<String>) -> Self {
        Self {
            hostname: hostname.into(),
            default_from,
        }
    }

    pub fn from_config(config: &Config) -> Self {
        Self::new(
            config.server.hostname.clone(),
            config.outbound.default_from.clone(),
        )
    }

    /// Assemble a message ready for transmission
    pub fn build(&self, params: MessageParams, policy: &FromPolicy) -> Result<OutboundMessage> {
        let sender = non_blank(&params.from)
            .or_else(|| non_blank(&self.default_from))
            .ok_or_else(|| {
                Error::Config(
                    "No sender address: set a From or configure outbound.default_from".to_string(),
                )
            })?
            .to_string();

        let resolved = resolve_from(&sender, policy);
        let from = mailbox(&resolved.from)?;
        let reply_to = match non_blank(&params.reply_to) {
            Some(reply_to) => mailbox(reply_to)?,
            None => from.clone(),
        };

        let message_id = match (non_blank(&params.message_id), &params.object_ref) {
            (Some(id), _) => id.to_string(),
            (None, Some(reference)) => tracking_message_id(reference, &self.hostname),
            (None, None) => generate_message_id(&self.hostname),
        };

        let to = mailboxes(&params.to)?;
        let cc = mailboxes(&params.cc)?;
        let bcc = mailboxes(&params.bcc)?;

        let envelope_from = match &resolved.return_path {
            Some(return_path) => return_path
                .parse::<Address>()
                .map_err(|e| Error::AddressFormat(format!("{}: {}", return_path, e)))?,
            None => from.email.clone(),
        };
        let mut recipients: Vec<Address> = Vec::new();
        for mailbox in to.iter().chain(&cc).chain(&bcc) {
            if !recipients.contains(&mailbox.email) {
                recipients.push(mailbox.email.clone());
            }
        }
        let envelope = Envelope::new(Some(envelope_from), recipients)
            .map_err(|e| Error::AddressFormat(format!("Invalid envelope: {}", e)))?;

        let custom = params
            .headers
            .iter()
            .map(|(name, value)| custom_header(name, value))
            .collect::<Result<Vec<_>>>()?;

        let draft = Draft {
            params: &params,
            message_id: message_id.clone(),
            date: SystemTime::now(),
            from,
            reply_to,
            to,
            cc,
            bcc,
            envelope,
            custom,
        };

        let archived = compose(&draft, true)?;
        let outgoing = compose(&draft, false)?;
        // A custom header may have replaced the generated id
        let message_id = archived
            .headers()
            .get_raw("Message-ID")
            .map(str::trim)
            .filter(|id| !id.is_empty())
            .map_or(message_id, str::to_string);
        debug!(
            message_id = %message_id,
            recipients = draft.envelope.to().len(),
            attachments = params.attachments.len(),
            "Built outbound message"
        );

        Ok(OutboundMessage {
            message_id,
            archived,
            outgoing,
        })
    }
}

fn non_blank(value: &Option<String>) -> Option<&str> {
    value.as_deref().map(str::trim).filter(|v| !v.is_empty())
}

fn mailbox(value: &str) -> Result<Mailbox> {
    parse_mailbox(value).ok_or_else(|| Error::AddressFormat(format!("Invalid address: {}", value)))
}

fn mailboxes(values: &[String]) -> Result<Vec<Mailbox>> {
    let mut result = Vec::new();
    for value in values.iter().map(|v| v.trim()).filter(|v| !v.is_empty()) {
        let parsed: Mailboxes = value
            .parse()
            .map_err(|e| Error::AddressFormat(format!("Invalid recipient {}: {}", value, e)))?;
        result.extend(parsed);
    }
    Ok(result)
}

/// Header names are title-cased per dash-separated word
fn normalize_header_name(name: &str) -> String {
    name.trim()
        .split('-')
        .map(|word| {
            let mut chars = word.chars();
            match chars.next() {
                Some(first) => {
                    first.to_ascii_uppercase().to_string() + &chars.as_str().to_ascii_lowercase()
                }
                None => String::new(),
            }
        })
        .collect::<Vec<_>>()
        .join("-")
}

fn custom_header(name: &str, value: &str) -> Result<HeaderValue> {
    if value.contains(['\r', '\n']) {
        return Err(Error::Config(format!("Header {} contains a line break", name)));
    }
    let name = HeaderName::new_from_ascii(normalize_header_name(name))
        .map_err(|_| Error::Config(format!("Invalid header name: {}", name)))?;
    Ok(HeaderValue::new(name, value.to_string()))
}

fn text_part(subtype: &str, content: &str) -> Result<SinglePart> {
    let content_type = ContentType::parse(&format!("text/{}; charset=utf-8", subtype.trim()))
        .map_err(|e| Error::Config(format!("Invalid body subtype {}: {}", subtype, e)))?;
    Ok(SinglePart::builder()
        .header(content_type)
        .body(content.to_string()))
}

fn attachment_type(mime_type: Option<&str>) -> Result<ContentType> {
    if let Some(parsed) = mime_type.and_then(|m| ContentType::parse(m.trim()).ok()) {
        return Ok(parsed);
    }
    ContentType::parse(DEFAULT_ATTACHMENT_TYPE).map_err(|e| Error::Internal(e.to_string()))
}

enum Body {
    Single(SinglePart),
    Alternative(MultiPart),
}

fn body(params: &MessageParams) -> Result<Body> {
    if let Some(alternative) = &params.alternative {
        return Ok(Body::Alternative(
            MultiPart::alternative()
                .singlepart(text_part(&params.alternative_subtype, alternative)?)
                .singlepart(text_part(&params.subtype, &params.body)?),
        ));
    }

    if params.subtype.trim().eq_ignore_ascii_case("html") {
        let plain = mail_parser::decoders::html::html_to_text(&params.body);
        return Ok(Body::Alternative(
            MultiPart::alternative()
                .singlepart(text_part("plain", &plain)?)
                .singlepart(text_part("html", &params.body)?),
        ));
    }

    Ok(Body::Single(text_part(&params.subtype, &params.body)?))
}

fn compose(draft: &Draft<'_>, keep_bcc: bool) -> Result<Message> {
    let params = draft.params;
    let mut builder = Message::builder()
        .message_id(Some(draft.message_id.clone()))
        .subject(params.subject.clone())
        .from(draft.from.clone())
        .reply_to(draft.reply_to.clone())
        .date(draft.date)
        .envelope(draft.envelope.clone());

    for mailbox in &draft.to {
        builder = builder.to(mailbox.clone());
    }
    for mailbox in &draft.cc {
        builder = builder.cc(mailbox.clone());
    }
    for mailbox in &draft.bcc {
        builder = builder.bcc(mailbox.clone());
    }
    if let Some(references) = non_blank(&params.references) {
        builder = builder.references(references.to_string());
    }
    if let Some(in_reply_to) = non_blank(&params.in_reply_to) {
        builder = builder.in_reply_to(in_reply_to.to_string());
    }
    for header in &draft.custom {
        builder = builder.raw_header(header.clone());
    }
    if keep_bcc {
        builder = builder.keep_bcc();
    }

    let built = if params.attachments.is_empty() {
        match body(params)? {
            Body::Single(part) => builder.singlepart(part),
            Body::Alternative(part) => builder.multipart(part),
        }
    } else {
        let mixed = match body(params)? {
            Body::Single(part) => MultiPart::mixed().singlepart(part),
            Body::Alternative(part) => MultiPart::mixed().multipart(part),
        };
        let mixed = params.attachments.iter().try_fold(mixed, |mixed, attachment| {
            let content_type = attachment_type(attachment.mime_type.as_deref())?;
            Ok::<_, Error>(mixed.singlepart(
                AttachmentPart::new(attachment.filename.clone())
                    .body(attachment.content.clone(), content_type),
            ))
        })?;
        builder.multipart(mixed)
    };

    built.map_err(|e| Error::Internal(format!("Failed to build message: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::parse_tracking_reference;
    use mail_parser::{MessageParser, MimeHeaders};
    use pretty_assertions::assert_eq;

    fn builder() -> MessageBuilder {
        MessageBuilder::new("mail.example.com", Some("noreply@example.com".to_string()))
    }

    fn params() -> MessageParams {
        MessageParams {
            from: Some("Alice <alice@example.com>".to_string()),
            to: vec!["bob@example.org".to_string()],
            subject: "Quarterly report".to_string(),
            body: "Numbers attached.".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn test_no_sender_is_config_error() {
        let builder = MessageBuilder::new("mail.example.com", None);
        let mut input = params();
        input.from = None;
        let err = builder.build(input, &FromPolicy::default()).unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[test]
    fn test_default_sender_used() {
        let mut input = params();
        input.from = Some("  ".to_string());
        let message = builder().build(input, &FromPolicy::default()).unwrap();
        assert_eq!(message.header("From"), Some("noreply@example.com"));
        assert_eq!(message.envelope().from().map(|a| a.to_string()).as_deref(), Some("noreply@example.com"));
    }

    #[test]
    fn test_reply_to_defaults_to_from() {
        let message = builder().build(params(), &FromPolicy::default()).unwrap();
        let raw = message.formatted();
        let parsed = MessageParser::default().parse(&raw).unwrap();
        let reply_to = parsed.reply_to().and_then(|a| a.first()).unwrap();
        assert_eq!(reply_to.address(), Some("alice@example.com"));
        assert_eq!(parsed.subject(), Some("Quarterly report"));
    }

    #[test]
    fn test_custom_headers_override() {
        let mut input = params();
        input.headers.insert("subject".to_string(), "Overridden".to_string());
        input.headers.insert("x-campaign-id".to_string(), "spring".to_string());
        let message = builder().build(input, &FromPolicy::default()).unwrap();

        let raw = message.formatted();
        let parsed = MessageParser::default().parse(&raw).unwrap();
        assert_eq!(parsed.subject(), Some("Overridden"));
        assert_eq!(message.header("X-Campaign-Id"), Some("spring"));

        let text = String::from_utf8_lossy(&raw).to_ascii_lowercase();
        assert_eq!(text.matches("\r\nsubject:").count(), 1);
    }

    #[test]
    fn test_header_injection_rejected() {
        let mut input = params();
        input.headers.insert("X-Note".to_string(), "a\r\nBcc: evil@example.net".to_string());
        assert!(builder().build(input, &FromPolicy::default()).is_err());
    }

    #[test]
    fn test_message_id_sources() {
        let mut input = params();
        input.message_id = Some("<given@example.com>".to_string());
        input.object_ref = Some(ObjectRef::new("crm.lead", 9));
        let message = builder().build(input, &FromPolicy::default()).unwrap();
        assert_eq!(message.message_id(), "<given@example.com>");

        let mut input = params();
        input.object_ref = Some(ObjectRef::new("crm.lead", 9));
        let message = builder().build(input, &FromPolicy::default()).unwrap();
        assert_eq!(
            parse_tracking_reference(message.message_id()),
            Some(ObjectRef::new("crm.lead", 9))
        );

        let message = builder().build(params(), &FromPolicy::default()).unwrap();
        assert!(message.message_id().ends_with("-permail@mail.example.com>"));
    }

    #[test]
    fn test_message_id_header_override() {
        let mut input = params();
        input.object_ref = Some(ObjectRef::new("crm.lead", 9));
        input.headers.insert("message-id".to_string(), "<custom@example.com>".to_string());
        let message = builder().build(input, &FromPolicy::default()).unwrap();

        assert_eq!(message.message_id(), "<custom@example.com>");
        assert_eq!(message.header("Message-ID"), Some("<custom@example.com>"));
        let raw = message.formatted();
        let parsed = MessageParser::default().parse(&raw).unwrap();
        assert_eq!(parsed.message_id(), Some("custom@example.com"));
    }

    #[test]
    fn test_html_body_gets_plain_alternative() {
        let mut input = params();
        input.subtype = "html".to_string();
        input.body = "<p>Hello <b>world</b></p>".to_string();
        let message = builder().build(input, &FromPolicy::default()).unwrap();

        let raw = message.formatted();
        let parsed = MessageParser::default().parse(&raw).unwrap();
        let content_type = parsed.content_type().unwrap();
        assert_eq!(content_type.ctype(), "multipart");
        assert_eq!(content_type.subtype(), Some("alternative"));
        let plain = parsed.body_text(0).unwrap();
        assert!(plain.contains("Hello"));
        assert!(!plain.contains("<b>"));
        assert!(parsed.body_html(0).unwrap().contains("<b>world</b>"));
    }

    #[test]
    fn test_explicit_alternative_ordering() {
        let mut input = params();
        input.body = "primary".to_string();
        input.alternative = Some("fallback".to_string());
        let message = builder().build(input, &FromPolicy::default()).unwrap();

        let raw = message.formatted();
        let parsed = MessageParser::default().parse(&raw).unwrap();
        assert_eq!(parsed.content_type().unwrap().subtype(), Some("alternative"));
        let first = parsed.part(1).unwrap();
        let second = parsed.part(2).unwrap();
        assert_eq!(first.text_contents().map(str::trim), Some("fallback"));
        assert_eq!(second.text_contents().map(str::trim), Some("primary"));
    }

    #[test]
    fn test_attachments() {
        let mut input = params();
        input.attachments = vec![
            Attachment {
                filename: "report.pdf".to_string(),
                content: b"%PDF-1.4".to_vec(),
                mime_type: Some("application/pdf".to_string()),
            },
            Attachment {
                filename: "blob.bin".to_string(),
                content: vec![0, 1, 2, 3],
                mime_type: Some("not a mime type".to_string()),
            },
        ];
        let message = builder().build(input, &FromPolicy::default()).unwrap();

        let raw = message.formatted();
        let parsed = MessageParser::default().parse(&raw).unwrap();
        assert_eq!(parsed.content_type().unwrap().subtype(), Some("mixed"));
        assert_eq!(parsed.attachment_count(), 2);

        let pdf = parsed.attachment(0).unwrap();
        assert_eq!(pdf.attachment_name(), Some("report.pdf"));
        assert_eq!(pdf.contents(), b"%PDF-1.4");
        assert_eq!(pdf.content_type().unwrap().subtype(), Some("pdf"));

        let blob = parsed.attachment(1).unwrap();
        assert_eq!(blob.attachment_name(), Some("blob.bin"));
        assert_eq!(blob.content_type().unwrap().ctype(), "application");
        assert_eq!(blob.content_type().unwrap().subtype(), Some("octet-stream"));
    }

    #[test]
    fn test_bcc_in_envelope_not_transmitted() {
        let mut input = params();
        input.cc = vec!["Carol <carol@example.org>, dave@example.org".to_string()];
        input.bcc = vec!["hidden@example.net".to_string()];
        let message = builder().build(input, &FromPolicy::default()).unwrap();

        assert!(message.header("Bcc").is_some());
        let recipients: Vec<String> = message.envelope().to().iter().map(|a| a.to_string()).collect();
        assert_eq!(
            recipients,
            vec!["bob@example.org", "carol@example.org", "dave@example.org", "hidden@example.net"]
        );

        let (envelope, bytes) = message.into_transmission();
        assert_eq!(envelope.to().len(), 4);
        let text = String::from_utf8_lossy(&bytes).to_ascii_lowercase();
        assert!(!text.contains("hidden@example.net"));
    }

    #[test]
    fn test_forced_from_sets_envelope_sender() {
        let policy = FromPolicy {
            force_from: Some("bounce@example.net".to_string()),
            ..Default::default()
        };
        let message = builder().build(params(), &policy).unwrap();
        assert_eq!(
            message.envelope().from().map(|a| a.to_string()).as_deref(),
            Some("bounce@example.net")
        );

        let raw = message.formatted();
        let parsed = MessageParser::default().parse(&raw).unwrap();
        let from = parsed.from().and_then(|a| a.first()).unwrap();
        assert_eq!(from.address(), Some("bounce@example.net"));
        assert_eq!(from.name(), Some("Alice (alice@example.com)"));
    }

    #[test]
    fn test_header_name_normalization() {
        assert_eq!(normalize_header_name("x-custom-tag"), "X-Custom-Tag");
        assert_eq!(normalize_header_name("SUBJECT"), "Subject");
    }
}
