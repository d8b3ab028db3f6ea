//! Address parsing, extraction and From re-encapsulation

use lettre::message::{Mailbox, Mailboxes};
use lettre::Address;
use permail_common::{Error, Result};
use regex::Regex;
use std::sync::OnceLock;

fn address_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"([^ ,<@]+@[^> ,]+)").expect("static address pattern"))
}

/// Separators and brackets that may cling to a candidate in free-form text
const SURROUNDING_PUNCTUATION: &[char] = &['(', ')', '[', ']', ';', ':', '.', '"', '\''];

/// Returns the valid RFC 2822 addresses found in free-form text.
///
/// Malformed and non-ASCII candidates are dropped.
pub fn extract_addresses(text: &str) -> Vec<String> {
    address_pattern()
        .find_iter(text)
        .map(|m| m.as_str().trim_matches(SURROUNDING_PUNCTUATION))
        .filter(|candidate| candidate.is_ascii())
        .filter_map(|candidate| candidate.parse::<Address>().ok())
        .map(|address| address.to_string())
        .collect()
}

/// First mailbox of an address header value, if any
pub fn parse_mailbox(text: &str) -> Option<Mailbox> {
    let text = text.trim();
    if text.is_empty() {
        return None;
    }
    if let Ok(mailbox) = text.parse::<Mailbox>() {
        return Some(mailbox);
    }
    text.parse::<Mailboxes>().ok()?.into_iter().next()
}

/// Domain of the first address in `text`
pub fn domain_of(text: &str) -> Option<String> {
    parse_mailbox(text).map(|mailbox| mailbox.email.domain().to_string())
}

/// Rewrites `old` to be sent from the address of `new`, keeping the old
/// identity visible in the display name.
///
/// ```text
/// old:    "Admin" <admin@example.com>
/// new:    notifications@example.org
/// result: "Admin (admin@example.com)" <notifications@example.org>
/// ```
///
/// `old` is returned unchanged when it holds no address; `None` when `new`
/// holds none.
pub fn encapsulate(old: &str, new: &str) -> Option<String> {
    let Some(old_mailbox) = parse_mailbox(old) else {
        return Some(old.to_string());
    };
    let new_mailbox = parse_mailbox(new)?;

    let name = match old_mailbox.name.as_deref().map(str::trim) {
        Some(name) if !name.is_empty() => format!("{} ({})", name, old_mailbox.email),
        _ => old_mailbox.email.to_string(),
    };

    Some(Mailbox::new(Some(name), new_mailbox.email).to_string())
}

/// Encodes the domain part of a login name with IDNA so that accounts on
/// internationalized domains can authenticate.
pub fn encode_idna_user(username: &str) -> Result<String> {
    let Some((local, domain)) = username.rsplit_once('@') else {
        return Ok(username.to_string());
    };
    let domain = idna::domain_to_ascii(domain)
        .map_err(|e| Error::AddressFormat(format!("Invalid domain in {}: {:?}", username, e)))?;
    Ok(format!("{}@{}", local, domain))
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_extract_addresses() {
        let found = extract_addresses("Admin <admin@example.com>, other@example.org; bogus@");
        assert_eq!(found, vec!["admin@example.com", "other@example.org"]);

        let found = extract_addresses("a@example.com; b@example.org");
        assert_eq!(found, vec!["a@example.com", "b@example.org"]);

        let found = extract_addresses("ask (ops@example.com) or [help@example.com].");
        assert_eq!(found, vec!["ops@example.com", "help@example.com"]);

        let found = extract_addresses("\"Zoë\" <zoë@example.com>, ok@example.com");
        assert_eq!(found, vec!["ok@example.com"]);
    }

    #[test]
    fn test_empty_input() {
        assert!(extract_addresses("").is_empty());
        assert!(extract_addresses("no addresses here").is_empty());
        assert_eq!(domain_of(""), None);
        assert_eq!(domain_of("   "), None);
        assert_eq!(domain_of("not an address"), None);
    }

    #[test]
    fn test_domain_of() {
        assert_eq!(domain_of("user@a.com").as_deref(), Some("a.com"));
        assert_eq!(domain_of("\"User\" <user@b.example>").as_deref(), Some("b.example"));
        assert_eq!(
            domain_of("first@one.example, second@two.example").as_deref(),
            Some("one.example")
        );
    }

    #[test]
    fn test_encapsulate_with_display_name() {
        let result = encapsulate("\"Admin\" <admin@example.com>", "notifications@example.org").unwrap();
        let mailbox = parse_mailbox(&result).unwrap();
        assert_eq!(mailbox.name.as_deref(), Some("Admin (admin@example.com)"));
        assert_eq!(mailbox.email.to_string(), "notifications@example.org");
    }

    #[test]
    fn test_encapsulate_bare_address() {
        let result = encapsulate("admin@example.com", "Bounce <bounce@example.org>").unwrap();
        let mailbox = parse_mailbox(&result).unwrap();
        assert_eq!(mailbox.name.as_deref(), Some("admin@example.com"));
        assert_eq!(mailbox.email.to_string(), "bounce@example.org");
    }

    #[test]
    fn test_encapsulate_unparseable() {
        assert_eq!(encapsulate("nobody", "x@example.org").as_deref(), Some("nobody"));
        assert_eq!(encapsulate("admin@example.com", "not an address"), None);
    }

    #[test]
    fn test_encode_idna_user() {
        assert_eq!(encode_idna_user("user@bücher.example").unwrap(), "user@xn--bcher-kva.example");
        assert_eq!(encode_idna_user("user@example.com").unwrap(), "user@example.com");
        assert_eq!(encode_idna_user("plainlogin").unwrap(), "plainlogin");
    }
}
