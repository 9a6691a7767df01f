//! Thread messages as handed over by the mailbox collaborator.

use std::path::Path;

use chrono::{DateTime, Utc};
use mail_parser::MessageParser;
use serde::{Deserialize, Serialize};

use crate::error::InputError;

/// One message of a thread, as read from the mailbox. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawMessage {
    /// From header, either `Name <address>` or a bare address/name.
    pub sender: String,
    /// To recipients, same format as `sender`.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub recipients: Vec<String>,
    pub subject: String,
    /// Body as received: HTML or plain text.
    pub body: String,
    pub timestamp: DateTime<Utc>,
}

impl RawMessage {
    pub fn new(
        sender: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
        timestamp: DateTime<Utc>,
    ) -> Self {
        Self {
            sender: sender.into(),
            recipients: Vec::new(),
            subject: subject.into(),
            body: body.into(),
            timestamp,
        }
    }

    pub fn with_recipients(mut self, recipients: Vec<String>) -> Self {
        self.recipients = recipients;
        self
    }

    /// Display name of the sender, falling back to the address.
    pub fn sender_name(&self) -> &str {
        display_name(&self.sender)
    }

    /// Parse an RFC 822 message. Prefers the text body over the HTML one.
    pub fn from_rfc822(raw: &[u8]) -> Result<Self, InputError> {
        let parsed = MessageParser::default()
            .parse(raw)
            .ok_or_else(|| InputError::Parse("not an RFC 822 message".into()))?;

        let sender = parsed
            .from()
            .and_then(|addr| addr.first())
            .map(format_addr)
            .unwrap_or_else(|| "unknown".into());

        let recipients = parsed
            .to()
            .map(|addr| addr.iter().map(format_addr).collect())
            .unwrap_or_default();

        let body = parsed
            .body_text(0)
            .or_else(|| parsed.body_html(0))
            .map(|b| b.into_owned())
            .unwrap_or_default();

        let timestamp = parsed
            .date()
            .and_then(|d| DateTime::from_timestamp(d.to_timestamp(), 0))
            .unwrap_or_else(Utc::now);

        Ok(Self {
            sender,
            recipients,
            subject: parsed.subject().unwrap_or_default().to_string(),
            body,
            timestamp,
        })
    }
}

fn format_addr(addr: &mail_parser::Addr) -> String {
    match (addr.name(), addr.address()) {
        (Some(name), Some(address)) => format!("{name} <{address}>"),
        (None, Some(address)) => address.to_string(),
        (Some(name), None) => name.to_string(),
        (None, None) => "unknown".to_string(),
    }
}

/// Split a `Name <address>` header into its parts.
///
/// A bare value is treated as an address when it contains `@`, else as a
/// name.
pub fn parse_mailbox(header: &str) -> (Option<&str>, Option<&str>) {
    let header = header.trim();
    if let (Some(open), true) = (header.rfind('<'), header.ends_with('>')) {
        let name = header[..open].trim().trim_matches('"').trim();
        let address = header[open + 1..header.len() - 1].trim();
        let name = (!name.is_empty()).then_some(name);
        let address = (!address.is_empty()).then_some(address);
        return (name, address);
    }
    if header.contains('@') {
        (None, Some(header))
    } else {
        (Some(header).filter(|h| !h.is_empty()), None)
    }
}

/// Name to greet someone by: display name if present, else the address.
pub fn display_name(header: &str) -> &str {
    match parse_mailbox(header) {
        (Some(name), _) => name,
        (None, Some(address)) => address,
        (None, None) => header.trim(),
    }
}

/// Load a thread from disk.
///
/// A single `.json` file holds an array of messages. Otherwise every path
/// is an RFC 822 file, taken in the order given.
pub fn load_thread<P: AsRef<Path>>(paths: &[P]) -> Result<Vec<RawMessage>, InputError> {
    if let [single] = paths
        && single
            .as_ref()
            .extension()
            .is_some_and(|ext| ext.eq_ignore_ascii_case("json"))
    {
        let content = std::fs::read_to_string(single)?;
        return serde_json::from_str(&content)
            .map_err(|e| InputError::Parse(format!("{}: {e}", single.as_ref().display())));
    }

    paths
        .iter()
        .map(|path| {
            let raw = std::fs::read(path)?;
            RawMessage::from_rfc822(&raw)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    // ── parse_mailbox ───────────────────────────────────────────────

    #[test]
    fn mailbox_with_name_and_address() {
        assert_eq!(
            parse_mailbox("Sarah Ravitz <sarah@example.com>"),
            (Some("Sarah Ravitz"), Some("sarah@example.com"))
        );
    }

    #[test]
    fn mailbox_with_quoted_name() {
        assert_eq!(
            parse_mailbox("\"Levi, Dana\" <dana@example.com>"),
            (Some("Levi, Dana"), Some("dana@example.com"))
        );
    }

    #[test]
    fn bare_address_and_bare_name() {
        assert_eq!(parse_mailbox("bob@example.com"), (None, Some("bob@example.com")));
        assert_eq!(parse_mailbox("Bob"), (Some("Bob"), None));
        assert_eq!(parse_mailbox("  "), (None, None));
    }

    #[test]
    fn display_name_falls_back_to_address() {
        assert_eq!(display_name("Dana <dana@example.com>"), "Dana");
        assert_eq!(display_name("<dana@example.com>"), "dana@example.com");
    }

    // ── RFC 822 ─────────────────────────────────────────────────────

    const EML: &str = "From: Dana Levi <dana@example.com>\r\n\
To: Sarah Ravitz <sarah@example.com>\r\n\
Subject: Q3 report\r\n\
Date: Mon, 2 Mar 2026 10:00:00 +0000\r\n\
Content-Type: text/plain; charset=utf-8\r\n\
\r\n\
Can you send the Q3 report?\r\n";

    #[test]
    fn parses_rfc822_headers_and_body() {
        let msg = RawMessage::from_rfc822(EML.as_bytes()).unwrap();
        assert_eq!(msg.sender, "Dana Levi <dana@example.com>");
        assert_eq!(msg.recipients, vec!["Sarah Ravitz <sarah@example.com>"]);
        assert_eq!(msg.subject, "Q3 report");
        assert!(msg.body.contains("Can you send the Q3 report?"));
        assert_eq!(msg.timestamp.to_rfc3339(), "2026-03-02T10:00:00+00:00");
        assert_eq!(msg.sender_name(), "Dana Levi");
    }

    // ── load_thread ─────────────────────────────────────────────────

    #[test]
    fn loads_json_thread() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thread.json");
        let json = r#"[
            {"sender": "Dana <dana@example.com>", "subject": "Q3", "body": "Hi", "timestamp": "2026-03-02T10:00:00Z"},
            {"sender": "Sarah <sarah@example.com>", "recipients": ["Dana <dana@example.com>"], "subject": "Re: Q3", "body": "Sure", "timestamp": "2026-03-02T11:00:00Z"}
        ]"#;
        std::fs::write(&path, json).unwrap();

        let thread = load_thread(&[&path]).unwrap();
        assert_eq!(thread.len(), 2);
        assert!(thread[0].recipients.is_empty());
        assert_eq!(thread[1].recipients, vec!["Dana <dana@example.com>"]);
    }

    #[test]
    fn loads_eml_files_in_order() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("1.eml");
        let second = dir.path().join("2.eml");
        std::fs::write(&first, EML).unwrap();
        let mut f = std::fs::File::create(&second).unwrap();
        write!(
            f,
            "From: sarah@example.com\r\nTo: dana@example.com\r\nSubject: Re: Q3 report\r\n\r\nAttached.\r\n"
        )
        .unwrap();

        let thread = load_thread(&[first, second]).unwrap();
        assert_eq!(thread.len(), 2);
        assert_eq!(thread[1].sender, "sarah@example.com");
        assert_eq!(thread[1].subject, "Re: Q3 report");
    }

    #[test]
    fn malformed_json_is_a_parse_error() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("thread.json");
        std::fs::write(&path, "{not json").unwrap();
        assert!(matches!(load_thread(&[&path]), Err(InputError::Parse(_))));
    }

    #[test]
    fn missing_file_is_io_error() {
        let result = load_thread(&["/definitely/not/here.eml"]);
        assert!(matches!(result, Err(InputError::Io(_))));
    }
}
