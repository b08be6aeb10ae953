//! Builds the vacation reply for a message and encodes it for sending

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine as _};
use once_cell::sync::Lazy;
use regex::Regex;

use crate::error::{GmailError, Result};
use crate::models::{MessageHeaders, Reply};

/// Headers the composer needs from each candidate
pub const REQUIRED_HEADERS: [&str; 2] = ["Subject", "From"];

const REPLY_PREFIX: &str = "Re: ";

static ANGLE_ADDRESS: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"<([^<>]*)>").expect("angle-bracket address pattern is valid")
});

/// Composes replies with a fixed body
#[derive(Debug, Clone)]
pub struct ReplyComposer {
    from: String,
    body: String,
}

impl ReplyComposer {
    pub fn new(from: impl Into<String>, body: impl Into<String>) -> Self {
        Self {
            from: from.into(),
            body: body.into(),
        }
    }

    /// Derive the reply for a message from its Subject and From headers
    pub fn compose(&self, headers: &MessageHeaders) -> Result<Reply> {
        let subject = headers.require("Subject")?;
        let from = headers.require("From")?;

        Ok(Reply {
            from: self.from.clone(),
            to: extract_reply_address(from)?,
            subject: reply_subject(subject),
            in_reply_to: headers.message_id.clone(),
            references: headers.message_id.clone(),
            body: self.body.clone(),
        })
    }
}

/// Pull the address out of `Name <addr@host>`
///
/// The last bracketed group wins, so a display name that itself contains
/// brackets does not shadow the real address.
pub fn extract_reply_address(from_header: &str) -> Result<String> {
    let address = ANGLE_ADDRESS
        .captures_iter(from_header)
        .last()
        .and_then(|caps| caps.get(1))
        .map(|m| m.as_str().trim())
        .ok_or_else(|| GmailError::AddressParse(from_header.to_string()))?;

    if address.is_empty() || !address.contains('@') {
        return Err(GmailError::AddressParse(from_header.to_string()));
    }

    Ok(address.to_string())
}

/// Prefix with "Re: " unless already present (case-sensitive)
pub fn reply_subject(subject: &str) -> String {
    if subject.starts_with(REPLY_PREFIX) {
        subject.to_string()
    } else {
        format!("{}{}", REPLY_PREFIX, subject)
    }
}

impl Reply {
    /// Serialize as an RFC-822 style message: headers, blank line, body
    pub fn to_rfc822(&self) -> String {
        let lines = [
            format!("From: {}", self.from),
            format!("To: {}", self.to),
            format!("Subject: {}", self.subject),
            format!("In-Reply-To: {}", self.in_reply_to),
            format!("References: {}", self.references),
            "MIME-Version: 1.0".to_string(),
            "Content-Type: text/plain; charset=\"UTF-8\"".to_string(),
            String::new(),
            crlf_lines(&self.body),
        ];
        lines.join("\r\n")
    }

    /// Base64url without padding, the form `messages.send` expects in `raw`
    pub fn encode(&self) -> String {
        encode_raw(&self.to_rfc822())
    }
}

/// Rewrite every line break in `text` as CRLF
fn crlf_lines(text: &str) -> String {
    text.replace("\r\n", "\n")
        .replace('\r', "\n")
        .replace('\n', "\r\n")
}

pub fn encode_raw(message: &str) -> String {
    URL_SAFE_NO_PAD.encode(message.as_bytes())
}

/// Inverse of [`encode_raw`]
pub fn decode_raw(raw: &str) -> Result<String> {
    let bytes = URL_SAFE_NO_PAD.decode(raw).map_err(|e| {
        GmailError::InvalidMessageFormat(format!("Raw message is not base64url: {}", e))
    })?;
    String::from_utf8(bytes).map_err(|e| {
        GmailError::InvalidMessageFormat(format!("Raw message is not UTF-8: {}", e))
    })
}
