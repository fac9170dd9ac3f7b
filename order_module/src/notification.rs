//! Normalized notification records decoded from raw RFC 822 messages.

use chrono::{DateTime, TimeZone, Utc};
use mailparse::{DispositionType, MailAddr, MailHeaderMap, ParsedMail};
use serde::{Deserialize, Serialize};

/// One inbound message matching the mailbox filter. Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NotificationRecord {
    /// Transport-assigned id, unique per inbox (the IMAP UID).
    pub id: String,
    /// Bare sender address, e.g. `no-reply@itemku.com`.
    pub sender: String,
    pub subject: String,
    pub received_at: DateTime<Utc>,
    pub body_text: String,
    pub body_html: String,
}

#[derive(Debug, thiserror::Error)]
pub enum NotificationError {
    #[error("mime parse error: {0}")]
    Mime(#[from] mailparse::MailParseError),
    #[error("message has neither a Date header nor an internal date")]
    MissingDate,
}

impl NotificationRecord {
    /// Decodes a raw message. `fallback_received_at` (the server's internal
    /// date) is used when the `Date:` header is missing or unparsable.
    pub fn from_rfc822(
        id: &str,
        raw: &[u8],
        fallback_received_at: Option<DateTime<Utc>>,
    ) -> Result<Self, NotificationError> {
        let parsed = mailparse::parse_mail(raw)?;

        let from = parsed.headers.get_first_value("From").unwrap_or_default();
        let subject = parsed
            .headers
            .get_first_value("Subject")
            .unwrap_or_default()
            .trim()
            .to_string();
        let received_at = parsed
            .headers
            .get_first_value("Date")
            .and_then(|value| mailparse::dateparse(&value).ok())
            .and_then(|secs| Utc.timestamp_opt(secs, 0).single())
            .or(fallback_received_at)
            .ok_or(NotificationError::MissingDate)?;

        let mut body_text = None;
        let mut body_html = None;
        collect_bodies(&parsed, &mut body_text, &mut body_html)?;

        Ok(Self {
            id: id.to_string(),
            sender: sender_address(&from),
            subject,
            received_at,
            body_text: body_text.unwrap_or_default(),
            body_html: body_html.unwrap_or_default(),
        })
    }

    /// The HTML body when present, otherwise the plain-text body.
    pub fn preferred_body(&self) -> &str {
        if self.body_html.trim().is_empty() {
            &self.body_text
        } else {
            &self.body_html
        }
    }
}

fn collect_bodies(
    part: &ParsedMail<'_>,
    text: &mut Option<String>,
    html: &mut Option<String>,
) -> Result<(), mailparse::MailParseError> {
    if !part.subparts.is_empty() {
        for subpart in &part.subparts {
            collect_bodies(subpart, text, html)?;
        }
        return Ok(());
    }

    if part.get_content_disposition().disposition == DispositionType::Attachment {
        return Ok(());
    }
    match part.ctype.mimetype.to_ascii_lowercase().as_str() {
        "text/plain" if text.is_none() => *text = Some(part.get_body()?),
        "text/html" if html.is_none() => *html = Some(part.get_body()?),
        _ => {}
    }
    Ok(())
}

fn sender_address(from: &str) -> String {
    let first = mailparse::addrparse(from)
        .ok()
        .and_then(|list| list.iter().next().cloned());
    match first {
        Some(MailAddr::Single(info)) => info.addr.trim().to_ascii_lowercase(),
        Some(MailAddr::Group(group)) => group
            .addrs
            .first()
            .map(|info| info.addr.trim().to_ascii_lowercase())
            .unwrap_or_default(),
        None => from.trim().to_ascii_lowercase(),
    }
}
