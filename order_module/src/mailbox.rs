use std::fmt;
use std::io::{Read, Write};

use chrono::{DateTime, Utc};
use tracing::debug;

use crate::notification::NotificationRecord;

/// Fixed sender/subject filter applied to the inbox.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MailFilter {
    pub sender: String,
    pub subject: String,
}

impl MailFilter {
    pub fn new(sender: impl Into<String>, subject: impl Into<String>) -> Self {
        Self {
            sender: sender.into(),
            subject: subject.into(),
        }
    }

    /// IMAP search for unread messages. FROM and SUBJECT are substring
    /// matches on the server, so results still go through [`MailFilter::matches`].
    pub fn imap_query(&self) -> String {
        format!(
            "UNSEEN FROM {} SUBJECT {}",
            quote(&self.sender),
            quote(&self.subject)
        )
    }

    pub fn matches(&self, record: &NotificationRecord) -> bool {
        record.sender.eq_ignore_ascii_case(self.sender.trim())
            && record.subject.trim() == self.subject.trim()
    }
}

fn quote(value: &str) -> String {
    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
}

/// A fetched message before MIME decoding.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RawMail {
    pub uid: u32,
    pub internal_date: Option<DateTime<Utc>>,
    pub rfc822: Vec<u8>,
}

#[derive(Debug, thiserror::Error)]
pub enum MailboxError {
    #[error("imap error: {0}")]
    Imap(#[from] imap::error::Error),
    #[error("tls error: {0}")]
    Tls(#[from] native_tls::Error),
}

/// Source of unread notification mail.
pub trait Mailbox: Send {
    /// Returns every unread message matching `filter`. Fetching marks the
    /// returned messages as read on the server.
    fn fetch_unseen(&mut self, filter: &MailFilter) -> Result<Vec<RawMail>, MailboxError>;
}

#[derive(Clone)]
pub struct ImapConfig {
    pub host: String,
    pub port: u16,
    pub username: String,
    pub password: String,
    pub folder: String,
}

impl fmt::Debug for ImapConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ImapConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &"***")
            .field("folder", &self.folder)
            .finish()
    }
}

/// IMAP-over-TLS mailbox. A fresh session is opened for every cycle and
/// logged out afterwards, so a dropped connection only costs one cycle.
#[derive(Debug, Clone)]
pub struct ImapMailbox {
    config: ImapConfig,
}

impl ImapMailbox {
    pub fn new(config: ImapConfig) -> Self {
        Self { config }
    }
}

impl Mailbox for ImapMailbox {
    fn fetch_unseen(&mut self, filter: &MailFilter) -> Result<Vec<RawMail>, MailboxError> {
        let tls = native_tls::TlsConnector::builder().build()?;
        let client = imap::connect(
            (self.config.host.as_str(), self.config.port),
            self.config.host.as_str(),
            &tls,
        )?;
        let mut session = client
            .login(&self.config.username, &self.config.password)
            .map_err(|(err, _client)| err)?;

        let result = fetch_matching(&mut session, &self.config.folder, filter);
        if let Err(err) = session.logout() {
            debug!("imap logout failed: {}", err);
        }
        result
    }
}

fn fetch_matching<T: Read + Write>(
    session: &mut imap::Session<T>,
    folder: &str,
    filter: &MailFilter,
) -> Result<Vec<RawMail>, MailboxError> {
    session.select(folder)?;
    let mut uids: Vec<u32> = session.uid_search(filter.imap_query())?.into_iter().collect();
    if uids.is_empty() {
        return Ok(Vec::new());
    }
    uids.sort_unstable();
    let uid_set = uids
        .iter()
        .map(|uid| uid.to_string())
        .collect::<Vec<_>>()
        .join(",");

    let fetches = session.uid_fetch(&uid_set, "(UID INTERNALDATE RFC822)")?;
    let mut mails = Vec::with_capacity(fetches.len());
    for fetch in fetches.iter() {
        let (Some(uid), Some(body)) = (fetch.uid, fetch.body()) else {
            debug!("imap fetch without uid or body skipped");
            continue;
        };
        mails.push(RawMail {
            uid,
            internal_date: fetch.internal_date().map(|date| date.with_timezone(&Utc)),
            rfc822: body.to_vec(),
        });
    }
    debug!("imap fetched {} of {} matching messages", mails.len(), uids.len());
    Ok(mails)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn record(sender: &str, subject: &str) -> NotificationRecord {
        NotificationRecord {
            id: "1".to_string(),
            sender: sender.to_string(),
            subject: subject.to_string(),
            received_at: Utc.with_ymd_and_hms(2026, 10, 19, 0, 0, 0).unwrap(),
            body_text: String::new(),
            body_html: String::new(),
        }
    }

    #[test]
    fn query_quotes_filter_values() {
        let filter = MailFilter::new("no-reply@itemku.com", "Say \"hi\"");
        assert_eq!(
            filter.imap_query(),
            "UNSEEN FROM \"no-reply@itemku.com\" SUBJECT \"Say \\\"hi\\\"\""
        );
    }

    #[test]
    fn matches_requires_exact_subject() {
        let filter = MailFilter::new("no-reply@itemku.com", "Dagangan Kamu Dibeli!");

        assert!(filter.matches(&record("No-Reply@Itemku.com", "Dagangan Kamu Dibeli!")));
        assert!(!filter.matches(&record(
            "no-reply@itemku.com",
            "Re: Dagangan Kamu Dibeli!"
        )));
        assert!(!filter.matches(&record(
            "not-no-reply@itemku.com",
            "Dagangan Kamu Dibeli!"
        )));
    }

    #[test]
    fn imap_config_debug_hides_password() {
        let config = ImapConfig {
            host: "imap.example.com".to_string(),
            port: 993,
            username: "shop@example.com".to_string(),
            password: "hunter2".to_string(),
            folder: "INBOX".to_string(),
        };
        let rendered = format!("{:?}", config);
        assert!(!rendered.contains("hunter2"));
        assert!(rendered.contains("shop@example.com"));
    }
}
