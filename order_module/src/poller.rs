use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use tracing::{debug, info, warn};

use crate::mailbox::{MailFilter, Mailbox, MailboxError};
use crate::notification::NotificationRecord;

#[derive(Debug, thiserror::Error)]
pub enum PollerError {
    #[error("mailbox error: {0}")]
    Mailbox(#[from] MailboxError),
}

/// Ids already consumed, each kept until its `received_at` leaves the
/// recency window. An evicted id that shows up again is stale by then, so the
/// recency filter still drops it.
#[derive(Debug, Clone)]
pub struct SeenIds {
    window: Duration,
    ids: HashMap<String, DateTime<Utc>>,
}

impl SeenIds {
    pub fn new(window: Duration) -> Self {
        Self {
            window,
            ids: HashMap::new(),
        }
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains_key(id)
    }

    pub fn insert(&mut self, id: impl Into<String>, received_at: DateTime<Utc>) {
        self.ids.insert(id.into(), received_at);
    }

    pub fn evict_expired(&mut self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.window;
        let before = self.ids.len();
        self.ids.retain(|_, received_at| *received_at >= cutoff);
        before - self.ids.len()
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}

/// Pulls unread notifications and emits each new, recent one exactly once.
pub struct NotificationPoller<M> {
    mailbox: M,
    filter: MailFilter,
    recency_window: Duration,
    seen: SeenIds,
}

impl<M: Mailbox> NotificationPoller<M> {
    pub fn new(mailbox: M, filter: MailFilter, recency_window: Duration) -> Self {
        Self {
            mailbox,
            filter,
            recency_window,
            seen: SeenIds::new(recency_window),
        }
    }

    pub fn seen(&self) -> &SeenIds {
        &self.seen
    }

    pub fn filter(&self) -> &MailFilter {
        &self.filter
    }

    /// One poll cycle. A transport error abandons the cycle; nothing is
    /// recorded as seen for it and the next call retries.
    pub fn poll_once(
        &mut self,
        now: DateTime<Utc>,
    ) -> Result<Vec<NotificationRecord>, PollerError> {
        let evicted = self.seen.evict_expired(now);
        if evicted > 0 {
            debug!("evicted {} expired notification ids", evicted);
        }

        let fetched = self.mailbox.fetch_unseen(&self.filter)?;
        let mut emitted = Vec::new();
        for raw in fetched {
            let id = raw.uid.to_string();
            if self.seen.contains(&id) {
                debug!("notification {} already seen", id);
                continue;
            }

            let record =
                match NotificationRecord::from_rfc822(&id, &raw.rfc822, raw.internal_date) {
                    Ok(record) => record,
                    Err(err) => {
                        warn!("notification {} dropped: {}", id, err);
                        self.seen.insert(id, now);
                        continue;
                    }
                };
            self.seen.insert(id.clone(), record.received_at);

            if !self.filter.matches(&record) {
                info!(
                    "notification {} skipped: from={} subject={:?} is not an exact match",
                    id, record.sender, record.subject
                );
                continue;
            }
            if now - record.received_at > self.recency_window {
                info!(
                    "notification {} received at {} is older than {}h; consumed without emitting",
                    id,
                    record.received_at,
                    self.recency_window.num_hours()
                );
                continue;
            }

            info!("new notification {} ({})", id, record.subject);
            emitted.push(record);
        }
        Ok(emitted)
    }
}
