use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::watch;
use tokio::task::{self, JoinHandle};
use tokio::time::MissedTickBehavior;
use tracing::{debug, error, info, warn};

use crate::extractor::extract_notification;
use crate::mailbox::Mailbox;
use crate::poller::NotificationPoller;
use crate::render::Renderer;
use crate::workflow::OrderEngine;

/// What one poll cycle did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub paused: bool,
    pub failed: bool,
    pub ingested: usize,
    pub republished: usize,
    pub pruned: usize,
}

/// Runs [`run_poll_cycle`] every `interval` until `shutdown` flips to true.
pub fn spawn_poll_loop<M, R>(
    poller: NotificationPoller<M>,
    engine: Arc<OrderEngine<R>>,
    interval: Duration,
    mut shutdown: watch::Receiver<bool>,
) -> JoinHandle<()>
where
    M: Mailbox + 'static,
    R: Renderer + 'static,
{
    let poller = Arc::new(Mutex::new(poller));
    tokio::spawn(async move {
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
        info!("polling mailbox every {}s", interval.as_secs());

        loop {
            tokio::select! {
                _ = ticker.tick() => {}
                changed = shutdown.changed() => {
                    if changed.is_err() || *shutdown.borrow() {
                        break;
                    }
                    continue;
                }
            }
            let report = run_poll_cycle(&poller, &engine, Utc::now()).await;
            if report.ingested > 0 || report.republished > 0 {
                info!(
                    "poll cycle: {} new order(s), {} prompt(s) re-published",
                    report.ingested, report.republished
                );
            }
        }
        info!("poll loop stopped");
    })
}

/// One cycle: skip when paused, fetch on the blocking pool, ingest every
/// emitted notification, retry unrendered prompts, prune old completions.
pub async fn run_poll_cycle<M, R>(
    poller: &Arc<Mutex<NotificationPoller<M>>>,
    engine: &OrderEngine<R>,
    now: DateTime<Utc>,
) -> CycleReport
where
    M: Mailbox + 'static,
    R: Renderer,
{
    let mut report = CycleReport::default();
    match engine.ledger().process_state() {
        Ok(state) if state.paused => {
            debug!("polling paused; cycle skipped");
            report.paused = true;
            return report;
        }
        Ok(_) => {}
        Err(err) => {
            error!("process state unreadable; cycle skipped: {}", err);
            report.failed = true;
            return report;
        }
    }

    let handle = poller.clone();
    let polled = task::spawn_blocking(move || {
        let mut poller = handle.lock().unwrap_or_else(|poison| poison.into_inner());
        poller.poll_once(now)
    })
    .await;
    let records = match polled {
        Ok(Ok(records)) => records,
        Ok(Err(err)) => {
            error!("poll cycle failed: {}", err);
            report.failed = true;
            Vec::new()
        }
        Err(err) => {
            error!("poll task failed: {}", err);
            report.failed = true;
            Vec::new()
        }
    };

    for record in &records {
        let order = extract_notification(record);
        if order.order_number.is_none() {
            warn!("notification {} has no order number", record.id);
        }
        match engine.ingest(order, now).await {
            Ok(_) => report.ingested += 1,
            Err(err) => warn!("notification {} not ingested: {}", record.id, err),
        }
    }

    report.republished = engine.republish_pending().await;
    report.pruned = engine.prune_completed(now);
    report
}
