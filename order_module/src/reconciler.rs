use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Utc};
use ledger_module::{LedgerError, LedgerStore};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::render::{RenderError, Renderer};
use crate::workflow::Assignee;

/// Per-assignee status. `active_order_count` is observed from the assignee's
/// channel and may lag the workflow; `total_hours` comes from the ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusView {
    pub assignee_id: String,
    pub assignee_name: String,
    pub channel_label: String,
    pub active_order_count: usize,
    pub total_hours: u64,
    pub last_updated_at: DateTime<Utc>,
}

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error("ledger error: {0}")]
    Ledger(#[from] LedgerError),
    #[error("transport error: {0}")]
    Transport(#[from] RenderError),
}

pub struct StatusReconciler<R> {
    ledger: Arc<LedgerStore>,
    renderer: Arc<R>,
    views: Mutex<HashMap<String, StatusView>>,
}

impl<R: Renderer> StatusReconciler<R> {
    pub fn new(ledger: Arc<LedgerStore>, renderer: Arc<R>) -> Self {
        Self {
            ledger,
            renderer,
            views: Mutex::new(HashMap::new()),
        }
    }

    /// Recomputes and publishes the view. On any failure the previously
    /// published view stays current and the error is returned.
    pub async fn refresh(
        &self,
        assignee: &Assignee,
        now: DateTime<Utc>,
    ) -> Result<StatusView, ReconcileError> {
        let result = self.compute_and_publish(assignee, now).await;
        match result {
            Ok(view) => {
                self.views
                    .lock()
                    .unwrap_or_else(|poison| poison.into_inner())
                    .insert(assignee.id.clone(), view.clone());
                debug!(
                    "status for {}: {} open, {}h",
                    assignee.id, view.active_order_count, view.total_hours
                );
                Ok(view)
            }
            Err(err) => {
                warn!("status refresh for {} failed, keeping last view: {}", assignee.id, err);
                Err(err)
            }
        }
    }

    pub fn last_view(&self, assignee_id: &str) -> Option<StatusView> {
        self.views
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
            .get(assignee_id)
            .cloned()
    }

    async fn compute_and_publish(
        &self,
        assignee: &Assignee,
        now: DateTime<Utc>,
    ) -> Result<StatusView, ReconcileError> {
        let total_hours = self.ledger.total_hours(&assignee.id)?;
        let active_order_count = self.renderer.count_open_orders(assignee).await?;
        let view = StatusView {
            assignee_id: assignee.id.clone(),
            assignee_name: assignee.display_name.clone(),
            channel_label: self.renderer.channel_label(assignee),
            active_order_count,
            total_hours,
            last_updated_at: now,
        };
        self.renderer.publish_status(assignee, &view).await?;
        Ok(view)
    }
}
