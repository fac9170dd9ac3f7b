use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use chrono::{DateTime, Duration, FixedOffset, Offset, Utc};
use ledger_module::{AdminChange, LedgerStore};
use tokio::sync::Mutex as AsyncMutex;
use tracing::{debug, info, warn};

use crate::extractor::Order;
use crate::reconciler::StatusReconciler;
use crate::render::{format_local, Renderer};
use crate::workflow::action::{Action, ActionOutcome, MAX_PURGE_COUNT};
use crate::workflow::{
    parse_hours, Actor, Assignee, OrderKey, WorkflowError, WorkflowInstance, WorkflowState,
};

type Slot = Arc<AsyncMutex<WorkflowInstance>>;

#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Offered in the assignment selector while no admins are registered.
    pub fallback_assignees: Vec<Assignee>,
    /// How long completed instances are kept to answer late duplicate clicks.
    pub completed_retention: Duration,
    pub display_offset: FixedOffset,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            fallback_assignees: (1..=3)
                .map(|n| Assignee::new(format!("admin{}", n), format!("admin{}", n)))
                .collect(),
            completed_retention: Duration::hours(24),
            display_offset: FixedOffset::east_opt(7 * 3600).unwrap_or(Utc.fix()),
        }
    }
}

/// Owns every live [`WorkflowInstance`] and applies [`Action`]s to them.
///
/// Each instance sits behind its own async mutex, held for the whole
/// transition including its side effects, so two actions on one order are
/// serialized while different orders proceed in parallel. The instance map
/// lock is only held to look up or insert slots, never across an await.
pub struct OrderEngine<R> {
    ledger: Arc<LedgerStore>,
    renderer: Arc<R>,
    reconciler: StatusReconciler<R>,
    config: EngineConfig,
    instances: Mutex<HashMap<OrderKey, Slot>>,
}

impl<R: Renderer> OrderEngine<R> {
    pub fn new(ledger: Arc<LedgerStore>, renderer: Arc<R>, config: EngineConfig) -> Self {
        Self {
            reconciler: StatusReconciler::new(ledger.clone(), renderer.clone()),
            ledger,
            renderer,
            config,
            instances: Mutex::new(HashMap::new()),
        }
    }

    pub fn ledger(&self) -> &Arc<LedgerStore> {
        &self.ledger
    }

    pub fn reconciler(&self) -> &StatusReconciler<R> {
        &self.reconciler
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Registered admins, or the configured fallback list when there are none.
    pub fn assignee_options(&self) -> Result<Vec<Assignee>, WorkflowError> {
        let admins = self.ledger.admins()?;
        if admins.is_empty() {
            return Ok(self.config.fallback_assignees.clone());
        }
        Ok(admins.into_iter().map(Assignee::from).collect())
    }

    pub fn instance_count(&self) -> usize {
        self.lock_instances().len()
    }

    pub async fn snapshot(&self, key: &OrderKey) -> Option<WorkflowInstance> {
        let slot = self.lock_instances().get(key).cloned()?;
        let instance = slot.lock().await;
        Some(instance.clone())
    }

    /// Starts tracking a new order in `Detected` and renders its assignment
    /// prompt. The instance is kept even when rendering fails;
    /// [`OrderEngine::republish_pending`] retries it later.
    pub async fn ingest(
        &self,
        order: Order,
        now: DateTime<Utc>,
    ) -> Result<WorkflowInstance, WorkflowError> {
        let slot: Slot = Arc::new(AsyncMutex::new(WorkflowInstance::detected(order, now)));
        let mut instance = slot.lock().await;
        {
            let mut instances = self.lock_instances();
            if instances.contains_key(&instance.key) {
                return Err(WorkflowError::Conflict(format!(
                    "Order {} is already being tracked.",
                    instance.order_label()
                )));
            }
            instances.insert(instance.key.clone(), slot.clone());
        }
        info!(
            "order {} detected (notification {})",
            instance.order_label(),
            instance.key
        );

        self.publish_prompt(&mut instance).await;
        Ok(instance.clone())
    }

    /// Retries assignment prompts that never rendered. Returns how many
    /// were published this time.
    pub async fn republish_pending(&self) -> usize {
        let mut published = 0;
        for slot in self.slots() {
            let mut instance = slot.lock().await;
            if instance.state == WorkflowState::Detected
                && instance.prompt.is_none()
                && self.publish_prompt(&mut instance).await
            {
                published += 1;
            }
        }
        published
    }

    /// Drops completed instances older than the retention window. Instances
    /// busy with an action are left for the next pass.
    pub fn prune_completed(&self, now: DateTime<Utc>) -> usize {
        let cutoff = now - self.config.completed_retention;
        let mut instances = self.lock_instances();
        let before = instances.len();
        instances.retain(|_, slot| match slot.try_lock() {
            Ok(instance) => !matches!(
                (instance.state, instance.completed_at),
                (WorkflowState::Completed, Some(completed_at)) if completed_at < cutoff
            ),
            Err(_) => true,
        });
        let pruned = before - instances.len();
        if pruned > 0 {
            debug!("pruned {} completed orders", pruned);
        }
        pruned
    }

    pub async fn handle(&self, action: Action) -> Result<ActionOutcome, WorkflowError> {
        self.handle_at(action, Utc::now()).await
    }

    pub async fn handle_at(
        &self,
        action: Action,
        now: DateTime<Utc>,
    ) -> Result<ActionOutcome, WorkflowError> {
        let name = action.name();
        let result = match action {
            Action::AssignmentChosen {
                key,
                assignee_id,
                actor,
            } => self.assign(&key, &assignee_id, &actor, now).await,
            Action::HoursCommitted {
                key,
                hours_input,
                actor,
            } => self.commit(&key, &hours_input, &actor, now).await,
            Action::MarkedComplete { key, actor } => self.complete(&key, &actor, now).await,
            Action::AddAdmin { id, display_name } => self.add_admin(&id, &display_name),
            Action::RemoveAdmin { id } => self.remove_admin(&id),
            Action::ListAdmins => self.list_admins(),
            Action::TotalHours { admin_id } => self.total_hours(admin_id.as_deref()),
            Action::RefreshStatus { admin_id } => {
                self.refresh_all(admin_id.as_deref(), now).await
            }
            Action::Backup => self.backup(now),
            Action::Restore => self.restore(),
            Action::Pause => self.set_paused(true),
            Action::Resume => self.set_paused(false),
            Action::Purge { channel_id, count } => self.purge(channel_id, count).await,
            Action::Cleanup { days } => self.cleanup(days, now),
        };

        match &result {
            Ok(_) => debug!("action {} handled", name),
            Err(err) => info!("action {} rejected: {}", name, err),
        }
        result
    }

    // =========================================================================
    // Order transitions
    // =========================================================================

    async fn assign(
        &self,
        key: &OrderKey,
        assignee_id: &str,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<ActionOutcome, WorkflowError> {
        let slot = self.slot(key)?;
        let mut instance = slot.lock().await;
        let assignee = self.resolve_assignee(assignee_id)?;

        let mut next = instance.clone();
        next.assign(assignee.clone())?;
        let work_prompt = self.renderer.publish_work_prompt(&next, &assignee).await?;
        next.work_prompt = Some(work_prompt);
        *instance = next;
        info!(
            "order {} assigned to {} by {}",
            instance.order_label(),
            assignee.id,
            actor.id
        );

        let mut notices = Vec::new();
        if let Some(prompt) = instance.prompt {
            if let Err(err) = self.renderer.mark_assigned(prompt, &instance).await {
                warn!(
                    "order {}: assignment prompt not updated: {}",
                    instance.order_label(),
                    err
                );
                notices.push("The assignment message could not be updated.".to_string());
            }
        }
        self.refresh_status(&assignee, now, &mut notices).await;

        Ok(ActionOutcome {
            message: format!(
                "Order {} assigned to {}. Work continues in {}.",
                instance.order_label(),
                assignee.display_name,
                self.renderer.channel_label(&assignee)
            ),
            instance: Some(instance.clone()),
            notices,
        })
    }

    async fn commit(
        &self,
        key: &OrderKey,
        hours_input: &str,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<ActionOutcome, WorkflowError> {
        let hours = parse_hours(hours_input)?;
        let slot = self.slot(key)?;
        let mut instance = slot.lock().await;

        let mut next = instance.clone();
        next.commit_hours(hours, now)?;
        *instance = next;
        info!(
            "order {} committed for {}h by {}",
            instance.order_label(),
            hours,
            actor.id
        );

        let mut notices = Vec::new();
        if let Some(prompt) = instance.work_prompt {
            if let Err(err) = self.renderer.update_work_prompt(prompt, &instance).await {
                warn!(
                    "order {}: work prompt not updated: {}",
                    instance.order_label(),
                    err
                );
                notices.push("The order message could not be updated.".to_string());
            }
        }
        if let Some(assignee) = instance.assignee.clone() {
            self.refresh_status(&assignee, now, &mut notices).await;
        }

        let expected = instance
            .expected_completion_at
            .map(|at| format_local(at, self.config.display_offset))
            .unwrap_or_default();
        Ok(ActionOutcome {
            message: format!(
                "Order {}: {} hour(s) committed, expected completion {}.",
                instance.order_label(),
                hours,
                expected
            ),
            instance: Some(instance.clone()),
            notices,
        })
    }

    async fn complete(
        &self,
        key: &OrderKey,
        actor: &Actor,
        now: DateTime<Utc>,
    ) -> Result<ActionOutcome, WorkflowError> {
        let slot = self.slot(key)?;
        let mut instance = slot.lock().await;

        let mut next = instance.clone();
        let entry = next.complete(&actor.id, now)?;
        self.ledger.add_entry(entry.clone())?;
        *instance = next;
        info!(
            "order {} completed by {} ({}h for {})",
            instance.order_label(),
            actor.id,
            entry.hours,
            entry.admin_id
        );

        let mut notices = Vec::new();
        if let Some(prompt) = instance.work_prompt {
            match self.renderer.remove_work_prompt(prompt).await {
                Ok(()) => instance.work_prompt = None,
                Err(err) => {
                    warn!(
                        "order {}: work prompt not removed: {}",
                        instance.order_label(),
                        err
                    );
                    notices.push("The order message could not be removed.".to_string());
                }
            }
        }
        if let Some(assignee) = instance.assignee.clone() {
            self.refresh_status(&assignee, now, &mut notices).await;
        }
        if let Err(err) = self.renderer.append_summary(&instance, &entry).await {
            warn!(
                "order {}: summary not updated: {}",
                instance.order_label(),
                err
            );
            notices.push("The daily summary could not be updated.".to_string());
        }

        Ok(ActionOutcome {
            message: format!(
                "Order {} completed. {} hour(s) recorded.",
                instance.order_label(),
                entry.hours
            ),
            instance: Some(instance.clone()),
            notices,
        })
    }

    // =========================================================================
    // Administrative actions
    // =========================================================================

    fn add_admin(&self, id: &str, display_name: &str) -> Result<ActionOutcome, WorkflowError> {
        let change = self
            .ledger
            .add_admin(ledger_module::Admin::new(id, display_name))
            .map_err(|err| match err {
                ledger_module::LedgerError::InvalidAdmin(message) => {
                    WorkflowError::Validation(message)
                }
                other => WorkflowError::Persistence(other),
            })?;
        let message = match change {
            AdminChange::Added => format!("{} added as admin.", display_name_or(id, display_name)),
            AdminChange::Renamed { previous } => format!(
                "Admin {} renamed from {} to {}.",
                id,
                previous,
                display_name_or(id, display_name)
            ),
            AdminChange::Unchanged => {
                format!("{} is already an admin.", display_name_or(id, display_name))
            }
        };
        Ok(ActionOutcome::message(message))
    }

    fn remove_admin(&self, id: &str) -> Result<ActionOutcome, WorkflowError> {
        let message = match self.ledger.remove_admin(id)? {
            Some(admin) => format!("{} is no longer an admin.", admin.display_name),
            None => format!("{} is not an admin.", id),
        };
        Ok(ActionOutcome::message(message))
    }

    fn list_admins(&self) -> Result<ActionOutcome, WorkflowError> {
        let admins = self.ledger.admins()?;
        if admins.is_empty() {
            return Ok(ActionOutcome::message("No admins registered."));
        }
        let lines: Vec<String> = admins
            .iter()
            .map(|admin| format!("- {} ({})", admin.display_name, admin.id))
            .collect();
        Ok(ActionOutcome::message(format!(
            "Registered admins:\n{}",
            lines.join("\n")
        )))
    }

    fn total_hours(&self, admin_id: Option<&str>) -> Result<ActionOutcome, WorkflowError> {
        let names: HashMap<String, String> = self
            .assignee_options()?
            .into_iter()
            .map(|assignee| (assignee.id, assignee.display_name))
            .collect();
        let name_of = |id: &str| names.get(id).cloned().unwrap_or_else(|| id.to_string());

        if let Some(id) = admin_id {
            let total = self.ledger.total_hours(id)?;
            return Ok(ActionOutcome::message(format!(
                "{} has {} completed hour(s).",
                name_of(id),
                total
            )));
        }

        let totals = self.ledger.totals()?;
        if totals.is_empty() {
            return Ok(ActionOutcome::message("No completed hours recorded yet."));
        }
        let lines: Vec<String> = totals
            .iter()
            .map(|(id, hours)| format!("- {}: {}h", name_of(id), hours))
            .collect();
        Ok(ActionOutcome::message(format!(
            "Completed hours:\n{}",
            lines.join("\n")
        )))
    }

    async fn refresh_all(
        &self,
        admin_id: Option<&str>,
        now: DateTime<Utc>,
    ) -> Result<ActionOutcome, WorkflowError> {
        let targets = match admin_id {
            Some(id) => vec![self.resolve_assignee(id)?],
            None => self.assignee_options()?,
        };

        let mut notices = Vec::new();
        let mut refreshed = 0;
        for assignee in &targets {
            if self.refresh_status(assignee, now, &mut notices).await {
                refreshed += 1;
            }
        }
        Ok(ActionOutcome {
            message: format!(
                "Status refreshed for {} of {} assignee(s).",
                refreshed,
                targets.len()
            ),
            instance: None,
            notices,
        })
    }

    fn backup(&self, now: DateTime<Utc>) -> Result<ActionOutcome, WorkflowError> {
        let set = self.ledger.backup(now)?;
        Ok(ActionOutcome::message(format!(
            "Backup {} created.",
            set.label
        )))
    }

    fn restore(&self) -> Result<ActionOutcome, WorkflowError> {
        let message = match self.ledger.restore_latest()? {
            Some(set) => format!("Ledger restored from backup {}.", set.label),
            None => "No backup found to restore.".to_string(),
        };
        Ok(ActionOutcome::message(message))
    }

    fn set_paused(&self, paused: bool) -> Result<ActionOutcome, WorkflowError> {
        let changed = self.ledger.set_paused(paused)?;
        let message = match (paused, changed) {
            (true, true) => "Order polling paused.",
            (true, false) => "Order polling was already paused.",
            (false, true) => "Order polling resumed.",
            (false, false) => "Order polling is already running.",
        };
        info!("process paused={} (changed={})", paused, changed);
        Ok(ActionOutcome::message(message))
    }

    async fn purge(&self, channel_id: u64, count: i64) -> Result<ActionOutcome, WorkflowError> {
        let count = u8::try_from(count)
            .ok()
            .filter(|count| (1..=MAX_PURGE_COUNT).contains(&i64::from(*count)))
            .ok_or_else(|| {
                WorkflowError::Validation(format!(
                    "Message count must be between 1 and {}.",
                    MAX_PURGE_COUNT
                ))
            })?;
        let deleted = self.renderer.purge_messages(channel_id, count).await?;
        Ok(ActionOutcome::message(format!(
            "Deleted {} message(s).",
            deleted
        )))
    }

    fn cleanup(&self, days: i64, now: DateTime<Utc>) -> Result<ActionOutcome, WorkflowError> {
        if days < 1 {
            return Err(WorkflowError::Validation(
                "Days must be at least 1.".to_string(),
            ));
        }
        let max_age = Duration::try_days(days).ok_or_else(|| {
            WorkflowError::Validation(format!("{} days is out of range.", days))
        })?;
        let removed = self.ledger.cleanup_entries(max_age, now)?;
        Ok(ActionOutcome::message(format!(
            "Removed {} entr{} older than {} day(s).",
            removed,
            if removed == 1 { "y" } else { "ies" },
            days
        )))
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn lock_instances(&self) -> std::sync::MutexGuard<'_, HashMap<OrderKey, Slot>> {
        self.instances
            .lock()
            .unwrap_or_else(|poison| poison.into_inner())
    }

    fn slot(&self, key: &OrderKey) -> Result<Slot, WorkflowError> {
        self.lock_instances()
            .get(key)
            .cloned()
            .ok_or_else(|| WorkflowError::UnknownOrder(key.to_string()))
    }

    fn slots(&self) -> Vec<Slot> {
        self.lock_instances().values().cloned().collect()
    }

    /// Any id goes while no admins are registered; otherwise it must be one.
    fn resolve_assignee(&self, id: &str) -> Result<Assignee, WorkflowError> {
        let id = id.trim();
        if id.is_empty() {
            return Err(WorkflowError::Validation(
                "No assignee was selected.".to_string(),
            ));
        }
        let admins = self.ledger.admins()?;
        if admins.is_empty() {
            let label = self
                .config
                .fallback_assignees
                .iter()
                .find(|fallback| fallback.id == id)
                .map(|fallback| fallback.display_name.clone())
                .unwrap_or_else(|| id.to_string());
            return Ok(Assignee::new(id, label));
        }
        admins
            .into_iter()
            .find(|admin| admin.id == id)
            .map(Assignee::from)
            .ok_or_else(|| WorkflowError::Validation(format!("{} is not a registered admin.", id)))
    }

    /// Returns whether the prompt is now published.
    async fn publish_prompt(&self, instance: &mut WorkflowInstance) -> bool {
        let options = match self.assignee_options() {
            Ok(options) => options,
            Err(err) => {
                warn!(
                    "order {}: assignee list unavailable: {}",
                    instance.order_label(),
                    err
                );
                return false;
            }
        };
        match self
            .renderer
            .publish_assignment_prompt(instance, &options)
            .await
        {
            Ok(prompt) => {
                instance.prompt = Some(prompt);
                true
            }
            Err(err) => {
                warn!(
                    "order {}: assignment prompt not published, will retry: {}",
                    instance.order_label(),
                    err
                );
                false
            }
        }
    }

    async fn refresh_status(
        &self,
        assignee: &Assignee,
        now: DateTime<Utc>,
        notices: &mut Vec<String>,
    ) -> bool {
        match self.reconciler.refresh(assignee, now).await {
            Ok(_) => true,
            Err(err) => {
                notices.push(format!(
                    "Status for {} could not be refreshed: {}",
                    assignee.display_name, err
                ));
                false
            }
        }
    }
}

fn display_name_or<'a>(id: &'a str, display_name: &'a str) -> &'a str {
    match display_name.trim() {
        "" => id,
        name => name,
    }
}
