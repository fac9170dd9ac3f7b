use std::fmt;

use chrono::{DateTime, Duration, Utc};
use ledger_module::{Admin, Entry};
use serde::{Deserialize, Serialize};

use crate::extractor::Order;
use crate::render::MessageRef;
use crate::workflow::WorkflowError;

pub const MIN_HOURS: u32 = 1;
pub const MAX_HOURS: u32 = 24;

/// Addresses one workflow instance; the id of the notification it came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct OrderKey(String);

impl OrderKey {
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for OrderKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum WorkflowState {
    Detected,
    Assigned,
    Committed,
    Completed,
}

impl WorkflowState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkflowState::Detected => "detected",
            WorkflowState::Assigned => "assigned",
            WorkflowState::Committed => "committed",
            WorkflowState::Completed => "completed",
        }
    }
}

impl fmt::Display for WorkflowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Someone who can take an order: a registered admin or a fallback label.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Assignee {
    pub id: String,
    pub display_name: String,
}

impl Assignee {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

impl From<Admin> for Assignee {
    fn from(admin: Admin) -> Self {
        Self {
            id: admin.id,
            display_name: admin.display_name,
        }
    }
}

/// Who triggered an interaction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub display_name: String,
}

impl Actor {
    pub fn new(id: impl Into<String>, display_name: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            display_name: display_name.into(),
        }
    }
}

/// One order moving through Detected -> Assigned -> Committed -> Completed.
///
/// `assignee` is set from Assigned onwards; `committed_hours`,
/// `commit_started_at` and `expected_completion_at` from Committed onwards.
/// The transition methods below are the only code that changes `state`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkflowInstance {
    pub key: OrderKey,
    pub order: Order,
    pub state: WorkflowState,
    pub assignee: Option<Assignee>,
    pub committed_hours: Option<u32>,
    pub commit_started_at: Option<DateTime<Utc>>,
    pub expected_completion_at: Option<DateTime<Utc>>,
    pub detected_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub completed_by: Option<String>,
    pub prompt: Option<MessageRef>,
    pub work_prompt: Option<MessageRef>,
}

impl WorkflowInstance {
    pub fn detected(order: Order, now: DateTime<Utc>) -> Self {
        Self {
            key: OrderKey::new(order.source_notification_id.clone()),
            order,
            state: WorkflowState::Detected,
            assignee: None,
            committed_hours: None,
            commit_started_at: None,
            expected_completion_at: None,
            detected_at: now,
            completed_at: None,
            completed_by: None,
            prompt: None,
            work_prompt: None,
        }
    }

    pub fn assignee_id(&self) -> Option<&str> {
        self.assignee.as_ref().map(|assignee| assignee.id.as_str())
    }

    pub fn order_label(&self) -> &str {
        self.order.display_number()
    }

    pub fn assign(&mut self, assignee: Assignee) -> Result<(), WorkflowError> {
        match self.state {
            WorkflowState::Detected => {
                self.state = WorkflowState::Assigned;
                self.assignee = Some(assignee);
                Ok(())
            }
            WorkflowState::Completed => Err(self.already_completed()),
            _ => Err(WorkflowError::Conflict(format!(
                "Order {} is already assigned to {}.",
                self.order_label(),
                self.assignee
                    .as_ref()
                    .map(|assignee| assignee.display_name.as_str())
                    .unwrap_or("someone else")
            ))),
        }
    }

    /// `hours` must already be validated with [`parse_hours`].
    pub fn commit_hours(&mut self, hours: u32, now: DateTime<Utc>) -> Result<(), WorkflowError> {
        match self.state {
            WorkflowState::Assigned => {
                self.state = WorkflowState::Committed;
                self.committed_hours = Some(hours);
                self.commit_started_at = Some(now);
                self.expected_completion_at = Some(now + Duration::hours(i64::from(hours)));
                Ok(())
            }
            WorkflowState::Detected => Err(WorkflowError::Conflict(format!(
                "Order {} has not been assigned yet.",
                self.order_label()
            ))),
            WorkflowState::Committed => Err(WorkflowError::Conflict(format!(
                "Order {} already has {} hour(s) committed.",
                self.order_label(),
                self.committed_hours.unwrap_or_default()
            ))),
            WorkflowState::Completed => Err(self.already_completed()),
        }
    }

    /// Moves to Completed and returns the ledger entry that records the work.
    pub fn complete(&mut self, actor_id: &str, now: DateTime<Utc>) -> Result<Entry, WorkflowError> {
        let (assignee, hours) = match (self.state, &self.assignee, self.committed_hours) {
            (WorkflowState::Committed, Some(assignee), Some(hours)) => (assignee.clone(), hours),
            (WorkflowState::Completed, _, _) => return Err(self.already_completed()),
            (state, _, _) => {
                return Err(WorkflowError::Conflict(format!(
                    "Order {} is {} and cannot be completed before hours are committed.",
                    self.order_label(),
                    state
                )))
            }
        };

        self.state = WorkflowState::Completed;
        self.completed_at = Some(now);
        self.completed_by = Some(actor_id.to_string());
        Ok(Entry {
            admin_id: assignee.id,
            order_number: self.order.order_number.clone(),
            hours,
            timestamp: now,
            completed_by_id: actor_id.to_string(),
        })
    }

    fn already_completed(&self) -> WorkflowError {
        WorkflowError::Conflict(format!(
            "Order {} is already completed.",
            self.order_label()
        ))
    }
}

/// Accepts only a plain integer in `MIN_HOURS..=MAX_HOURS`.
pub fn parse_hours(input: &str) -> Result<u32, WorkflowError> {
    let trimmed = input.trim();
    let invalid = || {
        WorkflowError::Validation(format!(
            "Hours must be a whole number between {} and {}.",
            MIN_HOURS, MAX_HOURS
        ))
    };
    if trimmed.is_empty() || !trimmed.chars().all(|c| c.is_ascii_digit()) {
        return Err(invalid());
    }
    let hours: u32 = trimmed.parse().map_err(|_| invalid())?;
    if !(MIN_HOURS..=MAX_HOURS).contains(&hours) {
        return Err(invalid());
    }
    Ok(hours)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn instance() -> WorkflowInstance {
        let order = Order {
            order_number: Some("OD1".to_string()),
            source_notification_id: "9".to_string(),
            ..Order::default()
        };
        WorkflowInstance::detected(order, Utc::now())
    }

    #[test]
    fn parse_hours_bounds() {
        assert_eq!(parse_hours("1").expect("1"), 1);
        assert_eq!(parse_hours(" 24 ").expect("24"), 24);
        for input in ["0", "25", "30", "-3", "+3", "2.5", "abc", "", "99999999999"] {
            assert!(
                matches!(parse_hours(input), Err(WorkflowError::Validation(_))),
                "{:?} should be rejected",
                input
            );
        }
    }

    #[test]
    fn transitions_are_monotonic() {
        let now = Utc.with_ymd_and_hms(2026, 10, 19, 8, 0, 0).unwrap();
        let mut instance = instance();

        assert!(matches!(
            instance.commit_hours(3, now),
            Err(WorkflowError::Conflict(_))
        ));
        instance.assign(Assignee::new("admin1", "admin1")).expect("assign");
        assert!(matches!(
            instance.assign(Assignee::new("admin2", "admin2")),
            Err(WorkflowError::Conflict(_))
        ));
        assert!(matches!(
            instance.complete("42", now),
            Err(WorkflowError::Conflict(_))
        ));

        instance.commit_hours(3, now).expect("commit");
        assert_eq!(instance.expected_completion_at, Some(now + Duration::hours(3)));

        let entry = instance.complete("42", now).expect("complete");
        assert_eq!(entry.admin_id, "admin1");
        assert_eq!(entry.hours, 3);
        assert_eq!(entry.order_number.as_deref(), Some("OD1"));
        assert_eq!(instance.state, WorkflowState::Completed);

        let err = instance.complete("42", now).expect_err("second completion");
        assert_eq!(err.user_message(), "Order OD1 is already completed.");
    }
}
