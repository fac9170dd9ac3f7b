use crate::workflow::{Actor, OrderKey, WorkflowInstance};

pub const MAX_PURGE_COUNT: i64 = 100;

/// Every input the engine accepts, from interactive controls and from
/// administrative commands alike.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    AssignmentChosen {
        key: OrderKey,
        assignee_id: String,
        actor: Actor,
    },
    HoursCommitted {
        key: OrderKey,
        hours_input: String,
        actor: Actor,
    },
    MarkedComplete {
        key: OrderKey,
        actor: Actor,
    },
    AddAdmin {
        id: String,
        display_name: String,
    },
    RemoveAdmin {
        id: String,
    },
    ListAdmins,
    /// Totals for one admin, or for everyone with entries when `None`.
    TotalHours {
        admin_id: Option<String>,
    },
    /// Refreshes one assignee's status, or every known assignee when `None`.
    RefreshStatus {
        admin_id: Option<String>,
    },
    Backup,
    Restore,
    Pause,
    Resume,
    Purge {
        channel_id: u64,
        count: i64,
    },
    Cleanup {
        days: i64,
    },
}

impl Action {
    pub fn name(&self) -> &'static str {
        match self {
            Action::AssignmentChosen { .. } => "assignment_chosen",
            Action::HoursCommitted { .. } => "hours_committed",
            Action::MarkedComplete { .. } => "marked_complete",
            Action::AddAdmin { .. } => "add_admin",
            Action::RemoveAdmin { .. } => "remove_admin",
            Action::ListAdmins => "list_admins",
            Action::TotalHours { .. } => "total_hours",
            Action::RefreshStatus { .. } => "refresh_status",
            Action::Backup => "backup",
            Action::Restore => "restore",
            Action::Pause => "pause",
            Action::Resume => "resume",
            Action::Purge { .. } => "purge",
            Action::Cleanup { .. } => "cleanup",
        }
    }
}

/// Result of a handled action. `notices` lists best-effort side effects that
/// failed after the main change was already applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ActionOutcome {
    pub message: String,
    pub instance: Option<WorkflowInstance>,
    pub notices: Vec<String>,
}

impl ActionOutcome {
    pub fn message(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            instance: None,
            notices: Vec::new(),
        }
    }

    /// The reply shown to the actor, with any notices appended.
    pub fn reply_text(&self) -> String {
        if self.notices.is_empty() {
            return self.message.clone();
        }
        let mut text = self.message.clone();
        for notice in &self.notices {
            text.push_str("\n⚠️ ");
            text.push_str(notice);
        }
        text
    }
}
