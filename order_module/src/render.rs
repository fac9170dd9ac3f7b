//! Rendering seam between the workflow core and the chat transport.

use async_trait::async_trait;
use chrono::{DateTime, FixedOffset, Utc};
use ledger_module::Entry;
use serde::{Deserialize, Serialize};

use crate::reconciler::StatusView;
use crate::workflow::{Assignee, WorkflowInstance};

/// Location of a rendered message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct MessageRef {
    pub channel_id: u64,
    pub message_id: u64,
}

/// Day-first local time as shown to the shop staff, e.g. `19/10/2026 16:15`.
pub fn format_local(at: DateTime<Utc>, offset: FixedOffset) -> String {
    at.with_timezone(&offset).format("%d/%m/%Y %H:%M").to_string()
}

#[derive(Debug, thiserror::Error)]
pub enum RenderError {
    #[error("discord error: {0}")]
    Discord(#[from] serenity::Error),
    #[error("channel unavailable: {0}")]
    ChannelUnavailable(String),
    #[error("rendering rejected: {0}")]
    Rejected(String),
}

/// Everything the workflow asks of the chat side. Implementations must be
/// safe to call concurrently for different orders.
#[async_trait]
pub trait Renderer: Send + Sync {
    /// Human-readable name of the assignee's work channel.
    fn channel_label(&self, assignee: &Assignee) -> String;

    /// Posts the order with an assignee selector to the shared orders channel.
    async fn publish_assignment_prompt(
        &self,
        instance: &WorkflowInstance,
        options: &[Assignee],
    ) -> Result<MessageRef, RenderError>;

    /// Replaces the selector on the original prompt with the chosen assignee.
    async fn mark_assigned(
        &self,
        prompt: MessageRef,
        instance: &WorkflowInstance,
    ) -> Result<(), RenderError>;

    /// Posts the work prompt (hours and complete controls) to the assignee's
    /// private channel, creating the channel when it does not exist.
    async fn publish_work_prompt(
        &self,
        instance: &WorkflowInstance,
        assignee: &Assignee,
    ) -> Result<MessageRef, RenderError>;

    async fn update_work_prompt(
        &self,
        prompt: MessageRef,
        instance: &WorkflowInstance,
    ) -> Result<(), RenderError>;

    async fn remove_work_prompt(&self, prompt: MessageRef) -> Result<(), RenderError>;

    /// Adds a completed order to the assignee's daily summary.
    async fn append_summary(
        &self,
        instance: &WorkflowInstance,
        entry: &Entry,
    ) -> Result<(), RenderError>;

    /// Open work prompts currently visible in the assignee's channel. A
    /// missing channel counts as zero.
    async fn count_open_orders(&self, assignee: &Assignee) -> Result<usize, RenderError>;

    async fn publish_status(
        &self,
        assignee: &Assignee,
        view: &StatusView,
    ) -> Result<(), RenderError>;

    /// Deletes up to `count` recent messages in a channel; returns how many went.
    async fn purge_messages(&self, channel_id: u64, count: u8) -> Result<usize, RenderError>;
}
