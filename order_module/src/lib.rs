pub mod adapters;
pub mod discord_gateway;
pub mod extractor;
pub mod mailbox;
pub mod notification;
pub mod poller;
pub mod reconciler;
pub mod render;
pub mod service;
pub mod workflow;

pub use extractor::{extract, extract_notification, Order};
pub use mailbox::{ImapConfig, ImapMailbox, MailFilter, Mailbox, MailboxError, RawMail};
pub use notification::{NotificationError, NotificationRecord};
pub use poller::{NotificationPoller, PollerError, SeenIds};
pub use reconciler::{ReconcileError, StatusReconciler, StatusView};
pub use render::{MessageRef, RenderError, Renderer};
pub use workflow::{
    Action, ActionOutcome, Actor, Assignee, EngineConfig, OrderEngine, OrderKey, WorkflowError,
    WorkflowInstance, WorkflowState,
};
