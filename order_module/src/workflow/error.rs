use ledger_module::LedgerError;

use crate::render::RenderError;

#[derive(Debug, thiserror::Error)]
pub enum WorkflowError {
    #[error("validation failed: {0}")]
    Validation(String),
    #[error("conflict: {0}")]
    Conflict(String),
    #[error("unknown order {0}")]
    UnknownOrder(String),
    #[error("ledger error: {0}")]
    Persistence(#[from] LedgerError),
    #[error("render error: {0}")]
    Transport(#[from] RenderError),
}

impl WorkflowError {
    /// Text shown to the person whose action failed.
    pub fn user_message(&self) -> String {
        match self {
            WorkflowError::Validation(message) | WorkflowError::Conflict(message) => {
                message.clone()
            }
            WorkflowError::UnknownOrder(key) => {
                format!("Order {} is no longer tracked by the bot.", key)
            }
            WorkflowError::Persistence(_) => {
                "The ledger could not be updated. Nothing was changed; please try again."
                    .to_string()
            }
            WorkflowError::Transport(_) => {
                "Discord could not be updated. Nothing was changed; please try again.".to_string()
            }
        }
    }

    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            WorkflowError::Persistence(_) | WorkflowError::Transport(_)
        )
    }
}
