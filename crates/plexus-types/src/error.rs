use std::time::Duration;

use thiserror::Error;

use crate::id::ModuleId;
use crate::message::Message;

/// Errors raised by message bus operations.
#[derive(Debug, Clone, Error)]
pub enum BusError {
    /// `pull` timed out with an empty mailbox. Expected in steady state.
    #[error("no message available for '{module}' after {timeout:?}")]
    NoMessageAvailable { module: ModuleId, timeout: Duration },

    /// `push` timed out waiting for the recipient's reply.
    #[error("no response from '{to}' to '{}' after {timeout:?}", .request.name())]
    NoResponse {
        to: ModuleId,
        timeout: Duration,
        request: Box<Message>,
    },

    /// The recipient is unknown (and the host is past bootstrap).
    #[error("module '{0}' is not subscribed to the bus")]
    InvalidModule(ModuleId),

    /// The bus was used before the host signalled it is configured.
    #[error("bus not ready: messages can only be pushed once the host is configured")]
    NotReady,

    /// Unexpected internal fault.
    #[error("bus error: {0}")]
    Internal(String),
}

impl BusError {
    /// Timeout kinds are recoverable; the caller decides whether to retry.
    pub fn is_timeout(&self) -> bool {
        matches!(
            self,
            Self::NoMessageAvailable { .. } | Self::NoResponse { .. }
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::message::Command;

    #[test]
    fn no_response_display_names_command() {
        let err = BusError::NoResponse {
            to: ModuleId::from("audio"),
            timeout: Duration::from_secs(3),
            request: Box::new(Command::new("get_volume", "ui").to("audio").into()),
        };
        let text = err.to_string();
        assert!(text.contains("'audio'"));
        assert!(text.contains("get_volume"));
        assert!(err.is_timeout());
    }

    #[test]
    fn invalid_module_display() {
        let err = BusError::InvalidModule(ModuleId::from("ghost"));
        assert_eq!(err.to_string(), "module 'ghost' is not subscribed to the bus");
        assert!(!err.is_timeout());
    }
}
