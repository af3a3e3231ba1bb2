use crate::record::Transport;

#[derive(Debug, thiserror::Error)]
pub enum DiscoveryError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("{transport} permission denied")]
    PermissionDenied { transport: Transport },

    #[error("{transport} unavailable: {reason}")]
    Unavailable { transport: Transport, reason: String },

    #[error("Configuration error: {0}")]
    Configuration(String),
}

impl DiscoveryError {
    /// True for conditions the presentation layer renders as a state
    /// rather than a failure (missing radio, denied permission).
    pub fn is_user_visible_state(&self) -> bool {
        matches!(
            self,
            DiscoveryError::PermissionDenied { .. } | DiscoveryError::Unavailable { .. }
        )
    }
}
