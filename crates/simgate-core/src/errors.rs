/// Typed error hierarchy for gateway message handling.
/// Classifies failures as terminal (connection is rejected and closed)
/// or recoverable (message dropped, connection survives).
#[derive(Clone, Debug, thiserror::Error)]
pub enum GateError {
    // Terminal — rejection path: revoke ticket, purge registry entry, close
    #[error("invalid or expired ticket: {0}")]
    InvalidTicket(String),
    #[error("message from unregistered connection: {0}")]
    UnregisteredConnection(String),

    // Recoverable — notify the client, drop the message
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    #[error("unknown event category: {0}")]
    UnknownCategory(String),
}

impl GateError {
    /// Terminal errors end the connection; recoverable ones only drop the
    /// offending message.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::InvalidTicket(_) | Self::UnregisteredConnection(_))
    }

    /// Short classification string for logging.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::InvalidTicket(_) => "invalid_ticket",
            Self::UnregisteredConnection(_) => "unregistered_connection",
            Self::MalformedMessage(_) => "malformed_message",
            Self::UnknownCategory(_) => "unknown_category",
        }
    }
}
