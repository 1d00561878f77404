/// Errors a test-run trigger can surface to its HTTP caller.
#[derive(Debug, thiserror::Error)]
pub enum RelayError {
    /// No grading agent is registered for the identity, or its connection
    /// went away while the trigger was waiting on the reply.
    #[error("server is offline")]
    ServerOffline,

    /// Another trigger for the same identity is already awaiting its reply.
    /// Replies carry no correlation id, so overlapping runs cannot be told
    /// apart; the second caller is turned away instead.
    #[error("a test run is already in progress")]
    Busy,

    /// The agent did not reply within the configured window.
    #[error("timed out waiting for the test result")]
    ReplyTimeout,

    /// The agent replied, but the reply was not valid JSON.
    #[error("malformed reply from the grading agent: {0}")]
    MalformedReply(#[from] serde_json::Error),
}

impl RelayError {
    /// Short classification string for logging.
    pub fn error_kind(&self) -> &'static str {
        match self {
            Self::ServerOffline => "server_offline",
            Self::Busy => "busy",
            Self::ReplyTimeout => "reply_timeout",
            Self::MalformedReply(_) => "malformed_reply",
        }
    }
}

/// Transport-level closure, observed at the connection seam.
///
/// Always handled by the task owning the socket; it reaches the HTTP layer
/// only via the `RelayError::ServerOffline` mapping.
#[derive(Clone, Copy, Debug, PartialEq, Eq, thiserror::Error)]
#[error("connection closed")]
pub struct ConnectionClosed;

impl From<ConnectionClosed> for RelayError {
    fn from(_: ConnectionClosed) -> Self {
        Self::ServerOffline
    }
}
