use thiserror::Error;

/// Wire-boundary parsing failures. All of these are logged and tolerated;
/// none aborts the session.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ProtocolError {
    #[error("status code index {0} outside the 21-entry table")]
    UnknownStatusCode(u16),
    #[error("malformed command id '{0}'")]
    MalformedCommandId(String),
    #[error("unrecognized command payload '{0}'")]
    UnknownCommand(String),
    #[error("unrecognized inbound message '{0}'")]
    UnrecognizedMessage(String),
}
