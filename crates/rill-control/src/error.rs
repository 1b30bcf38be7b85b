use rill_proto::ProtoError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The client shut down (or failed to connect) before the request
    /// could be accepted.
    #[error("control plane client is not ready")]
    NotReady,

    #[error("unary request timed out")]
    Timeout,

    /// Error message carried on the stream by the architect.
    #[error("remote error: {message}")]
    Remote { message: String },

    /// The bidirectional stream broke underneath us.
    #[error("control plane transport failed")]
    Transport,

    #[error("client is shutting down")]
    Shutdown,

    #[error("protocol error: {0}")]
    Protocol(#[from] ProtoError),

    #[error("failed to connect to architect: {0}")]
    Connect(String),
}
