use thiserror::Error;

/// Errors raised while building or mutating the edge graph. These are
/// programming errors: they surface synchronously from the builder and
/// are fatal for the offending operation.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum FlowError {
    #[error("edge type mismatch: producer emits {produced}, consumer expects {expected}")]
    TypeMismatch {
        produced: &'static str,
        expected: &'static str,
    },
    #[error("endpoint is already connected")]
    AlreadyConnected,
    #[error("endpoints expose no compatible capability pair")]
    Incompatible,
    #[error("no route registered for key '{key}'")]
    UnknownKey { key: String },
}
