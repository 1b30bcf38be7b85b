use serde::{Deserialize, Serialize};

/// Outcome of a channel or edge operation.
///
/// The numeric codes are stable and cross the process boundary when a
/// status is logged or carried on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Status {
    /// Operation completed and the value was transferred.
    Success,
    /// The other half released its connection; no further transfers.
    Closed,
    /// An awaited deadline elapsed before the operation completed.
    Timeout,
    /// The operation was cancelled or failed downstream.
    Error,
}

impl Status {
    /// Stable numeric code for logging and wire propagation.
    pub fn code(self) -> u8 {
        match self {
            Self::Success => 0,
            Self::Closed => 1,
            Self::Timeout => 2,
            Self::Error => 3,
        }
    }

    pub fn is_success(self) -> bool {
        matches!(self, Self::Success)
    }
}

#[cfg(test)]
mod tests {
    use super::Status;

    #[test]
    fn status_codes_are_stable() {
        assert_eq!(Status::Success.code(), 0);
        assert_eq!(Status::Closed.code(), 1);
        assert_eq!(Status::Timeout.code(), 2);
        assert_eq!(Status::Error.code(), 3);
    }
}
