use thiserror::Error;

#[derive(Error, Debug)]
pub enum BridgeError {
    #[error("Bridge capability not available: {0}")]
    NotAvailable(String),

    /// Failure that may succeed on a later attempt (rate limiting, 5xx, network, timeouts)
    #[error("Transient failure during {operation}: {message}")]
    Transient { operation: String, message: String },

    /// Request refused by the remote service (validation, auth, malformed ids)
    #[error("Request rejected (status {status}): {message}")]
    Rejected { status: u16, message: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl BridgeError {
    /// Build a transient error for the given operation
    pub fn transient(operation: impl Into<String>, message: impl Into<String>) -> Self {
        Self::Transient {
            operation: operation.into(),
            message: message.into(),
        }
    }

    /// Build a rejection with an HTTP-like status code
    pub fn rejected(status: u16, message: impl Into<String>) -> Self {
        Self::Rejected {
            status,
            message: message.into(),
        }
    }

    /// Classify an HTTP status code the way the DAM service reports failures.
    ///
    /// 408, 429 and 5xx are transient, everything else is a rejection.
    pub fn from_status(operation: &str, status: u16, message: impl Into<String>) -> Self {
        if status == 408 || status == 429 || (500..600).contains(&status) {
            Self::transient(operation, format!("status {}: {}", status, message.into()))
        } else {
            Self::rejected(status, message)
        }
    }

    /// Whether retrying the same call can reasonably succeed
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::Transient { .. })
    }
}

pub type Result<T> = std::result::Result<T, BridgeError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_status_classification() {
        assert!(BridgeError::from_status("assets-create", 429, "slow down").is_transient());
        assert!(BridgeError::from_status("assets-create", 503, "unavailable").is_transient());
        assert!(BridgeError::from_status("assets-create", 408, "timeout").is_transient());
        assert!(!BridgeError::from_status("assets-create", 400, "bad storage id").is_transient());
        assert!(!BridgeError::from_status("assets-create", 401, "unauthorized").is_transient());
    }

    #[test]
    fn test_error_display() {
        let error = BridgeError::rejected(422, "malformed storage id");
        assert_eq!(
            error.to_string(),
            "Request rejected (status 422): malformed storage id"
        );

        let error = BridgeError::transient("collections-create", "connection reset");
        assert_eq!(
            error.to_string(),
            "Transient failure during collections-create: connection reset"
        );
    }

    #[test]
    fn test_io_is_not_transient() {
        let error: BridgeError = std::io::Error::new(std::io::ErrorKind::Other, "disk").into();
        assert!(!error.is_transient());
    }
}
