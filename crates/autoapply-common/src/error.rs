/// Errors raised by a browser automation backend.
#[derive(thiserror::Error, Debug, Clone)]
pub enum BackendError {
    // ============================================================
    // Navigation Errors
    // ============================================================
    #[error("Navigation failed: {0}")]
    Navigation(String),

    // ============================================================
    // Context Errors
    // ============================================================
    #[error("Tab {0} not found")]
    TabNotFound(String),

    #[error("Frame {0} not found")]
    FrameNotFound(String),

    #[error("Element handle {handle} not found")]
    ElementNotFound { handle: u32 },

    // ============================================================
    // Execution Errors
    // ============================================================
    #[error("Script execution error: {0}")]
    ScriptError(String),

    #[error("Timeout: {operation}")]
    TimeoutWithContext { operation: String },

    #[error("Timeout")]
    Timeout,

    #[error("Agent error [{code}]: {message}")]
    Agent { code: String, message: String },

    #[error("Unexpected agent response: expected {expected}")]
    UnexpectedResponse { expected: &'static str },

    // ============================================================
    // System Errors
    // ============================================================
    #[error("Connection lost")]
    ConnectionLost,

    #[error("Not ready")]
    NotReady,

    #[error("IO error: {0}")]
    Io(String),

    #[error("Serialization error: {0}")]
    Serialization(String),

    #[error("Other: {0}")]
    Other(String),

    #[error("Not supported: {0}")]
    NotSupported(String),
}

impl From<std::io::Error> for BackendError {
    fn from(err: std::io::Error) -> Self {
        BackendError::Io(err.to_string())
    }
}

impl From<serde_json::Error> for BackendError {
    fn from(err: serde_json::Error) -> Self {
        BackendError::Serialization(err.to_string())
    }
}

impl BackendError {
    /// Stable error code, used in log entries and failure reasons.
    pub fn code(&self) -> &'static str {
        match self {
            BackendError::Navigation(_) => "NAVIGATION_ERROR",
            BackendError::TabNotFound(_) => "TAB_NOT_FOUND",
            BackendError::FrameNotFound(_) => "FRAME_NOT_FOUND",
            BackendError::ElementNotFound { .. } => "ELEMENT_NOT_FOUND",
            BackendError::ScriptError(_) => "SCRIPT_ERROR",
            BackendError::TimeoutWithContext { .. } | BackendError::Timeout => "TIMEOUT",
            BackendError::Agent { .. } => "AGENT_ERROR",
            BackendError::UnexpectedResponse { .. } => "UNEXPECTED_RESPONSE",
            BackendError::ConnectionLost => "CONNECTION_LOST",
            BackendError::NotReady => "NOT_READY",
            BackendError::Io(_) => "IO_ERROR",
            BackendError::Serialization(_) => "SERIALIZATION_ERROR",
            BackendError::Other(_) => "INTERNAL_ERROR",
            BackendError::NotSupported(_) => "NOT_SUPPORTED",
        }
    }

    /// Whether the browser resource itself is gone. Such errors end the
    /// session instead of failing a single job.
    pub fn is_fatal(&self) -> bool {
        matches!(self, BackendError::ConnectionLost | BackendError::NotReady)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn timeout_variants_share_code() {
        assert_eq!(BackendError::Timeout.code(), "TIMEOUT");
        assert_eq!(
            BackendError::TimeoutWithContext {
                operation: "navigate".into()
            }
            .code(),
            "TIMEOUT"
        );
    }

    #[test]
    fn only_resource_loss_is_fatal() {
        assert!(BackendError::ConnectionLost.is_fatal());
        assert!(BackendError::NotReady.is_fatal());
        assert!(!BackendError::Navigation("net::ERR".into()).is_fatal());
        assert!(!BackendError::Timeout.is_fatal());
    }
}
