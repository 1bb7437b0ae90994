use serde::Serialize;
use thiserror::Error;

/// Content of the record emitted when the user aborts a generation.
pub const STOPPED_MESSAGE: &str = "Generation stopped by user.";

/// Lifecycle state carried by each [`OutputRecord`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum RecordStatus {
    /// More output may follow.
    Pending,
    Done,
    Error,
    Stopped,
}

impl RecordStatus {
    /// DONE, ERROR and STOPPED end a request; nothing follows them.
    pub fn is_terminal(self) -> bool {
        !matches!(self, RecordStatus::Pending)
    }
}

/// One increment of model output: a token fragment, an error message or a
/// terminal marker.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct OutputRecord {
    pub id: Option<String>,
    pub content: String,
    pub status: RecordStatus,
}

impl OutputRecord {
    pub fn pending(content: impl Into<String>) -> Self {
        Self {
            id: None,
            content: content.into(),
            status: RecordStatus::Pending,
        }
    }

    pub fn done(content: impl Into<String>) -> Self {
        Self {
            id: None,
            content: content.into(),
            status: RecordStatus::Done,
        }
    }

    pub fn with_id(mut self, id: Option<String>) -> Self {
        self.id = id;
        self
    }
}

/// Ways a single request can fail. Every failure is terminal for its request
/// and surfaces exactly once as an [`OutputRecord`].
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum Failure {
    /// Connection-level failure reported by the HTTP layer.
    #[error("{0}")]
    Transport(String),

    /// The server answered with an `error` object.
    #[error("{0}")]
    Api(String),

    #[error("Generation stopped by user.")]
    UserStopped,
}

impl From<Failure> for OutputRecord {
    fn from(failure: Failure) -> Self {
        let status = match failure {
            Failure::UserStopped => RecordStatus::Stopped,
            Failure::Transport(_) | Failure::Api(_) => RecordStatus::Error,
        };
        OutputRecord {
            id: None,
            content: failure.to_string(),
            status,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_terminal_statuses() {
        assert!(!RecordStatus::Pending.is_terminal());
        assert!(RecordStatus::Done.is_terminal());
        assert!(RecordStatus::Error.is_terminal());
        assert!(RecordStatus::Stopped.is_terminal());
    }

    #[test]
    fn test_user_stopped_uses_fixed_message() {
        let record = OutputRecord::from(Failure::UserStopped);
        assert_eq!(record.status, RecordStatus::Stopped);
        assert_eq!(record.content, STOPPED_MESSAGE);
        assert_eq!(record.id, None);
    }

    #[test]
    fn test_transport_and_api_failures_are_errors() {
        let transport = OutputRecord::from(Failure::Transport("connection refused".to_string()));
        assert_eq!(transport.status, RecordStatus::Error);
        assert_eq!(transport.content, "connection refused");

        let api = OutputRecord::from(Failure::Api("Insufficient Balance".to_string()));
        assert_eq!(api.status, RecordStatus::Error);
        assert_eq!(api.content, "Insufficient Balance");
    }

    #[test]
    fn test_status_serializes_lowercase() {
        let record = OutputRecord::done("hi").with_id(Some("abc".to_string()));
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["status"], "done");
        assert_eq!(json["id"], "abc");
    }
}
