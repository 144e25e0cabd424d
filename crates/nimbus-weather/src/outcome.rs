//! Per-flow result published to observers.

use crate::error::FailureReason;

/// State of one request flow.
///
/// `Idle -> Pending -> {Success, Failed}`; any new request moves back to `Pending`.
#[derive(Debug, Clone, PartialEq)]
pub enum RequestOutcome<T> {
    /// No request issued yet
    Idle,
    Pending,
    Success(T),
    Failed(FailureReason),
}

impl<T> Default for RequestOutcome<T> {
    fn default() -> Self {
        RequestOutcome::Idle
    }
}

impl<T> RequestOutcome<T> {
    pub fn is_pending(&self) -> bool {
        matches!(self, RequestOutcome::Pending)
    }

    pub fn is_success(&self) -> bool {
        matches!(self, RequestOutcome::Success(_))
    }

    pub fn success(&self) -> Option<&T> {
        match self {
            RequestOutcome::Success(value) => Some(value),
            _ => None,
        }
    }

    pub fn failure(&self) -> Option<&FailureReason> {
        match self {
            RequestOutcome::Failed(reason) => Some(reason),
            _ => None,
        }
    }

    pub fn map<U, F: FnOnce(T) -> U>(self, f: F) -> RequestOutcome<U> {
        match self {
            RequestOutcome::Idle => RequestOutcome::Idle,
            RequestOutcome::Pending => RequestOutcome::Pending,
            RequestOutcome::Success(value) => RequestOutcome::Success(f(value)),
            RequestOutcome::Failed(reason) => RequestOutcome::Failed(reason),
        }
    }
}

impl<T, E: Into<FailureReason>> From<Result<T, E>> for RequestOutcome<T> {
    fn from(result: Result<T, E>) -> Self {
        match result {
            Ok(value) => RequestOutcome::Success(value),
            Err(e) => RequestOutcome::Failed(e.into()),
        }
    }
}
