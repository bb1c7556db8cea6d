use crate::error::RequestError;
use thiserror::Error;

/// Why fetching an instance failed
#[derive(Error, Debug, Clone, PartialEq)]
pub enum FetchError {
    #[error("Instance not found")]
    NotFound,

    #[error("{0}")]
    Failed(String),

    /// Dropped from its queue (eviction or flush) before it was sent
    #[error("Request cancelled before it was sent")]
    Cancelled,
}

impl From<&RequestError> for FetchError {
    fn from(err: &RequestError) -> Self {
        if err.is_not_found() {
            FetchError::NotFound
        } else {
            FetchError::Failed(err.describe())
        }
    }
}

/// Lifecycle of one kind of fetch (full or label)
#[derive(Debug, Clone, Default, PartialEq)]
pub enum FetchState {
    #[default]
    NotFetched,
    Fetching,
    Fetched,
    Error(FetchError),
}

impl FetchState {
    pub fn is_fetching(&self) -> bool {
        matches!(self, FetchState::Fetching)
    }

    pub fn is_fetched(&self) -> bool {
        matches!(self, FetchState::Fetched)
    }

    /// Fetched or failed: requesters waiting on this lifecycle can resume
    pub fn is_terminal(&self) -> bool {
        matches!(self, FetchState::Fetched | FetchState::Error(_))
    }

    pub fn error(&self) -> Option<&FetchError> {
        match self {
            FetchState::Error(e) => Some(e),
            _ => None,
        }
    }

    /// Move to `Fetching` if a request is needed. A forced fetch re-enters
    /// `Fetching` from any terminal state; nothing restarts a running fetch.
    pub(crate) fn begin(&mut self, force: bool) -> bool {
        let start = match self {
            FetchState::Fetching => false,
            FetchState::NotFetched => true,
            FetchState::Fetched | FetchState::Error(_) => force,
        };
        if start {
            *self = FetchState::Fetching;
        }
        start
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_begin_transitions() {
        let mut state = FetchState::default();
        assert!(state.begin(false));
        assert!(state.is_fetching());
        assert!(!state.begin(true));

        state = FetchState::Fetched;
        assert!(!state.begin(false));
        assert!(state.begin(true));

        state = FetchState::Error(FetchError::NotFound);
        assert!(state.is_terminal());
        assert!(state.begin(true));
    }

    #[test]
    fn test_error_classification() {
        assert_eq!(
            FetchError::from(&RequestError::with_status("gone", 404)),
            FetchError::NotFound
        );
        assert_eq!(
            FetchError::from(&RequestError::with_status("boom", 500)),
            FetchError::Failed("boom (500)".into())
        );
    }
}
