use crate::model::{FailureKind, FetchResult};

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum LocationError {
    #[error("Location permission has not been granted")]
    PermissionDenied,
    #[error("No location provider has a last known fix")]
    NoFix,
}

#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    #[error("Invalid request URL: {0}")]
    InvalidUrl(String),
    #[error("Request failed: {0}")]
    Request(#[from] reqwest::Error),
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum DecodeError {
    #[error("Malformed weather response: {0}")]
    Malformed(String),
    #[error("Weather response is missing field `{0}`")]
    MissingField(String),
}

impl DecodeError {
    pub fn missing(path: &str) -> Self {
        DecodeError::MissingField(path.to_string())
    }
}

/// Anything that ends a fetch cycle after the location step.
#[derive(Debug, thiserror::Error)]
pub enum FetchError {
    #[error("Error getting data: {0}")]
    Transport(#[from] TransportError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
}

impl FetchError {
    pub fn kind(&self) -> FailureKind {
        match self {
            FetchError::Transport(_) => FailureKind::Transport,
            FetchError::Decode(DecodeError::Malformed(_)) => FailureKind::Malformed,
            FetchError::Decode(DecodeError::MissingField(_)) => FailureKind::MissingField,
        }
    }
}

impl From<FetchError> for FetchResult {
    fn from(err: FetchError) -> Self {
        FetchResult::failure(err.kind(), err.to_string())
    }
}
