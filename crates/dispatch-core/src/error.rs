use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCode {
    /// Malformed input: blank notes, non-positive quantities, bad coordinates.
    Validation,
    /// A mutually exclusive resource (a unit's single active assignment) is held.
    Conflict,
    /// The lifecycle state does not admit the operation.
    InvalidState,
    /// Data used for the decision may no longer match the authoritative source.
    StaleData,
    NotFound,
    Upstream,
}

/// What a caller can sensibly do after a failure of a given kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Remedy {
    FixInput,
    RefreshAndReconsider,
    NotCurrentlyPossible,
}

impl ErrorCode {
    pub fn remedy(self) -> Remedy {
        match self {
            Self::Validation => Remedy::FixInput,
            Self::Conflict | Self::StaleData | Self::NotFound | Self::Upstream => {
                Remedy::RefreshAndReconsider
            }
            Self::InvalidState => Remedy::NotCurrentlyPossible,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Validation => "validation",
            Self::Conflict => "conflict",
            Self::InvalidState => "invalid_state",
            Self::StaleData => "stale_data",
            Self::NotFound => "not_found",
            Self::Upstream => "upstream",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error, Serialize, Deserialize)]
#[error("{code:?}: {message}")]
pub struct DispatchError {
    pub code: ErrorCode,
    pub message: String,
}

impl DispatchError {
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Validation, message)
    }

    pub fn conflict(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::Conflict, message)
    }

    pub fn invalid_state(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::InvalidState, message)
    }

    pub fn stale(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::StaleData, message)
    }

    pub fn not_found(message: impl Into<String>) -> Self {
        Self::new(ErrorCode::NotFound, message)
    }

    pub fn remedy(&self) -> Remedy {
        self.code.remedy()
    }
}

impl From<dispatch_geo::InvalidCoordinate> for DispatchError {
    fn from(value: dispatch_geo::InvalidCoordinate) -> Self {
        Self::validation(value.to_string())
    }
}

pub type DispatchResult<T> = Result<T, DispatchError>;
