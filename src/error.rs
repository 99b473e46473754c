use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Closed set of failure tags carried by a pipeline outcome
///
/// The presentation boundary matches on this tag to decide what to show.
/// A deliberate dismissal is not an error and has no kind here; it is
/// reported as `Outcome::Cancelled` instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ErrorKind {
    /// Identity handshake failed or was cancelled by the user
    AuthFailure,

    /// An operation needed a session and there was none
    NotAuthenticated,

    /// The document selection surface failed to load
    PickerFailure,

    /// Metadata or batched range read failed
    FetchFailure,

    /// The token store could not be read or written
    PersistenceFailure,

    /// A grid cell was rejected by a strict coercion policy
    ValidationFailure,

    /// Configuration could not be loaded
    ConfigFailure,
}

/// Error type shared by every pipeline component
#[derive(Debug, Error)]
pub enum PipelineError {
    #[error("sign-in failed: {0}")]
    Auth(String),

    #[error("not signed in")]
    NotAuthenticated,

    #[error("document picker failed: {0}")]
    Picker(String),

    #[error("could not read spreadsheet: {0}")]
    Fetch(String),

    #[error("session storage failed: {0}")]
    Persistence(String),

    #[error("invalid value in sheet {sheet:?}, row {row}, column {column}: {value:?}")]
    Validation {
        sheet: String,
        row: usize,
        column: &'static str,
        value: String,
    },

    #[error("configuration error: {0}")]
    Config(String),
}

impl PipelineError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            PipelineError::Auth(_) => ErrorKind::AuthFailure,
            PipelineError::NotAuthenticated => ErrorKind::NotAuthenticated,
            PipelineError::Picker(_) => ErrorKind::PickerFailure,
            PipelineError::Fetch(_) => ErrorKind::FetchFailure,
            PipelineError::Persistence(_) => ErrorKind::PersistenceFailure,
            PipelineError::Validation { .. } => ErrorKind::ValidationFailure,
            PipelineError::Config(_) => ErrorKind::ConfigFailure,
        }
    }
}

pub type Result<T> = std::result::Result<T, PipelineError>;
