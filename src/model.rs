use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Prefix marking a worksheet as internal; such sheets are never extracted
pub const HIDDEN_SHEET_PREFIX: char = '_';

/// Opaque credential proving an authenticated identity to the spreadsheet API
///
/// Validity is defined by the provider. `expires_at` is recorded when the
/// provider reports a lifetime, but nothing in the pipeline trusts it on its own.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionToken {
    /// Bearer token sent with every API call
    pub access_token: String,

    /// Refresh token, when the provider issued one
    #[serde(default)]
    pub refresh_token: Option<String>,

    /// Expiry reported by the provider at issue time
    #[serde(default)]
    pub expires_at: Option<DateTime<Utc>>,
}

impl SessionToken {
    pub fn new(access_token: impl Into<String>) -> Self {
        SessionToken {
            access_token: access_token.into(),
            refresh_token: None,
            expires_at: None,
        }
    }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires_at.is_some_and(|at| at <= now)
    }
}

// Keep tokens out of logs and panic messages.
impl std::fmt::Debug for SessionToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionToken")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &self.refresh_token.as_ref().map(|_| "<redacted>"))
            .field("expires_at", &self.expires_at)
            .finish()
    }
}

/// A spreadsheet identity as returned by the picker
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Document {
    pub id: String,
    pub title: String,
}

/// One worksheet's raw grid, row-major
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Sheet {
    pub title: String,
    pub rows: Vec<Vec<String>>,
}

impl Sheet {
    pub fn is_hidden(&self) -> bool {
        is_hidden_title(&self.title)
    }
}

pub fn is_hidden_title(title: &str) -> bool {
    title.starts_with(HIDDEN_SHEET_PREFIX)
}

/// Title and worksheet titles of a spreadsheet, in document order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpreadsheetMetadata {
    pub title: String,
    pub sheet_titles: Vec<String>,
}

/// One row of a visible sheet
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Movement {
    pub name: String,
    pub sets: u32,
    pub reps: u32,
    /// Kept verbatim, e.g. "100kg" or "bodyweight"
    pub load: String,
    pub rest: u32,
    pub progression_rate: u32,
}

/// A visible sheet's movements under the sheet's title
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exercise {
    pub name: String,
    pub movements: Vec<Movement>,
}

/// The full extracted domain model for one document
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WorkoutProgram {
    pub document_title: String,
    pub exercises: Vec<Exercise>,
}
