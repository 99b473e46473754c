use crate::error::{PipelineError, Result};
use crate::model::SessionToken;
use log::debug;
use serde_json::{Map, Value};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};
use tempfile::NamedTempFile;

/// Fixed key the token is stored under
pub const SESSION_KEY: &str = "session_token";

/// Durable single-value persistence for the session token
///
/// There is exactly one caller at a time, so implementations only need
/// single-key atomicity.
pub trait SessionStore: Send + Sync {
    /// Read the stored token
    ///
    /// # Returns
    /// * `Result<Option<SessionToken>>` - The token, `None` if nothing is stored
    ///
    /// # Errors
    /// * `PersistenceFailure` if the store exists but cannot be read or parsed
    fn get(&self) -> Result<Option<SessionToken>>;

    /// Replace the stored token
    ///
    /// # Arguments
    /// * `token` - The token to persist; overwrites any previous value
    fn set(&self, token: &SessionToken) -> Result<()>;

    /// Clear the stored token; succeeds when nothing is stored
    fn remove(&self) -> Result<()>;
}

/// Token store backed by a JSON file
///
/// The file is a JSON object holding the token under [`SESSION_KEY`].
/// Writes go to a temporary file in the same directory that is then renamed
/// over the target, so a reader never sees a half-written token.
#[derive(Debug, Clone)]
pub struct FileSessionStore {
    path: PathBuf,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        FileSessionStore { path: path.into() }
    }

    /// Store at `<config dir>/progress/session.json`
    ///
    /// # Returns
    /// * `Option<Self>` - `None` if the platform has no config directory
    pub fn default_location() -> Option<Self> {
        default_session_path().map(Self::new)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn read_document(&self) -> Result<Option<Map<String, Value>>> {
        let contents = match std::fs::read_to_string(&self.path) {
            Ok(contents) => contents,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => {
                return Err(PipelineError::Persistence(format!(
                    "failed to read {}: {}",
                    self.path.display(),
                    e
                )));
            }
        };

        if contents.trim().is_empty() {
            return Ok(None);
        }

        serde_json::from_str(&contents).map(Some).map_err(|e| {
            PipelineError::Persistence(format!("failed to parse {}: {}", self.path.display(), e))
        })
    }

    fn write_document(&self, document: &Map<String, Value>) -> Result<()> {
        let parent = match self.path.parent() {
            Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
            _ => PathBuf::from("."),
        };
        std::fs::create_dir_all(&parent).map_err(|e| {
            PipelineError::Persistence(format!("failed to create {}: {}", parent.display(), e))
        })?;

        let contents = serde_json::to_string_pretty(document)
            .map_err(|e| PipelineError::Persistence(format!("failed to serialize token: {}", e)))?;

        // NamedTempFile is created 0600 on Unix, and the mode survives the rename.
        let mut file = NamedTempFile::new_in(&parent)
            .map_err(|e| PipelineError::Persistence(format!("failed to create temp file: {}", e)))?;
        file.write_all(contents.as_bytes())
            .and_then(|_| file.as_file().sync_all())
            .map_err(|e| PipelineError::Persistence(format!("failed to write token: {}", e)))?;
        file.persist(&self.path).map_err(|e| {
            PipelineError::Persistence(format!(
                "failed to replace {}: {}",
                self.path.display(),
                e.error
            ))
        })?;

        Ok(())
    }
}

impl SessionStore for FileSessionStore {
    fn get(&self) -> Result<Option<SessionToken>> {
        let Some(mut document) = self.read_document()? else {
            return Ok(None);
        };
        match document.remove(SESSION_KEY) {
            None | Some(Value::Null) => Ok(None),
            Some(value) => serde_json::from_value(value).map(Some).map_err(|e| {
                PipelineError::Persistence(format!("stored token is malformed: {}", e))
            }),
        }
    }

    fn set(&self, token: &SessionToken) -> Result<()> {
        let value = serde_json::to_value(token)
            .map_err(|e| PipelineError::Persistence(format!("failed to serialize token: {}", e)))?;
        let mut document = Map::new();
        document.insert(SESSION_KEY.to_string(), value);
        self.write_document(&document)?;
        debug!("session token written to {}", self.path.display());
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!("session token removed from {}", self.path.display());
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(PipelineError::Persistence(format!(
                "failed to delete {}: {}",
                self.path.display(),
                e
            ))),
        }
    }
}

/// In-process token store
///
/// Still serializes the token so values go through the same JSON round trip
/// as the file store.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    slot: Mutex<Option<String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_token(token: &SessionToken) -> Result<Self> {
        let store = Self::new();
        store.set(token)?;
        Ok(store)
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self) -> Result<Option<SessionToken>> {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match slot.as_deref() {
            None => Ok(None),
            Some(json) => serde_json::from_str(json).map(Some).map_err(|e| {
                PipelineError::Persistence(format!("stored token is malformed: {}", e))
            }),
        }
    }

    fn set(&self, token: &SessionToken) -> Result<()> {
        let json = serde_json::to_string(token)
            .map_err(|e| PipelineError::Persistence(format!("failed to serialize token: {}", e)))?;
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(json);
        Ok(())
    }

    fn remove(&self) -> Result<()> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}

/// Returns the default path of the session file
pub fn default_session_path() -> Option<PathBuf> {
    dirs::config_dir().map(|c| c.join("progress/session.json"))
}
