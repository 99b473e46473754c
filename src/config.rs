use crate::auth::RestorePolicy;
use crate::error::{PipelineError, Result};
use crate::extract::CoercionPolicy;
use log::debug;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::str::FromStr;

const DEFAULT_CONFIG_FILE: &str = "config.json";

pub const ENV_ENVIRONMENT: &str = "PROGRESS_ENV";
pub const ENV_CONFIG: &str = "PROGRESS_CONFIG";
pub const ENV_CLIENT_ID: &str = "PROGRESS_CLIENT_ID";
pub const ENV_CLIENT_SECRET: &str = "PROGRESS_CLIENT_SECRET";
pub const ENV_DEVELOPER_KEY: &str = "PROGRESS_DEVELOPER_KEY";

/// Deployment environment
///
/// Only selects default values; no pipeline logic branches on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Environment {
    #[default]
    Development,
    Production,
}

impl FromStr for Environment {
    type Err = PipelineError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_lowercase().as_str() {
            "development" | "dev" => Ok(Environment::Development),
            "production" | "prod" => Ok(Environment::Production),
            other => Err(PipelineError::Config(format!("unknown environment {:?}", other))),
        }
    }
}

/// OAuth 2.0 provider settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IdentityConfig {
    pub client_id: String,
    #[serde(default)]
    pub client_secret: Option<String>,
    pub auth_uri: String,
    pub token_uri: String,
    pub tokeninfo_uri: String,
    pub revoke_uri: String,
    pub redirect_uri: String,
    pub scopes: Vec<String>,
}

/// Spreadsheet and file-listing API settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApiConfig {
    pub sheets_base: String,
    pub drive_base: String,
    #[serde(default)]
    pub developer_key: Option<String>,
}

/// Legacy HTTP backend settings
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ServerConfig {
    pub bind: String,
    /// Title of the spreadsheet served by `/api/exercises`
    pub document_title: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    pub environment: Environment,
    /// Public base URL of the HTTP backend
    pub backend_base: String,
    pub identity: IdentityConfig,
    pub api: ApiConfig,
    pub server: ServerConfig,
    /// Session file location; the platform config directory when unset
    #[serde(default)]
    pub session_path: Option<PathBuf>,
    #[serde(default)]
    pub restore_policy: RestorePolicy,
    #[serde(default)]
    pub coercion: CoercionPolicy,
}

impl Config {
    /// Built-in configuration for an environment
    ///
    /// # Arguments
    /// * `environment` - Selects the backend base URL and OAuth redirect URI
    ///
    /// # Returns
    /// * `Config` - Defaults with an empty client id, to be filled by the
    ///   config file or `PROGRESS_CLIENT_ID`
    pub fn defaults(environment: Environment) -> Self {
        let (backend_base, bind) = match environment {
            Environment::Development => ("http://localhost:4567", "127.0.0.1:4567"),
            Environment::Production => ("https://progress-api.herokuapp.com", "0.0.0.0:8080"),
        };

        Config {
            environment,
            backend_base: backend_base.to_string(),
            identity: IdentityConfig {
                client_id: String::new(),
                client_secret: None,
                auth_uri: "https://accounts.google.com/o/oauth2/v2/auth".to_string(),
                token_uri: "https://oauth2.googleapis.com/token".to_string(),
                tokeninfo_uri: "https://oauth2.googleapis.com/tokeninfo".to_string(),
                revoke_uri: "https://oauth2.googleapis.com/revoke".to_string(),
                redirect_uri: format!("{}/oauth", backend_base),
                scopes: vec![
                    "https://www.googleapis.com/auth/spreadsheets.readonly".to_string(),
                    "https://www.googleapis.com/auth/drive.metadata.readonly".to_string(),
                ],
            },
            api: ApiConfig {
                sheets_base: "https://sheets.googleapis.com/v4".to_string(),
                drive_base: "https://www.googleapis.com/drive/v3".to_string(),
                developer_key: None,
            },
            server: ServerConfig {
                bind: bind.to_string(),
                document_title: "Exercises".to_string(),
            },
            session_path: None,
            restore_policy: RestorePolicy::default(),
            coercion: CoercionPolicy::default(),
        }
    }

    /// Load configuration from disk and the process environment
    ///
    /// Resolution order for the environment is the explicit argument, then
    /// `PROGRESS_ENV`, then development. The config file is the explicit path,
    /// then `PROGRESS_CONFIG`, then `./config.json` if it exists. File values
    /// are merged over the environment defaults, and the `PROGRESS_*` credential
    /// variables override both.
    ///
    /// # Errors
    /// * `ConfigFailure` if an explicitly named file is missing, or any file
    ///   or variable cannot be parsed
    pub fn load(path: Option<&Path>, environment: Option<Environment>) -> Result<Self> {
        let lookup = |key: &str| std::env::var(key).ok().filter(|v| !v.is_empty());

        let environment = match environment {
            Some(environment) => environment,
            None => match lookup(ENV_ENVIRONMENT) {
                Some(value) => value.parse()?,
                None => Environment::default(),
            },
        };

        let explicit = path
            .map(Path::to_path_buf)
            .or_else(|| lookup(ENV_CONFIG).map(PathBuf::from));
        let file = match explicit {
            Some(path) => Some(read_json(&path)?),
            None => {
                let fallback = Path::new(DEFAULT_CONFIG_FILE);
                if fallback.exists() {
                    Some(read_json(fallback)?)
                } else {
                    None
                }
            }
        };

        let mut config = Self::from_overlay(environment, file)?;
        config.apply_overrides(lookup);
        Ok(config)
    }

    /// Merge a JSON document over the defaults for `environment`
    pub fn from_overlay(environment: Environment, overlay: Option<Value>) -> Result<Self> {
        let mut base = serde_json::to_value(Self::defaults(environment))
            .map_err(|e| PipelineError::Config(e.to_string()))?;
        if let Some(overlay) = overlay {
            merge(&mut base, overlay);
        }
        // The environment that selected the defaults wins over the file.
        base["environment"] = serde_json::to_value(environment)
            .map_err(|e| PipelineError::Config(e.to_string()))?;

        serde_json::from_value(base).map_err(|e| PipelineError::Config(e.to_string()))
    }

    /// Apply `PROGRESS_*` credential overrides from `lookup`
    pub fn apply_overrides(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if let Some(client_id) = lookup(ENV_CLIENT_ID) {
            self.identity.client_id = client_id;
        }
        if let Some(secret) = lookup(ENV_CLIENT_SECRET) {
            self.identity.client_secret = Some(secret);
        }
        if let Some(key) = lookup(ENV_DEVELOPER_KEY) {
            self.api.developer_key = Some(key);
        }
    }

    /// Fails unless an OAuth client id is configured
    pub fn require_client_id(&self) -> Result<&str> {
        if self.identity.client_id.trim().is_empty() {
            return Err(PipelineError::Config(format!(
                "no OAuth client id; set identity.client_id in {} or {}",
                DEFAULT_CONFIG_FILE, ENV_CLIENT_ID
            )));
        }
        Ok(&self.identity.client_id)
    }
}

fn read_json(path: &Path) -> Result<Value> {
    debug!("reading configuration from {}", path.display());
    let contents = std::fs::read_to_string(path)
        .map_err(|e| PipelineError::Config(format!("failed to read {}: {}", path.display(), e)))?;
    serde_json::from_str(&contents)
        .map_err(|e| PipelineError::Config(format!("failed to parse {}: {}", path.display(), e)))
}

// Objects merge key by key; everything else is replaced.
fn merge(base: &mut Value, overlay: Value) {
    match (base, overlay) {
        (Value::Object(base), Value::Object(overlay)) => {
            for (key, value) in overlay {
                match base.get_mut(&key) {
                    Some(slot) => merge(slot, value),
                    None => {
                        base.insert(key, value);
                    }
                }
            }
        }
        (slot, value) => *slot = value,
    }
}
