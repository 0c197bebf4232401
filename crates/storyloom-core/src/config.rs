//! Configuration loading and validation.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

/// Top-level Storyloom configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backend: Option<BackendConfig>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub session: Option<SessionConfig>,
}

/// Connection settings for the story backend.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct BackendConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub base_url: Option<String>,

    /// WebSocket endpoint; derived from `base_url` when absent.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub ws_url: Option<String>,

    #[serde(default)]
    pub transport: TransportKind,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub api_key_env: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub request_timeout_secs: Option<u64>,

    /// Max silence between stream events before the turn counts as stalled.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub turn_timeout_secs: Option<u64>,
}

/// Which stream framing to use for turn replies.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TransportKind {
    #[default]
    Sse,
    Websocket,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionConfig {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub autosave_interval_secs: Option<u64>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub save_dir: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_node_id: Option<String>,

    #[serde(skip_serializing_if = "Option::is_none")]
    pub start_node_name: Option<String>,
}

pub fn resolve_secret_field(direct: &Option<String>, env_var: &Option<String>) -> Option<String> {
    if let Some(val) = direct {
        if !val.is_empty() {
            return Some(val.clone());
        }
    }
    if let Some(env) = env_var {
        if let Ok(val) = std::env::var(env) {
            if !val.is_empty() {
                return Some(val);
            }
        }
    }
    None
}

/// Substitute `${ENV_VAR}` patterns in a string with their environment variable values.
fn substitute_env_vars(input: &str) -> String {
    let re = regex::Regex::new(r"\$\{([^}]+)\}").unwrap();
    re.replace_all(input, |caps: &regex::Captures| {
        let var_name = &caps[1];
        std::env::var(var_name).unwrap_or_default()
    })
    .into_owned()
}

impl Config {
    /// Load config from a JSON5 file, substituting `${ENV_VAR}` references.
    pub fn load(path: &Path) -> crate::error::Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let raw = std::fs::read_to_string(path).map_err(crate::error::StoryloomError::Io)?;
        let substituted = substitute_env_vars(&raw);

        let config: Config = json5::from_str(&substituted)
            .map_err(|e| crate::error::StoryloomError::Config(e.to_string()))?;

        Ok(config)
    }

    /// Default config file location.
    pub fn config_path() -> PathBuf {
        data_dir().join("config.json")
    }

    pub fn base_url(&self) -> String {
        self.backend
            .as_ref()
            .and_then(|b| b.base_url.clone())
            .unwrap_or_else(|| "http://localhost:8787".to_string())
            .trim_end_matches('/')
            .to_string()
    }

    /// WebSocket endpoint — explicit `ws_url`, else `base_url` with the
    /// scheme swapped and `/stream` appended.
    pub fn ws_url(&self) -> String {
        if let Some(url) = self.backend.as_ref().and_then(|b| b.ws_url.clone()) {
            return url;
        }
        let base = self.base_url();
        let swapped = base
            .replacen("https://", "wss://", 1)
            .replacen("http://", "ws://", 1);
        format!("{swapped}/stream")
    }

    pub fn transport(&self) -> TransportKind {
        self.backend.as_ref().map(|b| b.transport).unwrap_or_default()
    }

    pub fn api_key(&self) -> Option<String> {
        self.backend
            .as_ref()
            .and_then(|b| resolve_secret_field(&b.api_key, &b.api_key_env))
    }

    pub fn request_timeout_secs(&self) -> u64 {
        self.backend
            .as_ref()
            .and_then(|b| b.request_timeout_secs)
            .unwrap_or(30)
    }

    pub fn turn_timeout_secs(&self) -> u64 {
        self.backend
            .as_ref()
            .and_then(|b| b.turn_timeout_secs)
            .unwrap_or(120)
    }

    pub fn autosave_interval_secs(&self) -> u64 {
        self.session
            .as_ref()
            .and_then(|s| s.autosave_interval_secs)
            .unwrap_or(60)
    }

    pub fn save_dir(&self) -> PathBuf {
        self.session
            .as_ref()
            .and_then(|s| s.save_dir.as_ref())
            .map(|d| {
                let expanded = shellexpand::tilde(d);
                PathBuf::from(expanded.as_ref())
            })
            .unwrap_or_else(|| data_dir().join("saves"))
    }

    pub fn start_node(&self) -> (String, String) {
        let id = self
            .session
            .as_ref()
            .and_then(|s| s.start_node_id.clone())
            .unwrap_or_else(|| "start".to_string());
        let name = self
            .session
            .as_ref()
            .and_then(|s| s.start_node_name.clone())
            .unwrap_or_else(|| "Starting Point".to_string());
        (id, name)
    }

    /// Validate config, returning (warnings, errors).
    pub fn validate(&self) -> (Vec<String>, Vec<String>) {
        let mut warnings = Vec::new();
        let mut errors = Vec::new();

        if let Some(backend) = &self.backend {
            if backend.api_key.is_none() && backend.api_key_env.is_none() {
                warnings.push("No backend API key configured".to_string());
            }
            if let Some(url) = &backend.base_url {
                if !url.starts_with("http://") && !url.starts_with("https://") {
                    errors.push(format!("backend.base_url must be http(s): {url}"));
                }
            }
        }
        if self.turn_timeout_secs() == 0 {
            errors.push("backend.turn_timeout_secs cannot be 0".to_string());
        }

        (warnings, errors)
    }

    /// Save config to a file.
    pub fn save(&self, path: &Path) -> anyhow::Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        std::fs::write(path, json)?;
        Ok(())
    }
}

/// Base directory for Storyloom data: `~/.storyloom/`
pub fn data_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".storyloom")
}
