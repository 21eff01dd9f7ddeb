//! # Home Directory
//!
//! Everything the node reads at startup lives under one home directory
//! (`$HOME/.cometbft/` unless overridden):
//!
//! ```text
//! <home>/
//! ├── config/
//! │   ├── config.toml              settings document
//! │   ├── priv_validator_key.json  validator key material
//! │   └── node_key.json            node identity
//! ├── data/
//! │   └── priv_validator_state.json
//! └── kvstore/                     durable application store
//! ```
//!
//! Only the keys this application consumes are modelled; unknown keys in
//! `config.toml` are ignored so a full engine config file can be shared.

use std::fs;
use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::abci::net::ListenAddr;
use crate::config::{CONFIG_FILE, DEFAULT_HOME_DIR_NAME, STORE_DIR_NAME};

// ---------------------------------------------------------------------------
// Error Type
// ---------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("no home directory given and $HOME is not set")]
    NoHome,

    #[error("required file {} is missing", .0.display())]
    Missing(PathBuf),

    #[error("failed to read {}: {source}", .path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("failed to parse {}: {source}", .path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("failed to parse key file {}: {source}", .path.display())]
    KeyFile {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("invalid setting `{key}`: {reason}")]
    Invalid { key: &'static str, reason: String },
}

// ---------------------------------------------------------------------------
// Home
// ---------------------------------------------------------------------------

/// A resolved home directory. Path accessors do not touch the filesystem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Home {
    root: PathBuf,
}

impl Home {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Use `explicit` when given, otherwise `$HOME/.cometbft`.
    pub fn resolve(explicit: Option<PathBuf>) -> Result<Self, ConfigError> {
        if let Some(root) = explicit {
            return Ok(Self::new(root));
        }
        match std::env::var_os("HOME") {
            Some(home) if !home.is_empty() => {
                Ok(Self::new(PathBuf::from(home).join(DEFAULT_HOME_DIR_NAME)))
            }
            _ => Err(ConfigError::NoHome),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn config_file(&self) -> PathBuf {
        self.root.join(CONFIG_FILE)
    }

    pub fn store_dir(&self) -> PathBuf {
        self.root.join(STORE_DIR_NAME)
    }

    /// Resolve a settings path: absolute paths are kept, relative ones are
    /// taken relative to the home directory.
    pub fn resolve_path(&self, path: impl AsRef<Path>) -> PathBuf {
        let path = path.as_ref();
        if path.is_absolute() {
            path.to_path_buf()
        } else {
            self.root.join(path)
        }
    }

    /// Load and validate `config/config.toml`.
    ///
    /// With `required == false` a missing file yields the defaults. A file
    /// that exists must always parse and validate.
    pub fn load_settings(&self, required: bool) -> Result<Settings, ConfigError> {
        let path = self.config_file();
        let text = match fs::read_to_string(&path) {
            Ok(text) => text,
            Err(e) if e.kind() == io::ErrorKind::NotFound && !required => {
                debug!(path = %path.display(), "no settings document, using defaults");
                return Ok(Settings::default());
            }
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Err(ConfigError::Missing(path)),
            Err(source) => return Err(ConfigError::Read { path, source }),
        };

        let settings: Settings = toml::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.clone(),
            source,
        })?;
        settings.validate()?;
        debug!(path = %path.display(), moniker = %settings.moniker, "settings loaded");
        Ok(settings)
    }

    /// Load the validator and node key files named by `settings`.
    pub fn load_keys(&self, settings: &Settings) -> Result<KeyMaterial, ConfigError> {
        Ok(KeyMaterial {
            validator: read_json(&self.resolve_path(&settings.priv_validator_key_file))?,
            node: read_json(&self.resolve_path(&settings.node_key_file))?,
        })
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T, ConfigError> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            return Err(ConfigError::Missing(path.to_path_buf()))
        }
        Err(source) => {
            return Err(ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    serde_json::from_slice(&bytes).map_err(|source| ConfigError::KeyFile {
        path: path.to_path_buf(),
        source,
    })
}

// ---------------------------------------------------------------------------
// Settings
// ---------------------------------------------------------------------------

/// The consumed subset of the settings document.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub moniker: String,
    /// Default tracing filter when `RUST_LOG` is unset.
    pub log_level: String,
    /// Address the engine dials to reach the application.
    pub proxy_app: String,
    /// Transport the engine uses for `proxy_app`: `socket` or `grpc`.
    pub abci: String,
    pub priv_validator_key_file: PathBuf,
    pub priv_validator_state_file: PathBuf,
    pub node_key_file: PathBuf,
    pub instrumentation: Instrumentation,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            moniker: "kvchain-node".to_string(),
            log_level: "info".to_string(),
            proxy_app: "tcp://127.0.0.1:26658".to_string(),
            abci: "socket".to_string(),
            priv_validator_key_file: PathBuf::from("config/priv_validator_key.json"),
            priv_validator_state_file: PathBuf::from("data/priv_validator_state.json"),
            node_key_file: PathBuf::from("config/node_key.json"),
            instrumentation: Instrumentation::default(),
        }
    }
}

impl Settings {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.log_level.trim().is_empty() {
            return Err(ConfigError::Invalid {
                key: "log_level",
                reason: "must not be empty".into(),
            });
        }
        if !matches!(self.abci.as_str(), "socket" | "grpc") {
            return Err(ConfigError::Invalid {
                key: "abci",
                reason: format!("expected \"socket\" or \"grpc\", got {:?}", self.abci),
            });
        }
        self.proxy_app
            .parse::<ListenAddr>()
            .map_err(|e| ConfigError::Invalid {
                key: "proxy_app",
                reason: e.to_string(),
            })?;
        if self.instrumentation.prometheus {
            self.instrumentation.listen_addr()?;
        }
        Ok(())
    }
}

/// `[instrumentation]` table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Instrumentation {
    pub prometheus: bool,
    /// `host:port`; an empty host means all interfaces (`":26660"`).
    pub prometheus_listen_addr: String,
}

impl Default for Instrumentation {
    fn default() -> Self {
        Self {
            prometheus: false,
            prometheus_listen_addr: ":26660".to_string(),
        }
    }
}

impl Instrumentation {
    pub fn listen_addr(&self) -> Result<SocketAddr, ConfigError> {
        let raw = self.prometheus_listen_addr.as_str();
        let full = if raw.starts_with(':') {
            format!("0.0.0.0{raw}")
        } else {
            raw.to_string()
        };
        full.parse().map_err(|e: std::net::AddrParseError| ConfigError::Invalid {
            key: "instrumentation.prometheus_listen_addr",
            reason: e.to_string(),
        })
    }
}

// ---------------------------------------------------------------------------
// Key Material
// ---------------------------------------------------------------------------

/// A typed key as written by the engine: `{"type": "...", "value": "<base64>"}`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypedKey {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

/// `priv_validator_key.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PrivValidatorKey {
    pub address: String,
    pub pub_key: TypedKey,
    pub priv_key: TypedKey,
}

/// `node_key.json`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct NodeKey {
    pub priv_key: TypedKey,
}

/// Keys handed to an embedded engine. This crate never signs with them.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyMaterial {
    pub validator: PrivValidatorKey,
    pub node: NodeKey,
}
