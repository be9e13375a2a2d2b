//! User-data document for keel-init.
//!
//! The platform layer (cloud metadata, config ISO, HTTP) locates the raw
//! document; this module only parses it and supplies defaults. Every
//! service declaration reads its settings from here.

use serde::Deserialize;
use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::constants;

/// Parsed user-data document. Immutable once loaded.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct UserData {
    /// Tee service logs to the console in addition to the log files.
    pub debug: bool,
    /// Extra environment passed to every service, serialized KEY=VALUE.
    pub env: BTreeMap<String, String>,
    /// Root directory for per-service log files.
    pub log_path: PathBuf,
    /// UNIX socket of the container-runtime daemon.
    pub crt_socket: PathBuf,
    /// UNIX socket of the machine control-plane API.
    pub machine_socket: PathBuf,
    /// Cluster settings consumed by the node services.
    pub cluster: ClusterConfig,
    /// Container image references for the system services.
    pub images: Images,
}

/// Cluster-facing settings for the node agent and join utility.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ClusterConfig {
    /// API server endpoint, e.g. `https://10.0.0.1:6443`.
    pub endpoint: String,
    /// Bootstrap token in `id.secret` form.
    pub token: String,
    /// Base64 cluster CA certificate.
    pub ca_cert: String,
    /// Kubernetes version tag for the node-agent image.
    pub version: String,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Images {
    pub trustd: String,
    pub netd: String,
    pub kubelet: String,
    pub nodejoin: String,
}

impl Default for UserData {
    fn default() -> Self {
        if std::process::id() == 1 {
            Self {
                debug: false,
                env: BTreeMap::new(),
                log_path: PathBuf::from(constants::DEFAULT_LOG_PATH),
                crt_socket: PathBuf::from(constants::CRT_SOCKET),
                machine_socket: PathBuf::from(constants::MACHINE_SOCKET),
                cluster: ClusterConfig::default(),
                images: Images::default(),
            }
        } else {
            // Running locally for development
            Self {
                debug: true,
                env: BTreeMap::new(),
                log_path: PathBuf::from("/tmp/keel/log"),
                crt_socket: PathBuf::from("/tmp/keel/crt.sock"),
                machine_socket: PathBuf::from("/tmp/keel/machine.sock"),
                cluster: ClusterConfig::default(),
                images: Images::default(),
            }
        }
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            endpoint: String::new(),
            token: String::new(),
            ca_cert: String::new(),
            version: "1.33.0".to_string(),
        }
    }
}

impl Default for Images {
    fn default() -> Self {
        Self {
            trustd: "keel/trustd:latest".to_string(),
            netd: "keel/netd:latest".to_string(),
            kubelet: "keel/kubelet:latest".to_string(),
            nodejoin: "keel/nodejoin:latest".to_string(),
        }
    }
}

impl UserData {
    /// Load user data from a JSON document on disk.
    pub async fn load(path: &Path) -> Result<Self, ConfigError> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .map_err(|source| ConfigError::Read {
                path: path.to_path_buf(),
                source,
            })?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Environment assignments in declaration order.
    pub fn env_vars(&self) -> Vec<String> {
        self.env
            .iter()
            .map(|(k, v)| format!("{k}={v}"))
            .collect()
    }
}

/// Errors loading the user-data document.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to read user data at {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("failed to parse user data at {path}: {source}")]
    Parse {
        path: PathBuf,
        source: serde_json::Error,
    },
}
