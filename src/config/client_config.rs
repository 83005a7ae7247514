use std::fs;
use std::path::Path;
use std::time::Duration;

use anyhow::{Context, Result};
use log::{debug, info};
use serde::{Deserialize, Serialize};

use crate::config::endpoint::{AuthMethod, Endpoint};
use crate::config::env_vars::expand_local_path;
use crate::constants::{
    DEFAULT_CHUNK_SIZE_KB, ENV_HOST, ENV_KEY, ENV_PASSWORD, ENV_PORT, ENV_USER, MAX_CHUNK_SIZE_KB,
};
use crate::scp::{PushOptions, Terminator, WriteErrorPolicy};

/// Transfer tunables as they appear in the config file
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    #[serde(default)]
    pub terminator: Terminator,
    #[serde(default)]
    pub write_errors: WriteErrorPolicy,
    #[serde(default = "default_chunk_size_kb")]
    pub chunk_size_kb: usize,
    #[serde(default)]
    pub timeout_secs: Option<u64>,
}

fn default_chunk_size_kb() -> usize {
    DEFAULT_CHUNK_SIZE_KB
}

impl Default for TransferConfig {
    fn default() -> Self {
        Self {
            terminator: Terminator::default(),
            write_errors: WriteErrorPolicy::default(),
            chunk_size_kb: DEFAULT_CHUNK_SIZE_KB,
            timeout_secs: None,
        }
    }
}

impl TransferConfig {
    /// Engine options. The chunk size is clamped to 1KB..=16MB.
    pub fn push_options(&self) -> PushOptions {
        PushOptions {
            terminator: self.terminator,
            write_errors: self.write_errors,
            chunk_size: self.chunk_size_kb.clamp(1, MAX_CHUNK_SIZE_KB) * 1024,
            timeout: self.timeout_secs.map(Duration::from_secs),
        }
    }
}

/// Complete client configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    pub endpoint: Endpoint,
    #[serde(default)]
    pub transfer: TransferConfig,
}

impl ClientConfig {
    /// Load configuration from a YAML file
    pub fn from_yaml_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .context(format!("Failed to read config file: {}", path.display()))?;

        let mut config: ClientConfig =
            serde_yaml::from_str(&content).context("Failed to parse YAML config")?;
        config.expand_key_path();

        debug!("Loaded configuration from {}", path.display());
        Ok(config)
    }

    /// Save configuration to a YAML file
    pub fn save_to_yaml_file(&self, path: &Path) -> Result<()> {
        let yaml = serde_yaml::to_string(self).context("Failed to serialize config to YAML")?;

        fs::write(path, yaml).context(format!("Failed to write config to {}", path.display()))?;

        info!("Saved configuration to {}", path.display());
        Ok(())
    }

    /// Sample configuration written by `init-config`
    pub fn sample() -> Self {
        Self {
            endpoint: Endpoint::new(
                "files.example.com",
                22,
                "deploy",
                AuthMethod::PrivateKey {
                    path: "~/.ssh/id_ed25519".into(),
                    passphrase: None,
                },
            ),
            transfer: TransferConfig::default(),
        }
    }

    /// Apply `SCP_PUSH_*` environment overrides
    pub fn apply_env_overrides(&mut self) -> Result<()> {
        if let Ok(host) = std::env::var(ENV_HOST) {
            self.endpoint.host = host;
        }
        if let Ok(port) = std::env::var(ENV_PORT) {
            self.endpoint.port = port
                .parse()
                .context(format!("Invalid {}: {}", ENV_PORT, port))?;
        }
        if let Ok(user) = std::env::var(ENV_USER) {
            self.endpoint.username = user;
        }
        if let Ok(key) = std::env::var(ENV_KEY) {
            self.endpoint.auth = AuthMethod::PrivateKey {
                path: key.into(),
                passphrase: None,
            };
        }
        if let Ok(password) = std::env::var(ENV_PASSWORD) {
            self.endpoint.auth = AuthMethod::Password { password };
        }

        self.expand_key_path();
        Ok(())
    }

    fn expand_key_path(&mut self) {
        if let AuthMethod::PrivateKey { path, .. } = &mut self.endpoint.auth {
            *path = expand_local_path(&path.to_string_lossy());
        }
    }
}
