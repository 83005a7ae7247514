use std::fmt;
use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::constants::{DEFAULT_CONNECTION_TIMEOUT_SECS, DEFAULT_SSH_PORT};

/// How to authenticate against the SSH server
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(tag = "method", rename_all = "snake_case")]
pub enum AuthMethod {
    /// Keys offered by a running ssh-agent
    #[default]
    Agent,
    Password { password: String },
    PrivateKey {
        path: PathBuf,
        #[serde(default)]
        passphrase: Option<String>,
    },
}

// Secrets never reach log output
impl fmt::Debug for AuthMethod {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthMethod::Agent => f.write_str("Agent"),
            AuthMethod::Password { .. } => f
                .debug_struct("Password")
                .field("password", &"<REDACTED>")
                .finish(),
            AuthMethod::PrivateKey { path, passphrase } => f
                .debug_struct("PrivateKey")
                .field("path", path)
                .field("passphrase", &passphrase.as_ref().map(|_| "<REDACTED>"))
                .finish(),
        }
    }
}

/// Remote host plus everything needed to authenticate against it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Endpoint {
    pub host: String,
    #[serde(default = "default_port")]
    pub port: u16,
    pub username: String,
    #[serde(default)]
    pub auth: AuthMethod,
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,
    /// Timeout for individual blocking SSH calls; unset means wait forever
    #[serde(default)]
    pub io_timeout_secs: Option<u64>,
}

fn default_port() -> u16 {
    DEFAULT_SSH_PORT
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECTION_TIMEOUT_SECS
}

impl Default for Endpoint {
    fn default() -> Self {
        Self {
            host: String::new(),
            port: DEFAULT_SSH_PORT,
            username: String::new(),
            auth: AuthMethod::default(),
            connect_timeout_secs: DEFAULT_CONNECTION_TIMEOUT_SECS,
            io_timeout_secs: None,
        }
    }
}

impl Endpoint {
    pub fn new(host: &str, port: u16, username: &str, auth: AuthMethod) -> Self {
        Self {
            host: host.to_string(),
            port,
            username: username.to_string(),
            auth,
            ..Default::default()
        }
    }

    /// `host:port`, bracketing IPv6 literals
    pub fn address(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Connect timeout, never shorter than one second
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_secs.max(1))
    }
}
