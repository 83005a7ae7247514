//! Remote-shell transport contract used by the push engine.
//!
//! The engine only needs four capabilities from a transport: dial a host,
//! open a session, expose the stdin of a remote command, and report when
//! that command exits. They are expressed as traits so the engine can run
//! over real SSH or over an in-memory loopback.
//!
//! ```text
//! Transport ──dial──▶ Connection ──new_session──▶ RemoteSession
//!                                                   │ input_stream()
//!                                                   │ start(cmd)
//!                                                   ▼
//!                                               Completion ──wait──▶ exit status
//! ```
//!
//! ## Implementations
//!
//! - [`ssh`]: libssh2 via the `ssh2` crate
//! - [`memory`]: recording loopback for tests

use std::fmt;

use anyhow::Result;
use async_trait::async_trait;
use tokio::io::AsyncWrite;

use crate::config::Endpoint;

/// libssh2-backed transport
pub mod ssh;

/// In-memory recording transport
pub mod memory;

/// Dials connections to an [`Endpoint`].
#[async_trait]
pub trait Transport: Send + Sync {
    type Connection: Connection;

    /// Establish an authenticated connection. Single attempt, no retry.
    async fn dial(&self, endpoint: &Endpoint) -> Result<Self::Connection>;
}

/// A live, authenticated connection.
#[async_trait]
pub trait Connection: Send + Sync + 'static {
    type Session: RemoteSession;

    /// Open a fresh session for one remote command.
    async fn new_session(&self) -> Result<Self::Session>;

    /// Release the connection. Sessions derived from it become unusable.
    async fn close(self) -> Result<()>;
}

/// One remote command execution context. Consumed by [`RemoteSession::start`].
#[async_trait]
pub trait RemoteSession: Send + 'static {
    type Input: AsyncWrite + Unpin + Send + 'static;
    type Completion: Completion;

    /// Writable pipe feeding the command's stdin. Shutting it down signals EOF.
    async fn input_stream(&mut self) -> Result<Self::Input>;

    /// Start `command` on the remote shell.
    async fn start(self, command: &str) -> Result<Self::Completion>;
}

/// Terminal status of a started command.
#[async_trait]
pub trait Completion: Send + 'static {
    /// Block until the command exits. Non-zero exit is reported as [`RemoteExit`].
    async fn wait(self) -> Result<()>;
}

/// Non-zero exit of the remote command, or death by signal
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteExit {
    /// Exit status. Not meaningful when `signal` is set.
    pub status: i32,
    /// Signal name (`KILL`, `PIPE`, ...) when the command was killed
    pub signal: Option<String>,
    /// Text the receiver printed on its warning/error lines, if any
    pub message: Option<String>,
}

impl fmt::Display for RemoteExit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.signal {
            Some(signal) => write!(f, "Remote command killed by signal {}", signal)?,
            None => write!(f, "Remote command exited with status {}", self.status)?,
        }
        if let Some(message) = &self.message {
            write!(f, ": {}", message)?;
        }
        Ok(())
    }
}

impl std::error::Error for RemoteExit {}
