//! Loopback transport that records everything written to it.
//!
//! Each session plays a cooperative `scp -t` receiver: it swallows whatever
//! is written to its input stream, exits once the stream is closed and
//! reports the exit status chosen by its [`RemoteBehavior`]. All activity is
//! recorded so tests can assert on the exact byte sequence, the command that
//! was started and how often the command was waited on.
//!
//! ```no_run
//! use scp_push::client::Client;
//! use scp_push::config::Endpoint;
//! use scp_push::transport::memory::MemoryTransport;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let transport = MemoryTransport::new();
//! let mut client = Client::with_transport(Endpoint::default(), transport.clone());
//! client.connect().await?;
//! client.copy(&b"hello"[..], "/tmp/out.txt", "0644", 5).await?;
//!
//! let record = transport.last_session().unwrap();
//! assert_eq!(record.written, b"C0644 5 out.txt\nhello\x00\n");
//! # Ok(())
//! # }
//! ```

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::task::{Context, Poll};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::io::AsyncWrite;
use tokio::sync::watch;

use crate::config::Endpoint;
use crate::transport::{Completion, Connection, RemoteExit, RemoteSession, Transport};

/// How the simulated remote side behaves
#[derive(Debug, Clone, Default)]
pub struct RemoteBehavior {
    pub exit_status: i32,
    pub exit_message: Option<String>,
    pub dial_error: Option<String>,
    pub session_error: Option<String>,
    pub input_error: Option<String>,
    pub start_error: Option<String>,
    /// Input bytes accepted before writes fail with `BrokenPipe`
    pub accept_limit: Option<usize>,
    /// Exit without waiting for the input stream to close
    pub exit_early: bool,
    /// Never exit
    pub hang: bool,
}

impl RemoteBehavior {
    /// Receiver that exits with `status` after reading everything
    pub fn exit(status: i32) -> Self {
        Self {
            exit_status: status,
            ..Default::default()
        }
    }

    pub fn fail_dial(message: &str) -> Self {
        Self {
            dial_error: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn fail_session(message: &str) -> Self {
        Self {
            session_error: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn fail_input(message: &str) -> Self {
        Self {
            input_error: Some(message.to_string()),
            ..Default::default()
        }
    }

    pub fn fail_start(message: &str) -> Self {
        Self {
            start_error: Some(message.to_string()),
            ..Default::default()
        }
    }

    /// Receiver that stops reading after `limit` bytes
    pub fn accept_bytes(limit: usize) -> Self {
        Self {
            accept_limit: Some(limit),
            ..Default::default()
        }
    }

    pub fn hang() -> Self {
        Self {
            hang: true,
            ..Default::default()
        }
    }

    /// Receiver that exits with `status` immediately, before reading anything
    pub fn exit_early(status: i32) -> Self {
        Self {
            exit_status: status,
            accept_limit: Some(0),
            exit_early: true,
            ..Default::default()
        }
    }

    pub fn with_message(mut self, message: &str) -> Self {
        self.exit_message = Some(message.to_string());
        self
    }
}

/// What happened on one session
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionRecord {
    pub command: Option<String>,
    pub written: Vec<u8>,
    pub input_closed: bool,
    pub wait_calls: usize,
    /// The wait was dropped before the command exited
    pub wait_abandoned: bool,
}

#[derive(Debug, Default)]
struct Recorder {
    dials: usize,
    closes: usize,
    sessions: Vec<SessionRecord>,
}

type SharedRecorder = Arc<Mutex<Recorder>>;

fn lock(state: &SharedRecorder) -> MutexGuard<'_, Recorder> {
    state.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Recording loopback transport. Clones share the same recording.
#[derive(Debug, Clone, Default)]
pub struct MemoryTransport {
    behavior: RemoteBehavior,
    state: SharedRecorder,
}

impl MemoryTransport {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_behavior(mut self, behavior: RemoteBehavior) -> Self {
        self.behavior = behavior;
        self
    }

    /// Number of dial attempts, failed ones included
    pub fn dial_count(&self) -> usize {
        lock(&self.state).dials
    }

    pub fn close_count(&self) -> usize {
        lock(&self.state).closes
    }

    pub fn sessions(&self) -> Vec<SessionRecord> {
        lock(&self.state).sessions.clone()
    }

    pub fn last_session(&self) -> Option<SessionRecord> {
        lock(&self.state).sessions.last().cloned()
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    type Connection = MemoryConnection;

    async fn dial(&self, _endpoint: &Endpoint) -> Result<MemoryConnection> {
        lock(&self.state).dials += 1;
        if let Some(message) = &self.behavior.dial_error {
            return Err(anyhow!(message.clone()));
        }
        Ok(MemoryConnection {
            behavior: self.behavior.clone(),
            state: Arc::clone(&self.state),
        })
    }
}

pub struct MemoryConnection {
    behavior: RemoteBehavior,
    state: SharedRecorder,
}

#[async_trait]
impl Connection for MemoryConnection {
    type Session = MemorySession;

    async fn new_session(&self) -> Result<MemorySession> {
        if let Some(message) = &self.behavior.session_error {
            return Err(anyhow!(message.clone()));
        }

        let index = {
            let mut state = lock(&self.state);
            state.sessions.push(SessionRecord::default());
            state.sessions.len() - 1
        };
        let (closed_tx, closed_rx) = watch::channel(false);

        Ok(MemorySession {
            index,
            behavior: self.behavior.clone(),
            state: Arc::clone(&self.state),
            closed_tx: Some(closed_tx),
            closed_rx,
        })
    }

    async fn close(self) -> Result<()> {
        lock(&self.state).closes += 1;
        Ok(())
    }
}

pub struct MemorySession {
    index: usize,
    behavior: RemoteBehavior,
    state: SharedRecorder,
    closed_tx: Option<watch::Sender<bool>>,
    closed_rx: watch::Receiver<bool>,
}

#[async_trait]
impl RemoteSession for MemorySession {
    type Input = MemoryInput;
    type Completion = MemoryCompletion;

    async fn input_stream(&mut self) -> Result<MemoryInput> {
        if let Some(message) = &self.behavior.input_error {
            return Err(anyhow!(message.clone()));
        }
        let closed_tx = self
            .closed_tx
            .take()
            .ok_or_else(|| anyhow!("Input stream already taken"))?;

        Ok(MemoryInput {
            index: self.index,
            state: Arc::clone(&self.state),
            remaining: self.behavior.accept_limit,
            closed_tx,
            closed: false,
        })
    }

    async fn start(self, command: &str) -> Result<MemoryCompletion> {
        if let Some(message) = &self.behavior.start_error {
            return Err(anyhow!(message.clone()));
        }
        lock(&self.state).sessions[self.index].command = Some(command.to_string());

        Ok(MemoryCompletion {
            index: self.index,
            behavior: self.behavior,
            state: self.state,
            closed_rx: self.closed_rx,
        })
    }
}

/// Input half of a [`MemorySession`]. Dropping it closes the stream.
pub struct MemoryInput {
    index: usize,
    state: SharedRecorder,
    remaining: Option<usize>,
    closed_tx: watch::Sender<bool>,
    closed: bool,
}

impl MemoryInput {
    fn mark_closed(&mut self) {
        if !self.closed {
            self.closed = true;
            lock(&self.state).sessions[self.index].input_closed = true;
            self.closed_tx.send_replace(true);
        }
    }
}

impl AsyncWrite for MemoryInput {
    fn poll_write(
        mut self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if self.closed {
            return Poll::Ready(Err(io::Error::new(
                io::ErrorKind::BrokenPipe,
                "Input stream closed",
            )));
        }

        let accepted = match self.remaining {
            Some(0) => {
                return Poll::Ready(Err(io::Error::new(
                    io::ErrorKind::BrokenPipe,
                    "Remote stopped reading",
                )));
            }
            Some(limit) => limit.min(buf.len()),
            None => buf.len(),
        };
        if let Some(limit) = self.remaining.as_mut() {
            *limit -= accepted;
        }

        lock(&self.state).sessions[self.index]
            .written
            .extend_from_slice(&buf[..accepted]);
        Poll::Ready(Ok(accepted))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.mark_closed();
        Poll::Ready(Ok(()))
    }
}

impl Drop for MemoryInput {
    fn drop(&mut self) {
        self.mark_closed();
    }
}

pub struct MemoryCompletion {
    index: usize,
    behavior: RemoteBehavior,
    state: SharedRecorder,
    closed_rx: watch::Receiver<bool>,
}

/// Flags the wait as abandoned unless it ran to completion
struct WaitGuard {
    index: usize,
    state: SharedRecorder,
    finished: bool,
}

impl Drop for WaitGuard {
    fn drop(&mut self) {
        if !self.finished {
            lock(&self.state).sessions[self.index].wait_abandoned = true;
        }
    }
}

#[async_trait]
impl Completion for MemoryCompletion {
    async fn wait(mut self) -> Result<()> {
        lock(&self.state).sessions[self.index].wait_calls += 1;
        let mut guard = WaitGuard {
            index: self.index,
            state: Arc::clone(&self.state),
            finished: false,
        };

        if self.behavior.hang {
            std::future::pending::<()>().await;
        }

        if !self.behavior.exit_early {
            loop {
                let closed = *self.closed_rx.borrow_and_update();
                if closed || self.closed_rx.changed().await.is_err() {
                    break;
                }
            }
        }
        guard.finished = true;

        if self.behavior.exit_status == 0 {
            Ok(())
        } else {
            Err(RemoteExit {
                status: self.behavior.exit_status,
                signal: None,
                message: self.behavior.exit_message.clone(),
            }
            .into())
        }
    }
}
