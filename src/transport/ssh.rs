//! SSH transport backed by libssh2.
//!
//! libssh2 is blocking and serializes every call on a session behind one
//! lock, so a session's channel is never touched from two threads at once.
//! Instead each started command gets a dedicated blocking thread that owns
//! the channel: it drains an in-memory pipe into the command's stdin, sends
//! EOF when the pipe closes, then collects the exit status.
//!
//! A command abandoned while still running (cancellation, deadline) shuts
//! the connection's socket down so a thread stuck inside libssh2 returns
//! and releases the session lock.
//!
//! ```text
//! engine ──write──▶ DuplexStream ══pipe══▶ SyncIoBridge ──▶ ssh2::Channel (stdin)
//!                                          (blocking thread)       │
//! engine ◀──wait── oneshot ◀──────────── exit status ◀─────────────┘
//! ```

use std::io::{self, Read};
use std::net::{Shutdown, TcpStream, ToSocketAddrs};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use log::{debug, info, warn};
use ssh2::{Channel, Session};
use tokio::io::DuplexStream;
use tokio::sync::oneshot;
use tokio::task;
use tokio_util::io::SyncIoBridge;

use crate::config::{AuthMethod, Endpoint};
use crate::constants::STREAMING_BUFFER_SIZE;
use crate::scp::codec::receiver_diagnostics;
use crate::transport::{Completion, Connection, RemoteExit, RemoteSession, Transport};

/// Dials SSH servers with `ssh2`
#[derive(Debug, Clone, Copy, Default)]
pub struct SshTransport;

#[async_trait]
impl Transport for SshTransport {
    type Connection = SshConnection;

    async fn dial(&self, endpoint: &Endpoint) -> Result<SshConnection> {
        let endpoint = endpoint.clone();
        task::spawn_blocking(move || create_session(&endpoint))
            .await
            .context("SSH connect task failed")?
    }
}

/// Create an authenticated SSH session
fn create_session(endpoint: &Endpoint) -> Result<SshConnection> {
    let address = endpoint.address();
    let tcp = connect_tcp(&address, endpoint.connect_timeout())?;
    let socket = tcp
        .try_clone()
        .context("Failed to clone SSH socket handle")?;

    let mut session = Session::new().context("Failed to create SSH session")?;
    session.set_tcp_stream(tcp);

    // Bound the handshake and authentication by the connect timeout
    session.set_timeout(millis(endpoint.connect_timeout().as_secs()));
    session
        .handshake()
        .context(format!("Failed to perform SSH handshake with {}", address))?;

    authenticate(&session, endpoint)?;
    if !session.authenticated() {
        return Err(anyhow!("Authentication failed"));
    }

    // 0 disables the timeout
    session.set_timeout(endpoint.io_timeout_secs.map(millis).unwrap_or(0));

    info!("Connected to {}@{}", endpoint.username, address);
    Ok(SshConnection { session, socket })
}

fn millis(secs: u64) -> u32 {
    secs.saturating_mul(1000).min(u32::MAX as u64) as u32
}

fn connect_tcp(address: &str, timeout: Duration) -> Result<TcpStream> {
    let addrs = address
        .to_socket_addrs()
        .context(format!("Failed to resolve {}", address))?;

    let mut last_error = None;
    for addr in addrs {
        match TcpStream::connect_timeout(&addr, timeout) {
            Ok(tcp) => return Ok(tcp),
            Err(e) => {
                debug!("Connection attempt to {} failed: {}", addr, e);
                last_error = Some(e);
            }
        }
    }

    match last_error {
        Some(e) => Err(anyhow::Error::new(e).context(format!("Failed to connect to {}", address))),
        None => Err(anyhow!("No addresses found for {}", address)),
    }
}

fn authenticate(session: &Session, endpoint: &Endpoint) -> Result<()> {
    let username = &endpoint.username;
    match &endpoint.auth {
        AuthMethod::Agent => session
            .userauth_agent(username)
            .context("Failed to authenticate with SSH agent"),
        AuthMethod::Password { password } => session
            .userauth_password(username, password)
            .context("Failed to authenticate with password"),
        AuthMethod::PrivateKey { path, passphrase } => session
            .userauth_pubkey_file(username, None, path, passphrase.as_deref())
            .context(format!(
                "Failed to authenticate with private key: {}",
                path.display()
            )),
    }
}

pub struct SshConnection {
    session: Session,
    /// Second handle on the session's socket, used only to shut it down
    socket: TcpStream,
}

#[async_trait]
impl Connection for SshConnection {
    type Session = SshSession;

    async fn new_session(&self) -> Result<SshSession> {
        let socket = self
            .socket
            .try_clone()
            .context("Failed to clone SSH socket handle")?;
        let session = self.session.clone();
        let channel = task::spawn_blocking(move || session.channel_session())
            .await
            .context("SSH channel task failed")?
            .context("Failed to open SSH channel")?;

        Ok(SshSession {
            channel,
            pipe: None,
            socket,
        })
    }

    async fn close(self) -> Result<()> {
        task::spawn_blocking(move || {
            self.session
                .disconnect(None, "scp-push closing connection", None)
        })
        .await
        .context("SSH disconnect task failed")?
        .context("Failed to disconnect SSH session")?;

        debug!("SSH connection closed");
        Ok(())
    }
}

pub struct SshSession {
    channel: Channel,
    /// Read side of the stdin pipe, handed to the channel thread on start
    pipe: Option<DuplexStream>,
    socket: TcpStream,
}

#[async_trait]
impl RemoteSession for SshSession {
    type Input = DuplexStream;
    type Completion = SshCompletion;

    async fn input_stream(&mut self) -> Result<DuplexStream> {
        if self.pipe.is_some() {
            return Err(anyhow!("Input stream already taken"));
        }
        let (writer, reader) = tokio::io::duplex(STREAMING_BUFFER_SIZE);
        self.pipe = Some(reader);
        Ok(writer)
    }

    async fn start(self, command: &str) -> Result<SshCompletion> {
        let SshSession {
            mut channel,
            pipe,
            socket,
        } = self;
        let pipe = pipe.ok_or_else(|| anyhow!("Input stream must be taken before the command starts"))?;

        let command = command.to_string();
        let channel = task::spawn_blocking(move || {
            channel.exec(&command)?;
            Ok::<_, ssh2::Error>(channel)
        })
        .await
        .context("SSH exec task failed")?
        .context("Failed to start remote command")?;

        let input = SyncIoBridge::new(pipe);
        let (status_tx, status_rx) = oneshot::channel();
        task::spawn_blocking(move || {
            let _ = status_tx.send(feed_channel(channel, input));
        });

        Ok(SshCompletion {
            status: status_rx,
            socket: SocketGuard::new(socket),
        })
    }
}

pub struct SshCompletion {
    status: oneshot::Receiver<Result<()>>,
    socket: SocketGuard,
}

#[async_trait]
impl Completion for SshCompletion {
    async fn wait(self) -> Result<()> {
        let SshCompletion { status, mut socket } = self;
        let result = status
            .await
            .unwrap_or_else(|_| Err(anyhow!("SSH channel thread exited without reporting a status")));
        socket.disarm();
        result
    }
}

/// Shuts the socket down when dropped while armed
struct SocketGuard {
    socket: Option<TcpStream>,
}

impl SocketGuard {
    fn new(socket: TcpStream) -> Self {
        Self {
            socket: Some(socket),
        }
    }

    fn disarm(&mut self) {
        self.socket = None;
    }
}

impl Drop for SocketGuard {
    fn drop(&mut self) {
        if let Some(socket) = self.socket.take() {
            warn!("Remote command abandoned while running, shutting down the SSH connection");
            if let Err(e) = socket.shutdown(Shutdown::Both) {
                debug!("Socket shutdown failed: {}", e);
            }
        }
    }
}

/// How a remote command ended
#[derive(Debug, Default)]
struct Finished {
    status: i32,
    signal: Option<String>,
    message: Option<String>,
}

/// Runs on a blocking thread for the lifetime of one remote command
fn feed_channel(mut channel: Channel, mut input: SyncIoBridge<DuplexStream>) -> Result<()> {
    let copied = io::copy(&mut input, &mut channel);
    // Closing the pipe makes further writes on the engine side fail fast
    drop(input);

    match &copied {
        Ok(bytes) => debug!("Fed {} bytes to remote command", bytes),
        Err(e) => warn!("Stopped feeding remote command: {}", e),
    }

    outcome(copied, finish_channel(&mut channel))
}

/// Combine the stdin pump result with how the command ended. A failure the
/// remote reports takes precedence over a local write error.
fn outcome(copied: io::Result<u64>, finished: Result<Finished>) -> Result<()> {
    match (copied, finished) {
        (_, Ok(finished)) if finished.status != 0 || finished.signal.is_some() => Err(RemoteExit {
            status: finished.status,
            signal: finished.signal,
            message: finished.message,
        }
        .into()),
        (Err(e), _) => Err(anyhow::Error::new(e).context("Failed to write to remote command")),
        (Ok(_), Err(e)) => Err(e),
        (Ok(_), Ok(_)) => Ok(()),
    }
}

/// Receiver warning/error lines, else the signal's error message, else stderr
fn diagnostics(output: &[u8], signal_message: Option<String>, errors: &[u8]) -> Option<String> {
    receiver_diagnostics(output)
        .or(signal_message.filter(|m| !m.trim().is_empty()))
        .or_else(|| {
            let text = String::from_utf8_lossy(errors).trim().to_string();
            (!text.is_empty()).then_some(text)
        })
}

fn finish_channel(channel: &mut Channel) -> Result<Finished> {
    channel
        .send_eof()
        .context("Failed to send EOF to remote command")?;

    let mut output = Vec::new();
    channel
        .read_to_end(&mut output)
        .context("Failed to read remote command output")?;
    let mut errors = Vec::new();
    channel
        .stderr()
        .read_to_end(&mut errors)
        .context("Failed to read remote command errors")?;

    channel
        .wait_close()
        .context("Failed waiting for remote command to exit")?;
    let status = channel
        .exit_status()
        .context("Failed to read remote exit status")?;
    // libssh2 reports status 0 for a command killed by a signal
    let signal = channel
        .exit_signal()
        .context("Failed to read remote exit signal")?;

    debug!(
        "Remote command exited with status {} (signal {:?})",
        status, signal.exit_signal
    );
    Ok(Finished {
        status,
        message: diagnostics(&output, signal.error_message, &errors),
        signal: signal.exit_signal,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::TcpListener;

    fn closed_port() -> u16 {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        listener.local_addr().unwrap().port()
    }

    #[test]
    fn test_millis_saturates() {
        assert_eq!(millis(30), 30_000);
        assert_eq!(millis(u64::MAX), u32::MAX);
    }

    #[tokio::test]
    async fn test_dial_refused() {
        let endpoint = Endpoint::new("127.0.0.1", closed_port(), "nobody", AuthMethod::Agent);

        let err = SshTransport.dial(&endpoint).await.err().unwrap();
        assert!(format!("{:#}", err).contains("Failed to connect"));
    }

    #[tokio::test]
    async fn test_handshake_failure_against_non_ssh_server() {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let port = listener.local_addr().unwrap().port();
        std::thread::spawn(move || {
            if let Ok((mut stream, _)) = listener.accept() {
                use std::io::Write;
                let _ = stream.write_all(b"HTTP/1.1 400 Bad Request\r\n\r\n");
            }
        });

        let mut endpoint = Endpoint::new("127.0.0.1", port, "nobody", AuthMethod::Agent);
        endpoint.connect_timeout_secs = 2;

        let err = SshTransport.dial(&endpoint).await.err().unwrap();
        assert!(format!("{:#}", err).contains("handshake"));
    }

    fn exited(status: i32) -> Result<Finished> {
        Ok(Finished {
            status,
            ..Default::default()
        })
    }

    fn broken_pipe() -> io::Result<u64> {
        Err(io::Error::new(io::ErrorKind::BrokenPipe, "channel closed"))
    }

    fn remote_exit(result: Result<()>) -> RemoteExit {
        result.unwrap_err().downcast::<RemoteExit>().unwrap()
    }

    #[test]
    fn test_outcome_clean_exit() {
        assert!(outcome(Ok(12), exited(0)).is_ok());
    }

    #[test]
    fn test_outcome_nonzero_exit_carries_message() {
        let finished = Ok(Finished {
            status: 1,
            signal: None,
            message: Some("scp: /srv: Permission denied".to_string()),
        });

        let exit = remote_exit(outcome(Ok(12), finished));
        assert_eq!(exit.status, 1);
        assert_eq!(exit.message.as_deref(), Some("scp: /srv: Permission denied"));
    }

    #[test]
    fn test_outcome_signal_is_a_failure() {
        let finished = Ok(Finished {
            status: 0,
            signal: Some("KILL".to_string()),
            message: None,
        });

        let exit = remote_exit(outcome(Ok(12), finished));
        assert_eq!(exit.signal.as_deref(), Some("KILL"));
        assert_eq!(exit.to_string(), "Remote command killed by signal KILL");
    }

    #[test]
    fn test_outcome_remote_failure_wins_over_write_error() {
        assert_eq!(remote_exit(outcome(broken_pipe(), exited(2))).status, 2);
    }

    #[test]
    fn test_outcome_write_error_with_clean_exit() {
        let err = outcome(broken_pipe(), exited(0)).unwrap_err();
        assert!(err.to_string().contains("Failed to write to remote command"));
        assert_eq!(
            err.downcast_ref::<io::Error>().map(|e| e.kind()),
            Some(io::ErrorKind::BrokenPipe)
        );
    }

    #[test]
    fn test_outcome_channel_failure() {
        let err = outcome(Ok(12), Err(anyhow!("wait_close failed"))).unwrap_err();
        assert_eq!(err.to_string(), "wait_close failed");

        let err = outcome(broken_pipe(), Err(anyhow!("wait_close failed"))).unwrap_err();
        assert!(err.downcast_ref::<io::Error>().is_some());
    }

    #[test]
    fn test_diagnostics_preference() {
        assert_eq!(
            diagnostics(b"\x01scp: /srv: No such file\n", Some("killed".into()), b"stderr text"),
            Some("scp: /srv: No such file".to_string())
        );
        assert_eq!(
            diagnostics(b"\x00", Some("out of memory".into()), b"stderr text"),
            Some("out of memory".to_string())
        );
        assert_eq!(
            diagnostics(b"", Some("  ".into()), b"  bash: scp: command not found\n"),
            Some("bash: scp: command not found".to_string())
        );
        assert_eq!(diagnostics(b"\x00\x00", None, b""), None);
    }

    fn socket_pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let client = TcpStream::connect(listener.local_addr().unwrap()).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn test_abandoned_command_shuts_socket_down() {
        let (client, mut server) = socket_pair();
        drop(SocketGuard::new(client.try_clone().unwrap()));

        let mut buf = [0u8; 1];
        assert_eq!(server.read(&mut buf).unwrap(), 0);
    }

    #[test]
    fn test_finished_command_keeps_socket_open() {
        use std::io::Write;

        let (mut client, mut server) = socket_pair();
        let mut guard = SocketGuard::new(client.try_clone().unwrap());
        guard.disarm();
        drop(guard);

        client.write_all(b"x").unwrap();
        let mut buf = [0u8; 1];
        assert_eq!(server.read(&mut buf).unwrap(), 1);
    }
}
