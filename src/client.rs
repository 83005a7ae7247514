use std::path::Path;

use anyhow::{anyhow, Context, Result};
use log::{debug, info, warn};
use tokio::fs::File;
use tokio::io::AsyncRead;
use tokio_util::sync::CancellationToken;

use crate::config::{ClientConfig, Endpoint};
use crate::scp::{self, PushOptions, RemoteTarget, SizedSource};
use crate::transport::ssh::SshTransport;
use crate::transport::{Connection, Transport};

/// SCP push client bound to one endpoint.
///
/// Holds at most one connection. Every copy opens a fresh session on it and
/// takes `&mut self`, so transfers on one client never overlap.
pub struct Client<T: Transport = SshTransport> {
    endpoint: Endpoint,
    transport: T,
    options: PushOptions,
    connection: Option<T::Connection>,
    cancel: CancellationToken,
}

impl Client<SshTransport> {
    /// Create a client that connects over SSH
    pub fn new(endpoint: Endpoint) -> Self {
        Self::with_transport(endpoint, SshTransport)
    }

    /// Create an SSH client from a loaded configuration
    pub fn from_config(config: &ClientConfig) -> Self {
        Self::new(config.endpoint.clone()).with_options(config.transfer.push_options())
    }
}

impl<T: Transport> Client<T> {
    pub fn with_transport(endpoint: Endpoint, transport: T) -> Self {
        Self {
            endpoint,
            transport,
            options: PushOptions::default(),
            connection: None,
            cancel: CancellationToken::new(),
        }
    }

    pub fn with_options(mut self, options: PushOptions) -> Self {
        self.options = options;
        self
    }

    pub fn endpoint(&self) -> &Endpoint {
        &self.endpoint
    }

    /// Token that interrupts the connect or transfer in flight when cancelled
    pub fn cancellation_token(&self) -> CancellationToken {
        self.cancel.clone()
    }

    pub fn is_connected(&self) -> bool {
        self.connection.is_some()
    }

    /// Connect to the remote SSH server. Single attempt, no retry.
    ///
    /// Replaces any connection this client already holds; close it first.
    pub async fn connect(&mut self) -> Result<()> {
        let address = self.endpoint.address();
        debug!("Connecting to {}", address);

        let connection = tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                return Err(anyhow!("Connection to {} cancelled", address));
            }
            dialed = tokio::time::timeout(
                self.endpoint.connect_timeout(),
                self.transport.dial(&self.endpoint),
            ) => {
                dialed
                    .map_err(|_| anyhow!("Timed out connecting to {}", address))?
                    .context(format!("Failed to connect to {}", address))?
            }
        };

        if self.connection.replace(connection).is_some() {
            warn!("Replaced an open connection to {} without closing it", address);
        }
        info!("Connected to {}", address);
        Ok(())
    }

    /// Release the connection. No-op when not connected.
    pub async fn close(&mut self) -> Result<()> {
        match self.connection.take() {
            Some(connection) => {
                connection.close().await?;
                info!("Closed connection to {}", self.endpoint.address());
                Ok(())
            }
            None => Ok(()),
        }
    }

    /// Copy an open file, taking the size from its metadata
    pub async fn copy_from_file(
        &mut self,
        file: File,
        remote_path: &str,
        permissions: &str,
    ) -> Result<()> {
        let source = SizedSource::from_file(file).await?;
        self.copy(source.reader, remote_path, permissions, source.size)
            .await
    }

    /// Open and copy a local file
    pub async fn copy_from_path(
        &mut self,
        local_path: &Path,
        remote_path: &str,
        permissions: &str,
    ) -> Result<()> {
        let file = File::open(local_path)
            .await
            .context(format!("Failed to open local file: {}", local_path.display()))?;
        self.copy_from_file(file, remote_path, permissions).await
    }

    /// Copy a stream of unknown length. The stream is buffered in memory to
    /// learn its size; use [`Client::copy`] when the length is known.
    pub async fn copy_stream<R>(
        &mut self,
        reader: R,
        remote_path: &str,
        permissions: &str,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let source = SizedSource::from_unsized(reader).await?;
        self.copy(source.reader, remote_path, permissions, source.size)
            .await
    }

    /// Copy exactly `size` bytes of `reader` to `remote_path`
    pub async fn copy<R>(
        &mut self,
        reader: R,
        remote_path: &str,
        permissions: &str,
        size: u64,
    ) -> Result<()>
    where
        R: AsyncRead + Unpin,
    {
        let target = RemoteTarget::parse(remote_path)?;
        let connection = self
            .connection
            .as_ref()
            .ok_or_else(|| anyhow!("Not connected to {}", self.endpoint.address()))?;

        let session = connection
            .new_session()
            .await
            .context("Failed to open session")?;

        scp::push(
            session,
            &target,
            permissions,
            size,
            reader,
            &self.options,
            &self.cancel,
        )
        .await
        .context(format!(
            "Failed to copy to {}:{}",
            self.endpoint.host, remote_path
        ))?;

        info!(
            "Copied {} bytes to {}:{}",
            size, self.endpoint.host, remote_path
        );
        Ok(())
    }
}
