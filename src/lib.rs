//! # scp-push
//!
//! Push a single file to a remote host with the SCP sink protocol, without
//! shelling out to a local `scp` binary.
//!
//! ## Overview
//!
//! The client opens an SSH connection, starts `scp -t <directory>` on the
//! remote host for every transfer and feeds it the control line, the payload
//! and the terminator while a separate task waits for the command to exit.
//! The command's exit status decides the outcome.
//!
//! ## Usage
//!
//! ```no_run
//! use scp_push::client::Client;
//! use scp_push::config::{AuthMethod, Endpoint};
//! use std::path::Path;
//!
//! # async fn example() -> anyhow::Result<()> {
//! let endpoint = Endpoint::new(
//!     "files.example.com",
//!     22,
//!     "deploy",
//!     AuthMethod::PrivateKey { path: "/home/deploy/.ssh/id_ed25519".into(), passphrase: None },
//! );
//!
//! let mut client = Client::new(endpoint);
//! client.connect().await?;
//!
//! // Known length
//! client.copy(&b"hello"[..], "/tmp/hello.txt", "0644", 5).await?;
//!
//! // Length taken from file metadata
//! client.copy_from_path(Path::new("build/app.tar.gz"), "/srv/releases/app.tar.gz", "0640").await?;
//!
//! // Unknown length, buffered in memory first
//! client.copy_stream(tokio::io::stdin(), "/tmp/stdin.bin", "0600").await?;
//!
//! client.close().await?;
//! # Ok(())
//! # }
//! ```
//!
//! ## Module Organization
//!
//! - [`client`]: connection lifecycle and public copy operations
//! - [`scp`]: control-line codec, transfer engine and payload adapters
//! - [`transport`]: remote-shell transport contract, SSH and in-memory implementations
//! - [`config`]: endpoint and transfer configuration
//! - [`constants`]: defaults and environment variable names

/// Command-line interface definitions and argument parsing
pub mod cli;

/// Connection lifecycle and copy operations
pub mod client;

/// SCP push protocol
pub mod scp;

/// Remote-shell transports
pub mod transport;

/// Configuration management
pub mod config;

/// Application constants and configuration values
pub mod constants;

/// Test utilities and helpers
#[cfg(test)]
pub mod test_utils;
