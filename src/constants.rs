//! Global constants for scp-push.
//!
//! This module centralizes all hardcoded values to improve maintainability
//! and make configuration changes easier.

// Connection constants
/// Default SSH port
pub const DEFAULT_SSH_PORT: u16 = 22;

/// Default connection timeout in seconds
pub const DEFAULT_CONNECTION_TIMEOUT_SECS: u64 = 30;

// Transfer constants
/// Capacity of the in-memory pipe feeding a remote command's stdin (64KB)
pub const STREAMING_BUFFER_SIZE: usize = 64 * 1024;

/// Default chunk size for the payload copy loop, in KB
pub const DEFAULT_CHUNK_SIZE_KB: usize = 64;

/// Largest accepted chunk size, in KB (16MB)
pub const MAX_CHUNK_SIZE_KB: usize = 16 * 1024;

/// Permissions used when the caller does not supply a mode
pub const DEFAULT_PERMISSIONS: &str = "0644";

/// Remote receiver binary
pub const SCP_RECEIVER: &str = "scp";

/// How long the CLI waits for blocking SSH threads on exit
pub const RUNTIME_SHUTDOWN_TIMEOUT_SECS: u64 = 5;

// Environment variable names
/// Overrides the configured host
pub const ENV_HOST: &str = "SCP_PUSH_HOST";

/// Overrides the configured port
pub const ENV_PORT: &str = "SCP_PUSH_PORT";

/// Overrides the configured username
pub const ENV_USER: &str = "SCP_PUSH_USER";

/// Switches to password authentication with this password
pub const ENV_PASSWORD: &str = "SCP_PUSH_PASSWORD";

/// Switches to private key authentication with this key file
pub const ENV_KEY: &str = "SCP_PUSH_KEY";
