// Re-export all items from the submodules
mod client_config;
mod endpoint;
mod env_vars;

// Re-export endpoint types
pub use endpoint::{AuthMethod, Endpoint};

// Re-export client config
pub use client_config::{ClientConfig, TransferConfig};

// Re-export environment variable functions
pub use env_vars::expand_local_path;
