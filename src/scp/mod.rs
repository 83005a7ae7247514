//! SCP push protocol.
//!
//! ## Components
//!
//! - [`codec`]: control line, terminator and receiver command encoding
//! - [`engine`]: one push transaction over a [`RemoteSession`](crate::transport::RemoteSession)
//! - [`source`]: sized, unsized and file payload adapters
//! - [`error`]: cause tags attached to push errors

/// Control-line encoding
pub mod codec;

/// Push transaction
pub mod engine;

/// Payload adapters
pub mod source;

/// Cause tags for push errors
pub mod error;

pub use codec::{encode_file_header, receiver_command, RemoteTarget, Terminator};
pub use engine::{push, PushOptions, WriteErrorPolicy};
pub use error::{FailureCause, TransferFailure, TransferStage};
pub use source::SizedSource;
