//! Typed cause tags attached to push errors.
//!
//! A push still returns a single `anyhow::Error`. The tags below ride along as
//! context so callers who care can `downcast_ref` them:
//!
//! ```no_run
//! # use scp_push::scp::{TransferFailure, FailureCause};
//! # fn inspect(err: anyhow::Error) {
//! if let Some(failure) = err.downcast_ref::<TransferFailure>() {
//!     if failure.cause == FailureCause::Remote {
//!         eprintln!("remote receiver rejected the file");
//!     }
//! }
//! # }
//! ```

use std::fmt;

/// Step of the push at which the failure was observed
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStage {
    OpenInput,
    StartCommand,
    WriteHeader,
    WritePayload,
    WriteTerminator,
    CloseInput,
    RemoteCompletion,
}

impl fmt::Display for TransferStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            TransferStage::OpenInput => "opening the remote input stream",
            TransferStage::StartCommand => "starting the remote receiver",
            TransferStage::WriteHeader => "writing the file header",
            TransferStage::WritePayload => "writing the payload",
            TransferStage::WriteTerminator => "writing the terminator",
            TransferStage::CloseInput => "closing the remote input stream",
            TransferStage::RemoteCompletion => "waiting for the remote receiver",
        };
        f.write_str(name)
    }
}

/// Which side caused the failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureCause {
    /// Local I/O or transport failure
    Local,
    /// The remote command reported a failure
    Remote,
    Cancelled,
    TimedOut,
}

/// Context tag carried by every error the transfer engine returns
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransferFailure {
    pub stage: TransferStage,
    pub cause: FailureCause,
}

impl TransferFailure {
    pub fn new(stage: TransferStage, cause: FailureCause) -> Self {
        Self { stage, cause }
    }

    pub fn local(stage: TransferStage) -> Self {
        Self::new(stage, FailureCause::Local)
    }
}

impl fmt::Display for TransferFailure {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.cause {
            FailureCause::Cancelled => write!(f, "SCP push cancelled while {}", self.stage),
            FailureCause::TimedOut => write!(f, "SCP push timed out while {}", self.stage),
            FailureCause::Local | FailureCause::Remote => {
                write!(f, "SCP push failed while {}", self.stage)
            }
        }
    }
}

impl std::error::Error for TransferFailure {}
