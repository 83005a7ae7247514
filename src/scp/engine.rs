use std::future::Future;
use std::io;
use std::time::Duration;

use anyhow::{anyhow, Context, Error, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::constants::{DEFAULT_CHUNK_SIZE_KB, MAX_CHUNK_SIZE_KB};
use crate::scp::codec::{encode_file_header, receiver_command, RemoteTarget, Terminator};
use crate::scp::error::{FailureCause, TransferFailure, TransferStage};
use crate::transport::{Completion, RemoteExit, RemoteSession};

/// What to do when writing to the remote input stream fails
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WriteErrorPolicy {
    /// Stop writing and return the write error once the remote has exited
    #[default]
    Propagate,
    /// Log the error and let the remote exit status decide. Later writes are
    /// still attempted unless the input stream is broken.
    BestEffort,
}

/// Tunables for a single push
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PushOptions {
    pub terminator: Terminator,
    pub write_errors: WriteErrorPolicy,
    /// Bytes copied per read, at most 16MB; cancellation is checked between chunks
    pub chunk_size: usize,
    /// Overall deadline covering command start, writes and the final wait
    pub timeout: Option<Duration>,
}

impl Default for PushOptions {
    fn default() -> Self {
        Self {
            terminator: Terminator::default(),
            write_errors: WriteErrorPolicy::default(),
            chunk_size: DEFAULT_CHUNK_SIZE_KB * 1024,
            timeout: None,
        }
    }
}

/// Push one file through `session`.
///
/// Starts `scp -t <directory>`, arms a task waiting for the command to exit,
/// writes the control line, exactly `size` bytes of `payload` and the
/// terminator, closes the input stream and joins the waiting task. The
/// remote command is always waited on before returning, unless the push is
/// cancelled or times out, in which case the waiting task is aborted.
///
/// Every error carries a [`TransferFailure`] tag.
pub async fn push<S, R>(
    mut session: S,
    target: &RemoteTarget,
    permissions: &str,
    size: u64,
    mut payload: R,
    options: &PushOptions,
    cancel: &CancellationToken,
) -> Result<()>
where
    S: RemoteSession,
    R: AsyncRead + Unpin,
{
    let guard = Guard {
        cancel,
        deadline: options.timeout.map(|timeout| Instant::now() + timeout),
    };

    let mut input = guard
        .run(TransferFailure::local(TransferStage::OpenInput), session.input_stream())
        .await?;

    let command = receiver_command(&target.directory);
    debug!("Starting remote receiver: {}", command);

    let completion = match guard
        .run(TransferFailure::local(TransferStage::StartCommand), session.start(&command))
        .await
    {
        Ok(completion) => completion,
        Err(e) => {
            let _ = input.shutdown().await;
            return Err(e);
        }
    };

    // Armed before the first byte goes out so an early exit is never missed
    let (status_tx, status_rx) = oneshot::channel();
    let waiter = Waiter(tokio::spawn(async move {
        let _ = status_tx.send(completion.wait().await);
    }));

    let writer = Writer {
        guard: &guard,
        options,
    };
    let header = encode_file_header(permissions, size, &target.filename);

    let mut written = writer
        .write_file(&mut input, &header, &mut payload, size)
        .await;
    if written.is_ok() {
        written = writer.tolerate_last(
            guard
                .run(
                    TransferFailure::local(TransferStage::CloseInput),
                    async { input.shutdown().await.context("Failed to close remote input stream") },
                )
                .await,
        );
    }
    drop(input);

    if let Err(e) = &written {
        if is_interrupted(e) {
            drop(waiter);
            return written;
        }
    }

    let status = guard
        .run(
            TransferFailure::new(TransferStage::RemoteCompletion, FailureCause::Remote),
            async {
                status_rx
                    .await
                    .unwrap_or_else(|_| Err(anyhow!("Completion task ended without reporting a status")))
            },
        )
        .await;
    drop(waiter);

    match (written, status) {
        (Ok(()), Ok(())) => {
            debug!(
                "Pushed {} bytes to {}/{}",
                size, target.directory, target.filename
            );
            Ok(())
        }
        (Ok(()), Err(e)) => Err(e),
        (Err(e), Ok(())) => Err(e),
        // Keep the receiver's own reason next to the write error
        (Err(e), Err(remote)) => match remote.downcast_ref::<RemoteExit>() {
            Some(exit) => Err(e.context(exit.clone())),
            None => {
                debug!("Remote status after failed write: {:#}", remote);
                Err(e)
            }
        },
    }
}

fn is_broken_pipe(err: &Error) -> bool {
    err.chain().any(|cause| {
        cause
            .downcast_ref::<io::Error>()
            .map_or(false, |e| e.kind() == io::ErrorKind::BrokenPipe)
    })
}

fn is_interrupted(err: &Error) -> bool {
    matches!(
        err.downcast_ref::<TransferFailure>().map(|f| f.cause),
        Some(FailureCause::Cancelled) | Some(FailureCause::TimedOut)
    )
}

/// Aborts the completion task if the push is abandoned
struct Waiter(JoinHandle<()>);

impl Drop for Waiter {
    fn drop(&mut self) {
        self.0.abort();
    }
}

/// Races a suspension point against cancellation and the deadline
struct Guard<'a> {
    cancel: &'a CancellationToken,
    deadline: Option<Instant>,
}

impl Guard<'_> {
    async fn run<T, F>(&self, failure: TransferFailure, fut: F) -> Result<T>
    where
        F: Future<Output = Result<T>>,
    {
        let expired = async {
            match self.deadline {
                Some(deadline) => tokio::time::sleep_until(deadline).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = self.cancel.cancelled() => {
                Err(anyhow!(TransferFailure::new(failure.stage, FailureCause::Cancelled)))
            }
            _ = expired => {
                Err(anyhow!(TransferFailure::new(failure.stage, FailureCause::TimedOut)))
            }
            result = fut => result.map_err(|e| e.context(failure)),
        }
    }
}

struct Writer<'a> {
    guard: &'a Guard<'a>,
    options: &'a PushOptions,
}

impl Writer<'_> {
    async fn write_file<W, R>(
        &self,
        input: &mut W,
        header: &[u8],
        payload: &mut R,
        size: u64,
    ) -> Result<()>
    where
        W: AsyncWrite + Unpin,
        R: AsyncRead + Unpin,
    {
        if !self.tolerate(self.write_bytes(input, header, TransferStage::WriteHeader).await)? {
            return Ok(());
        }
        if !self.tolerate(self.copy_payload(input, payload, size).await)? {
            return Ok(());
        }
        self.tolerate_last(
            self.write_bytes(input, self.options.terminator.encode(), TransferStage::WriteTerminator)
                .await,
        )
    }

    async fn write_bytes<W>(&self, input: &mut W, bytes: &[u8], stage: TransferStage) -> Result<()>
    where
        W: AsyncWrite + Unpin,
    {
        self.guard
            .run(TransferFailure::local(stage), async {
                input.write_all(bytes).await?;
                input.flush().await?;
                Ok::<(), Error>(())
            })
            .await
    }

    async fn copy_payload<W, R>(&self, input: &mut W, payload: &mut R, size: u64) -> Result<()>
    where
        W: AsyncWrite + Unpin,
        R: AsyncRead + Unpin,
    {
        let failure = TransferFailure::local(TransferStage::WritePayload);
        let mut buffer = vec![0u8; self.options.chunk_size.clamp(1, MAX_CHUNK_SIZE_KB * 1024)];
        let mut remaining = size;

        while remaining > 0 {
            let wanted = remaining.min(buffer.len() as u64) as usize;
            let read = self
                .guard
                .run(failure, async {
                    payload
                        .read(&mut buffer[..wanted])
                        .await
                        .context("Failed to read payload")
                })
                .await?;

            if read == 0 {
                return Err(anyhow!(
                    "Payload ended after {} of {} declared bytes",
                    size - remaining,
                    size
                ))
                .context(failure);
            }

            self.guard
                .run(failure, async {
                    input
                        .write_all(&buffer[..read])
                        .await
                        .context("Failed to write payload to remote input stream")
                })
                .await?;
            remaining -= read as u64;
        }

        self.guard
            .run(failure, async { input.flush().await.map_err(Error::from) })
            .await
    }

    /// Apply the write error policy. Interruptions always propagate.
    ///
    /// Returns whether later writes are worth attempting: not once the
    /// input stream is broken.
    fn tolerate(&self, result: Result<()>) -> Result<bool> {
        match result {
            Ok(()) => Ok(true),
            Err(e) if self.options.write_errors == WriteErrorPolicy::BestEffort && !is_interrupted(&e) => {
                warn!("Ignoring write failure: {:#}", e);
                if is_broken_pipe(&e) {
                    warn!("Remote input stream is broken, skipping remaining writes");
                    return Ok(false);
                }
                Ok(true)
            }
            Err(e) => Err(e),
        }
    }

    fn tolerate_last(&self, result: Result<()>) -> Result<()> {
        self.tolerate(result).map(|_| ())
    }
}
