//! Normalize payload inputs into a reader plus the size the control line
//! declares.
//!
//! The SCP header announces the size before any payload byte is sent, so a
//! source of unknown length has to be buffered in memory first.

use std::io::Cursor;

use anyhow::{Context, Result};
use log::debug;
use tokio::fs::File;
use tokio::io::{AsyncRead, AsyncReadExt};

/// A payload whose length is known up front
#[derive(Debug)]
pub struct SizedSource<R> {
    pub reader: R,
    pub size: u64,
}

impl<R: AsyncRead + Unpin> SizedSource<R> {
    /// Pass-through for a reader whose length the caller already knows.
    pub fn new(reader: R, size: u64) -> Self {
        Self { reader, size }
    }
}

impl SizedSource<Cursor<Vec<u8>>> {
    /// Read `reader` to the end and declare the measured length.
    ///
    /// Memory use grows with the payload.
    pub async fn from_unsized<R>(mut reader: R) -> Result<Self>
    where
        R: AsyncRead + Unpin,
    {
        let mut contents = Vec::new();
        reader
            .read_to_end(&mut contents)
            .await
            .context("Failed to buffer payload")?;

        debug!("Buffered {} byte payload", contents.len());
        let size = contents.len() as u64;
        Ok(Self {
            reader: Cursor::new(contents),
            size,
        })
    }
}

impl SizedSource<File> {
    /// Take the size from the file's metadata.
    pub async fn from_file(file: File) -> Result<Self> {
        let metadata = file
            .metadata()
            .await
            .context("Failed to get file metadata")?;
        Ok(Self {
            reader: file,
            size: metadata.len(),
        })
    }
}
