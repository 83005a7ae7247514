//! Test utilities for scp-push

#![cfg(test)]

use anyhow::Result;
use std::io::Write;
use tempfile::NamedTempFile;

/// Creates a temporary file with the given content
pub fn create_temp_file(content: &[u8]) -> Result<NamedTempFile> {
    let mut file = NamedTempFile::new()?;
    file.write_all(content)?;
    file.flush()?;
    Ok(file)
}
