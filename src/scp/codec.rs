//! Control-line encoding for the single-file SCP sink protocol.
//!
//! A push writes three things to the stdin of `scp -t <dir>`:
//!
//! ```text
//! C0644 5 out.txt\n     <- control line (mode, decimal size, filename)
//! hello                 <- exactly `size` payload bytes
//! \0\n                  <- terminator
//! ```

use std::borrow::Cow;

use anyhow::{anyhow, Result};
use serde::{Deserialize, Serialize};

use crate::constants::SCP_RECEIVER;

/// End-of-data marker written after the payload.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Terminator {
    /// NUL followed by a newline. Tolerated by common receivers.
    #[default]
    NulNewline,
    /// A bare NUL, as the strict sink protocol expects.
    Nul,
}

impl Terminator {
    pub fn encode(self) -> &'static [u8] {
        match self {
            Terminator::NulNewline => b"\x00\n",
            Terminator::Nul => b"\x00",
        }
    }
}

/// Encode the `C<mode> <size> <filename>\n` control line.
///
/// `permissions` is passed through verbatim and must already be an octal
/// mode string such as `"0644"`. The filename is not shell-interpreted by
/// the receiver, so it is written unescaped.
pub fn encode_file_header(permissions: &str, size: u64, filename: &str) -> Vec<u8> {
    format!("C{} {} {}\n", permissions, size, filename).into_bytes()
}

/// Destination of a push, split the way the receiver needs it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RemoteTarget {
    /// Directory handed to `scp -t`
    pub directory: String,
    /// Name written into the control line
    pub filename: String,
}

impl RemoteTarget {
    /// Split a POSIX remote path into directory and filename.
    pub fn parse(remote_path: &str) -> Result<Self> {
        if remote_path.is_empty() {
            return Err(anyhow!("Remote path is empty"));
        }
        if remote_path.ends_with('/') {
            return Err(anyhow!("Remote path must name a file: {}", remote_path));
        }

        let (directory, filename) = match remote_path.rsplit_once('/') {
            None => (".", remote_path),
            Some((dir, name)) => {
                let dir = dir.trim_end_matches('/');
                (if dir.is_empty() { "/" } else { dir }, name)
            }
        };

        if filename.contains('\n') {
            return Err(anyhow!("Remote filename contains a newline: {:?}", filename));
        }

        Ok(Self {
            directory: directory.to_string(),
            filename: filename.to_string(),
        })
    }
}

/// Build the receiver command, `scp -t <directory>`, with the directory
/// quoted as a single POSIX shell word.
pub fn receiver_command(directory: &str) -> String {
    let escaped = shell_escape::unix::escape(Cow::Borrowed(directory));
    format!("{} -t {}", SCP_RECEIVER, escaped)
}

/// Collect the text of warning (`\x01`) and error (`\x02`) lines a receiver
/// printed on its output. Acknowledgment NULs are skipped.
///
/// Only used to make a failed exit status readable; the exit status itself
/// decides the outcome.
pub fn receiver_diagnostics(output: &[u8]) -> Option<String> {
    let messages: Vec<String> = output
        .split(|b| *b == b'\n')
        .map(|line| {
            let start = line.iter().position(|b| *b != 0).unwrap_or(line.len());
            &line[start..]
        })
        .filter_map(|line| match line.first() {
            Some(1) | Some(2) => {
                let text = String::from_utf8_lossy(&line[1..]).trim().to_string();
                (!text.is_empty()).then_some(text)
            }
            _ => None,
        })
        .collect();

    if messages.is_empty() {
        None
    } else {
        Some(messages.join("; "))
    }
}
