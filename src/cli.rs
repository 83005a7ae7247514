use clap::{Parser, Subcommand};
use std::path::PathBuf;

use crate::constants::DEFAULT_PERMISSIONS;

/// Command-line arguments for scp-push.
///
/// Connection settings given here override the configuration file and the
/// `SCP_PUSH_*` environment variables.
#[derive(Parser, Debug)]
#[clap(name = "scp-push", about = "Push a file to a remote host over SCP")]
pub struct Args {
    /// Local file to send, or "-" to read from stdin
    pub source: Option<String>,

    /// Destination path on the remote host
    pub remote_path: Option<String>,

    /// Path to configuration YAML file
    #[clap(short = 'c', long)]
    pub config: Option<PathBuf>,

    /// Remote host
    #[clap(long)]
    pub host: Option<String>,

    /// Remote SSH port
    #[clap(short, long)]
    pub port: Option<u16>,

    /// Username for authentication
    #[clap(short, long)]
    pub user: Option<String>,

    /// Private key file for authentication
    #[clap(short = 'i', long)]
    pub identity: Option<PathBuf>,

    /// Read the password from this environment variable
    #[clap(long)]
    pub password_env: Option<String>,

    /// Permissions of the remote file (octal)
    #[clap(short, long, default_value = DEFAULT_PERMISSIONS)]
    pub mode: String,

    /// Terminate the payload with a bare NUL instead of NUL + newline
    #[clap(long)]
    pub bare_nul: bool,

    /// Ignore local write errors and let the remote exit status decide
    #[clap(long)]
    pub best_effort: bool,

    /// Abort the transfer after this many seconds
    #[clap(long)]
    pub timeout: Option<u64>,

    /// Verbose logging
    #[clap(short, long)]
    pub verbose: bool,

    #[clap(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Write a sample configuration file
    InitConfig {
        /// Path to write the configuration file
        #[clap(default_value = "scp-push.yaml")]
        path: PathBuf,
    },
}

impl Args {
    /// Source and destination, required unless a subcommand runs
    pub fn transfer(&self) -> Option<(&str, &str)> {
        match (&self.source, &self.remote_path) {
            (Some(source), Some(remote)) => Some((source.as_str(), remote.as_str())),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_transfer_args() {
        let args = Args::parse_from([
            "scp-push", "--host", "files.example.com", "-u", "deploy", "-m", "0600",
            "--bare-nul", "report.csv", "/srv/in/report.csv",
        ]);
        assert_eq!(args.transfer(), Some(("report.csv", "/srv/in/report.csv")));
        assert_eq!(args.mode, "0600");
        assert!(args.bare_nul);
        assert!(!args.best_effort);
        assert!(args.command.is_none());
    }

    #[test]
    fn test_defaults() {
        let args = Args::parse_from(["scp-push", "-", "/tmp/stdin.txt"]);
        assert_eq!(args.mode, "0644");
        assert_eq!(args.port, None);
        assert_eq!(args.transfer(), Some(("-", "/tmp/stdin.txt")));
    }

    #[test]
    fn test_init_config_subcommand() {
        let args = Args::parse_from(["scp-push", "init-config", "/tmp/cfg.yaml"]);
        match &args.command {
            Some(Commands::InitConfig { path }) => assert_eq!(path, &PathBuf::from("/tmp/cfg.yaml")),
            other => panic!("unexpected command: {:?}", other),
        }
        assert_eq!(args.transfer(), None);
    }
}
