use std::path::Path;
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use clap::Parser;
use log::{info, warn, LevelFilter};
use simplelog::{ColorChoice, Config, TermLogger, TerminalMode};
use tokio::runtime::Runtime;

use scp_push::cli::{Args, Commands};
use scp_push::client::Client;
use scp_push::config::{expand_local_path, AuthMethod, ClientConfig};
use scp_push::constants::RUNTIME_SHUTDOWN_TIMEOUT_SECS;
use scp_push::scp::{Terminator, WriteErrorPolicy};

fn main() -> Result<()> {
    // Parse arguments
    let args = Args::parse();

    // Initialize logging
    initialize_logging(args.verbose)?;

    // Handle subcommands
    if let Some(cmd) = &args.command {
        return handle_subcommand(cmd);
    }

    let (source, remote_path) = args
        .transfer()
        .ok_or_else(|| anyhow!("Both SOURCE and REMOTE_PATH are required"))?;

    let config = load_config(&args)?;
    if config.endpoint.host.is_empty() {
        return Err(anyhow!("No remote host given (use --host, a config file or SCP_PUSH_HOST)"));
    }

    let runtime = Runtime::new().context("Failed to create tokio runtime")?;
    let result = runtime.block_on(run_transfer(config, source, remote_path, &args.mode));

    // Do not hang on an SSH thread still stuck in a blocking call
    runtime.shutdown_timeout(Duration::from_secs(RUNTIME_SHUTDOWN_TIMEOUT_SECS));
    result
}

/// Initialize logging with the specified verbosity level
fn initialize_logging(verbose: bool) -> Result<()> {
    let log_level = if verbose { LevelFilter::Debug } else { LevelFilter::Info };
    TermLogger::init(
        log_level,
        Config::default(),
        TerminalMode::Mixed,
        ColorChoice::Auto,
    )
    .context("Failed to initialize logger")?;
    Ok(())
}

fn handle_subcommand(cmd: &Commands) -> Result<()> {
    match cmd {
        Commands::InitConfig { path } => {
            info!("Creating sample configuration file at {}", path.display());
            ClientConfig::sample().save_to_yaml_file(path)?;
            Ok(())
        }
    }
}

/// Layer configuration: file, then environment, then command line
fn load_config(args: &Args) -> Result<ClientConfig> {
    let mut config = match &args.config {
        Some(path) => ClientConfig::from_yaml_file(path)?,
        None => ClientConfig::default(),
    };
    config.apply_env_overrides()?;

    if let Some(host) = &args.host {
        config.endpoint.host = host.clone();
    }
    if let Some(port) = args.port {
        config.endpoint.port = port;
    }
    if let Some(user) = &args.user {
        config.endpoint.username = user.clone();
    }
    if let Some(identity) = &args.identity {
        config.endpoint.auth = AuthMethod::PrivateKey {
            path: expand_local_path(&identity.to_string_lossy()),
            passphrase: None,
        };
    }
    if let Some(var) = &args.password_env {
        let password = std::env::var(var).context(format!("Environment variable {} is not set", var))?;
        config.endpoint.auth = AuthMethod::Password { password };
    }

    if args.bare_nul {
        config.transfer.terminator = Terminator::Nul;
    }
    if args.best_effort {
        config.transfer.write_errors = WriteErrorPolicy::BestEffort;
    }
    if let Some(timeout) = args.timeout {
        config.transfer.timeout_secs = Some(timeout);
    }

    Ok(config)
}

async fn run_transfer(
    config: ClientConfig,
    source: &str,
    remote_path: &str,
    permissions: &str,
) -> Result<()> {
    let mut client = Client::from_config(&config);

    let cancel = client.cancellation_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, cancelling transfer");
            cancel.cancel();
        }
    });

    client.connect().await?;

    let result = if source == "-" {
        client
            .copy_stream(tokio::io::stdin(), remote_path, permissions)
            .await
    } else {
        client
            .copy_from_path(Path::new(source), remote_path, permissions)
            .await
    };

    if let Err(e) = client.close().await {
        warn!("Failed to close connection cleanly: {:#}", e);
    }
    result
}
