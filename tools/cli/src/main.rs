//! SkyBucket CLI - a command-line host for the storage client facade.
//!
//! Each invocation points a client at one reference, dispatches a single
//! operation under the response identifier `cli`, waits for it to resolve
//! and prints the outcome as JSON.

mod config;

use anyhow::{Context, Result};
use chrono::{Duration, Utc};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{debug, info};
use tracing_subscriber::EnvFilter;

use skybucket_client::{
    AuthGate, OperationId, PendingOperation, StorageClient, TokenSession, Tokens, UploadSource,
};
use skybucket_common::ErrorKind;
use skybucket_storage::create_default_registry;

use crate::config::HostConfig;

/// Response identifier every command publishes under.
const RESPONSE_ID: &str = "cli";

#[derive(Parser)]
#[command(name = "skybucket")]
#[command(about = "SkyBucket - reference-scoped object storage client")]
#[command(version)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Configuration file (JSON).
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Access token of the signed-in user (falls back to SKYBUCKET_TOKEN).
    #[arg(short, long)]
    token: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Upload a local file.
    Upload {
        /// Local file to upload.
        #[arg(short, long)]
        source: PathBuf,

        /// Destination reference.
        #[arg(short, long)]
        dest: String,
    },

    /// Print a download locator for an object.
    Download {
        /// Object reference.
        path: String,
    },

    /// Delete an object.
    Delete {
        /// Object reference.
        path: String,
    },

    /// List names under a reference.
    List {
        /// Directory-like reference (default: root).
        #[arg(default_value = "")]
        path: String,

        /// Include everything below the reference.
        #[arg(short, long)]
        recursive: bool,
    },

    /// Show object metadata.
    Stat {
        /// Object reference.
        path: String,
    },
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    match run(cli).await {
        Ok(op) => match &op.error {
            None => ExitCode::SUCCESS,
            Some(err) => {
                eprintln!("Error: {}", err);
                exit_code(err.kind)
            }
        },
        Err(e) => {
            eprintln!("Error: {:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn init_logging(verbose: bool) {
    let filter = if verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .compact()
        .init();
}

fn exit_code(kind: ErrorKind) -> ExitCode {
    match kind {
        ErrorKind::NotFound => ExitCode::from(2),
        ErrorKind::PermissionDenied => ExitCode::from(3),
        ErrorKind::Network => ExitCode::from(4),
        ErrorKind::InvalidArgument => ExitCode::from(5),
        ErrorKind::AlreadyExists | ErrorKind::Internal => ExitCode::FAILURE,
    }
}

/// Build the session from the command line or the environment.
fn session(token: Option<String>) -> Arc<TokenSession> {
    let session = TokenSession::new();
    let token = token.or_else(|| std::env::var("SKYBUCKET_TOKEN").ok());
    if let Some(access_token) = token.filter(|t| !t.is_empty()) {
        session.sign_in(Tokens {
            user_id: "cli".to_string(),
            access_token,
            expires_at: Utc::now() + Duration::hours(1),
        });
    }
    Arc::new(session)
}

async fn run(cli: Cli) -> Result<PendingOperation> {
    let mut host = HostConfig::load(cli.config.as_deref())?;
    if let Commands::List { recursive: true, .. } = &cli.command {
        host.client.listing.recursive = true;
    }

    let backend = create_default_registry()
        .resolve(&host.backend, host.resolved_backend_config()?)
        .with_context(|| format!("Failed to open backend '{}'", host.backend))?;
    info!("Using {} backend", backend.name());

    let gate = AuthGate::new(session(cli.token));
    let client = StorageClient::builder()
        .backend(backend)
        .auth(gate.clone())
        .config(host.client)
        .build()
        .context("Failed to create storage client")?;

    let id = gate
        .when_signed_in(|| dispatch(&client, cli.command))
        .context("Not signed in: pass --token or set SKYBUCKET_TOKEN")?;
    debug!("Dispatched operation {}", id);

    client.settle().await;
    let op = client
        .registry()
        .resolved(RESPONSE_ID)
        .await
        .context("Operation produced no outcome")?;

    println!("{}", serde_json::to_string_pretty(&op)?);
    Ok(op)
}

fn dispatch(client: &StorageClient, command: Commands) -> OperationId {
    match command {
        Commands::Upload { source, dest } => {
            client.set_reference(dest);
            client.upload_file(UploadSource::file(source), Some(RESPONSE_ID))
        }
        Commands::Download { path } => {
            client.set_reference(path);
            client.download_file(Some(RESPONSE_ID))
        }
        Commands::Delete { path } => {
            client.set_reference(path);
            client.delete_file(Some(RESPONSE_ID))
        }
        Commands::List { path, .. } => {
            client.set_reference(path);
            client.list_files(Some(RESPONSE_ID))
        }
        Commands::Stat { path } => {
            client.set_reference(path);
            client.get_metadata(Some(RESPONSE_ID))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_upload() {
        let cli = Cli::parse_from([
            "skybucket", "--token", "t", "upload", "--source", "/tmp/x.png", "--dest", "a/b.png",
        ]);
        assert_eq!(cli.token.as_deref(), Some("t"));
        match cli.command {
            Commands::Upload { source, dest } => {
                assert_eq!(source, PathBuf::from("/tmp/x.png"));
                assert_eq!(dest, "a/b.png");
            }
            _ => panic!("expected upload"),
        }
    }

    #[test]
    fn test_session_from_token() {
        assert!(AuthGate::new(session(Some("t".to_string()))).is_signed_in());
        assert!(!AuthGate::new(session(Some(String::new()))).is_signed_in());
    }

    #[tokio::test]
    async fn test_run_against_local_backend() {
        let temp = tempfile::TempDir::new().unwrap();
        let config_path = temp.path().join("config.json");
        let root = temp.path().join("objects");
        std::fs::write(
            &config_path,
            serde_json::json!({ "backend": "local", "backend_config": { "root": root } })
                .to_string(),
        )
        .unwrap();
        let source = temp.path().join("hello.txt");
        std::fs::write(&source, b"hello").unwrap();

        let cli = Cli::parse_from([
            "skybucket",
            "--token",
            "t",
            "--config",
            config_path.to_str().unwrap(),
            "upload",
            "--source",
            source.to_str().unwrap(),
            "--dest",
            "docs/hello.txt",
        ]);
        let op = run(cli).await.unwrap();
        assert!(op.succeeded());
        assert!(root.join("docs/hello.txt").is_file());

        let cli = Cli::parse_from([
            "skybucket",
            "--config",
            config_path.to_str().unwrap(),
            "stat",
            "docs/hello.txt",
        ]);
        // No token and no SKYBUCKET_TOKEN in the test environment.
        if std::env::var("SKYBUCKET_TOKEN").is_err() {
            assert!(run(cli).await.is_err());
        }
    }
}
