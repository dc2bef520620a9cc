use anyhow::Result;
use clap::{Parser, Subcommand};
use collabd::{config::DaemonConfig, ipc, storage::Storage, AppContext};
use std::sync::Arc;
use tracing::info;

#[derive(Parser)]
#[command(
    name = "collabd",
    about = "CollabHub daemon — team collaboration backend with live project updates",
    version
)]
struct Args {
    #[command(subcommand)]
    command: Option<Command>,

    /// JSON-RPC WebSocket server port
    #[arg(long, env = "COLLABD_PORT")]
    port: Option<u16>,

    /// Data directory for config and the SQLite database
    #[arg(long, env = "COLLABD_DATA_DIR")]
    data_dir: Option<std::path::PathBuf>,

    /// Log level (trace, debug, info, warn, error)
    #[arg(long, env = "COLLABD_LOG")]
    log: Option<String>,

    /// Bind address for the WebSocket server (default: 127.0.0.1; use 0.0.0.0 for LAN access)
    #[arg(long, env = "COLLABD_BIND")]
    bind_address: Option<String>,

    /// Write logs to this file path (rotated daily). Optional.
    #[arg(long, env = "COLLABD_LOG_FILE")]
    log_file: Option<std::path::PathBuf>,
}

#[derive(Subcommand)]
enum Command {
    /// Start the daemon server (default when no subcommand given).
    Serve,
    /// Manage API tokens.
    Token {
        #[command(subcommand)]
        action: TokenAction,
    },
}

#[derive(Subcommand)]
enum TokenAction {
    /// Generate a bearer token for a user and print it once.
    ///
    /// The daemon stores only the SHA-256 fingerprint; production token
    /// issuance belongs to the external identity service — this command is
    /// the local provisioning hook.
    Add {
        /// Opaque user id the token authenticates as.
        user_id: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    match args.command {
        Some(Command::Token { action }) => {
            let config = DaemonConfig::new(args.port, args.data_dir, args.log, args.bind_address);
            run_token_command(action, &config).await?;
        }
        None | Some(Command::Serve) => {
            run_server(
                args.port,
                args.data_dir,
                args.log,
                args.bind_address,
                args.log_file,
            )
            .await?;
        }
    }

    Ok(())
}

async fn run_server(
    port: Option<u16>,
    data_dir: Option<std::path::PathBuf>,
    log: Option<String>,
    bind_address: Option<String>,
    log_file: Option<std::path::PathBuf>,
) -> Result<()> {
    let config = DaemonConfig::new(port, data_dir, log, bind_address);
    let _log_guard = setup_logging(&config.log, log_file.as_deref(), &config.log_format);

    info!(
        version = env!("CARGO_PKG_VERSION"),
        data_dir = %config.data_dir.display(),
        "starting collabd"
    );

    let storage = Storage::new(&config.data_dir).await?;
    let ctx = Arc::new(AppContext::new(config, storage));

    ipc::run(ctx).await
}

async fn run_token_command(action: TokenAction, config: &DaemonConfig) -> Result<()> {
    match action {
        TokenAction::Add { user_id } => {
            let storage = Storage::new(&config.data_dir).await?;
            let token = uuid::Uuid::new_v4().to_string().replace('-', "");
            storage.register_token(&user_id, &token).await?;
            // Printed exactly once — only the hash is stored.
            println!("{token}");
        }
    }
    Ok(())
}

/// Initialize the tracing subscriber.
/// If `log_file` is set, logs go to both stdout and a daily-rolling file.
/// Returns a `WorkerGuard` that must stay alive for the process lifetime.
///
/// `log_format` may be `"pretty"` (default, human-readable compact format)
/// or `"json"` (structured JSON for log aggregators).
fn setup_logging(
    log_level: &str,
    log_file: Option<&std::path::Path>,
    log_format: &str,
) -> Option<tracing_appender::non_blocking::WorkerGuard> {
    use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

    let use_json = log_format == "json";

    if let Some(path) = log_file {
        let dir = path.parent().unwrap_or_else(|| std::path::Path::new("."));
        let filename = path
            .file_name()
            .unwrap_or_else(|| std::ffi::OsStr::new("collabd.log"));

        // Ensure the directory exists before tracing-appender tries to open it.
        if let Err(e) = std::fs::create_dir_all(dir) {
            // Fall back to stdout-only — don't panic on a bad log path.
            eprintln!(
                "warn: could not create log directory '{}': {e} — falling back to stdout",
                dir.display()
            );
            if use_json {
                tracing_subscriber::fmt().json().with_env_filter(log_level).init();
            } else {
                tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
            }
            return None;
        }

        let appender = tracing_appender::rolling::daily(dir, filename);
        let (non_blocking, guard) = tracing_appender::non_blocking(appender);

        if use_json {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().json())
                .with(fmt::layer().json().with_writer(non_blocking))
                .init();
        } else {
            tracing_subscriber::registry()
                .with(EnvFilter::new(log_level))
                .with(fmt::layer().compact())
                .with(fmt::layer().with_writer(non_blocking))
                .init();
        }

        Some(guard)
    } else if use_json {
        tracing_subscriber::fmt().json().with_env_filter(log_level).init();
        None
    } else {
        tracing_subscriber::fmt().with_env_filter(log_level).compact().init();
        None
    }
}
