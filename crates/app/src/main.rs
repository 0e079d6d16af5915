use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use progress_core::model::ProgressRecord;
use progress_sync::{
    ConfigError, CredentialSource, ManualLifecycle, ProgressSynchronizer, SyncConfig,
};
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::runtime::Handle;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

/// Time given to detached requests before the runtime shuts down.
const SHUTDOWN_GRACE: Duration = Duration::from_millis(500);

#[derive(Debug)]
enum ArgsError {
    MissingValue { flag: &'static str },
    UnknownArg(String),
    InvalidBaseUrl { raw: String },
}

impl fmt::Display for ArgsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ArgsError::MissingValue { flag } => write!(f, "{flag} requires a value"),
            ArgsError::UnknownArg(arg) => write!(f, "unknown argument: {arg}"),
            ArgsError::InvalidBaseUrl { raw } => write!(f, "invalid --base-url value: {raw}"),
        }
    }
}

impl std::error::Error for ArgsError {}

fn require_value(
    args: &mut impl Iterator<Item = String>,
    flag: &'static str,
) -> Result<String, ArgsError> {
    args.next().ok_or(ArgsError::MissingValue { flag })
}

fn print_usage() {
    eprintln!("Usage:");
    eprintln!("  cargo run -p app -- [--base-url <url>] [--token <token>]");
    eprintln!();
    eprintln!("Reads commands from stdin, one per line:");
    eprintln!("  {{\"subjectId\": \"L1\", \"elapsedSeconds\": 30}}   buffer a progress update");
    eprintln!("  flush                                       flush and wait for the result");
    eprintln!("  hide                                        simulate the app being hidden");
    eprintln!("  status                                      print pending count and stats");
    eprintln!("Ctrl-C simulates termination; end of input retires the synchronizer.");
    eprintln!();
    eprintln!("Environment:");
    eprintln!("  PROGRESS_API_BASE_URL, PROGRESS_API_TOKEN, PROGRESS_BEACON_MAX_BYTES,");
    eprintln!("  PROGRESS_BEACON_QUEUE, PROGRESS_TERMINATION_TRANSPORT, RUST_LOG");
}

struct Args {
    base_url: Option<String>,
    token: Option<String>,
}

impl Args {
    fn parse(args: &mut impl Iterator<Item = String>) -> Result<Self, ArgsError> {
        let mut base_url = None;
        let mut token = std::env::var("PROGRESS_API_TOKEN")
            .ok()
            .filter(|value| !value.trim().is_empty());

        while let Some(arg) = args.next() {
            match arg.as_str() {
                "--base-url" => {
                    let value = require_value(args, "--base-url")?;
                    if value.trim().is_empty() {
                        return Err(ArgsError::InvalidBaseUrl { raw: value });
                    }
                    base_url = Some(value);
                }
                "--token" => token = Some(require_value(args, "--token")?),
                "--help" | "-h" => {
                    print_usage();
                    std::process::exit(0);
                }
                _ => return Err(ArgsError::UnknownArg(arg)),
            }
        }

        Ok(Self { base_url, token })
    }

    fn config(&self) -> Result<SyncConfig, ConfigError> {
        SyncConfig::from_lookup(|key| match (key, &self.base_url) {
            ("PROGRESS_API_BASE_URL", Some(base_url)) => Some(base_url.clone()),
            _ => std::env::var(key).ok(),
        })
    }
}

#[derive(Debug, PartialEq)]
enum Command {
    Progress(Box<ProgressRecord>),
    Flush,
    Hide,
    Status,
}

impl Command {
    fn parse(line: &str) -> Result<Self, serde_json::Error> {
        match line {
            "flush" => Ok(Self::Flush),
            "hide" => Ok(Self::Hide),
            "status" => Ok(Self::Status),
            json => serde_json::from_str(json).map(|record| Self::Progress(Box::new(record))),
        }
    }
}

async fn run() -> Result<(), Box<dyn std::error::Error>> {
    let mut argv = std::env::args().skip(1);
    let args = Args::parse(&mut argv).map_err(|e| {
        eprintln!("{e}");
        print_usage();
        e
    })?;
    let config = args.config()?;
    info!(endpoint = %config.endpoint, termination = %config.termination, "starting progress sync");

    let token = args.token.clone();
    let credentials: Arc<dyn CredentialSource> = Arc::new(move || token.clone());
    let runtime = Handle::current();
    let sync = ProgressSynchronizer::from_config(&config, credentials, &runtime);
    let lifecycle = ManualLifecycle::new();
    sync.listen(&lifecycle, runtime);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else {
                    break;
                };
                let line = line.trim();
                if line.is_empty() {
                    continue;
                }
                match Command::parse(line) {
                    Ok(Command::Progress(record)) => sync.add_progress_item(*record),
                    Ok(Command::Flush) => println!("flushed: {}", sync.flush_progress().await),
                    Ok(Command::Hide) => lifecycle.emit_hidden(),
                    Ok(Command::Status) => {
                        println!("pending: {}", sync.pending_count());
                        println!("{:?}", sync.stats());
                    }
                    Err(err) => warn!(error = %err, "ignoring unreadable line"),
                }
            }
            signal = tokio::signal::ctrl_c() => {
                signal?;
                lifecycle.emit_terminating();
                tokio::time::sleep(SHUTDOWN_GRACE).await;
                break;
            }
        }
    }

    let pending = sync.pending_count();
    let accepted = sync.retire();
    info!(pending, accepted, "synchronizer retired");
    tokio::time::sleep(SHUTDOWN_GRACE).await;
    Ok(())
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_writer(std::io::stderr)
        .init();

    if let Err(err) = run().await {
        eprintln!("{err}");
        std::process::exit(2);
    }
}
