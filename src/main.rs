//! Watchleft - remaining watch time across open video tabs
//!
//! Runs the daemon that the browser bridge and page extractors talk to, and
//! the thin clients for the popup and the display toggle.

use clap::Parser;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::warn;
use tracing_subscriber::{EnvFilter, fmt};
use watchleft::persist::{FileStore, MemoryStore};
use watchleft::{TabId, client, config, protocol, server};

#[derive(Parser)]
#[command(name = "watchleft", about = "Remaining watch time across open video tabs")]
struct Cli {
    /// Increase verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    verbose: u8,

    /// Daemon socket (defaults to $XDG_RUNTIME_DIR/watchleft.sock)
    #[arg(long, global = true)]
    socket: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(clap::Subcommand)]
enum Command {
    /// Run the daemon (the default)
    Run,
    /// Run a page extractor for one tab (reads page events as JSON lines from stdin)
    Page {
        /// Tab the page belongs to
        #[arg(long)]
        tab: u64,
    },
    /// Print every tracked video and the total remaining time
    Popup {
        /// Print the raw snapshot as JSON
        #[arg(long)]
        json: bool,
    },
    /// Show or hide the badge total
    Toggle,
    /// Re-check every open tab against the recorded ones
    Reconcile,
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        2 => "debug",
        _ => "trace",
    };
    let filter =
        EnvFilter::try_from_env("WATCHLEFT_LOG").unwrap_or_else(|_| EnvFilter::new(default_level));
    fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let socket = cli.socket.unwrap_or_else(protocol::socket_path);
    let config = config::load_config();

    match cli.command.unwrap_or(Command::Run) {
        Command::Run => {
            let result = match FileStore::default_location() {
                Some(store) => server::run(&socket, config, store).await,
                None => {
                    warn!("No data directory; state will not be persisted");
                    server::run(&socket, config, MemoryStore).await
                }
            };
            if let Err(e) = result {
                eprintln!("watchleft: cannot serve on {}: {e}", socket.display());
                return ExitCode::FAILURE;
            }
        }
        Command::Page { tab } => {
            let stdin = tokio::io::BufReader::new(tokio::io::stdin());
            if let Err(e) = client::run_page(&socket, TabId(tab), &config, stdin).await {
                eprintln!("watchleft: page extractor stopped: {e}");
                return ExitCode::FAILURE;
            }
        }
        Command::Popup { json } => match client::request_popup(&socket).await {
            Ok(snapshot) if json => match serde_json::to_string_pretty(&snapshot) {
                Ok(text) => println!("{text}"),
                Err(e) => {
                    eprintln!("watchleft: {e}");
                    return ExitCode::FAILURE;
                }
            },
            Ok(snapshot) => print!("{}", client::render_popup(&snapshot)),
            Err(e) => {
                eprintln!("watchleft: daemon not reachable: {e}");
                return ExitCode::FAILURE;
            }
        },
        Command::Toggle => match client::request_toggle(&socket).await {
            Ok(enabled) => println!("Badge {}", if enabled { "shown" } else { "hidden" }),
            Err(e) => {
                eprintln!("watchleft: daemon not reachable: {e}");
                return ExitCode::FAILURE;
            }
        },
        Command::Reconcile => {
            if let Err(e) = client::request_reconcile(&socket).await {
                eprintln!("watchleft: daemon not reachable: {e}");
                return ExitCode::FAILURE;
            }
        }
    }
    ExitCode::SUCCESS
}
