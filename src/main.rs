// Entrypoint for the CLI application.
// - Keeps `main` small: parse arguments, load config, pick a credential
//   store and hand a session manager to the command or the shell.

use anyhow::Context;
use bsctl::api::XrpcClient;
use bsctl::config::Config;
use bsctl::session::SessionManager;
use bsctl::store::{CredentialStore, FileStore, LocalStorageStore, MemoryStorage};
use bsctl::ui::{self, Sessions, Shell};
use clap::{Parser, Subcommand};
use crossterm::style::Stylize;
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "bsctl", version, about = "Command-line client for Bluesky")]
struct Args {
    /// Profile name; selects config-<profile>.json and <profile>- auth files.
    #[arg(long, global = true, default_value = "")]
    profile: String,

    /// Path to the config file.
    #[arg(long, global = true, env = "BSKY_CONFIG")]
    config: Option<PathBuf>,

    /// Log progress to stderr.
    #[arg(short, long, global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    /// Create or refresh the session and save it.
    Login,
    /// Follow one account by DID, at:// URI or handle.
    Follow { target: String },
    /// List the accounts a user follows (default: yourself).
    Follows { handle: Option<String> },
    /// Follow every account that <handle> follows.
    FollowAll { handle: String },
    /// Show the home timeline.
    Timeline {
        #[arg(short = 'n', long, default_value_t = 30)]
        count: u32,
    },
    /// Publish a post.
    Post {
        #[arg(required = true)]
        text: Vec<String>,
    },
    /// Interactive command shell.
    Shell {
        /// Keep credentials in memory only.
        #[arg(long)]
        ephemeral: bool,
    },
}

fn init_logging(verbose: bool) {
    let default = if verbose { "info" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn main() {
    let args = Args::parse();
    init_logging(args.verbose);

    if let Err(e) = run(args) {
        tracing::error!(error = ?e, "command failed");
        eprintln!("{} {:#}", "Error:".red().bold(), e);
        std::process::exit(1);
    }
}

fn run(args: Args) -> anyhow::Result<()> {
    let config = Config::load(args.config.as_deref(), &args.profile)?;

    let ephemeral = matches!(args.command, Command::Shell { ephemeral: true });
    let store: Box<dyn CredentialStore> = if ephemeral {
        Box::new(LocalStorageStore::new(MemoryStorage::default()))
    } else {
        Box::new(FileStore::new(&config.dir))
    };
    let remote = XrpcClient::anonymous(&config.host).context("invalid host")?;
    let sessions: Sessions = SessionManager::new(store, remote);

    let mut out = std::io::stdout().lock();
    match args.command {
        Command::Login => {
            let client = ui::connect(&sessions, &config)?;
            if let Some(cred) = client.credential() {
                println!("logged in as {} ({})", cred.handle, cred.did);
            }
        }
        Command::Follow { target } => {
            let client = ui::connect(&sessions, &config)?;
            ui::cmd_follow(&client, &target, &mut out)?;
        }
        Command::Follows { handle } => {
            let client = ui::connect(&sessions, &config)?;
            let handle = handle.unwrap_or_else(|| config.handle.clone());
            ui::cmd_follows(&client, &handle, &mut out)?;
        }
        Command::FollowAll { handle } => {
            let client = ui::connect(&sessions, &config)?;
            ui::cmd_follow_all(&client, &handle, &mut out)?;
        }
        Command::Timeline { count } => {
            let client = ui::connect(&sessions, &config)?;
            ui::cmd_timeline(&client, count, &mut out)?;
        }
        Command::Post { text } => {
            let client = ui::connect(&sessions, &config)?;
            ui::cmd_post(&client, &text.join(" "), &mut out)?;
        }
        Command::Shell { .. } => {
            drop(out);
            Shell::new(config, sessions).run()?;
        }
    }
    Ok(())
}
