//! wlsync CLI
//!
//! Keeps Minecraft server whitelists in sync with guild roles.
//!
//! # Commands
//!
//! - `sync` - Run one reconciliation pass now
//! - `run` - Keep whitelists in sync until Ctrl-C
//! - `link` / `unlink` - Manage linked accounts
//! - `ban` / `unban` - Exclude an identity regardless of roles
//! - `info` - Show one identity
//! - `dump` - Print the whole state with display names
//! - `migrate` - Replace legacy names by UUIDs

mod commands;
mod context;
mod snapshot;

use clap::{Args, Parser, Subcommand};
use commands::accounts::Lookup;
use context::{Context, Paths};
use std::path::PathBuf;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

/// Minecraft whitelist synchronization tools.
#[derive(Parser)]
#[command(name = "wlsync")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Path to the configuration file
    #[arg(global = true, short, long, default_value = "config.json")]
    config: PathBuf,

    /// Path to the guild member snapshot
    #[arg(global = true, long, default_value = "members.json")]
    members: PathBuf,

    /// Path to the profile name cache
    #[arg(global = true, long, default_value = "usercache.json")]
    profiles: PathBuf,

    /// Enable verbose output
    #[arg(global = true, short, long)]
    verbose: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one reconciliation pass now
    Sync,

    /// Keep whitelists in sync until Ctrl-C
    Run {
        /// Also request a pass every this many seconds
        #[arg(short, long, value_parser = clap::value_parser!(u64).range(1..))]
        interval: Option<u64>,
    },

    /// Link a Minecraft account to an identity
    Link {
        /// Identity id
        user: String,
        /// Minecraft name
        name: String,
    },

    /// Unlink one account from an identity
    Unlink {
        /// Identity id
        user: String,
        /// Account UUID, dashed or not
        uuid: String,
    },

    /// Unlink every account of an identity
    Remove {
        /// Identity id
        user: String,
    },

    /// Ban an identity
    Ban {
        /// Identity id
        user: String,
    },

    /// Lift a ban
    Unban {
        /// Identity id
        user: String,
    },

    /// Show one identity
    Info {
        #[command(flatten)]
        target: InfoTarget,

        /// Print JSON instead of text
        #[arg(short, long)]
        json: bool,
    },

    /// Print the whole state with display names
    Dump {
        /// Write to this file instead of stdout
        #[arg(short, long)]
        output: Option<PathBuf>,
    },

    /// Replace legacy names in the store by UUIDs
    Migrate,

    /// Show version information
    Version,
}

#[derive(Args)]
#[group(required = true, multiple = false)]
struct InfoTarget {
    /// Identity id
    #[arg(long)]
    user: Option<String>,

    /// Linked account UUID
    #[arg(long)]
    uuid: Option<String>,

    /// Minecraft name
    #[arg(long)]
    name: Option<String>,
}

impl InfoTarget {
    fn lookup(self) -> Option<Lookup> {
        self.user
            .map(Lookup::User)
            .or(self.uuid.map(Lookup::Uuid))
            .or(self.name.map(Lookup::Name))
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize logging, RUST_LOG wins over --verbose
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if cli.verbose {
            EnvFilter::new("debug")
        } else {
            EnvFilter::new("info")
        }
    });
    tracing_subscriber::fmt().with_env_filter(filter).init();

    if let Commands::Version = cli.command {
        println!("wlsync CLI v{}", env!("CARGO_PKG_VERSION"));
        return Ok(());
    }

    let ctx = Context::open(&Paths {
        config: &cli.config,
        members: &cli.members,
        profiles: &cli.profiles,
    })?;

    match cli.command {
        Commands::Sync => commands::sync::run_once(&ctx).await?,
        Commands::Run { interval } => {
            commands::sync::run_daemon(&ctx, interval.map(Duration::from_secs)).await?
        }
        Commands::Link { user, name } => commands::accounts::link(&ctx, &user, &name).await?,
        Commands::Unlink { user, uuid } => {
            commands::accounts::unlink(&ctx, &user, Some(&uuid)).await?
        }
        Commands::Remove { user } => commands::accounts::unlink(&ctx, &user, None).await?,
        Commands::Ban { user } => commands::accounts::set_banned(&ctx, &user, true).await?,
        Commands::Unban { user } => commands::accounts::set_banned(&ctx, &user, false).await?,
        Commands::Info { target, json } => {
            let lookup = target.lookup().ok_or("One of --user, --uuid or --name is required")?;
            commands::accounts::info(&ctx, lookup, json).await?
        }
        Commands::Dump { output } => commands::dump::run(&ctx, output.as_deref()).await?,
        Commands::Migrate => commands::dump::migrate(&ctx).await?,
        Commands::Version => {}
    }

    Ok(())
}
