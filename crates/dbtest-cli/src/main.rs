mod cmd;
mod output;

use clap::{ArgAction, Parser, Subcommand};
use cmd::{local::LocalSubcommand, ConnectionArgs};
use dbtest_core::{DbTestError, Settings};
use std::path::PathBuf;

#[derive(Parser)]
#[command(
    name = "dbtest",
    about = "Throwaway MySQL databases for test suites",
    version,
    propagate_version = true
)]
struct Cli {
    /// Settings file (YAML)
    #[arg(long, global = true, env = "DBTEST_CONFIG")]
    config: Option<PathBuf>,

    /// Output as JSON
    #[arg(long, global = true, short = 'j')]
    json: bool,

    /// More logging (-v info, -vv debug, -vvv trace)
    #[arg(short, long, global = true, action = ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Print a fresh database name
    Name {
        #[arg(long)]
        stem: Option<String>,
        #[arg(long)]
        suffix: Option<String>,
        #[arg(long)]
        separator: Option<String>,
    },

    /// Create a test database and load SQL files into it
    Create {
        #[command(flatten)]
        connection: ConnectionArgs,

        /// Drop the database after this ISO-8601 duration (default PT6H)
        #[arg(long, conflicts_with = "no_self_destruct")]
        self_destruct: Option<String>,

        /// Keep the database until dropped explicitly
        #[arg(long)]
        no_self_destruct: bool,

        /// SQL files, loaded in order
        files: Vec<PathBuf>,
    },

    /// Drop a test database
    Drop {
        #[command(flatten)]
        connection: ConnectionArgs,
    },

    /// Manage a private local mysqld
    Local {
        #[command(subcommand)]
        subcommand: LocalSubcommand,
    },
}

fn main() {
    let cli = Cli::parse();

    let level = match cli.verbose {
        0 => tracing::Level::WARN,
        1 => tracing::Level::INFO,
        2 => tracing::Level::DEBUG,
        _ => tracing::Level::TRACE,
    };

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env().add_directive(level.into()),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let result = Settings::load(cli.config.as_deref())
        .map_err(anyhow::Error::from)
        .and_then(|settings| dispatch(cli.command, settings, cli.json));

    if let Err(e) = result {
        match e.chain().find_map(|c| c.downcast_ref::<DbTestError>()) {
            Some(db) => eprintln!("error [{}]: {e:#}", db.tag()),
            None => eprintln!("error: {e:#}"),
        }
        std::process::exit(1);
    }
}

fn dispatch(command: Commands, settings: Settings, json: bool) -> anyhow::Result<()> {
    match command {
        Commands::Name {
            stem,
            suffix,
            separator,
        } => cmd::name::run(
            stem.as_deref(),
            suffix.as_deref(),
            separator.as_deref(),
            json,
        ),
        Commands::Create {
            connection,
            self_destruct,
            no_self_destruct,
            files,
        } => cmd::create::run(
            settings.provision,
            connection,
            self_destruct,
            no_self_destruct,
            &files,
            json,
        ),
        Commands::Drop { connection } => cmd::drop::run(settings.provision, connection, json),
        Commands::Local { subcommand } => cmd::local::run(settings.local, subcommand, json),
    }
}
