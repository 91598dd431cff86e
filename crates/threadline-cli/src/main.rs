use anyhow::Result;
use clap::{Parser, Subcommand};
use threadline_core::ThreadlinePaths;

mod commands;
mod ui;

#[derive(Parser)]
#[command(name = "threadline")]
#[command(about = "Conversation history, grouped by date.")]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Fetch the conversation list and print it grouped by date
    Sync {
        /// Crawl the whole list (bounded by the configured safety cap)
        #[arg(long, short)]
        all: bool,

        /// Page size for the first page (overrides config)
        #[arg(long)]
        limit: Option<usize>,
    },

    /// Manage the stored credential
    Token {
        #[command(subcommand)]
        command: TokenCommand,
    },

    /// Show which date group timestamps fall into
    Buckets {
        /// RFC 3339 timestamps to classify
        #[arg(value_name = "TIMESTAMPS", required = true)]
        timestamps: Vec<String>,

        /// Reference time (RFC 3339). Defaults to now, in local time.
        #[arg(long)]
        now: Option<String>,
    },
}

#[derive(Subcommand)]
enum TokenCommand {
    /// Store an Authorization header value ("Bearer ...")
    Set {
        #[arg(value_name = "VALUE")]
        value: String,
    },
    /// Show the stored credential (masked)
    Show,
    /// Delete the stored credential
    Clear,
}

#[tokio::main]
async fn main() -> Result<()> {
    // Initialize tracing for debug logs (hidden by default)
    tracing_subscriber::fmt()
        .with_writer(std::io::stderr)
        .with_env_filter(
            tracing_subscriber::EnvFilter::from_default_env()
                .add_directive(tracing::Level::WARN.into()),
        )
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Sync { all, limit } => commands::sync::run(all, limit).await,
        Commands::Token { command } => {
            let paths = ThreadlinePaths::from_env();
            match command {
                TokenCommand::Set { value } => commands::token::set(&paths, &value),
                TokenCommand::Show => commands::token::show(&paths),
                TokenCommand::Clear => commands::token::clear(&paths),
            }
        }
        Commands::Buckets { timestamps, now } => {
            commands::buckets::run(&timestamps, now.as_deref())
        }
    }
}
