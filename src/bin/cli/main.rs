mod app;
mod commands;
mod render;

use std::io::IsTerminal;
use std::path::PathBuf;

use clap::{Parser, Subcommand};

#[derive(Parser)]
#[command(name = "recall-cli", about = "Spaced-repetition flashcards", version)]
struct Cli {
    /// Study as this user (default: $USER)
    #[arg(long, global = true)]
    user: Option<String>,

    /// Path to config.toml
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Output format
    #[arg(long, global = true, default_value = "plain")]
    format: OutputFormat,

    /// Disable ANSI colors
    #[arg(long, global = true)]
    no_color: bool,

    #[command(subcommand)]
    command: Command,
}

#[derive(Clone, Debug, clap::ValueEnum)]
pub enum OutputFormat {
    Plain,
    Json,
}

#[derive(Subcommand)]
enum Command {
    /// Create, list and import decks
    #[command(subcommand)]
    Deck(DeckCommand),

    /// Study a deck interactively
    Study {
        /// Deck name (case-insensitive prefix match)
        deck: String,
        /// Replay the cards already studied today
        #[arg(long)]
        extra: bool,
    },

    /// Show today's progress for a deck
    Status {
        /// Deck name
        deck: String,
    },

    /// Push local progress for a deck to the remote store
    Sync {
        /// Deck name
        deck: String,
    },

    /// Forget all progress for a deck
    Clear {
        /// Deck name
        deck: String,
        /// Do not ask for confirmation
        #[arg(long)]
        yes: bool,
    },
}

#[derive(Subcommand)]
enum DeckCommand {
    /// Create an empty deck
    Create {
        name: String,
        #[arg(long)]
        description: Option<String>,
        /// Daily cap on new cards (default from config)
        #[arg(long)]
        new_per_day: Option<usize>,
    },

    /// List decks with card counts
    List,

    /// Add cards from a CSV file (front,back[,sortOrder])
    Import {
        /// Deck name
        deck: String,
        /// CSV file to read
        file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    env_logger::init();

    let cli = Cli::parse();
    let use_color = !cli.no_color && std::io::stdout().is_terminal();
    let app = app::App::new(cli.config.as_deref(), cli.user.as_deref()).await?;

    match cli.command {
        Command::Deck(DeckCommand::Create {
            name,
            description,
            new_per_day,
        }) => {
            commands::deck::run_create(&app, name, description, new_per_day, &cli.format).await?;
        }
        Command::Deck(DeckCommand::List) => {
            commands::deck::run_list(&app, &cli.format, use_color).await?;
        }
        Command::Deck(DeckCommand::Import { deck, file }) => {
            commands::deck::run_import(&app, &deck, &file, &cli.format).await?;
        }
        Command::Study { deck, extra } => {
            commands::study::run(&app, &deck, extra, use_color).await?;
        }
        Command::Status { deck } => {
            commands::status::run(&app, &deck, &cli.format, use_color).await?;
        }
        Command::Sync { deck } => {
            commands::sync::run(&app, &deck, &cli.format, use_color).await?;
        }
        Command::Clear { deck, yes } => {
            commands::clear::run(&app, &deck, yes, &cli.format).await?;
        }
    }

    Ok(())
}
