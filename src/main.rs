//! # IR Copilot CLI (`copilot`)
//!
//! Answers investor-relations questions about one company from a local
//! document corpus, grounding each answer in retrieved snippets.
//!
//! ## Usage
//!
//! ```bash
//! copilot --config ./copilot.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `copilot chat` | Interactive conversation with streamed answers |
//! | `copilot ask "<question>"` | One-shot question |
//! | `copilot retrieve "<question>"` | Show the top-k snippets, no completion call |
//! | `copilot index` | Build the index and print its size |
//! | `copilot serve` | Start the HTTP API |
//! | `copilot completions <shell>` | Print a shell completion script |
//!
//! ## Examples
//!
//! ```bash
//! # Ask with the retrieved context shown
//! copilot ask "What was revenue last quarter?" --show-context
//!
//! # Check what the index returns for a question
//! copilot retrieve "gross margin" --k 5
//! ```

use clap::{CommandFactory, Parser, Subcommand};
use std::path::PathBuf;
use tracing_subscriber::EnvFilter;

use ir_copilot::config::{self, Config};
use ir_copilot::{chat, inspect, server};

/// IR Copilot: a retrieval-augmented investor-relations assistant.
///
/// Without `--config`, built-in defaults are used: documents under
/// `./data`, local embeddings, and `gpt-4o` via the OpenAI API
/// (`OPENAI_API_KEY`, also read from `.env`).
#[derive(Parser)]
#[command(
    name = "copilot",
    about = "A retrieval-augmented investor-relations assistant",
    version
)]
struct Cli {
    /// Path to configuration file (TOML).
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Increase log verbosity (-v info, -vv debug). `RUST_LOG` overrides.
    #[arg(short, long, global = true, action = clap::ArgAction::Count)]
    verbose: u8,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive conversation.
    ///
    /// Type a question and press enter; `/reset` clears the history,
    /// `/context` toggles the retrieved snippets, `/exit` quits.
    Chat {
        /// Print the retrieved snippets before each answer.
        #[arg(long)]
        show_context: bool,
    },

    /// Ask a single question and print the answer.
    ///
    /// Exits with status 1 if no answer could be obtained.
    Ask {
        question: String,

        /// Print the retrieved snippets before the answer.
        #[arg(long)]
        show_context: bool,

        /// Wait for the whole answer instead of streaming it.
        #[arg(long)]
        no_stream: bool,
    },

    /// Show the snippets retrieved for a question.
    Retrieve {
        question: String,

        /// Number of snippets (defaults to `retrieval.top_k`).
        #[arg(long)]
        k: Option<usize>,
    },

    /// Build the index and report its size.
    Index,

    /// Start the HTTP API on `[server].bind`.
    Serve,

    /// Generate shell completions.
    Completions {
        /// Shell type: bash, zsh, fish, powershell, elvish.
        shell: clap_complete::Shell,
    },
}

fn init_tracing(verbose: u8) {
    let default_level = match verbose {
        0 => "warn",
        1 => "info",
        _ => "debug",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .with_target(false)
        .init();
}

fn load(path: Option<&PathBuf>) -> anyhow::Result<Config> {
    match path {
        Some(path) => config::load_config(path),
        None => {
            let cfg = Config::default();
            config::validate(&cfg)?;
            Ok(cfg)
        }
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    if let Commands::Completions { shell } = cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(shell, &mut cmd, "copilot", &mut std::io::stdout());
        return Ok(());
    }

    let cfg = load(cli.config.as_ref())?;

    match cli.command {
        Commands::Chat { show_context } => {
            chat::run_chat(&cfg, show_context).await?;
        }
        Commands::Ask {
            question,
            show_context,
            no_stream,
        } => {
            chat::run_ask(&cfg, &question, show_context, no_stream).await?;
        }
        Commands::Retrieve { question, k } => {
            inspect::run_retrieve(&cfg, &question, k).await?;
        }
        Commands::Index => {
            inspect::run_index(&cfg).await?;
        }
        Commands::Serve => {
            server::run_server(&cfg).await?;
        }
        Commands::Completions { .. } => {
            // Handled above (before config loading)
        }
    }

    Ok(())
}
