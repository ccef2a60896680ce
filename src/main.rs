//! talk-codebase CLI - Chat with a codebase over stdin/stdout
//!
//! `chat` is the editor plugin's entry point; the other subcommands manage
//! the configuration file.

use anyhow::Result;
use clap::{Parser, Subcommand};
use colored::*;
use std::io::{self, IsTerminal};
use std::path::PathBuf;
use std::process::ExitCode;
use talk_codebase::config::mask_secret;
use talk_codebase::{
    validate, ConfigStore, ModelType, ProtocolMode, ResponseWriter, RetrievalEngine, Session,
    StatusRecord, StopReason, READY_TARGET,
};
use tracing::{info, warn};
use tracing_subscriber::filter::Directive;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "talk-codebase")]
#[command(author, version, about = "Ask questions about a codebase from your editor", long_about = None)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Directory holding talk_codebase_config.yaml (default: ~/talk_codebase)
    #[arg(long, global = true, env = "TALK_CODEBASE_CONFIG_DIR")]
    config_dir: Option<PathBuf>,

    /// Verbose output
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Choose the model that answers queries
    Configure {
        /// Model type: openai or local
        #[arg(long, default_value = "openai")]
        model_type: ModelType,

        /// OpenAI API key
        #[arg(long)]
        api_key: Option<String>,

        /// OpenAI model name
        #[arg(long)]
        model_name: Option<String>,

        /// Path to the local model file (checked to exist; answers are built from excerpts)
        #[arg(long)]
        model_path: Option<String>,
    },

    /// Answer queries about a repository over stdin/stdout
    Chat {
        /// Repository to index and query
        root_dir: PathBuf,

        /// Input framing: sentinel, line, or json
        #[arg(long, default_value = "sentinel", env = "TALK_CODEBASE_MODE")]
        mode: ProtocolMode,
    },

    /// Write the default configuration if none exists
    Init,

    /// Print the configuration with the API key masked
    ShowConfig,
}

#[tokio::main]
async fn main() -> Result<ExitCode> {
    let cli = Cli::parse();

    // Logs go to stderr; stdout carries the protocol
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| {
            if cli.verbose {
                EnvFilter::new("debug")
            } else {
                EnvFilter::new("info")
            }
        })
        .add_directive(format!("{}=info", READY_TARGET).parse::<Directive>()?);

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_ansi(io::stderr().is_terminal())
        .with_writer(io::stderr)
        .init();

    let store = ConfigStore::resolve(cli.config_dir.as_deref())?;

    match cli.command {
        Commands::Configure {
            model_type,
            api_key,
            model_name,
            model_path,
        } => cmd_configure(&store, model_type, api_key, model_name, model_path),
        Commands::Chat { root_dir, mode } => cmd_chat(store, root_dir, mode).await,
        Commands::Init => cmd_init(&store),
        Commands::ShowConfig => cmd_show_config(&store),
    }
}

fn cmd_configure(
    store: &ConfigStore,
    model_type: ModelType,
    api_key: Option<String>,
    model_name: Option<String>,
    model_path: Option<String>,
) -> Result<ExitCode> {
    let config = store.configure(model_type, api_key, model_name, model_path)?;
    println!(
        "{} Configured {} in {}",
        "✓".green(),
        model_type.to_string().cyan().bold(),
        store.path().display()
    );

    if let Err(e) = validate(&config) {
        println!("{} {}", "Warning:".yellow().bold(), e);
    }

    if model_type == ModelType::Local {
        println!(
            "{} local mode answers with the retrieved source excerpts; the model file is checked but not run",
            "Note:".cyan().bold()
        );
    }

    Ok(ExitCode::SUCCESS)
}

/// Run the session on a blocking thread so Ctrl-C can be observed here
async fn cmd_chat(store: ConfigStore, root_dir: PathBuf, mode: ProtocolMode) -> Result<ExitCode> {
    let session = tokio::task::spawn_blocking(move || run_session(&store, root_dir, mode));

    // `biased` polls ctrl_c first, installing its handler before the
    // session can report readiness.
    tokio::select! {
        biased;
        Ok(()) = tokio::signal::ctrl_c() => {
            info!("Interrupted, exiting");
            let mut out = ResponseWriter::new(io::stdout());
            if let Err(e) = out.emit(&StatusRecord::success("Bye!")) {
                warn!("Cannot write final response: {}", e);
            }
            // The session thread may be blocked on stdin; do not wait for it.
            std::process::exit(0)
        }
        joined = session => joined?,
    }
}

fn run_session(store: &ConfigStore, root_dir: PathBuf, mode: ProtocolMode) -> Result<ExitCode> {
    let mut out = ResponseWriter::new(io::stdout());

    let mut session =
        match Session::start(store, &root_dir, RetrievalEngine::new(), mode, &mut out) {
            Ok(session) => session,
            Err(e) if e.is_fatal() => return Ok(ExitCode::FAILURE),
            Err(e) => return Err(e.into()),
        };

    match session.run(io::stdin().lock(), &mut out) {
        StopReason::OutputClosed => Ok(ExitCode::FAILURE),
        StopReason::ExitCommand | StopReason::EndOfInput => Ok(ExitCode::SUCCESS),
    }
}

fn cmd_init(store: &ConfigStore) -> Result<ExitCode> {
    let existed = store.load()?.is_some();
    store.load_or_init()?;

    if existed {
        println!("Configuration already exists at {}", store.path().display());
    } else {
        println!(
            "{} Wrote default configuration to {}",
            "✓".green(),
            store.path().display()
        );
    }

    Ok(ExitCode::SUCCESS)
}

fn cmd_show_config(store: &ConfigStore) -> Result<ExitCode> {
    let Some(config) = store.load()? else {
        eprintln!(
            "{} No configuration at {}. Run {} first.",
            "Error:".red().bold(),
            store.path().display(),
            "talk-codebase init".yellow()
        );
        return Ok(ExitCode::FAILURE);
    };

    println!("{}", store.path().display().to_string().cyan().bold());
    for (key, value) in config.iter() {
        let shown = match (key, value) {
            (_, None) => "null".dimmed().to_string(),
            ("api_key", Some(secret)) => mask_secret(secret),
            (_, Some(value)) => value.to_string(),
        };
        println!("  {}: {}", key, shown);
    }

    match validate(&config) {
        Ok(valid) => println!("\n{} Ready to chat with {}", "✓".green(), valid.model_type()),
        Err(e) => println!("\n{} {}", "Warning:".yellow().bold(), e),
    }

    Ok(ExitCode::SUCCESS)
}
