mod terminal;

use std::path::PathBuf;
use std::sync::Arc;

use clap::{CommandFactory, Parser, Subcommand};
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use triage_agent::{HandoffGraph, LlmExecutionService, Orchestrator};
use triage_core::config::AppConfig;
use triage_core::event::EventBus;
use triage_core::types::SessionId;

use terminal::TerminalIo;

#[derive(Parser)]
#[command(name = "triage", version, about = "Multi-agent triage chat with conversational handoffs")]
struct Cli {
    /// Path to config file
    #[arg(short, long, default_value = "triage.toml")]
    config: PathBuf,

    /// Agent that owns the first turn (overrides `session.start_agent`)
    #[arg(long)]
    start: Option<String>,

    /// Session ID (auto-generated if not provided)
    #[arg(short, long)]
    session: Option<String>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Start an interactive chat session (default)
    Chat,
    /// Print the handoff topology and check reachability
    Graph,
    /// Show current configuration
    Config,
    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Logs go to stderr so stdout carries only the transcript
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("triage=info,warn")),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    if let Some(Commands::Completions { shell }) = &cli.command {
        let mut cmd = Cli::command();
        clap_complete::generate(*shell, &mut cmd, "triage", &mut std::io::stdout());
        return Ok(());
    }

    if !cli.config.exists() {
        eprintln!(
            "No config file at {}, using the built-in triage agents",
            cli.config.display()
        );
    }
    let mut config = AppConfig::load_or_default(&cli.config)?;
    if let Some(start) = cli.start {
        config.session.start_agent = start;
    }

    let graph = Arc::new(HandoffGraph::from_config(&config)?);

    match cli.command {
        Some(Commands::Config) => {
            println!("{}", toml::to_string_pretty(&config)?);
        }
        Some(Commands::Graph) => {
            for line in graph.describe() {
                println!("{}", line);
            }
            let start = &config.session.start_agent;
            if !graph.contains(start) {
                anyhow::bail!("start agent '{}' is not a registered agent", start);
            }
            let unreachable = graph.unreachable_from(start);
            if unreachable.is_empty() {
                println!("All agents reachable from {}", start);
            } else {
                println!("Unreachable from {}: {}", start, unreachable.join(", "));
            }
        }
        Some(Commands::Chat) | None => {
            let session_id = cli
                .session
                .as_deref()
                .map(SessionId::from_str)
                .unwrap_or_default();
            run_chat(&config, graph, session_id).await?;
        }
        Some(Commands::Completions { .. }) => unreachable!("handled before config load"),
    }

    Ok(())
}

async fn run_chat(
    config: &AppConfig,
    graph: Arc<HandoffGraph>,
    session_id: SessionId,
) -> anyhow::Result<()> {
    let llm = triage_llm::create_client(&config.model);
    let service = Arc::new(LlmExecutionService::from_config(config, graph.clone(), llm));
    let event_bus = Arc::new(EventBus::default());

    let mut orchestrator = Orchestrator::from_config(config, graph, service)?
        .with_session_id(session_id)
        .with_event_bus(event_bus.clone());

    let mut events = event_bus.subscribe();
    let event_task = tokio::spawn(async move {
        while let Ok(event) = events.recv().await {
            debug!(?event, "Session event");
        }
    });

    let cancel = orchestrator.cancel_token();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("Interrupted, ending session");
            cancel.cancel();
        }
    });

    println!("Session: {}", orchestrator.session_id());
    println!(
        "Talking to {}. Type /quit to exit.\n",
        orchestrator.current_agent()
    );

    let turns = orchestrator.run(&mut TerminalIo::new()).await?;
    info!(turns, "Session ended");

    event_task.abort();
    Ok(())
}
