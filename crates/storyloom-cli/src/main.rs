use std::io::Write as _;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use tokio::io::{AsyncBufReadExt, BufReader};

use storyloom_client::BackendClient;
use storyloom_core::config::Config;
use storyloom_core::save_store::{JsonSaveStore, SaveStore};
use storyloom_core::state::GameStateDocument;
use storyloom_session::autosave::spawn_autosave;
use storyloom_session::{SessionController, SessionEvent};

#[derive(Parser)]
#[command(
    name = "storyloom",
    about = "Terminal client for an AI-driven interactive fiction backend",
    version
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Config file path
    #[arg(short, long, global = true)]
    config: Option<String>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,
}

#[derive(Subcommand)]
enum Commands {
    /// Start or resume an interactive session
    Play {
        /// Save slot to resume from
        #[arg(long)]
        slot: Option<String>,
    },

    /// Save-slot management
    Saves {
        #[command(subcommand)]
        action: SavesAction,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum SavesAction {
    /// List local save slots
    List,
    /// Show a summary of one slot
    Show { slot: String },
    /// Delete a slot
    Delete { slot: String },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Show current configuration
    Show,
    /// Validate the configuration
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let filter = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .init();

    // Load config
    let config_path = cli
        .config
        .map(std::path::PathBuf::from)
        .unwrap_or_else(Config::config_path);
    let config = Config::load(&config_path)?;
    tracing::debug!(path = %config_path.display(), "Config loaded");

    match cli.command {
        Commands::Play { slot } => play(config, slot).await?,
        Commands::Saves { action } => {
            let store = JsonSaveStore::new(config.save_dir());
            match action {
                SavesAction::List => {
                    let saves = store.list().await?;
                    if saves.is_empty() {
                        println!("No saves.");
                    }
                    for meta in saves {
                        println!("{:<16} {:<32} {}", meta.slot_id, meta.save_name, meta.updated_at);
                    }
                }
                SavesAction::Show { slot } => match store.load(&slot).await? {
                    Some(record) => {
                        let doc = &record.state;
                        println!("{} — {}", record.meta.slot_id, record.meta.save_name);
                        println!("  turn:      {}", doc.turn_number);
                        println!("  location:  {}", doc.player.location);
                        println!("  hp:        {}/{}", doc.player.hp, doc.player.max_hp);
                        println!("  inventory: {} items", doc.player.inventory.len());
                        println!("  quests:    {}", doc.quests.len());
                    }
                    None => println!("No save in slot '{slot}'."),
                },
                SavesAction::Delete { slot } => {
                    store.delete(&slot).await?;
                    println!("Deleted slot '{slot}'.");
                }
            }
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => {
                let json = serde_json::to_string_pretty(&config)?;
                println!("{json}");
            }
            ConfigAction::Check => {
                let (warnings, errors) = config.validate();
                for w in &warnings {
                    println!("warning: {w}");
                }
                for e in &errors {
                    println!("error: {e}");
                }
                if errors.is_empty() {
                    println!("Config OK ({} warnings)", warnings.len());
                } else {
                    std::process::exit(1);
                }
            }
        },
    }

    Ok(())
}

async fn play(config: Config, slot: Option<String>) -> anyhow::Result<()> {
    let store: Arc<dyn SaveStore> = Arc::new(JsonSaveStore::new(config.save_dir()));

    let document = match &slot {
        Some(slot) => match store.load(slot).await {
            Ok(Some(record)) => {
                println!("Resuming '{}' (turn {}).", record.meta.save_name, record.state.turn_number);
                record.state
            }
            Ok(None) => {
                println!("No save in slot '{slot}', starting fresh.");
                new_document(&config)
            }
            Err(e) => {
                eprintln!("Could not load slot '{slot}': {e}. Starting fresh.");
                new_document(&config)
            }
        },
        None => new_document(&config),
    };

    let backend = Arc::new(BackendClient::from_config(&config)?);
    let (event_tx, mut event_rx) = tokio::sync::mpsc::unbounded_channel::<SessionEvent>();
    let mut controller = SessionController::new(
        backend.clone(),
        document,
        event_tx,
        Duration::from_secs(config.turn_timeout_secs()),
    );

    let autosave = spawn_autosave(
        store.clone(),
        controller.subscribe_state(),
        Duration::from_secs(config.autosave_interval_secs()),
    );

    // Render session events as they stream in.
    let printer = tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            match event {
                SessionEvent::NarrationDelta { delta } => {
                    print!("{delta}");
                    let _ = std::io::stdout().flush();
                }
                SessionEvent::Narration { .. } => println!(),
                SessionEvent::Thinking { text, .. } => println!("  [thinking] {text}"),
                SessionEvent::ToolCall { tool, .. } => println!("  [{tool} ...]"),
                SessionEvent::ToolResult { tool, is_error, .. } => {
                    if is_error {
                        println!("  [{tool} failed]");
                    }
                }
                SessionEvent::Error { message, .. } => {
                    println!("\n! {message} (type /retry to try again)");
                }
                SessionEvent::Rejected { reason } => println!("! {reason}"),
                SessionEvent::Aborted => println!("\n(turn aborted)"),
                SessionEvent::StateChanged { .. } => {}
            }
        }
    });

    println!("Storyloom ready. Type your action, or /save, /load, /push, /pull, /retry, /quit.");
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    loop {
        print!("> ");
        std::io::stdout().flush()?;
        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim().to_string();

        match line.split_whitespace().collect::<Vec<_>>().as_slice() {
            [] => continue,
            ["/quit" | "/q"] => break,
            ["/retry"] => {
                if let Err(e) = run_turn_cancellable(&mut controller, None).await {
                    eprintln!("{e}");
                }
            }
            ["/save", slot, rest @ ..] => {
                let name = if rest.is_empty() {
                    format!("Turn {}", controller.document().turn_number)
                } else {
                    rest.join(" ")
                };
                match store.save(slot, &name, controller.document()).await {
                    Ok(()) => println!("Saved to '{slot}'."),
                    Err(e) => eprintln!("Save failed: {e}"),
                }
            }
            ["/load", slot] => match store.load(slot).await {
                Ok(Some(record)) => {
                    println!("Loaded '{}' (turn {}).", record.meta.save_name, record.state.turn_number);
                    controller.load_document(record.state);
                }
                Ok(None) => println!("No save in slot '{slot}'."),
                Err(e) => eprintln!("Load failed: {e}"),
            },
            ["/push", slot] => {
                let name = format!("Turn {}", controller.document().turn_number);
                match backend.save_remote(slot, &name, controller.document()).await {
                    Ok(()) => println!("Pushed to remote slot '{slot}'."),
                    Err(e) => eprintln!("Remote save failed: {e}"),
                }
            }
            ["/pull", slot] => match backend.load_remote(slot).await {
                // A remote load is authoritative, same as a state_update.
                Ok(state) => {
                    println!("Pulled remote slot '{slot}' (turn {}).", state.turn_number);
                    controller.load_document(state);
                }
                Err(e) => eprintln!("Remote load failed: {e}"),
            },
            _ => {
                if let Err(e) = run_turn_cancellable(&mut controller, Some(&line)).await {
                    eprintln!("{e}");
                }
            }
        }
    }

    // Close the state channel so autosave does its final flush.
    drop(controller);
    let _ = autosave.await;
    printer.abort();
    Ok(())
}

fn new_document(config: &Config) -> GameStateDocument {
    let (id, name) = config.start_node();
    GameStateDocument::new(&id, &name)
}

/// Drive one turn; ctrl-c cancels the turn instead of killing the process.
async fn run_turn_cancellable(
    controller: &mut SessionController,
    input: Option<&str>,
) -> storyloom_core::error::Result<()> {
    let cancel = controller.cancel_handle();
    let watcher = tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            cancel.cancel();
        }
    });

    let result = match input {
        Some(input) => controller.submit_turn(input).await,
        None => controller.retry().await,
    };
    watcher.abort();
    result.map(|_| ())
}
