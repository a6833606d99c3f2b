//! Mnemo CLI
//!
//! Terminal front for the memory manager: pick a backend, add messages,
//! inspect history and context, or drive it interactively.

mod repl;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use mnemo_core::memory::topic::{PlaceholderEmbedder, TopicStore};
use mnemo_core::memory::{LoggingTopicSink, SystemClock};
use mnemo_core::state::MemoryDb;
use mnemo_core::worker::DEFAULT_MAX_CONCURRENT;
use mnemo_core::{
    ConfigStore, JsonConfigStore, MemoryManager, MemorySettings, MemoryWorker, DEFAULT_SESSION,
};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Clone)]
#[command(author, version, about = "Mnemo - conversational memory for LLM sessions")]
struct Args {
    /// Config file (default: .mnemo/config.json)
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    /// Enable debug logging
    #[arg(short, long, global = true)]
    debug: bool,
    #[command(subcommand)]
    command: Option<CliCommand>,
}

#[derive(Subcommand, Clone)]
enum CliCommand {
    /// List available memory modules
    Modules,
    /// Show the active memory module
    Current,
    /// Switch the active memory module
    Select {
        /// Module id (e.g. stm_eth, stm_prp, utm_anyai)
        id: String,
    },
    /// Add a message to a session
    Add {
        #[arg(short, long, default_value = DEFAULT_SESSION)]
        session: String,
        #[arg(short, long, default_value = "user")]
        role: String,
        /// Message content
        content: String,
    },
    /// Print a session's messages
    History {
        #[arg(short, long, default_value = DEFAULT_SESSION)]
        session: String,
        /// Output as JSON
        #[arg(long)]
        json: bool,
    },
    /// Print a session's context string
    Context {
        #[arg(short, long, default_value = DEFAULT_SESSION)]
        session: String,
    },
    /// Clear a session in the active module
    Clear {
        #[arg(short, long, default_value = DEFAULT_SESSION)]
        session: String,
    },
    /// Fill missing topic embeddings with the placeholder embedder
    Embed,
    /// Interactive session (default)
    Repl {
        #[arg(short, long, default_value = DEFAULT_SESSION)]
        session: String,
    },
}

fn init_logging(debug: bool) {
    let default_level = if debug { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();
}

fn load_config(path: Option<PathBuf>) -> Result<Arc<JsonConfigStore>> {
    let path = path.unwrap_or_else(JsonConfigStore::default_path);
    let config = JsonConfigStore::load(&path)
        .with_context(|| format!("Failed to load config from {:?}", path))?;
    Ok(Arc::new(config))
}

#[tokio::main]
async fn main() -> Result<()> {
    // Environment first so MEMORY_SQL and RUST_LOG from .env apply
    let _ = dotenvy::dotenv();

    let args = Args::parse();
    init_logging(args.debug);

    let config = load_config(args.config.clone())?;
    tracing::debug!("Using memory config at {:?}", config.path());
    let settings = MemorySettings::from_config(config.as_ref());

    // Manager construction may open the database; keep it off the scheduler
    let manager = {
        let config: Arc<dyn ConfigStore> = config.clone();
        tokio::task::spawn_blocking(move || MemoryManager::new(config)).await?
    };
    let worker = MemoryWorker::new(Arc::new(manager), DEFAULT_MAX_CONCURRENT);

    for warning in worker.manager().discovery_warnings() {
        eprintln!("⚠️  {}", warning);
    }

    let command = args.command.unwrap_or(CliCommand::Repl {
        session: DEFAULT_SESSION.to_string(),
    });

    match command {
        CliCommand::Modules => print_modules(&worker),
        CliCommand::Current => match worker.active_module_id() {
            Some(id) => println!("{}", id),
            None => println!("(no active module)"),
        },
        CliCommand::Select { id } => {
            worker.set_active_module(&id).await?;
            println!("✅ Active memory module: {}", id);
        }
        CliCommand::Add {
            session,
            role,
            content,
        } => {
            worker.add_message(&role, &content, &session).await?;
        }
        CliCommand::History { session, json } => {
            let messages = worker.get_messages(&session).await?;
            if json {
                println!("{}", serde_json::to_string_pretty(&messages)?);
            } else {
                for message in messages {
                    println!("[{}] {}", message.role, message.content);
                }
            }
        }
        CliCommand::Context { session } => {
            println!("{}", worker.get_context_string(&session).await?);
        }
        CliCommand::Clear { session } => {
            worker.clear(&session).await?;
            println!("🧹 Cleared session '{}'", session);
        }
        CliCommand::Embed => {
            let filled = embed_missing(settings).await?;
            println!("Populated {} topic embeddings", filled);
        }
        CliCommand::Repl { session } => repl::run(&worker, session).await?,
    }

    Ok(())
}

pub(crate) fn print_modules(worker: &MemoryWorker) {
    let active = worker.active_module_id();
    for module in worker.list_modules() {
        let marker = if active.as_deref() == Some(module.id.as_str()) {
            "*"
        } else {
            " "
        };
        println!(
            "{} {:<10} {} [{}]",
            marker,
            module.id,
            module.name,
            module.capabilities.join(", ")
        );
    }
}

async fn embed_missing(settings: MemorySettings) -> Result<usize> {
    let url = settings
        .database_url
        .context("memory.sql is not configured (set it in the config file or MEMORY_SQL)")?;

    tokio::task::spawn_blocking(move || -> Result<usize> {
        let db = MemoryDb::open(&url)?;
        let store = TopicStore::new(&db, Arc::new(SystemClock), Arc::new(LoggingTopicSink));
        Ok(store.populate_missing_embeddings(&PlaceholderEmbedder)?)
    })
    .await?
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_args_parse() {
        let args = Args::parse_from(["mnemo", "add", "--session", "s1", "hello there"]);
        match args.command {
            Some(CliCommand::Add {
                session,
                role,
                content,
            }) => {
                assert_eq!(session, "s1");
                assert_eq!(role, "user");
                assert_eq!(content, "hello there");
            }
            _ => panic!("expected add"),
        }
    }

    #[test]
    fn test_default_session_and_global_flags() {
        let args = Args::parse_from(["mnemo", "history", "--json", "--config", "x.json"]);
        assert_eq!(args.config, Some(PathBuf::from("x.json")));
        assert!(matches!(
            args.command,
            Some(CliCommand::History { ref session, json: true }) if session == DEFAULT_SESSION
        ));

        assert!(Args::parse_from(["mnemo"]).command.is_none());
    }
}
