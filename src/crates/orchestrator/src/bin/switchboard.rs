//! switchboard CLI
//!
//! Runs a single prompt through the orchestration graph, validates engine
//! configuration files and shows routing decisions.

use anyhow::{Context, Result};
use capability::{
    CapabilityClient, CapabilityKind, CapabilityRegistry, EchoClient, EnvSecretResolver,
    HttpCapabilityClient, SecretResolver,
};
use clap::{Parser, Subcommand};
use memory_store::InMemoryStore;
use orchestrator::request::RequestInput;
use orchestrator::{EngineConfig, GraphEngine, OrchestrationRequest};
use std::path::PathBuf;
use std::sync::Arc;
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "switchboard")]
#[command(about = "switchboard - route requests through LLMs, agents, tools and retrieval", long_about = None)]
#[command(version = env!("CARGO_PKG_VERSION"))]
struct Cli {
    /// Engine configuration file (YAML, JSON or TOML)
    #[arg(short, long, global = true, env = "SWITCHBOARD_CONFIG")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a prompt and print the JSON response
    Run {
        /// Prompt text
        prompt: String,
        /// User id recorded with the conversation
        #[arg(short, long, default_value = "cli")]
        user: String,
        /// Conversation to continue
        #[arg(long)]
        conversation: Option<String>,
        /// Execution id (idempotency key)
        #[arg(long)]
        execution_id: Option<String>,
    },

    /// Validate a configuration file
    Validate {
        /// File to validate
        file: PathBuf,
    },

    /// Print the routing decision for a prompt
    Classify {
        /// Prompt text
        prompt: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();

    match cli.command {
        Commands::Validate { file } => {
            let config = EngineConfig::load(&file)
                .with_context(|| format!("invalid configuration {}", file.display()))?;
            println!(
                "{} is valid ({} capability bindings)",
                file.display(),
                config.capabilities.len()
            );
        }
        Commands::Classify { prompt } => {
            let engine = build_engine(cli.config.as_ref())?;
            let decision = engine.classify(&RequestInput::new(prompt)).await;
            println!("{}", serde_json::to_string_pretty(&decision)?);
        }
        Commands::Run {
            prompt,
            user,
            conversation,
            execution_id,
        } => {
            let engine = build_engine(cli.config.as_ref())?;
            let mut request = OrchestrationRequest::new(prompt, user);
            request.conversation_id = conversation;
            request.execution_id = execution_id;

            let response = engine.run(request).await;
            println!("{}", serde_json::to_string_pretty(&response)?);
            if !response.is_ok() {
                std::process::exit(1);
            }
        }
    }

    Ok(())
}

fn load_config(path: Option<&PathBuf>) -> Result<EngineConfig> {
    match path {
        Some(path) => EngineConfig::load(path)
            .with_context(|| format!("failed to load configuration {}", path.display())),
        None => {
            let mut config = EngineConfig::default();
            config.apply_env_overrides()?;
            config.validate()?;
            Ok(config)
        }
    }
}

fn build_engine(path: Option<&PathBuf>) -> Result<GraphEngine> {
    let config = load_config(path)?;
    let registry = build_registry(&config)?;
    let engine = GraphEngine::new(config, Arc::new(registry), Arc::new(InMemoryStore::new()))?;
    Ok(engine)
}

/// Clients from the configured bindings; kinds without any binding get an
/// offline echo client.
fn build_registry(config: &EngineConfig) -> Result<CapabilityRegistry> {
    let secrets: Arc<dyn SecretResolver> = Arc::new(EnvSecretResolver::new("SWITCHBOARD_SECRET_"));
    let mut builder = CapabilityRegistry::builder();

    for binding in &config.capabilities {
        let client: Arc<dyn CapabilityClient> = match binding.http_config() {
            Some(http) => Arc::new(
                HttpCapabilityClient::new(http)
                    .with_context(|| format!("failed to build client '{}'", binding.name))?
                    .with_secrets(Arc::clone(&secrets)),
            ),
            None => Arc::new(EchoClient::new(binding.name.clone(), binding.kind)),
        };
        builder = builder.register(client);
        if binding.default {
            builder = builder.default_for(binding.kind, binding.name.clone());
        }
    }

    for kind in CapabilityKind::ALL {
        if !config.capabilities.iter().any(|b| b.kind == kind) {
            builder = builder.register(Arc::new(EchoClient::new(format!("echo-{}", kind), kind)));
        }
    }

    Ok(builder.build()?)
}
