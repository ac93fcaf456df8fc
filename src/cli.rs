//! Thin collaborator over the dispatcher (spec §6): a single `chat`
//! subcommand that loads config, resolves a provider/model, sends one
//! request and prints the response content to stdout.

use anyhow::Result;
use clap::{Parser, Subcommand};
use feather_core::{ChatResponse, Message};
use feather_dispatch::{ChatArgs, Dispatcher, DispatcherConfig, Limit, RateLimiter};
use feather_providers::{build_registry, load_config};
use std::collections::HashMap;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;

#[derive(Parser)]
#[command(name = "feather")]
#[command(about = "Client-side LLM call dispatcher and tool-using agent loop runtime")]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Send a single chat request through the dispatcher
    Chat {
        /// Provider key to use directly, bypassing selection policy
        #[arg(short = 'p', long)]
        provider: Option<String>,
        /// Model name or alias to resolve
        #[arg(short = 'm', long)]
        model: String,
        /// Prompt text sent as the single user turn
        #[arg(short = 'q', long)]
        prompt: String,
        /// Path to a JSON config file (default: walk upward from cwd)
        #[arg(short = 'c', long)]
        config: Option<PathBuf>,
    },
}

pub async fn run() -> ExitCode {
    let cli = Cli::parse();
    match cli.command {
        Commands::Chat {
            provider,
            model,
            prompt,
            config,
        } => run_chat(provider, model, prompt, config).await,
    }
}

async fn run_chat(
    provider: Option<String>,
    model: String,
    prompt: String,
    config_path: Option<PathBuf>,
) -> ExitCode {
    if model.trim().is_empty() || prompt.trim().is_empty() {
        tracing::error!("model and prompt must be non-empty");
        return ExitCode::from(1);
    }

    match do_chat(provider, model, prompt, config_path).await {
        Ok(response) => {
            println!("{}", response.content);
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "chat request failed");
            ExitCode::from(3)
        }
    }
}

async fn do_chat(
    provider: Option<String>,
    model: String,
    prompt: String,
    config_path: Option<PathBuf>,
) -> Result<ChatResponse> {
    let config = load_config(config_path.as_deref())?;
    let registry = Arc::new(build_registry(&config));
    let limiter = Arc::new(RateLimiter::new(HashMap::<String, Limit>::new()));
    let dispatcher = Dispatcher::new(
        registry,
        limiter,
        Vec::new(),
        feather_core::EventBus::new(),
        DispatcherConfig::default(),
    );

    let mut args = ChatArgs::new(vec![Message::user(prompt)]);
    args.provider = provider;
    args.model = Some(model);

    dispatcher.chat(args).await.map_err(Into::into)
}
