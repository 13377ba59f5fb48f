//! prism-daemon: command orchestration core of a voice assistant
//!
//! The daemon provides:
//! - A capture bridge polling text written by an external speech capture process
//! - A single orchestrator worker that classifies utterances, runs their
//!   tasks in order and speaks the results with the microphone gated
//! - Status and microphone cells for out-of-process observers
//! - IPC server for control clients and event subscribers
//! - Console input and a terminal status observer

mod capture;
mod classifier;
mod config;
mod console;
mod events;
mod handlers;
mod ipc;
mod lifecycle;
mod orchestrator;
mod presentation;
mod services;
mod state;
mod utterance;

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use tokio::sync::broadcast;
use tokio::task::JoinError;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

use crate::capture::{CaptureBridge, EchoFilter, InboundChannel};
use crate::classifier::Classifier;
use crate::config::Config;
use crate::events::StateEvent;
use crate::handlers::{Collaborators, HandlerLimits, HandlerRegistry, RetryPolicy};
use crate::ipc::Server;
use crate::lifecycle::ShutdownSignal;
use crate::orchestrator::{Orchestrator, OrchestratorSettings};
use crate::presentation::{PresentationMode, StatusObserver};
use crate::services::{
    AppControl, CerebrasClient, ChatProvider, CohereClient, CommandSpeaker, Conversation,
    DecisionModel, DesktopControl, HuggingFaceImages, ImageGenerator, SerperSearch, Speaker,
    WebSearch,
};
use crate::state::StateStore;

#[derive(Parser, Debug)]
#[command(name = "prism-daemon", version, about)]
struct Cli {
    /// How status is presented in the terminal
    #[arg(long, value_enum, env = "PRISM_MODE")]
    mode: Option<PresentationMode>,

    /// Config file (default: <data dir>/config.toml)
    #[arg(short, long, env = "PRISM_CONFIG")]
    config: Option<PathBuf>,

    /// Do not read commands from stdin
    #[arg(long)]
    no_console: bool,

    /// Skip the startup greeting
    #[arg(long)]
    no_greeting: bool,

    /// Verbose output (-v debug, -vv trace)
    #[arg(short, long, action = clap::ArgAction::Count)]
    verbose: u8,
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Initialize logging
    let default_level = match cli.verbose {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .init();

    info!(version = env!("CARGO_PKG_VERSION"), "prism-daemon starting");

    // Load configuration
    let config = Config::load(cli.config.as_deref())?;
    config.ensure_dirs()?;
    let mode = cli.mode.unwrap_or(config.mode);
    info!(?config.data_dir, ?config.socket_path, ?mode, "configuration loaded");

    let mut shutdown = ShutdownSignal::new().context("failed to register signal handlers")?;

    let store = StateStore::new(config.status_file.clone(), config.mic_file.clone());
    let (event_tx, _event_rx) = broadcast::channel::<StateEvent>(64);

    let settings = OrchestratorSettings {
        settle_delay: config.settle_delay,
        greeting: (config.greeting && !cli.no_greeting)
            .then(|| format!("{} is online and ready, sir.", config.assistant_name)),
    };
    let (orchestrator, handle) = Orchestrator::new(
        build_classifier(&config),
        build_handlers(&config),
        Arc::new(CommandSpeaker::new(config.voice_rate)) as Arc<dyn Speaker>,
        store.clone(),
        event_tx.clone(),
        settings,
    );
    let mut worker = tokio::spawn(orchestrator.run());

    // Create IPC server
    let server = Server::new(&config.socket_path, handle.clone(), store.clone())?;

    let bridge = CaptureBridge::new(
        InboundChannel::new(config.inbound_file.clone()),
        store.clone(),
        handle.clone(),
        EchoFilter::new(config.cooldown, config.min_utterance_chars),
        config.poll_interval,
    );
    let bridge_task = tokio::spawn(bridge.run());

    let observer = StatusObserver::new(store.clone(), mode, config.observer_interval);
    let observer_task = tokio::spawn(observer.run());

    if !cli.no_console {
        match console::spawn_reader() {
            Ok(lines) => {
                tokio::spawn(console::run(handle.clone(), lines));
            }
            Err(e) => warn!(error = %e, "continuing without console input"),
        }
    }

    let mut event_rx = event_tx.subscribe();

    info!("daemon initialized, entering main loop");

    // Main event loop
    tokio::select! {
        result = &mut worker => {
            log_worker_exit(result);
        }

        // Run the IPC server (accepts client connections)
        result = server.run() => {
            if let Err(e) = result {
                error!(?e, "IPC server error");
            }
            handle.request_shutdown(true);
            log_worker_exit((&mut worker).await);
        }

        // Log state events
        _ = async {
            loop {
                match event_rx.recv().await {
                    Ok(event) => debug!(%event, "state event"),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!(skipped = n, "state event receiver lagged");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        } => {
            info!("state event handler exited");
        }

        // Wait for shutdown signal
        _ = shutdown.wait() => {
            info!("shutdown signal received, draining current utterance");
            handle.request_shutdown(false);

            tokio::select! {
                result = &mut worker => log_worker_exit(result),
                _ = shutdown.wait() => {
                    warn!("second shutdown signal, aborting");
                    handle.request_shutdown(true);
                    log_worker_exit((&mut worker).await);
                }
            }
        }
    }

    // Cleanup
    info!("shutting down...");

    bridge_task.abort();
    observer_task.abort();
    server.shutdown().await;

    info!("prism-daemon stopped");

    Ok(())
}

fn log_worker_exit(result: Result<(), JoinError>) {
    match result {
        Ok(()) => info!("orchestrator exited"),
        Err(e) => error!(?e, "orchestrator task failed"),
    }
}

/// The decision model is optional; without it every utterance is `General`
fn build_classifier(config: &Config) -> Classifier {
    let model = match CohereClient::new(config.keys.cohere.clone(), config.request_timeout) {
        Ok(client) => Some(Arc::new(client) as Arc<dyn DecisionModel>),
        Err(e) => {
            warn!(error = %e, "decision model unavailable, all input will be treated as general");
            None
        }
    };

    Classifier::new(model, config.classify_attempts, config.request_timeout)
}

fn build_handlers(config: &Config) -> HandlerRegistry {
    let keys = &config.keys;
    let mut providers: Vec<Arc<dyn ChatProvider>> = Vec::new();

    match CerebrasClient::new(keys.cerebras.clone(), config.request_timeout) {
        Ok(client) => providers.push(Arc::new(client)),
        Err(e) => warn!(error = %e, "primary chat provider unavailable"),
    }
    match CohereClient::new(keys.cohere.clone(), config.request_timeout) {
        Ok(client) => providers.push(Arc::new(client)),
        Err(e) => warn!(error = %e, "fallback chat provider unavailable"),
    }
    if providers.is_empty() {
        warn!("no chat provider configured, conversational answers will fail");
    }
    let provider_count = providers.len().max(1) as u32;

    let conversation = Conversation::new(
        providers,
        config.chat_log_file.clone(),
        config.history_limit,
        &config.username,
        &config.assistant_name,
    );

    let search = match SerperSearch::new(
        keys.serper.clone(),
        config.search_result_cap,
        config.request_timeout,
    ) {
        Ok(client) => Some(Arc::new(client) as Arc<dyn WebSearch>),
        Err(e) => {
            warn!(error = %e, "web search unavailable");
            None
        }
    };

    let images = match HuggingFaceImages::new(
        keys.huggingface.clone(),
        config.images_dir.clone(),
        config.image_timeout,
    ) {
        Ok(client) => Some(Arc::new(client) as Arc<dyn ImageGenerator>),
        Err(e) => {
            warn!(error = %e, "image generation unavailable");
            None
        }
    };

    HandlerRegistry::new(
        Collaborators {
            conversation: Arc::new(conversation),
            search,
            images,
            desktop: Arc::new(DesktopControl::new(config.screenshots_dir.clone()))
                as Arc<dyn AppControl>,
        },
        HandlerLimits {
            conversation_timeout: config.request_timeout * provider_count,
            request_timeout: config.request_timeout,
            image_timeout: config.image_timeout,
            image_retry: RetryPolicy {
                max_attempts: config.image_retry_attempts,
                backoff: config.image_retry_backoff,
            },
        },
    )
}
