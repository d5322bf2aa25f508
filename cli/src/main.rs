use clap::Parser;
use fixmycar_core::{ChatConfig, ChatError, ChatSession, ResponseMode, SessionOptions, VertexClient};
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;

mod app;
mod cli;
mod logging;
mod output;

use crate::cli::Args;
use crate::logging::log_error;
use crate::output::{DisplayOptions, print_usage_instructions};

#[tokio::main]
async fn main() -> ExitCode {
    // Secrets may live in a .env file next to the binary
    dotenvy::dotenv().ok();

    let args = Args::parse();
    logging::init(args.verbose);

    // Every failure is reported once, here
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log_error(&format!("{:#}", e));
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    if !args.interactive && args.prompt.is_none() {
        print_usage_instructions();
        return Ok(());
    }

    let config = ChatConfig::load(args.config.as_deref())
        .and_then(|layers| layers.merge(&args.config_overlay()).validate())
        .map_err(|e| startup_error("Invalid configuration", e))?;

    let client = VertexClient::connect(config.clone())
        .await
        .map(Arc::new)
        .map_err(|e| startup_error("Could not connect to Vertex AI", e))?;
    info!(
        model = %config.model_name,
        corpus = %config.corpus_name,
        "Connected to Vertex AI"
    );

    let mut session = ChatSession::new(
        client.clone(),
        Some(client),
        SessionOptions::from(&config),
    );
    let display = DisplayOptions {
        show_sources: config.show_sources,
        stream: config.response_mode == ResponseMode::Stream,
    };

    if args.interactive {
        app::run_interactive_chat(&mut session, display).await
    } else if let Some(prompt) = args.prompt {
        app::run_single_query(&mut session, prompt, display).await
    } else {
        Ok(())
    }
}

/// Adds a hint for failures only fixed by editing settings or credentials.
fn startup_error(what: &str, e: ChatError) -> anyhow::Error {
    if e.is_fatal_at_startup() {
        anyhow::Error::new(e).context(format!(
            "{} (check PROJECT_ID, RAG_CORPUS_ID and your Google credentials)",
            what
        ))
    } else {
        anyhow::Error::new(e).context(what.to_string())
    }
}
