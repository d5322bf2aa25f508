use chrono::Duration;
use clap::Parser;
use fixmycar_core::{ChatConfig, ChatError, ResponseMode, SessionOptions, VertexClient};
use fixmycar_web::session::InMemorySessionStore;
use fixmycar_web::{run_server, AppState};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "fix-my-car-web", about = "Chat with your car's owner's manual in the browser")]
struct Args {
    /// Path to a TOML config (or secrets) file
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// HTTP server address
    #[arg(long, default_value = "127.0.0.1:8080")]
    addr: SocketAddr,

    /// Google Cloud project id
    #[arg(long)]
    project: Option<String>,

    /// Vertex AI region
    #[arg(long)]
    location: Option<String>,

    /// Model to answer with
    #[arg(long)]
    model: Option<String>,

    /// RAG corpus id or full resource name
    #[arg(long)]
    corpus: Option<String>,

    /// Fetch and show the manual passages behind each answer
    #[arg(long)]
    sources: bool,

    /// Request whole answers instead of streaming them
    #[arg(long)]
    no_stream: bool,

    /// Minutes a browser session may stay idle before it is forgotten
    #[arg(long, default_value_t = 60)]
    session_ttl_minutes: i64,

    /// Enable debug logging
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn config_overlay(&self) -> ChatConfig {
        ChatConfig {
            project_id: self.project.clone(),
            location: self.location.clone(),
            model_name: self.model.clone(),
            corpus_id: self.corpus.clone(),
            show_sources: self.sources.then_some(true),
            response_mode: self.no_stream.then_some(ResponseMode::Single),
            ..ChatConfig::default()
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    dotenvy::dotenv().ok();
    let args = Args::parse();

    // Initialize logging
    let default_level = if args.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    // Failures are logged once, here
    match run(args).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

async fn run(args: Args) -> anyhow::Result<()> {
    info!("Starting fix-my-car web server");

    let config = ChatConfig::load(args.config.as_deref())
        .and_then(|layers| layers.merge(&args.config_overlay()).validate())
        .map_err(|e| startup_error("Invalid configuration", e))?;

    let client = VertexClient::connect(config.clone())
        .await
        .map(Arc::new)
        .map_err(|e| startup_error("Failed to initialize Vertex AI client", e))?;
    info!(model = %config.model_name, corpus = %config.corpus_name, "Connected to Vertex AI");

    let store = Arc::new(InMemorySessionStore::new(Duration::minutes(
        args.session_ttl_minutes,
    )));
    let state = AppState::new(
        client.clone(),
        Some(client),
        SessionOptions::from(&config),
        store,
    );

    run_server(state, args.addr).await
}

/// Settings and credential problems get a pointer to what to fix.
fn startup_error(what: &str, e: ChatError) -> anyhow::Error {
    let hint = if e.is_fatal_at_startup() {
        " (check PROJECT_ID, RAG_CORPUS_ID and your Google credentials)"
    } else {
        ""
    };
    anyhow::Error::new(e).context(format!("{}{}", what, hint))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_flags_override_config() {
        let args = Args::parse_from([
            "fix-my-car-web",
            "--corpus",
            "42",
            "--sources",
            "--session-ttl-minutes",
            "15",
        ]);
        let overlay = args.config_overlay();
        assert_eq!(overlay.corpus_id.as_deref(), Some("42"));
        assert_eq!(overlay.show_sources, Some(true));
        assert_eq!(overlay.response_mode, None);
        assert_eq!(args.session_ttl_minutes, 15);
    }

    #[test]
    fn test_startup_error_hint() {
        let fatal = startup_error(
            "Invalid configuration",
            ChatError::ConfigError("Missing RAG corpus id (RAG_CORPUS_ID)".to_string()),
        );
        assert!(format!("{:#}", fatal).contains("check PROJECT_ID"));

        let transient = startup_error(
            "Failed to initialize Vertex AI client",
            ChatError::HttpError {
                status_code: 503,
                message: "unavailable".to_string(),
            },
        );
        assert!(!format!("{:#}", transient).contains("check PROJECT_ID"));
    }
}
