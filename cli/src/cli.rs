use clap::Parser;
use fixmycar_core::{ChatConfig, ResponseMode};
use std::path::PathBuf;

/// Ask questions about your car, answered from its owner's manual
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// The question to ask, e.g. "My 2018 Honda Civic won't start, what should I check?"
    #[arg(index = 1)] // Positional argument
    pub prompt: Option<String>,

    /// Enter interactive chat mode
    #[arg(short, long, default_value_t = false)]
    pub interactive: bool,

    /// Path to a TOML config (or secrets) file
    #[arg(short, long)]
    pub config: Option<PathBuf>,

    /// Google Cloud project id
    #[arg(long)]
    pub project: Option<String>,

    /// Vertex AI region
    #[arg(long)]
    pub location: Option<String>,

    /// Model to answer with
    #[arg(long)]
    pub model: Option<String>,

    /// RAG corpus id or full resource name
    #[arg(long)]
    pub corpus: Option<String>,

    /// Fetch and show the manual passages behind each answer
    #[arg(long, default_value_t = false)]
    pub sources: bool,

    /// Request the whole answer at once instead of streaming it
    #[arg(long, default_value_t = false)]
    pub no_stream: bool,

    /// Enable verbose output
    #[arg(short, long, default_value_t = false)]
    pub verbose: bool,
}

impl Args {
    /// Command-line layer, merged over file and environment settings.
    pub fn config_overlay(&self) -> ChatConfig {
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
