//! The conversational session loop.
//!
//! A [`ChatSession`] owns one append-only transcript. Each call to
//! [`ChatSession::submit`] appends the user's turn, asks the generator for an
//! answer given the whole transcript, optionally asks the retriever for
//! source snippets, and appends the assistant's turn.

use crate::config::ResolvedConfig;
use crate::errors::{ChatError, ChatResult};
use crate::response::{ResponseBuffer, ResponseStream};
use async_trait::async_trait;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;
use tokio::sync::watch;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Role::User => f.write_str("user"),
            Role::Assistant => f.write_str("assistant"),
        }
    }
}

/// A retrieved passage backing an answer
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snippet {
    pub source_uri: String,
    pub distance: f64,
    pub text: String,
}

/// One message in the transcript. Never modified after it is appended.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub content: String,
    /// Only assistant turns carry sources, and only when retrieval ran and succeeded.
    #[serde(default)]
    pub sources: Vec<Snippet>,
}

impl Turn {
    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            content: content.into(),
            sources: Vec::new(),
        }
    }

    pub fn assistant(content: impl Into<String>, sources: Vec<Snippet>) -> Self {
        Self {
            role: Role::Assistant,
            content: content.into(),
            sources,
        }
    }
}

/// Chronological, append-only record of a conversation
#[derive(Debug, Clone, Default)]
pub struct Transcript {
    turns: Vec<Turn>,
}

impl Transcript {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn turns(&self) -> &[Turn] {
        &self.turns
    }

    pub fn len(&self) -> usize {
        self.turns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.turns.is_empty()
    }

    fn push(&mut self, turn: Turn) {
        self.turns.push(turn);
    }
}

/// Produces an answer for the last user turn of `history`.
///
/// The full transcript is always passed, so stateless backends can rebuild
/// the same context window on every call.
#[async_trait]
pub trait Generator: Send + Sync {
    async fn generate(&self, history: &[Turn]) -> ChatResult<ResponseStream>;
}

/// Fetches the top-k snippets for a query, independent of generation.
#[async_trait]
pub trait Retriever: Send + Sync {
    async fn retrieve(&self, query: &str, top_k: u32) -> ChatResult<Vec<Snippet>>;
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SessionOptions {
    pub similarity_top_k: u32,
    /// Issue the separate retrieval call and attach snippets to answers
    pub fetch_sources: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            similarity_top_k: crate::config::DEFAULT_SIMILARITY_TOP_K,
            fetch_sources: false,
        }
    }
}

impl From<&ResolvedConfig> for SessionOptions {
    fn from(config: &ResolvedConfig) -> Self {
        Self {
            similarity_top_k: config.similarity_top_k,
            fetch_sources: config.show_sources,
        }
    }
}

/// Incremental view of an answer being produced
#[derive(Debug, Clone, Copy)]
pub struct Progress<'a> {
    /// The increment that just arrived
    pub delta: &'a str,
    /// Everything received so far
    pub text: &'a str,
}

pub struct ChatSession {
    generator: Arc<dyn Generator>,
    retriever: Option<Arc<dyn Retriever>>,
    options: SessionOptions,
    transcript: Transcript,
    published: watch::Sender<Vec<Turn>>,
}

impl fmt::Debug for ChatSession {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ChatSession")
            .field("options", &self.options)
            .field("turns", &self.transcript.len())
            .finish_non_exhaustive()
    }
}

impl ChatSession {
    pub fn new(
        generator: Arc<dyn Generator>,
        retriever: Option<Arc<dyn Retriever>>,
        options: SessionOptions,
    ) -> Self {
        Self {
            generator,
            retriever,
            options,
            transcript: Transcript::new(),
            published: watch::Sender::new(Vec::new()),
        }
    }

    pub fn options(&self) -> SessionOptions {
        self.options
    }

    /// Read-only view of the transcript, in chronological order.
    pub fn history(&self) -> &[Turn] {
        self.transcript.turns()
    }

    /// Snapshots of the transcript, republished after every append. Lets
    /// readers see the pending question while a submission holds the session.
    pub fn watch_history(&self) -> watch::Receiver<Vec<Turn>> {
        self.published.subscribe()
    }

    fn append(&mut self, turn: Turn) {
        self.transcript.push(turn);
        self.published.send_replace(self.transcript.turns().to_vec());
    }

    /// Sources attached to the most recent answer, if any.
    pub fn latest_sources(&self) -> &[Snippet] {
        self.transcript
            .turns()
            .iter()
            .rev()
            .find(|t| t.role == Role::Assistant)
            .map(|t| t.sources.as_slice())
            .unwrap_or(&[])
    }

    /// Runs one question/answer cycle.
    ///
    /// The user turn is appended before the model is called. If generation
    /// fails the error is returned and no assistant turn is appended, leaving
    /// the question visibly unanswered. A failed retrieval only drops the
    /// sources.
    pub async fn submit<F>(&mut self, user_text: &str, mut on_progress: F) -> ChatResult<Turn>
    where
        F: FnMut(Progress<'_>) + Send,
    {
        if user_text.trim().is_empty() {
            return Err(ChatError::InvalidInput(
                "Question must not be empty".to_string(),
            ));
        }

        self.append(Turn::user(user_text));
        info!(turns = self.transcript.len(), "Submitting question");

        let answer = match self.generate_answer(&mut on_progress).await {
            Ok(answer) => answer,
            Err(e) => {
                warn!(error = %e, "Generation failed, question left unanswered");
                return Err(e);
            }
        };
        if answer.is_empty() {
            warn!("Model returned an empty answer");
        }

        let sources = self.fetch_sources(user_text).await;

        let turn = Turn::assistant(answer, sources);
        self.append(turn.clone());
        debug!(
            turns = self.transcript.len(),
            sources = turn.sources.len(),
            "Answer appended"
        );

        Ok(turn)
    }

    async fn generate_answer<F>(&self, on_progress: &mut F) -> ChatResult<String>
    where
        F: FnMut(Progress<'_>) + Send,
    {
        let mut response = self.generator.generate(self.transcript.turns()).await?;
        let mut buffer = ResponseBuffer::new();

        while let Some(increment) = response.next().await {
            let delta = increment?;
            let text = buffer.push(&delta);
            on_progress(Progress {
                delta: &delta,
                text,
            });
        }

        debug!(increments = buffer.increments(), "Response complete");
        Ok(buffer.into_text())
    }

    async fn fetch_sources(&self, query: &str) -> Vec<Snippet> {
        if !self.options.fetch_sources {
            return Vec::new();
        }
        let Some(retriever) = &self.retriever else {
            return Vec::new();
        };

        match retriever.retrieve(query, self.options.similarity_top_k).await {
            Ok(snippets) => snippets,
            Err(e) => {
                warn!(error = %e, "Retrieval failed, answering without sources");
                Vec::new()
            }
        }
    }
}
