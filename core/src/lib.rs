// Core of the car manual chat:
// - Vertex AI client for generation and RAG retrieval
// - Request/response data structures
// - The session loop that keeps the transcript
// - Configuration and credential loading
// - Shared error types

// Export client module - API client for Vertex AI
pub mod client;
pub use client::VertexClient;

// Export types module - Request/response data structures
pub mod types;

// Export config module - Configuration loading
pub mod config;
pub use config::{ChatConfig, ResolvedConfig, ResponseMode};

// Credential resolution
pub mod auth;

// Export errors module - Shared error types
pub mod errors;
pub use errors::*;

// Answer streams and SSE decoding
pub mod response;
pub mod streaming;

// Session loop
pub mod session;
pub use session::{
    ChatSession, Generator, Progress, Retriever, Role, SessionOptions, Snippet, Transcript, Turn,
};
