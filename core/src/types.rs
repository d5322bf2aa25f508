//! Vertex AI request/response data structures (`v1beta1`, JSON in camelCase).

use crate::errors::{ChatError, ChatResult};
use serde::{Deserialize, Serialize};

/// Request to generate content with the retrieval tool attached
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<Content>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
}

/// Content structure for requests and responses
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
pub struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
    #[serde(default)]
    pub parts: Vec<Part>,
}

impl Content {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Some("user".to_string()),
            parts: vec![Part::text(text)],
        }
    }

    /// Vertex calls the assistant side of the conversation "model".
    pub fn model(text: impl Into<String>) -> Self {
        Self {
            role: Some("model".to_string()),
            parts: vec![Part::text(text)],
        }
    }

    pub fn system(text: impl Into<String>) -> Self {
        Self {
            role: None,
            parts: vec![Part::text(text)],
        }
    }

    /// Concatenated text of every part
    pub fn text(&self) -> String {
        self.parts
            .iter()
            .filter_map(|p| p.text.as_deref())
            .collect()
    }
}

#[derive(Serialize, Deserialize, Clone, Debug, PartialEq, Default)]
pub struct Part {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
}

impl Part {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
        }
    }
}

/// Tool definition; only the retrieval tool is used here
#[derive(Serialize, Debug, Clone)]
pub struct Tool {
    pub retrieval: Retrieval,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Retrieval {
    pub vertex_rag_store: VertexRagStore,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct VertexRagStore {
    pub rag_resources: Vec<RagResource>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub similarity_top_k: Option<u32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub vector_distance_threshold: Option<f64>,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RagResource {
    pub rag_corpus: String,
}

impl Tool {
    /// Binds a RAG corpus as the model's retrieval source.
    pub fn rag_retrieval(corpus_name: &str, similarity_top_k: u32, distance_threshold: f64) -> Self {
        Self {
            retrieval: Retrieval {
                vertex_rag_store: VertexRagStore {
                    rag_resources: vec![RagResource {
                        rag_corpus: corpus_name.to_string(),
                    }],
                    similarity_top_k: Some(similarity_top_k),
                    vector_distance_threshold: Some(distance_threshold),
                },
            },
        }
    }
}

/// Response (or one streamed chunk) from `generateContent`
#[derive(Deserialize, Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub prompt_feedback: Option<PromptFeedback>,
}

#[derive(Deserialize, Serialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content: Option<Content>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub finish_reason: Option<String>,
}

#[derive(Deserialize, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub block_reason_message: Option<String>,
}

impl GenerateContentResponse {
    /// Text of the first candidate. A streamed chunk may legitimately carry
    /// no text (e.g. the closing chunk with only a finish reason), which
    /// yields an empty string.
    pub fn text(&self) -> ChatResult<String> {
        if let Some(reason) = self
            .prompt_feedback
            .as_ref()
            .and_then(|f| f.block_reason.as_deref())
        {
            let detail = self
                .prompt_feedback
                .as_ref()
                .and_then(|f| f.block_reason_message.as_deref())
                .unwrap_or("no details");
            return Err(ChatError::ResponseError(format!(
                "Prompt blocked ({}): {}",
                reason, detail
            )));
        }

        Ok(self
            .candidates
            .first()
            .and_then(|c| c.content.as_ref())
            .map(Content::text)
            .unwrap_or_default())
    }
}

/// Retrieval-only request for human-readable sources
#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RetrieveContextsRequest {
    pub vertex_rag_store: VertexRagStore,
    pub query: RagQuery,
}

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RagQuery {
    pub text: String,
    pub similarity_top_k: u32,
}

impl RetrieveContextsRequest {
    pub fn new(corpus_name: &str, query: &str, top_k: u32, distance_threshold: f64) -> Self {
        Self {
            vertex_rag_store: VertexRagStore {
                rag_resources: vec![RagResource {
                    rag_corpus: corpus_name.to_string(),
                }],
                similarity_top_k: None,
                vector_distance_threshold: Some(distance_threshold),
            },
            query: RagQuery {
                text: query.to_string(),
                similarity_top_k: top_k,
            },
        }
    }
}

#[derive(Deserialize, Debug, Default)]
pub struct RetrieveContextsResponse {
    #[serde(default)]
    pub contexts: RagContexts,
}

#[derive(Deserialize, Debug, Default)]
pub struct RagContexts {
    #[serde(default)]
    pub contexts: Vec<RagContext>,
}

#[derive(Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct RagContext {
    #[serde(default)]
    pub source_uri: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub distance: f64,
}
