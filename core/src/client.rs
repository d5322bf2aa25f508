use async_trait::async_trait;
use reqwest::{Client, Response};
use serde::Serialize;
use tracing::{debug, warn};

use crate::auth::{fetch_access_token, AccessToken};
use crate::config::{ResolvedConfig, ResponseMode};
use crate::errors::{ChatError, ChatResult};
use crate::response::{single_shot, ResponseStream};
use crate::session::{Generator, Retriever, Role, Snippet, Turn};
use crate::streaming::text_increments;
use crate::types::*;

/// Client for the Vertex AI generation and RAG retrieval endpoints
#[derive(Debug, Clone)]
pub struct VertexClient {
    client: Client,
    config: ResolvedConfig,
    token: AccessToken,
}

impl VertexClient {
    /// Authenticates once and returns a ready client.
    pub async fn connect(config: ResolvedConfig) -> ChatResult<Self> {
        let client = Client::new();
        let token = fetch_access_token(&client, &config.credentials).await?;
        Ok(Self::with_token(client, config, token))
    }

    pub fn with_token(client: Client, config: ResolvedConfig, token: AccessToken) -> Self {
        Self {
            client,
            config,
            token,
        }
    }

    pub fn config(&self) -> &ResolvedConfig {
        &self.config
    }

    fn model_url(&self, method: &str) -> String {
        format!(
            "{}/v1beta1/{}:{}",
            self.config.api_endpoint,
            self.config.model_resource_name(),
            method
        )
    }

    fn retrieve_url(&self) -> String {
        format!(
            "{}/v1beta1/projects/{}/locations/{}:retrieveContexts",
            self.config.api_endpoint, self.config.project_id, self.config.location
        )
    }

    /// Builds a request carrying the whole transcript, the system
    /// instruction and the RAG retrieval tool.
    pub fn build_request(&self, history: &[Turn]) -> GenerateContentRequest {
        let contents = history
            .iter()
            .map(|turn| match turn.role {
                Role::User => Content::user(turn.content.clone()),
                Role::Assistant => Content::model(turn.content.clone()),
            })
            .collect();

        GenerateContentRequest {
            contents,
            system_instruction: Some(Content::system(self.config.system_instruction.clone())),
            tools: vec![Tool::rag_retrieval(
                &self.config.corpus_name,
                self.config.similarity_top_k,
                self.config.distance_threshold,
            )],
        }
    }

    async fn post<T: Serialize + ?Sized>(&self, url: &str, body: &T) -> ChatResult<Response> {
        if self.token.is_expired() {
            warn!("Access token has expired; restart to re-authenticate");
        }

        debug!(url = %url, "POST");
        let response = self
            .client
            .post(url)
            .bearer_auth(&self.token.token)
            .json(body)
            .send()
            .await
            .map_err(|e| ChatError::RequestError(format!("Failed to send request: {}", e)))?;

        let status = response.status();
        if !status.is_success() {
            let error_body = response.text().await.map_err(|e| {
                ChatError::ResponseError(format!("Failed to read error response: {}", e))
            })?;

            return Err(ChatError::HttpError {
                status_code: status.as_u16(),
                message: format!("API request failed: {}", error_body),
            });
        }

        Ok(response)
    }

    /// Single-shot generation
    pub async fn generate_content(
        &self,
        request: &GenerateContentRequest,
    ) -> ChatResult<GenerateContentResponse> {
        let response = self.post(&self.model_url("generateContent"), request).await?;

        response
            .json::<GenerateContentResponse>()
            .await
            .map_err(|e| ChatError::ParsingError(format!("Failed to parse response: {}", e)))
    }

    /// Streaming generation; increments arrive in delivery order
    pub async fn stream_generate_content(
        &self,
        request: &GenerateContentRequest,
    ) -> ChatResult<ResponseStream> {
        let url = format!("{}?alt=sse", self.model_url("streamGenerateContent"));
        let response = self.post(&url, request).await?;
        Ok(text_increments(response))
    }

    /// Retrieval-only query against the corpus
    pub async fn retrieve_contexts(&self, query: &str, top_k: u32) -> ChatResult<Vec<Snippet>> {
        let request = RetrieveContextsRequest::new(
            &self.config.corpus_name,
            query,
            top_k,
            self.config.distance_threshold,
        );
        let response = self.post(&self.retrieve_url(), &request).await?;

        let body = response
            .json::<RetrieveContextsResponse>()
            .await
            .map_err(|e| ChatError::ParsingError(format!("Failed to parse contexts: {}", e)))?;

        Ok(snippets_from(body))
    }
}

/// Keeps the service's ordering.
pub fn snippets_from(response: RetrieveContextsResponse) -> Vec<Snippet> {
    response
        .contexts
        .contexts
        .into_iter()
        .map(|c| Snippet {
            source_uri: c.source_uri,
            distance: c.distance,
            text: c.text,
        })
        .collect()
}

#[async_trait]
impl Generator for VertexClient {
    async fn generate(&self, history: &[Turn]) -> ChatResult<ResponseStream> {
        let request = self.build_request(history);
        match self.config.response_mode {
            ResponseMode::Stream => self.stream_generate_content(&request).await,
            ResponseMode::Single => {
                let response = self.generate_content(&request).await?;
                Ok(single_shot(response.text()?))
            }
        }
    }
}

#[async_trait]
impl Retriever for VertexClient {
    async fn retrieve(&self, query: &str, top_k: u32) -> ChatResult<Vec<Snippet>> {
        self.retrieve_contexts(query, top_k).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::ChatConfig;
    use serde_json::json;

    fn client() -> VertexClient {
        let config = ChatConfig {
            project_id: Some("garage-123".to_string()),
            corpus_id: Some("42".to_string()),
            access_token: Some("ya29.test".to_string()),
            ..ChatConfig::defaults()
        }
        .validate()
        .unwrap();

        VertexClient::with_token(
            Client::new(),
            config,
            AccessToken {
                token: "ya29.test".to_string(),
                expires_at: None,
            },
        )
    }

    #[test]
    fn test_endpoint_urls() {
        let client = client();
        assert_eq!(
            client.model_url("streamGenerateContent"),
            "https://us-central1-aiplatform.googleapis.com/v1beta1/projects/garage-123/locations/us-central1/publishers/google/models/gemini-1.5-pro-preview-0514:streamGenerateContent"
        );
        assert_eq!(
            client.retrieve_url(),
            "https://us-central1-aiplatform.googleapis.com/v1beta1/projects/garage-123/locations/us-central1:retrieveContexts"
        );
    }

    #[test]
    fn test_request_carries_history_and_tool() {
        let client = client();
        let history = vec![
            Turn::user("2018 Honda Civic"),
            Turn::assistant("Got it.", Vec::new()),
            Turn::user("It won't start"),
        ];

        let value = serde_json::to_value(client.build_request(&history)).unwrap();
        let roles: Vec<&str> = value["contents"]
            .as_array()
            .unwrap()
            .iter()
            .map(|c| c["role"].as_str().unwrap())
            .collect();
        assert_eq!(roles, vec!["user", "model", "user"]);
        assert_eq!(
            value["tools"][0]["retrieval"]["vertexRagStore"]["ragResources"][0]["ragCorpus"],
            json!("projects/garage-123/locations/us-central1/ragCorpora/42")
        );
        assert_eq!(
            value["tools"][0]["retrieval"]["vertexRagStore"]["similarityTopK"],
            json!(3)
        );
        assert!(value["systemInstruction"]["parts"][0]["text"]
            .as_str()
            .unwrap()
            .contains("car manual chatbot"));
    }

    #[test]
    fn test_snippets_keep_order() {
        let response: RetrieveContextsResponse = serde_json::from_value(json!({
            "contexts": {"contexts": [
                {"sourceUri": "gs://m/a.pdf", "text": "first", "distance": 0.1},
                {"sourceUri": "gs://m/b.pdf", "text": "second", "distance": 0.3}
            ]}
        }))
        .unwrap();

        let snippets = snippets_from(response);
        assert_eq!(snippets.len(), 2);
        assert_eq!(snippets[0].text, "first");
        assert_eq!(snippets[1].source_uri, "gs://m/b.pdf");
        assert_eq!(snippets[1].distance, 0.3);
    }
}
