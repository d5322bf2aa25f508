//! Server-Sent Events decoding for `streamGenerateContent?alt=sse`.

use crate::errors::{ChatError, ChatResult};
use crate::response::ResponseStream;
use crate::types::GenerateContentResponse;
use async_stream::try_stream;
use futures::StreamExt;
use tokio::io::AsyncBufReadExt;
use tokio_util::io::StreamReader;
use tracing::trace;

/// Accumulates `data:` lines until a blank line closes the event.
#[derive(Debug, Default)]
pub struct SseDecoder {
    data: String,
    has_data: bool,
}

impl SseDecoder {
    pub fn new() -> Self {
        Self::default()
    }

    /// Feeds one line (without its terminator). Returns the event payload
    /// when the line completes an event.
    pub fn push_line(&mut self, line: &str) -> Option<String> {
        let line = line.strip_suffix('\r').unwrap_or(line);

        if line.is_empty() {
            return self.take();
        }

        if let Some(data) = line.strip_prefix("data:") {
            if self.has_data {
                self.data.push('\n');
            }
            self.data.push_str(data.strip_prefix(' ').unwrap_or(data));
            self.has_data = true;
        }
        // event:, id:, retry: and comments carry nothing we use

        None
    }

    /// Flushes a trailing event not followed by a blank line.
    pub fn finish(&mut self) -> Option<String> {
        self.take()
    }

    fn take(&mut self) -> Option<String> {
        if !self.has_data {
            return None;
        }
        self.has_data = false;
        Some(std::mem::take(&mut self.data))
    }
}

/// Text carried by one SSE payload. Empty for chunks without text.
pub fn chunk_text(payload: &str) -> ChatResult<String> {
    let chunk: GenerateContentResponse = serde_json::from_str(payload).map_err(|e| {
        ChatError::ParsingError(format!("Failed to parse stream chunk: {}", e))
    })?;
    chunk.text()
}

/// Turns a streaming HTTP response into a stream of non-empty text increments.
pub fn text_increments(response: reqwest::Response) -> ResponseStream {
    let byte_stream = response
        .bytes_stream()
        .map(|result| result.map_err(std::io::Error::other));
    let reader = tokio::io::BufReader::new(StreamReader::new(byte_stream));

    let stream = try_stream! {
        let mut lines = reader.lines();
        let mut decoder = SseDecoder::new();

        while let Some(line) = lines.next_line().await.map_err(ChatError::from)? {
            if let Some(payload) = decoder.push_line(&line) {
                let text = chunk_text(&payload)?;
                trace!(len = text.len(), "Received stream chunk");
                if !text.is_empty() {
                    yield text;
                }
            }
        }

        if let Some(payload) = decoder.finish() {
            let text = chunk_text(&payload)?;
            if !text.is_empty() {
                yield text;
            }
        }
    };

    stream.boxed()
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    /// A response whose body arrives in exactly these network chunks.
    fn chunked_response(chunks: Vec<Vec<u8>>) -> reqwest::Response {
        let body = reqwest::Body::wrap_stream(futures::stream::iter(
            chunks.into_iter().map(Ok::<_, std::io::Error>),
        ));
        reqwest::Response::from(http::Response::new(body))
    }

    fn split_at(raw: &[u8], cuts: &[usize]) -> Vec<Vec<u8>> {
        let mut chunks = Vec::new();
        let mut start = 0;
        for &cut in cuts {
            chunks.push(raw[start..cut].to_vec());
            start = cut;
        }
        chunks.push(raw[start..].to_vec());
        chunks
    }

    fn text_event(text: &str) -> String {
        let chunk = json!({"candidates": [{"content": {"role": "model", "parts": [{"text": text}]}}]});
        format!("data: {}\r\n\r\n", chunk)
    }

    fn decode_all(raw: &str) -> Vec<String> {
        let mut decoder = SseDecoder::new();
        let mut events: Vec<String> = raw.lines().filter_map(|l| decoder.push_line(l)).collect();
        events.extend(decoder.finish());
        events
    }

    #[test]
    fn test_events_split_on_blank_lines() {
        let raw = "data: {\"a\":1}\r\n\r\ndata: {\"b\":2}\n\n";
        assert_eq!(decode_all(raw), vec!["{\"a\":1}", "{\"b\":2}"]);
    }

    #[test]
    fn test_multiline_data_and_trailing_event() {
        let raw = ": keep-alive\nevent: message\ndata: line1\ndata: line2\n\ndata: tail";
        assert_eq!(decode_all(raw), vec!["line1\nline2", "tail"]);
    }

    #[test]
    fn test_chunk_text() {
        let payload = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"Check the fuse"}]}}]}"#;
        assert_eq!(chunk_text(payload).unwrap(), "Check the fuse");
        assert_eq!(chunk_text(r#"{"candidates":[{"finishReason":"STOP"}]}"#).unwrap(), "");
        assert!(matches!(
            chunk_text("not json"),
            Err(ChatError::ParsingError(_))
        ));
    }

    #[tokio::test]
    async fn test_increments_survive_chunk_boundaries() {
        let mut raw = String::new();
        raw.push_str(&text_event("Check the "));
        raw.push_str(&text_event("brake pads for wear (épaisseur)"));
        raw.push_str("data: {\"candidates\":[{\"finishReason\":\"STOP\"}]}\n\n");
        // last event is not followed by a blank line
        raw.push_str(text_event("and the rotors.").trim_end());

        let second = raw[1..].find("data:").unwrap() + 1;
        let accent = raw.find('é').unwrap() + 1;
        let last = raw.rfind("data:").unwrap() + 12;
        assert!(second + 3 < accent && accent < last);

        let chunks = split_at(raw.as_bytes(), &[second + 3, accent, last]);
        let increments: Vec<String> = text_increments(chunked_response(chunks))
            .map(|item| item.unwrap())
            .collect()
            .await;

        assert_eq!(
            increments,
            vec!["Check the ", "brake pads for wear (épaisseur)", "and the rotors."]
        );
    }

    #[tokio::test]
    async fn test_bad_chunk_ends_stream_with_error() {
        let raw = format!("{}data: {{not json\n\n{}", text_event("Check "), text_event("never"));
        let items: Vec<ChatResult<String>> = text_increments(chunked_response(vec![raw.into_bytes()]))
            .collect()
            .await;

        assert_eq!(items.len(), 2);
        assert_eq!(items[0].as_ref().unwrap(), "Check ");
        assert!(matches!(items[1], Err(ChatError::ParsingError(_))));
    }
}
