//! A model answer is an ordered stream of text increments. Streaming calls
//! yield many increments; a single-shot call is a stream of exactly one.
//! The end of the stream marks the answer as final.

use crate::errors::ChatResult;
use futures::stream::{self, BoxStream, StreamExt};

pub type ResponseStream = BoxStream<'static, ChatResult<String>>;

/// Wraps an already complete answer.
pub fn single_shot(text: impl Into<String>) -> ResponseStream {
    stream::once(futures::future::ready(Ok(text.into()))).boxed()
}

/// Builds a stream from increments known up front.
pub fn from_increments<I>(increments: I) -> ResponseStream
where
    I: IntoIterator<Item = ChatResult<String>>,
    I::IntoIter: Send + 'static,
{
    stream::iter(increments).boxed()
}

/// Running concatenation of increments in arrival order
#[derive(Debug, Default, Clone)]
pub struct ResponseBuffer {
    text: String,
    increments: usize,
}

impl ResponseBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends an increment and returns the text so far.
    pub fn push(&mut self, increment: &str) -> &str {
        self.text.push_str(increment);
        self.increments += 1;
        &self.text
    }

    pub fn increments(&self) -> usize {
        self.increments
    }

    pub fn into_text(self) -> String {
        self.text
    }
}
