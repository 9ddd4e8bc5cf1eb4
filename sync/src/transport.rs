use async_trait::async_trait;
use bytes::Bytes;
use futures::stream::BoxStream;

use crate::error::Result;
use crate::models::ChatMessage;
use crate::models::Note;

/// Raw body of a streaming chat response, one item per network chunk.
pub type ByteStream = BoxStream<'static, Result<Bytes>>;

/// Parameters of one `GET /notes` call.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageRequest {
    pub offset: usize,
    pub limit: usize,
    /// `None` lists all notes; `Some(q)` restricts to search results for `q`.
    pub query: Option<String>,
}

/// The HTTP surface this crate consumes. Implemented by
/// [`crate::http::HttpTransport`] in production and by scripted fakes in
/// tests.
#[async_trait]
pub trait NotesTransport: Send + Sync {
    async fn list_notes(&self, request: &PageRequest) -> Result<Vec<Note>>;

    /// Opens `POST /chat` and returns the response body as it arrives.
    async fn open_chat_stream(&self, messages: &[ChatMessage]) -> Result<ByteStream>;
}
