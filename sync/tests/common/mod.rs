#![allow(dead_code, clippy::unwrap_used, clippy::expect_used)]

use std::collections::VecDeque;
use std::sync::Arc;
use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::DateTime;
use chrono::Utc;
use futures::StreamExt;
use notes_sync::ByteStream;
use notes_sync::ChatMessage;
use notes_sync::Note;
use notes_sync::NotesTransport;
use notes_sync::PageRequest;
use notes_sync::Result;
use notes_sync::SyncConfig;
use notes_sync::SyncContext;
use notes_sync::SyncErr;
use tokio::sync::mpsc;
use tokio::sync::oneshot;

pub fn note(id: &str) -> Note {
    Note {
        note_id: id.to_string(),
        created_at: DateTime::<Utc>::from_timestamp(1_700_000_000, 0).expect("timestamp"),
        updated_at: None,
        title: Some(format!("note {id}")),
        content: Some(format!("body of {id}")),
        summary: None,
        tags: Vec::new(),
        categories: Vec::new(),
    }
}

pub fn notes(prefix: &str, count: usize) -> Vec<Note> {
    (0..count).map(|i| note(&format!("{prefix}{i}"))).collect()
}

pub fn ids(notes: &[Note]) -> Vec<String> {
    notes.iter().map(|n| n.note_id.clone()).collect()
}

/// A page request parked until the test decides how to answer it.
pub struct PendingPage {
    pub request: PageRequest,
    respond: oneshot::Sender<Result<Vec<Note>>>,
}

impl PendingPage {
    pub fn respond(self, result: Result<Vec<Note>>) {
        let _ = self.respond.send(result);
    }

    pub fn ok(self, notes: Vec<Note>) {
        self.respond(Ok(notes));
    }
}

struct ChatScript {
    chunks: Vec<Result<Bytes>>,
    hang_after: bool,
    /// The response never arrives: `open_chat_stream` itself never resolves.
    stall_open: bool,
}

/// In-memory [`NotesTransport`].
///
/// With a corpus, page requests are answered immediately by slicing it (and,
/// for searches, filtering ids containing the query). Without one, every page
/// request is parked as a [`PendingPage`] for the test to answer.
pub struct ScriptedTransport {
    corpus: Option<Vec<Note>>,
    requests: Mutex<Vec<PageRequest>>,
    pending_tx: mpsc::UnboundedSender<PendingPage>,
    pending_rx: tokio::sync::Mutex<mpsc::UnboundedReceiver<PendingPage>>,
    chats: Mutex<VecDeque<ChatScript>>,
    chat_requests: Mutex<Vec<Vec<ChatMessage>>>,
}

impl ScriptedTransport {
    fn build(corpus: Option<Vec<Note>>) -> Arc<Self> {
        let (pending_tx, pending_rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            corpus,
            requests: Mutex::new(Vec::new()),
            pending_tx,
            pending_rx: tokio::sync::Mutex::new(pending_rx),
            chats: Mutex::new(VecDeque::new()),
            chat_requests: Mutex::new(Vec::new()),
        })
    }

    pub fn gated() -> Arc<Self> {
        Self::build(None)
    }

    pub fn with_corpus(corpus: Vec<Note>) -> Arc<Self> {
        Self::build(Some(corpus))
    }

    pub async fn next_pending(&self) -> PendingPage {
        let mut rx = self.pending_rx.lock().await;
        tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .expect("timed out waiting for a page request")
            .expect("transport dropped")
    }

    pub fn requests(&self) -> Vec<PageRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn push_chat(&self, chunks: Vec<Result<Bytes>>) {
        self.chats.lock().unwrap().push_back(ChatScript {
            chunks,
            hang_after: false,
            stall_open: false,
        });
    }

    /// Like [`Self::push_chat`] but the stream never closes after the chunks.
    pub fn push_hanging_chat(&self, chunks: Vec<Result<Bytes>>) {
        self.chats.lock().unwrap().push_back(ChatScript {
            chunks,
            hang_after: true,
            stall_open: false,
        });
    }

    /// Accepts the chat request but never sends response headers.
    pub fn push_stalled_chat(&self) {
        self.chats.lock().unwrap().push_back(ChatScript {
            chunks: Vec::new(),
            hang_after: true,
            stall_open: true,
        });
    }

    pub fn chat_requests(&self) -> Vec<Vec<ChatMessage>> {
        self.chat_requests.lock().unwrap().clone()
    }
}

#[async_trait]
impl NotesTransport for ScriptedTransport {
    async fn list_notes(&self, request: &PageRequest) -> Result<Vec<Note>> {
        self.requests.lock().unwrap().push(request.clone());

        if let Some(corpus) = &self.corpus {
            let matching: Vec<Note> = corpus
                .iter()
                .filter(|n| match &request.query {
                    Some(q) => n.note_id.contains(q.as_str()),
                    None => true,
                })
                .skip(request.offset)
                .take(request.limit)
                .cloned()
                .collect();
            return Ok(matching);
        }

        let (tx, rx) = oneshot::channel();
        let _ = self.pending_tx.send(PendingPage {
            request: request.clone(),
            respond: tx,
        });
        rx.await
            .unwrap_or_else(|_| Err(SyncErr::Stream("page request abandoned".to_string())))
    }

    async fn open_chat_stream(&self, messages: &[ChatMessage]) -> Result<ByteStream> {
        self.chat_requests.lock().unwrap().push(messages.to_vec());
        let Some(script) = self.chats.lock().unwrap().pop_front() else {
            return Err(SyncErr::Stream("connection refused".to_string()));
        };
        if script.stall_open {
            futures::future::pending::<()>().await;
        }
        let body = futures::stream::iter(script.chunks);
        if script.hang_after {
            Ok(body.chain(futures::stream::pending()).boxed())
        } else {
            Ok(body.boxed())
        }
    }
}

pub fn config(page_size: usize) -> SyncConfig {
    SyncConfig {
        page_size,
        ..SyncConfig::default()
    }
}

pub fn context(transport: &Arc<ScriptedTransport>, config: SyncConfig) -> Arc<SyncContext> {
    SyncContext::new(config, Arc::clone(transport) as Arc<dyn NotesTransport>)
}

pub fn chunk(text: &str) -> Result<Bytes> {
    Ok(Bytes::copy_from_slice(text.as_bytes()))
}

/// Yields until `cond` holds; relies on paused-time auto-advance in tests.
pub async fn wait_until(mut cond: impl FnMut() -> bool) {
    for _ in 0..10_000 {
        if cond() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(1)).await;
    }
    panic!("condition not reached");
}
