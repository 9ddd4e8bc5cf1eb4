use std::sync::Arc;
use std::sync::Mutex;
use std::sync::MutexGuard;
use std::sync::PoisonError;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::time::timeout;
use tracing::debug;
use tracing::warn;

use crate::context::SyncContext;
use crate::error::Result;
use crate::error::SyncErr;
use crate::models::ChatMessage;
use crate::signal::Signal;
use crate::stream_decoder::StreamDecoder;
use crate::stream_decoder::StreamFrame;
use crate::transcript::ChatTranscriptReducer;
use crate::transcript::TurnState;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TurnOutcome {
    Completed,
    /// The reply was replaced with the failure notice. The session stays
    /// usable for the next turn.
    Failed,
}

/// Drives one chat transcript: submits user turns, decodes the streamed reply,
/// and folds it into the transcript as it arrives.
pub struct ChatSession {
    ctx: Arc<SyncContext>,
    transcript: Mutex<ChatTranscriptReducer>,
    changes: Signal,
}

impl ChatSession {
    pub fn new(ctx: Arc<SyncContext>) -> Self {
        let transcript = ChatTranscriptReducer::new(ctx.config.failure_notice.clone());
        Self {
            ctx,
            transcript: Mutex::new(transcript),
            changes: Signal::new(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, ChatTranscriptReducer> {
        self.transcript
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }

    pub fn messages(&self) -> Vec<ChatMessage> {
        self.lock().messages().to_vec()
    }

    pub fn turn_state(&self) -> TurnState {
        self.lock().state()
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.changes.subscribe()
    }

    /// Sends `text` as the next user turn and streams the reply into the
    /// transcript. Transport failures end the turn with the failure notice and
    /// are reported as [`TurnOutcome::Failed`]; the only error is
    /// [`SyncErr::TurnInProgress`]. Dropping the future mid-turn ends the turn
    /// the same way.
    pub async fn send(&self, text: impl Into<String>) -> Result<TurnOutcome> {
        let history = {
            let mut transcript = self.lock();
            transcript.submit(text)?;
            transcript.messages().to_vec()
        };
        self.changes.notify();

        let mut turn = TurnGuard {
            session: self,
            armed: true,
        };
        let result = self.stream_reply(&history).await;
        turn.armed = false;
        let failed = {
            let mut transcript = self.lock();
            let changed = match &result {
                Ok(()) => transcript.finish(),
                Err(e) => {
                    warn!("chat turn failed: {e}");
                    transcript.fail()
                }
            };
            if changed {
                self.changes.notify();
            }
            transcript.turn_failed()
        };
        // A server-reported error frame fails the turn even though the
        // transport itself completed.
        Ok(if failed {
            TurnOutcome::Failed
        } else {
            TurnOutcome::Completed
        })
    }

    async fn stream_reply(&self, history: &[ChatMessage]) -> Result<()> {
        let idle_timeout = self.ctx.config.stream_idle_timeout;
        let mut stream = match timeout(idle_timeout, self.ctx.transport.open_chat_stream(history)).await {
            Ok(stream) => stream?,
            Err(_) => return Err(SyncErr::IdleTimeout(idle_timeout)),
        };
        let mut decoder = StreamDecoder::new();

        loop {
            let chunk = match timeout(idle_timeout, stream.next()).await {
                Ok(Some(Ok(chunk))) => chunk,
                Ok(Some(Err(e))) => return Err(e),
                Ok(None) => {
                    debug!("chat stream closed");
                    let frames = decoder.finish();
                    self.apply_frames(frames);
                    return Ok(());
                }
                Err(_) => return Err(SyncErr::IdleTimeout(idle_timeout)),
            };
            self.apply_frames(decoder.consume(&chunk));
            if !self.turn_state().is_active() {
                // Sentinel or error frame observed; the rest of the body is
                // irrelevant and dropping the stream closes the connection.
                return Ok(());
            }
        }
    }

    fn apply_frames(&self, frames: Vec<StreamFrame>) {
        if frames.is_empty() {
            return;
        }
        self.update(|transcript| {
            frames
                .into_iter()
                .fold(false, |changed, frame| transcript.apply(frame) || changed)
        });
    }

    fn update(&self, f: impl FnOnce(&mut ChatTranscriptReducer) -> bool) {
        let changed = f(&mut self.lock());
        if changed {
            self.changes.notify();
        }
    }
}

/// Fails the turn if the `send` future is dropped while the reply is still
/// streaming, so the next `send` is accepted.
struct TurnGuard<'a> {
    session: &'a ChatSession,
    armed: bool,
}

impl Drop for TurnGuard<'_> {
    fn drop(&mut self) {
        if self.armed {
            debug!("chat turn abandoned mid-stream");
            self.session.update(ChatTranscriptReducer::fail);
        }
    }
}
