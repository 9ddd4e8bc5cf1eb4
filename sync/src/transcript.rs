use tracing::trace;
use tracing::warn;

use crate::error::Result;
use crate::error::SyncErr;
use crate::models::ChatMessage;
use crate::stream_decoder::StreamFrame;

/// Lifecycle of the current chat turn.
///
/// `Idle → AwaitingFirstFrame → Streaming → Complete`. The two in-progress
/// states both collapse to `Complete` on the sentinel, on stream close, or on
/// failure.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum TurnState {
    #[default]
    Idle,
    AwaitingFirstFrame,
    Streaming,
    Complete,
}

impl TurnState {
    pub fn is_active(self) -> bool {
        matches!(self, TurnState::AwaitingFirstFrame | TurnState::Streaming)
    }
}

/// Ordered chat transcript. Owns the streaming assistant message exclusively
/// until its turn completes, so at most one message is ever incomplete.
#[derive(Debug)]
pub struct ChatTranscriptReducer {
    messages: Vec<ChatMessage>,
    state: TurnState,
    streaming_index: Option<usize>,
    failed: bool,
    failure_notice: String,
}

impl ChatTranscriptReducer {
    pub fn new(failure_notice: impl Into<String>) -> Self {
        Self {
            messages: Vec::new(),
            state: TurnState::Idle,
            streaming_index: None,
            failed: false,
            failure_notice: failure_notice.into(),
        }
    }

    pub fn messages(&self) -> &[ChatMessage] {
        &self.messages
    }

    pub fn state(&self) -> TurnState {
        self.state
    }

    /// Whether the most recent turn ended with the failure notice.
    pub fn turn_failed(&self) -> bool {
        self.failed
    }

    /// Appends the user's message and opens a new turn.
    pub fn submit(&mut self, text: impl Into<String>) -> Result<()> {
        if self.state.is_active() {
            return Err(SyncErr::TurnInProgress);
        }
        self.messages.push(ChatMessage::user(text));
        self.state = TurnState::AwaitingFirstFrame;
        self.streaming_index = None;
        self.failed = false;
        Ok(())
    }

    /// Applies one decoded frame. Returns whether the transcript changed.
    pub fn apply(&mut self, frame: StreamFrame) -> bool {
        if !self.state.is_active() {
            trace!(?frame, "ignoring frame outside an active turn");
            return false;
        }
        match frame {
            StreamFrame::Content(text) => {
                match self.streaming_index {
                    // Frames carry the cumulative reply: replace, never append.
                    Some(index) => self.messages[index].text = text,
                    None => {
                        self.messages.push(ChatMessage::streaming_assistant(text));
                        self.streaming_index = Some(self.messages.len() - 1);
                    }
                }
                self.state = TurnState::Streaming;
                true
            }
            StreamFrame::Done => self.finish(),
            StreamFrame::Error(message) => {
                warn!("chat stream reported an error: {message}");
                self.fail()
            }
        }
    }

    /// Completes the turn as received so far.
    pub fn finish(&mut self) -> bool {
        if !self.state.is_active() {
            return false;
        }
        if let Some(index) = self.streaming_index.take() {
            self.messages[index].complete = true;
        }
        self.state = TurnState::Complete;
        true
    }

    /// Completes the turn with the failure notice in place of the reply.
    pub fn fail(&mut self) -> bool {
        if !self.state.is_active() {
            return false;
        }
        match self.streaming_index.take() {
            Some(index) => {
                let message = &mut self.messages[index];
                message.text.clone_from(&self.failure_notice);
                message.complete = true;
            }
            None => {
                let mut message = ChatMessage::streaming_assistant(self.failure_notice.clone());
                message.complete = true;
                self.messages.push(message);
            }
        }
        self.state = TurnState::Complete;
        self.failed = true;
        true
    }
}

#[cfg(test)]
mod tests {
    #![allow(clippy::unwrap_used)]
    use super::*;
    use crate::models::Role;
    use pretty_assertions::assert_eq;

    const NOTICE: &str = "failed";

    fn content(text: &str) -> StreamFrame {
        StreamFrame::Content(text.to_string())
    }

    fn assistant(text: &str, complete: bool) -> ChatMessage {
        ChatMessage {
            role: Role::Assistant,
            text: text.to_string(),
            complete,
        }
    }

    #[test]
    fn cumulative_frames_replace_text() {
        let mut reducer = ChatTranscriptReducer::new(NOTICE);
        reducer.submit("hi").unwrap();
        assert_eq!(reducer.state(), TurnState::AwaitingFirstFrame);

        reducer.apply(content("Hel"));
        assert_eq!(reducer.state(), TurnState::Streaming);
        assert_eq!(reducer.messages()[1], assistant("Hel", false));

        reducer.apply(content("Hello"));
        reducer.apply(StreamFrame::Done);
        assert_eq!(reducer.state(), TurnState::Complete);
        assert_eq!(
            reducer.messages(),
            &[ChatMessage::user("hi"), assistant("Hello", true)]
        );
    }

    #[test]
    fn submit_is_rejected_while_streaming() {
        let mut reducer = ChatTranscriptReducer::new(NOTICE);
        reducer.submit("one").unwrap();
        assert!(matches!(reducer.submit("two"), Err(SyncErr::TurnInProgress)));

        reducer.apply(content("reply"));
        assert!(matches!(reducer.submit("two"), Err(SyncErr::TurnInProgress)));

        reducer.finish();
        reducer.submit("two").unwrap();
        assert_eq!(reducer.messages().len(), 3);
    }

    #[test]
    fn failure_mid_stream_replaces_partial_reply() {
        let mut reducer = ChatTranscriptReducer::new(NOTICE);
        reducer.submit("hi").unwrap();
        reducer.apply(content("Partial ans"));
        assert!(reducer.fail());
        assert_eq!(reducer.messages()[1], assistant(NOTICE, true));
        assert!(reducer.turn_failed());
        assert!(!reducer.fail());

        reducer.submit("again").unwrap();
        assert!(!reducer.turn_failed());
    }

    #[test]
    fn failure_before_first_frame_appends_notice() {
        let mut reducer = ChatTranscriptReducer::new(NOTICE);
        reducer.submit("hi").unwrap();
        reducer.apply(StreamFrame::Error("boom".to_string()));
        assert_eq!(reducer.messages()[1], assistant(NOTICE, true));
        assert_eq!(reducer.state(), TurnState::Complete);
    }

    #[test]
    fn empty_stream_completes_without_reply() {
        let mut reducer = ChatTranscriptReducer::new(NOTICE);
        reducer.submit("hi").unwrap();
        assert!(reducer.finish());
        assert_eq!(reducer.messages(), &[ChatMessage::user("hi")]);
        assert_eq!(reducer.state(), TurnState::Complete);
    }

    #[test]
    fn frames_after_completion_are_ignored() {
        let mut reducer = ChatTranscriptReducer::new(NOTICE);
        assert!(!reducer.apply(content("stray")));

        reducer.submit("hi").unwrap();
        reducer.apply(content("done"));
        reducer.apply(StreamFrame::Done);
        assert!(!reducer.apply(content("late")));
        assert_eq!(reducer.messages()[1], assistant("done", true));
    }
}
