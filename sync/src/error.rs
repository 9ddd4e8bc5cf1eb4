use std::io;
use std::time::Duration;

use reqwest::StatusCode;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, SyncErr>;

#[derive(Error, Debug)]
pub enum SyncErr {
    #[error(transparent)]
    Reqwest(#[from] reqwest::Error),

    /// Non-2xx response. The body is kept verbatim for diagnostics.
    #[error("unexpected status {0}: {1}")]
    UnexpectedStatus(StatusCode, String),

    #[error("failed to decode response from {url}: {source}")]
    Decode {
        url: String,
        #[source]
        source: serde_json::Error,
    },

    /// The chat byte stream ended with a transport-level error.
    #[error("stream error: {0}")]
    Stream(String),

    #[error("no data received on chat stream for {0:?}")]
    IdleTimeout(Duration),

    #[error("a chat turn is already streaming")]
    TurnInProgress,

    #[error("invalid configuration: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] io::Error),

    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl SyncErr {
    /// Whether retrying the same request later could plausibly succeed.
    pub fn is_transient(&self) -> bool {
        match self {
            SyncErr::Reqwest(e) => e.is_timeout() || e.is_connect() || e.is_request(),
            SyncErr::UnexpectedStatus(status, _) => {
                *status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error()
            }
            SyncErr::Stream(_) | SyncErr::IdleTimeout(_) => true,
            SyncErr::Decode { .. }
            | SyncErr::TurnInProgress
            | SyncErr::Config(_)
            | SyncErr::Io(_)
            | SyncErr::Toml(_) => false,
        }
    }
}
