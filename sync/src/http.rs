use std::time::Duration;

use async_trait::async_trait;
use futures::TryStreamExt;
use reqwest::header::ACCEPT;
use reqwest::header::AUTHORIZATION;
use reqwest::header::HeaderMap;
use reqwest::header::HeaderValue;
use reqwest::header::USER_AGENT;
use serde::de::DeserializeOwned;
use tracing::debug;
use tracing::trace;

use crate::config::SyncConfig;
use crate::error::Result;
use crate::error::SyncErr;
use crate::models::ChatMessage;
use crate::models::ChatRequest;
use crate::models::Note;
use crate::transport::ByteStream;
use crate::transport::NotesTransport;
use crate::transport::PageRequest;

const CONNECT_TIMEOUT: Duration = Duration::from_secs(5);

/// [`NotesTransport`] backed by the notes HTTP API.
#[derive(Clone, Debug)]
pub struct HttpTransport {
    base_url: String,
    http: reqwest::Client,
    bearer_token: Option<String>,
    request_timeout: Duration,
}

impl HttpTransport {
    pub fn new(config: &SyncConfig) -> Result<Self> {
        let base_url = config.base_url.trim_end_matches('/').to_string();
        let http = reqwest::Client::builder()
            .connect_timeout(CONNECT_TIMEOUT)
            .build()?;
        Ok(Self {
            base_url,
            http,
            bearer_token: config.bearer_token.clone(),
            request_timeout: config.request_timeout,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn headers(&self) -> HeaderMap {
        let mut h = HeaderMap::new();
        h.insert(USER_AGENT, HeaderValue::from_static("notes-sync"));
        if let Some(token) = &self.bearer_token
            && let Ok(hv) = HeaderValue::from_str(&format!("Bearer {token}"))
        {
            h.insert(AUTHORIZATION, hv);
        }
        h
    }

    async fn check_status(res: reqwest::Response) -> Result<reqwest::Response> {
        let status = res.status();
        if status.is_success() {
            return Ok(res);
        }
        let body = res.text().await.unwrap_or_default();
        Err(SyncErr::UnexpectedStatus(status, body))
    }

    fn decode_json<T: DeserializeOwned>(url: &str, body: &str) -> Result<T> {
        serde_json::from_str::<T>(body).map_err(|source| SyncErr::Decode {
            url: url.to_string(),
            source,
        })
    }
}

#[async_trait]
impl NotesTransport for HttpTransport {
    async fn list_notes(&self, request: &PageRequest) -> Result<Vec<Note>> {
        let url = format!("{}/notes", self.base_url);
        let mut req = self
            .http
            .get(&url)
            .headers(self.headers())
            .timeout(self.request_timeout)
            .query(&[("limit", request.limit), ("offset", request.offset)]);
        if let Some(q) = &request.query {
            req = req.query(&[("q", q)]);
        }

        debug!(url, offset = request.offset, limit = request.limit, query = ?request.query, "GET");
        let res = Self::check_status(req.send().await?).await?;
        let body = res.text().await?;
        trace!("response body: {body}");
        Self::decode_json(&url, &body)
    }

    async fn open_chat_stream(&self, messages: &[ChatMessage]) -> Result<ByteStream> {
        let url = format!("{}/chat", self.base_url);
        let payload = ChatRequest {
            messages: messages.iter().map(Into::into).collect(),
        };

        debug!(url, messages = messages.len(), "POST (chat)");
        let res = self
            .http
            .post(&url)
            .headers(self.headers())
            .header(ACCEPT, "text/event-stream")
            .json(&payload)
            .send()
            .await?;
        let res = Self::check_status(res).await?;
        Ok(Box::pin(res.bytes_stream().map_err(SyncErr::Reqwest)))
    }
}
