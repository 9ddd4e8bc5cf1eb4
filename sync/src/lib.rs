//! Client-side synchronization layer for the notes API.
//!
//! Three behaviours share one [`SyncContext`]:
//!
//! - paged loading of the note list ([`PagedCollectionCache`], driven by
//!   [`ViewportFetchTrigger`]),
//! - a debounced search overlay on top of it ([`SearchController`] /
//!   [`SearchOverlay`]),
//! - streamed assistant replies ([`ChatSession`], built from
//!   [`StreamDecoder`] and [`ChatTranscriptReducer`]).
//!
//! Each exposes a `subscribe()` receiver that changes on every mutation.

mod chat;
pub mod config;
mod context;
mod cursor;
mod debounce;
pub mod error;
mod http;
mod models;
mod paged_cache;
mod search;
mod signal;
mod stream_decoder;
mod transcript;
mod transport;
mod viewport;

pub use chat::ChatSession;
pub use chat::TurnOutcome;
pub use config::SyncConfig;
pub use config::SyncConfigToml;
pub use context::SyncContext;
pub use cursor::FetchCursor;
pub use debounce::QueryDebouncer;
pub use error::Result;
pub use error::SyncErr;
pub use http::HttpTransport;
pub use models::ChatMessage;
pub use models::Note;
pub use models::Role;
pub use paged_cache::CollectionSnapshot;
pub use paged_cache::FetchOutcome;
pub use paged_cache::PagedCollectionCache;
pub use paged_cache::Scope;
pub use search::SearchController;
pub use search::SearchOutcome;
pub use search::SearchOverlay;
pub use signal::Signal;
pub use stream_decoder::StreamDecoder;
pub use stream_decoder::StreamFrame;
pub use transcript::ChatTranscriptReducer;
pub use transcript::TurnState;
pub use transport::ByteStream;
pub use transport::NotesTransport;
pub use transport::PageRequest;
pub use viewport::ViewportBounds;
pub use viewport::ViewportFetchTrigger;
