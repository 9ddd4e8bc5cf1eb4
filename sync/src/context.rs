use std::sync::Arc;

use crate::config::SyncConfig;
use crate::error::Result;
use crate::http::HttpTransport;
use crate::paged_cache::PagedCollectionCache;
use crate::transport::NotesTransport;

/// Shared state for one client session: the transport, the configuration, and
/// the scope map of paged collections. Components hold it as
/// `Arc<SyncContext>`.
pub struct SyncContext {
    pub config: SyncConfig,
    pub transport: Arc<dyn NotesTransport>,
    pub cache: PagedCollectionCache,
}

impl SyncContext {
    pub fn new(config: SyncConfig, transport: Arc<dyn NotesTransport>) -> Arc<Self> {
        let cache = PagedCollectionCache::new(Arc::clone(&transport), config.page_size);
        Arc::new(Self {
            config,
            transport,
            cache,
        })
    }

    /// Builds a context talking to `config.base_url` over HTTP.
    pub fn connect(config: SyncConfig) -> Result<Arc<Self>> {
        let transport = HttpTransport::new(&config)?;
        Ok(Self::new(config, Arc::new(transport)))
    }
}
