use tokio::sync::watch;

/// Monotonic revision counter published to observers on every mutation.
///
/// Receivers only learn *that* something changed; they read the current state
/// back from the owning component. Missed intermediate revisions are
/// coalesced, which is what a render loop wants.
#[derive(Debug)]
pub struct Signal {
    tx: watch::Sender<u64>,
}

impl Signal {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self { tx }
    }

    pub fn notify(&self) {
        self.tx.send_modify(|revision| *revision += 1);
    }

    pub fn subscribe(&self) -> watch::Receiver<u64> {
        self.tx.subscribe()
    }
}

impl Default for Signal {
    fn default() -> Self {
        Self::new()
    }
}
