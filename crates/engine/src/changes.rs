//! Change notifications for observable queries.

use std::sync::Arc;

use tokio::sync::watch;

/// Version counter bumped after every committed write.
///
/// Observable queries hold a receiver and re-run when the version moves.
/// Several writes may be coalesced into a single re-run.
#[derive(Clone, Debug)]
pub(crate) struct ChangeTracker {
    version: Arc<watch::Sender<u64>>,
}

impl ChangeTracker {
    pub(crate) fn new() -> Self {
        let (version, _) = watch::channel(0);
        Self {
            version: Arc::new(version),
        }
    }

    pub(crate) fn notify(&self, table: &'static str) {
        self.version.send_modify(|v| *v = v.wrapping_add(1));
        tracing::debug!(table, version = *self.version.borrow(), "data changed");
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<u64> {
        self.version.subscribe()
    }
}
