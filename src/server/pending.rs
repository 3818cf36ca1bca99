//! Client ids issued to callers that have not connected yet

use dashmap::DashSet;

/// Set of pre-authorized client ids awaiting their first connection
#[derive(Default)]
pub struct PendingClients {
    ids: DashSet<String>,
}

impl PendingClients {
    pub fn new() -> Self {
        Self::default()
    }

    /// Expect a connection for `id`; registering twice is a no-op
    ///
    /// Returns `true` if the id was not already pending.
    pub fn register(&self, id: impl Into<String>) -> bool {
        self.ids.insert(id.into())
    }

    /// Remove `id`, reporting whether it was pending
    pub fn consume(&self, id: &str) -> bool {
        self.ids.remove(id).is_some()
    }

    /// Drop a registration that will never be claimed
    pub fn unregister(&self, id: &str) -> bool {
        self.ids.remove(id).is_some()
    }

    pub fn contains(&self, id: &str) -> bool {
        self.ids.contains(id)
    }

    pub fn len(&self) -> usize {
        self.ids.len()
    }

    pub fn is_empty(&self) -> bool {
        self.ids.is_empty()
    }
}
