//! Named downstream transports, resolved once at startup.

use std::collections::BTreeMap;
use std::sync::Arc;

use crate::error::MeshError;
use crate::rpc::client::Transport;

/// The services this process calls, by logical name.
#[derive(Clone, Default)]
pub struct DownstreamTable {
    transports: BTreeMap<String, Arc<dyn Transport>>,
}

impl DownstreamTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, transport: Arc<dyn Transport>) {
        self.transports.insert(name.into(), transport);
    }

    pub fn contains(&self, name: &str) -> bool {
        self.transports.contains_key(name)
    }

    /// Transport for `name`. A missing entry is a wiring mistake, reported as `ConfigInvalid`.
    pub fn get(&self, name: &str) -> Result<Arc<dyn Transport>, MeshError> {
        self.transports
            .get(name)
            .cloned()
            .ok_or_else(|| MeshError::ConfigInvalid(format!("no downstream named '{}'", name)))
    }

    pub fn names(&self) -> impl Iterator<Item = &str> {
        self.transports.keys().map(String::as_str)
    }

    pub async fn close_all(&self) {
        for (name, transport) in &self.transports {
            transport.close().await;
            tracing::debug!(downstream = %name, "Downstream connection released");
        }
    }
}

impl std::fmt::Debug for DownstreamTable {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_list().entries(self.transports.keys()).finish()
    }
}
