//! Static node liveness probe.

use infinity_client::errors::TransportError;
use infinity_client::node::{NodeProbe, NodeStatus};
use reqwest::Url;
use std::collections::HashMap;
use std::sync::Mutex;

/// [`NodeProbe`] returning fixed statuses per node URL.
///
/// Unknown nodes fail with `TransportError::Request`.
#[derive(Debug, Default)]
pub struct StaticNodeProbe {
    statuses: HashMap<String, Result<NodeStatus, TransportError>>,
    probed: Mutex<Vec<String>>,
}

impl StaticNodeProbe {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Report `status` for `node` (e.g. `"https://node1.example.com/"`).
    #[must_use]
    pub fn with_status(mut self, node: &str, status: NodeStatus) -> Self {
        self.statuses.insert(node.to_string(), Ok(status));
        self
    }

    #[must_use]
    pub fn with_error(mut self, node: &str, error: TransportError) -> Self {
        self.statuses.insert(node.to_string(), Err(error));
        self
    }

    /// Nodes probed so far, in order.
    pub fn probed(&self) -> Vec<String> {
        self.probed.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl NodeProbe for StaticNodeProbe {
    async fn status(&self, node: &Url) -> Result<NodeStatus, TransportError> {
        self.probed.lock().unwrap().push(node.to_string());
        self.statuses
            .get(node.as_str())
            .cloned()
            .unwrap_or_else(|| Err(TransportError::Request(format!("{node} unreachable"))))
    }
}
