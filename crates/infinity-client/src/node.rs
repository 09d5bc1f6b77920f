//! Conference node selection.
//!
//! Turns the host part of a conference address into the URL of a node
//! that reports itself available. SRV records for `_pexapp._tcp.{host}` are
//! tried first, in priority/weight order; if none of them is usable the
//! host's A records are tried. Nodes in maintenance (503) or that do not
//! know the service (404) are skipped, not treated as failures.

use crate::api::{join_segments, STATUS_PATH};
use crate::dns::record::ServiceRecord;
use crate::dns::DnsResolver;
use crate::errors::{NodeError, TransportError};
use crate::http::{HttpTransport, Validation};
use common::types::ConferenceAddress;
use reqwest::{Method, Url};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

/// SRV service label of conference nodes.
pub const NODE_SERVICE: &str = "pexapp";

/// SRV protocol label of conference nodes.
pub const NODE_PROTO: &str = "tcp";

const HTTPS_PORT: u16 = 443;

/// Liveness reported by a node.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NodeStatus {
    /// 200: accepting conferences.
    Available,
    /// 503: in maintenance mode.
    Maintenance,
    /// 404: not a conference node.
    NotFound,
}

/// Trait for node liveness checks (enables mocking).
#[async_trait::async_trait]
pub trait NodeProbe: Send + Sync {
    /// Query the status of `node`.
    async fn status(&self, node: &Url) -> Result<NodeStatus, TransportError>;
}

/// [`NodeProbe`] calling `GET {node}/api/client/v2/status`.
#[derive(Debug, Clone)]
pub struct HttpNodeProbe {
    transport: HttpTransport,
}

impl HttpNodeProbe {
    #[must_use]
    pub fn new(transport: HttpTransport) -> Self {
        Self { transport }
    }
}

#[async_trait::async_trait]
impl NodeProbe for HttpNodeProbe {
    async fn status(&self, node: &Url) -> Result<NodeStatus, TransportError> {
        let url = join_segments(node, STATUS_PATH)?;
        let response = self
            .transport
            .send(self.transport.request(Method::GET, url.as_str()), Validation::NONE)
            .await?;

        match response.status {
            200 => Ok(NodeStatus::Available),
            503 => Ok(NodeStatus::Maintenance),
            404 => Ok(NodeStatus::NotFound),
            status => Err(TransportError::UnexpectedStatus { status }),
        }
    }
}

/// URL for an SRV target: `https` on 443, `http://target:port` otherwise.
///
/// # Errors
///
/// Returns `TransportError::InvalidUrl` if the target is not a valid host.
pub fn service_record_url(record: &ServiceRecord) -> Result<Url, TransportError> {
    let raw = if record.port == HTTPS_PORT {
        format!("https://{}", record.target)
    } else {
        format!("http://{}:{}", record.target, record.port)
    };
    Url::parse(&raw).map_err(|e| TransportError::InvalidUrl(format!("{raw}: {e}")))
}

/// Ordered candidate URLs for one host.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct NodeCandidates {
    /// From SRV records, in priority/weight order.
    pub service: Vec<Url>,
    /// From A records.
    pub address: Vec<Url>,
}

/// Walks DNS candidates and returns the first available node.
#[derive(Clone)]
pub struct NodeSelector {
    resolver: DnsResolver,
    probe: Arc<dyn NodeProbe>,
    dnssec: bool,
}

impl std::fmt::Debug for NodeSelector {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("NodeSelector")
            .field("resolver", &self.resolver)
            .field("dnssec", &self.dnssec)
            .finish_non_exhaustive()
    }
}

impl NodeSelector {
    #[must_use]
    pub fn new(resolver: DnsResolver, probe: Arc<dyn NodeProbe>, dnssec: bool) -> Self {
        Self {
            resolver,
            probe,
            dnssec,
        }
    }

    /// SRV candidates for `host`. Lookup failures yield no candidates.
    async fn service_candidates(&self, host: &str) -> Vec<Url> {
        let records = match self
            .resolver
            .resolve_service_records(NODE_SERVICE, NODE_PROTO, host, self.dnssec)
            .await
        {
            Ok(records) => records,
            Err(e) => {
                warn!(target: "infinity.node", host = %host, error = %e, "SRV lookup failed, falling back to A records");
                return Vec::new();
            }
        };

        records
            .iter()
            .filter_map(|record| match service_record_url(record) {
                Ok(url) => Some(url),
                Err(e) => {
                    warn!(target: "infinity.node", target_host = %record.target, error = %e, "Skipping SRV target");
                    None
                }
            })
            .collect()
    }

    /// A-record candidates for `host`, as `https://{ipv4}`.
    async fn address_candidates(&self, host: &str) -> Result<Vec<Url>, NodeError> {
        let records = self.resolver.resolve_address_records(host, self.dnssec).await?;
        Ok(records
            .iter()
            .filter_map(|record| Url::parse(&format!("https://{record}")).ok())
            .collect())
    }

    /// Candidate URLs for `host` without probing them.
    ///
    /// # Errors
    ///
    /// Returns `NodeError::Dns` if the A record lookup fails.
    pub async fn resolve_nodes(&self, host: &str) -> Result<NodeCandidates, NodeError> {
        let service = self.service_candidates(host).await;
        let address = self.address_candidates(host).await?;
        Ok(NodeCandidates { service, address })
    }

    /// Resolve `address` to the URL of an available node.
    ///
    /// # Errors
    ///
    /// - `NodeError::Cancelled` if `cancel` fires first
    /// - `NodeError::Dns` if SRV produced no candidates and the A lookup failed
    /// - `NodeError::NoReachableNode` if no candidate reported itself available
    #[instrument(skip_all, fields(host = %address.host()))]
    pub async fn resolve(
        &self,
        address: &ConferenceAddress,
        cancel: &CancellationToken,
    ) -> Result<Url, NodeError> {
        tokio::select! {
            () = cancel.cancelled() => {
                info!(target: "infinity.node", "Node resolution cancelled");
                Err(NodeError::Cancelled)
            }
            result = self.walk(address.host()) => result,
        }
    }

    async fn walk(&self, host: &str) -> Result<Url, NodeError> {
        let service = self.service_candidates(host).await;
        if let Some(node) = self.first_available(&service).await {
            return Ok(node);
        }

        match self.address_candidates(host).await {
            Ok(address) => {
                if let Some(node) = self.first_available(&address).await {
                    return Ok(node);
                }
            }
            Err(e) if service.is_empty() => return Err(e),
            Err(e) => {
                debug!(target: "infinity.node", error = %e, "A lookup failed after unusable SRV candidates");
            }
        }

        warn!(target: "infinity.node", host = %host, "No reachable node");
        Err(NodeError::NoReachableNode {
            host: host.to_string(),
        })
    }

    async fn first_available(&self, candidates: &[Url]) -> Option<Url> {
        for candidate in candidates {
            match self.probe.status(candidate).await {
                Ok(NodeStatus::Available) => {
                    info!(target: "infinity.node", node = %candidate, "Selected node");
                    return Some(candidate.clone());
                }
                Ok(NodeStatus::Maintenance) => {
                    info!(target: "infinity.node", node = %candidate, "Node in maintenance, trying next");
                }
                Ok(NodeStatus::NotFound) => {
                    debug!(target: "infinity.node", node = %candidate, "Not a conference node, trying next");
                }
                Err(e) => {
                    warn!(target: "infinity.node", node = %candidate, error = %e, "Node probe failed, trying next");
                }
            }
        }
        None
    }
}
