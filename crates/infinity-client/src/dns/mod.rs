//! Service discovery over DNS.
//!
//! [`DnsResolver`] issues SRV and A lookups through a [`DnsLookup`]
//! implementation, enforces the lookup timeout and, when requested, rejects
//! answers that the resolver did not authenticate.

pub mod record;
pub mod system;

use crate::errors::DnsError;
use bytes::Bytes;
use record::{decode_a, decode_srv, AddressRecord, RecordType, ServiceRecord};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, instrument, warn};

pub use system::SystemDnsLookup;

/// Raw answer to one question.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DnsAnswer {
    /// RDATA of each matching answer record.
    pub records: Vec<Bytes>,
    /// Whether the resolver marked the answer as authenticated.
    pub authenticated: bool,
}

/// Trait for DNS lookups (enables mocking).
#[async_trait::async_trait]
pub trait DnsLookup: Send + Sync {
    /// Look up records of `record_type` for `name`.
    async fn query(
        &self,
        name: &str,
        record_type: RecordType,
        dnssec: bool,
    ) -> Result<DnsAnswer, DnsError>;
}

/// Build the SRV query name `_{service}._{proto}.{domain}`.
#[must_use]
pub fn service_name(service: &str, proto: &str, domain: &str) -> String {
    format!("_{service}._{proto}.{domain}")
}

/// Resolves SRV and A records with a timeout and optional validation.
#[derive(Clone)]
pub struct DnsResolver {
    lookup: Arc<dyn DnsLookup>,
    timeout: Duration,
}

impl std::fmt::Debug for DnsResolver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DnsResolver")
            .field("timeout", &self.timeout)
            .finish_non_exhaustive()
    }
}

impl DnsResolver {
    #[must_use]
    pub fn new(lookup: Arc<dyn DnsLookup>, timeout: Duration) -> Self {
        Self { lookup, timeout }
    }

    /// Resolve SRV records for `_{service}._{proto}.{domain}`.
    ///
    /// Records are ordered by ascending priority, then descending weight.
    /// A single record targeting the root domain means the service is not
    /// offered and yields an empty list.
    ///
    /// # Errors
    ///
    /// - `DnsError::Timeout` if no answer arrives in time
    /// - `DnsError::UnauthenticatedResponse` if `secure` and the answer is not authenticated
    /// - `DnsError::Decode` if any record is malformed
    /// - `DnsError::LookupFailed` / `DnsError::Io` from the underlying lookup
    #[instrument(skip_all, fields(service = %service, domain = %domain))]
    pub async fn resolve_service_records(
        &self,
        service: &str,
        proto: &str,
        domain: &str,
        secure: bool,
    ) -> Result<Vec<ServiceRecord>, DnsError> {
        let name = service_name(service, proto, domain);
        let answer = self.lookup_checked(&name, RecordType::Srv, secure).await?;

        let mut records = answer
            .records
            .iter()
            .map(|rdata| decode_srv(rdata))
            .collect::<Result<Vec<_>, _>>()?;

        if let [only] = records.as_slice() {
            if only.is_root() {
                debug!(target: "infinity.dns", name = %name, "Service explicitly not offered");
                return Ok(Vec::new());
            }
        }

        records.sort();
        debug!(target: "infinity.dns", name = %name, count = records.len(), "Resolved SRV records");
        Ok(records)
    }

    /// Resolve A records for `domain`.
    ///
    /// # Errors
    ///
    /// Same as [`DnsResolver::resolve_service_records`].
    #[instrument(skip_all, fields(domain = %domain))]
    pub async fn resolve_address_records(
        &self,
        domain: &str,
        secure: bool,
    ) -> Result<Vec<AddressRecord>, DnsError> {
        let answer = self.lookup_checked(domain, RecordType::A, secure).await?;

        let records = answer
            .records
            .iter()
            .map(|rdata| decode_a(rdata))
            .collect::<Result<Vec<_>, _>>()?;

        debug!(target: "infinity.dns", domain = %domain, count = records.len(), "Resolved A records");
        Ok(records)
    }

    async fn lookup_checked(
        &self,
        name: &str,
        record_type: RecordType,
        secure: bool,
    ) -> Result<DnsAnswer, DnsError> {
        let answer = tokio::time::timeout(self.timeout, self.lookup.query(name, record_type, secure))
            .await
            .map_err(|_| {
                warn!(target: "infinity.dns", name = %name, timeout_ms = self.timeout.as_millis(), "DNS lookup timed out");
                DnsError::Timeout
            })??;

        if secure && !answer.authenticated {
            warn!(target: "infinity.dns", name = %name, "Rejecting unauthenticated DNS response");
            return Err(DnsError::UnauthenticatedResponse);
        }

        Ok(answer)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct StaticLookup {
        answer: Result<DnsAnswer, DnsError>,
        delay: Duration,
        queries: Mutex<Vec<(String, RecordType, bool)>>,
    }

    impl StaticLookup {
        fn new(answer: Result<DnsAnswer, DnsError>) -> Arc<Self> {
            Arc::new(Self {
                answer,
                delay: Duration::ZERO,
                queries: Mutex::new(Vec::new()),
            })
        }
    }

    #[async_trait::async_trait]
    impl DnsLookup for StaticLookup {
        async fn query(
            &self,
            name: &str,
            record_type: RecordType,
            dnssec: bool,
        ) -> Result<DnsAnswer, DnsError> {
            self.queries
                .lock()
                .unwrap()
                .push((name.to_string(), record_type, dnssec));
            tokio::time::sleep(self.delay).await;
            self.answer.clone()
        }
    }

    fn srv(priority: u16, weight: u16, port: u16, target: &str) -> Bytes {
        let mut data = Vec::new();
        data.extend_from_slice(&priority.to_be_bytes());
        data.extend_from_slice(&weight.to_be_bytes());
        data.extend_from_slice(&port.to_be_bytes());
        for label in target.split('.').filter(|l| !l.is_empty()) {
            data.push(u8::try_from(label.len()).unwrap());
            data.extend_from_slice(label.as_bytes());
        }
        data.push(0);
        Bytes::from(data)
    }

    fn answer(records: Vec<Bytes>, authenticated: bool) -> Result<DnsAnswer, DnsError> {
        Ok(DnsAnswer {
            records,
            authenticated,
        })
    }

    #[tokio::test]
    async fn test_query_name_and_sorting() {
        let lookup = StaticLookup::new(answer(
            vec![
                srv(2, 10, 443, "low.example.com"),
                srv(1, 10, 443, "first.example.com"),
                srv(2, 20, 443, "high.example.com"),
            ],
            false,
        ));
        let resolver = DnsResolver::new(lookup.clone(), Duration::from_secs(5));

        let records = resolver
            .resolve_service_records("pexapp", "tcp", "example.com", false)
            .await
            .unwrap();

        let targets: Vec<_> = records.iter().map(|r| r.target.as_str()).collect();
        assert_eq!(
            targets,
            vec!["first.example.com", "high.example.com", "low.example.com"]
        );

        let queries = lookup.queries.lock().unwrap();
        assert_eq!(
            queries[0],
            ("_pexapp._tcp.example.com".to_string(), RecordType::Srv, false)
        );
    }

    #[tokio::test]
    async fn test_single_root_target_is_empty() {
        let lookup = StaticLookup::new(answer(vec![srv(0, 0, 0, ".")], false));
        let resolver = DnsResolver::new(lookup, Duration::from_secs(5));

        let records = resolver
            .resolve_service_records("pexapp", "tcp", "example.com", false)
            .await
            .unwrap();
        assert!(records.is_empty());
    }

    #[tokio::test]
    async fn test_malformed_record_is_error() {
        let lookup = StaticLookup::new(answer(vec![Bytes::from_static(&[0, 1, 0])], false));
        let resolver = DnsResolver::new(lookup, Duration::from_secs(5));

        let result = resolver
            .resolve_service_records("pexapp", "tcp", "example.com", false)
            .await;
        assert!(matches!(result, Err(DnsError::Decode(_))));
    }

    #[tokio::test]
    async fn test_secure_rejects_unauthenticated() {
        let lookup = StaticLookup::new(answer(vec![Bytes::from_static(&[10, 0, 0, 1])], false));
        let resolver = DnsResolver::new(lookup.clone(), Duration::from_secs(5));

        let result = resolver.resolve_address_records("example.com", true).await;
        assert_eq!(result, Err(DnsError::UnauthenticatedResponse));
        assert!(lookup.queries.lock().unwrap()[0].2);

        let insecure = resolver.resolve_address_records("example.com", false).await;
        assert_eq!(insecure.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn test_secure_accepts_authenticated() {
        let lookup = StaticLookup::new(answer(vec![Bytes::from_static(&[10, 0, 0, 1])], true));
        let resolver = DnsResolver::new(lookup, Duration::from_secs(5));

        let records = resolver
            .resolve_address_records("example.com", true)
            .await
            .unwrap();
        assert_eq!(records[0].to_string(), "10.0.0.1");
    }

    #[tokio::test(start_paused = true)]
    async fn test_timeout_is_distinct_error() {
        let lookup = Arc::new(StaticLookup {
            answer: answer(Vec::new(), true),
            delay: Duration::from_secs(60),
            queries: Mutex::new(Vec::new()),
        });
        let resolver = DnsResolver::new(lookup, Duration::from_secs(5));

        let result = resolver.resolve_address_records("slow.example.com", false).await;
        assert_eq!(result, Err(DnsError::Timeout));
    }

    #[tokio::test]
    async fn test_lookup_failure_propagates() {
        let lookup = StaticLookup::new(Err(DnsError::LookupFailed { code: 5 }));
        let resolver = DnsResolver::new(lookup, Duration::from_secs(5));

        let result = resolver
            .resolve_service_records("pexapp", "tcp", "example.com", false)
            .await;
        assert_eq!(result, Err(DnsError::LookupFailed { code: 5 }));
    }
}
