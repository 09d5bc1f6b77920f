//! Scripted DNS lookups.
//!
//! # Example
//!
//! ```rust,ignore
//! use infinity_test_utils::dns::*;
//!
//! let lookup = ScriptedDnsLookup::new()
//!     .with_srv("_pexapp._tcp.example.com", vec![srv_rdata(10, 5, 443, "node1.example.com")])
//!     .with_a("example.com", vec![a_rdata([192, 0, 2, 1])]);
//! ```

use bytes::{BufMut, Bytes, BytesMut};
use infinity_client::dns::record::RecordType;
use infinity_client::dns::{DnsAnswer, DnsLookup};
use infinity_client::errors::DnsError;
use std::collections::HashMap;
use std::net::Ipv4Addr;
use std::sync::Mutex;
use std::time::Duration;

/// Encode SRV RDATA.
#[must_use]
pub fn srv_rdata(priority: u16, weight: u16, port: u16, target: &str) -> Bytes {
    let mut data = BytesMut::new();
    data.put_u16(priority);
    data.put_u16(weight);
    data.put_u16(port);
    for label in target.split('.').filter(|l| !l.is_empty()) {
        data.put_u8(u8::try_from(label.len()).expect("label fits in one length byte"));
        data.put_slice(label.as_bytes());
    }
    data.put_u8(0);
    data.freeze()
}

/// Encode A RDATA.
#[must_use]
pub fn a_rdata(octets: impl Into<Ipv4Addr>) -> Bytes {
    Bytes::copy_from_slice(&octets.into().octets())
}

/// [`DnsLookup`] answering from a fixed table.
///
/// Names without an entry get an empty answer.
#[derive(Debug, Default)]
pub struct ScriptedDnsLookup {
    answers: HashMap<(String, RecordType), Result<Vec<Bytes>, DnsError>>,
    authenticated: bool,
    delay: Duration,
    queries: Mutex<Vec<(String, RecordType, bool)>>,
}

impl ScriptedDnsLookup {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn with_srv(mut self, name: &str, records: Vec<Bytes>) -> Self {
        self.answers
            .insert((name.to_string(), RecordType::Srv), Ok(records));
        self
    }

    #[must_use]
    pub fn with_a(mut self, name: &str, records: Vec<Bytes>) -> Self {
        self.answers.insert((name.to_string(), RecordType::A), Ok(records));
        self
    }

    #[must_use]
    pub fn with_error(mut self, name: &str, record_type: RecordType, error: DnsError) -> Self {
        self.answers.insert((name.to_string(), record_type), Err(error));
        self
    }

    /// Mark every answer as authenticated.
    #[must_use]
    pub fn authenticated(mut self) -> Self {
        self.authenticated = true;
        self
    }

    /// Delay every answer (use with paused time).
    #[must_use]
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Queries received so far.
    pub fn queries(&self) -> Vec<(String, RecordType, bool)> {
        self.queries.lock().unwrap().clone()
    }
}

#[async_trait::async_trait]
impl DnsLookup for ScriptedDnsLookup {
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

        if !self.delay.is_zero() {
            tokio::time::sleep(self.delay).await;
        }

        let records = self
            .answers
            .get(&(name.to_string(), record_type))
            .cloned()
            .unwrap_or_else(|| Ok(Vec::new()))?;

        Ok(DnsAnswer {
            records,
            authenticated: self.authenticated,
        })
    }
}
