//! DNS lookups against the platform's configured resolvers.
//!
//! Nameservers come from the system resolver configuration
//! (`/etc/resolv.conf` or the platform equivalent) as read by
//! `hickory-resolver`. Queries and answers are hickory [`Message`]s, so
//! owner and target names are decompressed by the parser before the RDATA
//! reaches [`super::record`]. When validation is requested the query sets
//! the AD bit, which asks a validating resolver to report authenticity in
//! the AD bit of its answer (RFC 6840 §5.7). Truncated UDP answers are
//! retried over TCP.

use super::record::RecordType;
use super::{DnsAnswer, DnsLookup};
use crate::errors::{DecodeError, DnsError};
use bytes::{BufMut, Bytes, BytesMut};
use hickory_resolver::proto::op::{Header, Message, MessageType, OpCode, Query, ResponseCode};
use hickory_resolver::proto::rr::{Name, RecordType as WireType};
use hickory_resolver::proto::serialize::binary::{BinDecodable, BinEncodable};
use hickory_resolver::system_conf;
use std::net::SocketAddr;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, UdpSocket};
use tracing::{debug, trace, warn};

/// Largest UDP answer accepted.
const UDP_BUFFER_SIZE: usize = 4096;

/// Answer section of one response, reduced to what the resolver needs.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedAnswer {
    pub truncated: bool,
    pub authenticated: bool,
    pub response_code: ResponseCode,
    /// Uncompressed RDATA of each answer whose type matched the question.
    pub records: Vec<Bytes>,
}

fn malformed(e: impl std::fmt::Display) -> DecodeError {
    DecodeError::MalformedMessage(e.to_string())
}

/// Build a single-question recursive query.
///
/// # Errors
///
/// Returns `DecodeError::MalformedMessage` if `name` is not a valid domain
/// name.
pub fn build_query(
    id: u16,
    name: &str,
    record_type: RecordType,
    dnssec: bool,
) -> Result<Message, DecodeError> {
    let mut fqdn =
        Name::from_ascii(name).map_err(|e| malformed(format!("invalid name {name:?}: {e}")))?;
    fqdn.set_fqdn(true);

    let mut message = Message::new();
    message
        .set_id(id)
        .set_message_type(MessageType::Query)
        .set_op_code(OpCode::Query)
        .set_recursion_desired(true)
        .set_authentic_data(dnssec)
        .add_query(Query::query(fqdn, WireType::from(record_type.code())));
    Ok(message)
}

/// Parse the answer to the query with `id`.
///
/// Each matching record's RDATA is re-encoded on its own, which expands
/// any compression pointers into the full label sequence.
///
/// # Errors
///
/// Returns `DecodeError::MalformedMessage` if the message cannot be parsed,
/// is not a response or carries a different id.
pub fn parse_answer(id: u16, record_type: RecordType, bytes: &[u8]) -> Result<ParsedAnswer, DecodeError> {
    let header = Header::from_bytes(bytes).map_err(malformed)?;
    if header.id() != id {
        return Err(malformed(format!(
            "response id {} does not match query id {id}",
            header.id()
        )));
    }
    if header.message_type() != MessageType::Response {
        return Err(malformed("message is not a response"));
    }

    // The body of a truncated answer may be cut mid-record.
    if header.truncated() {
        return Ok(ParsedAnswer {
            truncated: true,
            authenticated: header.authentic_data(),
            response_code: header.response_code(),
            records: Vec::new(),
        });
    }

    let message = Message::from_vec(bytes).map_err(malformed)?;
    let wanted = WireType::from(record_type.code());

    let records = message
        .answers()
        .iter()
        .filter(|record| record.record_type() == wanted)
        .map(|record| record.data().to_bytes().map(Bytes::from).map_err(malformed))
        .collect::<Result<Vec<_>, _>>()?;

    Ok(ParsedAnswer {
        truncated: false,
        authenticated: message.authentic_data(),
        response_code: message.response_code(),
        records,
    })
}

/// Resolver client using the platform's nameservers.
#[derive(Debug, Clone)]
pub struct SystemDnsLookup {
    nameservers: Vec<SocketAddr>,
}

impl SystemDnsLookup {
    /// Use the nameservers of the system resolver configuration.
    ///
    /// # Errors
    ///
    /// Returns `DnsError::Io` if the configuration cannot be read or lists
    /// no nameservers.
    pub fn from_system_conf() -> Result<Self, DnsError> {
        let (config, _options) = system_conf::read_system_conf()
            .map_err(|e| DnsError::Io(format!("failed to read system DNS configuration: {e}")))?;

        // The configuration lists each server once per protocol.
        let mut nameservers = Vec::new();
        for nameserver in config.name_servers() {
            if !nameservers.contains(&nameserver.socket_addr) {
                nameservers.push(nameserver.socket_addr);
            }
        }

        if nameservers.is_empty() {
            return Err(DnsError::Io("no nameservers configured".to_string()));
        }
        debug!(target: "infinity.dns", nameservers = ?nameservers, "Loaded system DNS configuration");
        Ok(Self { nameservers })
    }

    /// Use `nameservers`, in order, instead of the system configuration.
    #[must_use]
    pub fn with_nameservers(nameservers: Vec<SocketAddr>) -> Self {
        Self { nameservers }
    }

    #[must_use]
    pub fn nameservers(&self) -> &[SocketAddr] {
        &self.nameservers
    }

    async fn exchange(
        &self,
        nameserver: SocketAddr,
        id: u16,
        record_type: RecordType,
        query: &[u8],
    ) -> Result<ParsedAnswer, DnsError> {
        let answer = parse_answer(id, record_type, &exchange_udp(nameserver, query).await?)?;
        if !answer.truncated {
            return Ok(answer);
        }

        debug!(target: "infinity.dns", nameserver = %nameserver, "UDP answer truncated, retrying over TCP");
        Ok(parse_answer(id, record_type, &exchange_tcp(nameserver, query).await?)?)
    }
}

async fn exchange_udp(nameserver: SocketAddr, query: &[u8]) -> Result<Vec<u8>, DnsError> {
    let bind: SocketAddr = if nameserver.is_ipv4() {
        SocketAddr::from(([0, 0, 0, 0], 0))
    } else {
        SocketAddr::from(([0u16; 8], 0))
    };
    let socket = UdpSocket::bind(bind).await.map_err(io_error)?;
    socket.connect(nameserver).await.map_err(io_error)?;
    socket.send(query).await.map_err(io_error)?;

    let mut buf = vec![0u8; UDP_BUFFER_SIZE];
    let len = socket.recv(&mut buf).await.map_err(io_error)?;
    buf.truncate(len);
    Ok(buf)
}

async fn exchange_tcp(nameserver: SocketAddr, query: &[u8]) -> Result<Vec<u8>, DnsError> {
    let mut stream = TcpStream::connect(nameserver).await.map_err(io_error)?;

    let len = u16::try_from(query.len())
        .map_err(|_| DnsError::Io("query exceeds TCP frame size".to_string()))?;
    let mut framed = BytesMut::with_capacity(query.len() + 2);
    framed.put_u16(len);
    framed.put_slice(query);
    stream.write_all(&framed).await.map_err(io_error)?;

    let len = stream.read_u16().await.map_err(io_error)?;
    let mut buf = vec![0u8; usize::from(len)];
    stream.read_exact(&mut buf).await.map_err(io_error)?;
    Ok(buf)
}

fn io_error(e: std::io::Error) -> DnsError {
    DnsError::Io(e.to_string())
}

#[async_trait::async_trait]
impl DnsLookup for SystemDnsLookup {
    async fn query(
        &self,
        name: &str,
        record_type: RecordType,
        dnssec: bool,
    ) -> Result<DnsAnswer, DnsError> {
        let id: u16 = rand::random();
        let query = build_query(id, name, record_type, dnssec)?
            .to_vec()
            .map_err(|e| DnsError::Decode(malformed(e)))?;

        let mut last_error = DnsError::Io("no nameservers configured".to_string());
        for &nameserver in &self.nameservers {
            trace!(target: "infinity.dns", name = %name, nameserver = %nameserver, id, "Sending query");
            let answer = match self.exchange(nameserver, id, record_type, &query).await {
                Ok(answer) => answer,
                // Only an unreachable server moves on to the next one.
                Err(DnsError::Io(e)) => {
                    warn!(target: "infinity.dns", nameserver = %nameserver, error = %e, "Nameserver unreachable");
                    last_error = DnsError::Io(e);
                    continue;
                }
                Err(e) => return Err(e),
            };

            return match answer.response_code {
                ResponseCode::NoError => Ok(DnsAnswer {
                    records: answer.records,
                    authenticated: answer.authenticated,
                }),
                ResponseCode::NXDomain => {
                    debug!(target: "infinity.dns", name = %name, "Name does not exist");
                    Ok(DnsAnswer {
                        records: Vec::new(),
                        authenticated: answer.authenticated,
                    })
                }
                code => Err(DnsError::LookupFailed {
                    code: u16::from(code),
                }),
            };
        }

        Err(last_error)
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used, clippy::indexing_slicing)]
mod tests {
    use super::*;
    use crate::dns::record::decode_srv;
    use crate::dns::DnsResolver;
    use std::sync::Arc;
    use std::time::Duration;
    use tokio::net::TcpListener;

    const FLAGS_ANSWER: u16 = 0x8180; // QR | RD | RA
    const FLAG_TC: u16 = 0x0200;
    const FLAG_AD: u16 = 0x0020;

    /// `_pexapp._tcp.example.com` as it appears in the question at offset 12.
    /// `example.com` starts at offset 25 (0x19).
    const QUESTION_NAME: &[u8] = b"\x07_pexapp\x04_tcp\x07example\x03com\x00";

    /// Answer to an SRV question whose target `px01.example.com` is
    /// compressed against the question name.
    fn compressed_srv_response(id: u16, flags: u16) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u16(id);
        buf.put_u16(flags);
        buf.put_u16(1); // QDCOUNT
        buf.put_u16(1); // ANCOUNT
        buf.put_u16(0);
        buf.put_u16(0);
        buf.put_slice(QUESTION_NAME);
        buf.put_u16(33);
        buf.put_u16(1);

        buf.put_u16(0xC00C); // owner: pointer to the question name
        buf.put_u16(33);
        buf.put_u16(1);
        buf.put_u32(60);
        let rdata: &[u8] = &[0, 10, 0, 10, 1, 187, 4, b'p', b'x', b'0', b'1', 0xC0, 0x19];
        buf.put_u16(u16::try_from(rdata.len()).unwrap());
        buf.put_slice(rdata);
        buf.to_vec()
    }

    /// Header-only answer with `flags`.
    fn empty_response(id: u16, flags: u16) -> Vec<u8> {
        let mut buf = BytesMut::new();
        buf.put_u16(id);
        buf.put_u16(flags);
        buf.put_u16(0);
        buf.put_u16(0);
        buf.put_u16(0);
        buf.put_u16(0);
        buf.to_vec()
    }

    fn query_id(query: &[u8]) -> u16 {
        u16::from_be_bytes([query[0], query[1]])
    }

    #[test]
    fn test_build_query() {
        let query = build_query(0xBEEF, "_pexapp._tcp.example.com", RecordType::Srv, false).unwrap();
        assert_eq!(query.id(), 0xBEEF);
        assert!(query.recursion_desired());
        assert!(!query.authentic_data());
        assert_eq!(query.queries().len(), 1);
        assert_eq!(query.queries()[0].query_type(), WireType::SRV);
        assert_eq!(query.queries()[0].name().to_ascii(), "_pexapp._tcp.example.com.");

        let secure = build_query(1, "example.com.", RecordType::A, true).unwrap();
        assert!(secure.authentic_data());
        assert_eq!(secure.queries()[0].query_type(), WireType::A);
    }

    #[test]
    fn test_build_query_rejects_oversized_label() {
        assert!(build_query(1, &"a".repeat(64), RecordType::A, false).is_err());
    }

    #[test]
    fn test_compressed_srv_target_is_expanded() {
        let answer = parse_answer(7, RecordType::Srv, &compressed_srv_response(7, FLAGS_ANSWER)).unwrap();

        assert_eq!(answer.response_code, ResponseCode::NoError);
        assert_eq!(answer.records.len(), 1);

        let record = decode_srv(&answer.records[0]).unwrap();
        assert_eq!(record.priority, 10);
        assert_eq!(record.weight, 10);
        assert_eq!(record.port, 443);
        assert_eq!(record.target, "px01.example.com");
    }

    #[test]
    fn test_parse_answer_filters_by_type() {
        let answer = parse_answer(7, RecordType::A, &compressed_srv_response(7, FLAGS_ANSWER)).unwrap();
        assert!(answer.records.is_empty());
    }

    #[test]
    fn test_parse_answer_flags() {
        let authenticated = parse_answer(9, RecordType::A, &empty_response(9, FLAGS_ANSWER | FLAG_AD)).unwrap();
        assert!(authenticated.authenticated);

        let nxdomain = parse_answer(9, RecordType::A, &empty_response(9, FLAGS_ANSWER | 3)).unwrap();
        assert_eq!(nxdomain.response_code, ResponseCode::NXDomain);

        // A truncated body is not parsed.
        let mut cut = compressed_srv_response(9, FLAGS_ANSWER | FLAG_TC);
        cut.truncate(40);
        let truncated = parse_answer(9, RecordType::Srv, &cut).unwrap();
        assert!(truncated.truncated);
        assert!(truncated.records.is_empty());
    }

    #[test]
    fn test_parse_answer_rejects_mismatch() {
        let response = compressed_srv_response(1, FLAGS_ANSWER);
        assert!(matches!(
            parse_answer(2, RecordType::Srv, &response),
            Err(DecodeError::MalformedMessage(_))
        ));

        let query = empty_response(1, 0x0100);
        assert!(matches!(
            parse_answer(1, RecordType::Srv, &query),
            Err(DecodeError::MalformedMessage(_))
        ));

        assert!(parse_answer(1, RecordType::Srv, &response[..5]).is_err());
    }

    #[tokio::test]
    async fn test_lookup_resolves_compressed_target() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let nameserver = server.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (_, peer) = server.recv_from(&mut buf).await.unwrap();
            let response = compressed_srv_response(query_id(&buf), FLAGS_ANSWER | FLAG_AD);
            server.send_to(&response, peer).await.unwrap();
        });

        let resolver = DnsResolver::new(
            Arc::new(SystemDnsLookup::with_nameservers(vec![nameserver])),
            Duration::from_secs(5),
        );
        let records = resolver
            .resolve_service_records("pexapp", "tcp", "example.com", true)
            .await
            .unwrap();

        assert_eq!(records.len(), 1);
        assert_eq!(records[0].target, "px01.example.com");
        assert_eq!(records[0].port, 443);
    }

    #[tokio::test]
    async fn test_truncated_answer_retried_over_tcp() {
        let udp = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let nameserver = udp.local_addr().unwrap();
        let tcp = TcpListener::bind(nameserver).await.unwrap();

        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (_, peer) = udp.recv_from(&mut buf).await.unwrap();
            udp.send_to(&empty_response(query_id(&buf), FLAGS_ANSWER | FLAG_TC), peer)
                .await
                .unwrap();
        });
        tokio::spawn(async move {
            let (mut stream, _) = tcp.accept().await.unwrap();
            let len = stream.read_u16().await.unwrap();
            let mut query = vec![0u8; usize::from(len)];
            stream.read_exact(&mut query).await.unwrap();

            let response = compressed_srv_response(query_id(&query), FLAGS_ANSWER);
            stream.write_u16(u16::try_from(response.len()).unwrap()).await.unwrap();
            stream.write_all(&response).await.unwrap();
        });

        let lookup = SystemDnsLookup::with_nameservers(vec![nameserver]);
        let answer = lookup
            .query("_pexapp._tcp.example.com", RecordType::Srv, false)
            .await
            .unwrap();

        assert_eq!(answer.records.len(), 1);
        assert!(!answer.authenticated);
    }

    #[tokio::test]
    async fn test_server_failure_code() {
        let server = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let nameserver = server.local_addr().unwrap();
        tokio::spawn(async move {
            let mut buf = [0u8; 512];
            let (_, peer) = server.recv_from(&mut buf).await.unwrap();
            server
                .send_to(&empty_response(query_id(&buf), FLAGS_ANSWER | 2), peer)
                .await
                .unwrap();
        });

        let lookup = SystemDnsLookup::with_nameservers(vec![nameserver]);
        let result = lookup.query("example.com", RecordType::A, false).await;
        assert_eq!(result, Err(DnsError::LookupFailed { code: 2 }));
    }
}
