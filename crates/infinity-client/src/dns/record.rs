//! Decoders for raw SRV and A resource record payloads.

use crate::errors::DecodeError;
use bytes::Buf;
use std::cmp::Ordering;
use std::fmt;
use std::net::Ipv4Addr;

/// Record types understood by the resolver.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RecordType {
    A,
    Srv,
}

impl RecordType {
    /// Wire value of the type.
    #[must_use]
    pub fn code(self) -> u16 {
        match self {
            RecordType::A => 1,
            RecordType::Srv => 33,
        }
    }
}

/// A decoded SRV record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceRecord {
    pub priority: u16,
    pub weight: u16,
    pub port: u16,
    /// Target host name without the trailing dot, or `"."` for the root.
    pub target: String,
}

impl ServiceRecord {
    /// Size of the fixed priority/weight/port header.
    pub const HEADER_SIZE: usize = 6;

    /// Root target meaning "service not offered here".
    pub const ROOT_TARGET: &'static str = ".";

    /// Whether the record points at the root domain.
    #[must_use]
    pub fn is_root(&self) -> bool {
        self.target == Self::ROOT_TARGET
    }
}

impl Ord for ServiceRecord {
    /// Ascending priority, then descending weight.
    fn cmp(&self, other: &Self) -> Ordering {
        self.priority
            .cmp(&other.priority)
            .then_with(|| other.weight.cmp(&self.weight))
            .then_with(|| self.target.cmp(&other.target))
            .then_with(|| self.port.cmp(&other.port))
    }
}

impl PartialOrd for ServiceRecord {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// A decoded A record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct AddressRecord {
    pub ipv4: Ipv4Addr,
}

impl fmt::Display for AddressRecord {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.ipv4.fmt(f)
    }
}

/// Decode an SRV RDATA payload.
///
/// # Errors
///
/// Returns `DecodeError::TooShort` if the payload cannot hold the fixed
/// header, and `DecodeError::MalformedLabels` if the target label sequence
/// is missing, truncated, unterminated or not ASCII.
pub fn decode_srv(data: &[u8]) -> Result<ServiceRecord, DecodeError> {
    if data.len() < ServiceRecord::HEADER_SIZE {
        return Err(DecodeError::TooShort {
            expected: ServiceRecord::HEADER_SIZE,
            actual: data.len(),
        });
    }

    let mut buf = data;
    let priority = buf.get_u16();
    let weight = buf.get_u16();
    let port = buf.get_u16();

    let target = decode_labels(buf, ServiceRecord::HEADER_SIZE)?;

    Ok(ServiceRecord {
        priority,
        weight,
        port,
        target,
    })
}

/// Decode an A RDATA payload.
///
/// # Errors
///
/// Returns `DecodeError::InvalidAddressLength` unless the payload is exactly
/// four bytes.
pub fn decode_a(data: &[u8]) -> Result<AddressRecord, DecodeError> {
    let octets: [u8; 4] = data
        .try_into()
        .map_err(|_| DecodeError::InvalidAddressLength(data.len()))?;
    Ok(AddressRecord {
        ipv4: Ipv4Addr::from(octets),
    })
}

/// Rewrite an uncompressed `[len][bytes]...[0]` label sequence as dotted text.
///
/// `base` is the offset of `labels` within the record, used for error
/// positions. The empty sequence (a lone terminator) is the root, `"."`.
fn decode_labels(labels: &[u8], base: usize) -> Result<String, DecodeError> {
    let mut name = String::with_capacity(labels.len());
    let mut pos = 0usize;

    loop {
        let Some(&len) = labels.get(pos) else {
            return Err(DecodeError::MalformedLabels { offset: base + pos });
        };
        if len == 0 {
            break;
        }
        // Compression pointers and extended label types are not valid in SRV RDATA.
        if len & 0xC0 != 0 {
            return Err(DecodeError::MalformedLabels { offset: base + pos });
        }

        let start = pos + 1;
        let end = start + usize::from(len);
        let label = labels
            .get(start..end)
            .ok_or(DecodeError::MalformedLabels { offset: base + pos })?;
        if !label.is_ascii() {
            return Err(DecodeError::MalformedLabels {
                offset: base + start,
            });
        }

        if !name.is_empty() {
            name.push('.');
        }
        name.extend(label.iter().map(|&b| char::from(b)));
        pos = end;
    }

    if pos + 1 != labels.len() {
        return Err(DecodeError::MalformedLabels {
            offset: base + pos + 1,
        });
    }

    if name.is_empty() {
        Ok(ServiceRecord::ROOT_TARGET.to_string())
    } else {
        Ok(name)
    }
}
