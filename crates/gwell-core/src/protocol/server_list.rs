//! Server-list request/reply codec and the candidate quality probe.
//!
//! Wire format (little-endian unless noted):
//! ```text
//! request : [kind:4 = 3][reserved:4 = 0]
//! reply   : [count:4][entry:36 × count]
//! entry   : [ipv4:4][ipv6:16][family:2][server_id:2][port:2 BE][port2:2 BE][stamp:4][level:4]
//! probe   : [kind:4 = 0x10][nonce:4]
//! ```
//! Trailing bytes after the last declared entry are ignored.

use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};

use thiserror::Error;
use tracing::debug;

/// Message kind of the server-list request.
pub const SERVER_LIST_REQUEST_KIND: u32 = 3;
/// Message kind of the candidate quality probe.
pub const CANDIDATE_PROBE_KIND: u32 = 0x10;
/// Size of the server-list request and of the candidate probe.
pub const REQUEST_SIZE: usize = 8;
/// Size of the `count` prefix of a server-list reply.
pub const COUNT_SIZE: usize = 4;
/// Size of one server-list entry.
pub const ENTRY_SIZE: usize = 36;
/// Largest entry count a well-formed reply may declare.
pub const MAX_ENTRIES: usize = 64;

const FAMILY_IPV4: u16 = 1;
const FAMILY_IPV6: u16 = 2;

/// Errors produced while decoding a server-list reply.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ServerListError {
    /// The datagram is shorter than its header or its declared entry count.
    #[error("insufficient data: need at least {needed} bytes, got {available}")]
    InsufficientData { needed: usize, available: usize },

    /// The declared entry count exceeds [`MAX_ENTRIES`].
    #[error("server list declares {0} entries (max {MAX_ENTRIES})")]
    TooManyEntries(u32),
}

/// One decoded server-list entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerEntry {
    pub address: IpAddr,
    pub server_id: u16,
    pub primary_port: u16,
    pub secondary_port: u16,
    /// Opaque value the rendezvous service attaches to each entry.
    pub stamp: u32,
    /// Preference level; lower is better.
    pub level: u32,
}

impl ServerEntry {
    /// Address to contact for this server (primary port).
    pub fn socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.primary_port)
    }
}

// ── Public API ────────────────────────────────────────────────────────────────

/// Encodes the 8-byte server-list request.
pub fn encode_server_list_request() -> [u8; REQUEST_SIZE] {
    encode_kind_and_word(SERVER_LIST_REQUEST_KIND, 0)
}

/// Encodes the 8-byte candidate quality probe carrying `nonce`.
pub fn encode_candidate_probe(nonce: u32) -> [u8; REQUEST_SIZE] {
    encode_kind_and_word(CANDIDATE_PROBE_KIND, nonce)
}

/// Decodes a server-list reply.
///
/// Entries whose family flag is neither IPv4 nor IPv6 are skipped.  A reply
/// declaring zero entries decodes to an empty list.
///
/// # Errors
///
/// Returns [`ServerListError::InsufficientData`] if the datagram is shorter
/// than `4 + 36 × count` bytes and [`ServerListError::TooManyEntries`] if
/// `count` exceeds [`MAX_ENTRIES`].
pub fn decode_server_list(bytes: &[u8]) -> Result<Vec<ServerEntry>, ServerListError> {
    let count = read_u32_le(bytes, 0)?;
    if count as usize > MAX_ENTRIES {
        return Err(ServerListError::TooManyEntries(count));
    }

    let count = count as usize;
    require_len(bytes, COUNT_SIZE + count * ENTRY_SIZE)?;

    let mut entries = Vec::with_capacity(count);
    for index in 0..count {
        let start = COUNT_SIZE + index * ENTRY_SIZE;
        if let Some(entry) = decode_entry(&bytes[start..start + ENTRY_SIZE])? {
            entries.push(entry);
        }
    }
    Ok(entries)
}

/// Encodes a server-list reply.  Used by rendezvous fakes in tests.
///
/// The family flag is derived from each entry's address.
pub fn encode_server_list(entries: &[ServerEntry]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(COUNT_SIZE + entries.len() * ENTRY_SIZE);
    buf.extend_from_slice(&(entries.len() as u32).to_le_bytes());

    for entry in entries {
        let (v4, v6, family) = match entry.address {
            IpAddr::V4(v4) => (v4.octets(), [0u8; 16], FAMILY_IPV4),
            IpAddr::V6(v6) => ([0u8; 4], v6.octets(), FAMILY_IPV6),
        };
        buf.extend_from_slice(&v4);
        buf.extend_from_slice(&v6);
        buf.extend_from_slice(&family.to_le_bytes());
        buf.extend_from_slice(&entry.server_id.to_le_bytes());
        buf.extend_from_slice(&entry.primary_port.to_be_bytes());
        buf.extend_from_slice(&entry.secondary_port.to_be_bytes());
        buf.extend_from_slice(&entry.stamp.to_le_bytes());
        buf.extend_from_slice(&entry.level.to_le_bytes());
    }
    buf
}

// ── Private helpers ───────────────────────────────────────────────────────────

fn encode_kind_and_word(kind: u32, word: u32) -> [u8; REQUEST_SIZE] {
    let mut buf = [0u8; REQUEST_SIZE];
    buf[..4].copy_from_slice(&kind.to_le_bytes());
    buf[4..].copy_from_slice(&word.to_le_bytes());
    buf
}

fn decode_entry(entry: &[u8]) -> Result<Option<ServerEntry>, ServerListError> {
    let address = match read_u16_le(entry, 20)? {
        FAMILY_IPV4 => IpAddr::V4(Ipv4Addr::new(entry[0], entry[1], entry[2], entry[3])),
        FAMILY_IPV6 => {
            let mut octets = [0u8; 16];
            octets.copy_from_slice(&entry[4..20]);
            IpAddr::V6(Ipv6Addr::from(octets))
        }
        family => {
            debug!(family, "skipping server-list entry with unknown address family");
            return Ok(None);
        }
    };

    Ok(Some(ServerEntry {
        address,
        server_id: read_u16_le(entry, 22)?,
        primary_port: read_u16_be(entry, 24)?,
        secondary_port: read_u16_be(entry, 26)?,
        stamp: read_u32_le(entry, 28)?,
        level: read_u32_le(entry, 32)?,
    }))
}

fn require_len(buf: &[u8], needed: usize) -> Result<(), ServerListError> {
    if buf.len() < needed {
        Err(ServerListError::InsufficientData {
            needed,
            available: buf.len(),
        })
    } else {
        Ok(())
    }
}

fn read_u16_le(buf: &[u8], offset: usize) -> Result<u16, ServerListError> {
    require_len(buf, offset + 2)?;
    Ok(u16::from_le_bytes([buf[offset], buf[offset + 1]]))
}

fn read_u16_be(buf: &[u8], offset: usize) -> Result<u16, ServerListError> {
    require_len(buf, offset + 2)?;
    Ok(u16::from_be_bytes([buf[offset], buf[offset + 1]]))
}

fn read_u32_le(buf: &[u8], offset: usize) -> Result<u32, ServerListError> {
    require_len(buf, offset + 4)?;
    Ok(u32::from_le_bytes([
        buf[offset],
        buf[offset + 1],
        buf[offset + 2],
        buf[offset + 3],
    ]))
}

// ── Tests ─────────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;

    fn ipv4_entry(a: [u8; 4], server_id: u16, port: u16, level: u32) -> ServerEntry {
        ServerEntry {
            address: IpAddr::V4(Ipv4Addr::from(a)),
            server_id,
            primary_port: port,
            secondary_port: port,
            stamp: 0xE867_29A0,
            level,
        }
    }

    #[test]
    fn test_request_layout() {
        assert_eq!(encode_server_list_request(), [3, 0, 0, 0, 0, 0, 0, 0]);
    }

    #[test]
    fn test_candidate_probe_layout() {
        assert_eq!(
            encode_candidate_probe(0x0102_0304),
            [0x10, 0, 0, 0, 0x04, 0x03, 0x02, 0x01]
        );
    }

    #[test]
    fn test_decode_empty_list() {
        assert_eq!(decode_server_list(&[0, 0, 0, 0]), Ok(vec![]));
    }

    #[test]
    fn test_decode_truncated_count_returns_insufficient_data() {
        assert_eq!(
            decode_server_list(&[1, 0]),
            Err(ServerListError::InsufficientData {
                needed: 4,
                available: 2
            })
        );
    }

    #[test]
    fn test_decode_short_reply_returns_insufficient_data() {
        // Arrange: declares two entries but carries one.
        let mut bytes = encode_server_list(&[ipv4_entry([10, 0, 0, 1], 1, 8000, 0)]);
        bytes[0] = 2;

        // Act
        let result = decode_server_list(&bytes);

        // Assert
        assert_eq!(
            result,
            Err(ServerListError::InsufficientData {
                needed: 4 + 2 * ENTRY_SIZE,
                available: 4 + ENTRY_SIZE
            })
        );
    }

    #[test]
    fn test_decode_rejects_oversized_count() {
        let bytes = 65u32.to_le_bytes();
        assert_eq!(
            decode_server_list(&bytes),
            Err(ServerListError::TooManyEntries(65))
        );
    }

    #[test]
    fn test_decode_skips_unknown_family() {
        // Arrange
        let mut bytes = encode_server_list(&[
            ipv4_entry([10, 0, 0, 1], 1, 8000, 0),
            ipv4_entry([10, 0, 0, 2], 2, 8000, 0),
        ]);
        bytes[COUNT_SIZE + 20] = 7;

        // Act
        let entries = decode_server_list(&bytes).unwrap();

        // Assert
        assert_eq!(entries.len(), 1);
        assert_eq!(entries[0].server_id, 2);
    }

    #[test]
    fn test_decode_ignores_trailing_bytes() {
        let mut bytes = encode_server_list(&[ipv4_entry([10, 0, 0, 1], 1, 8000, 0)]);
        bytes.extend_from_slice(&[0xFF; 5]);
        assert_eq!(decode_server_list(&bytes).unwrap().len(), 1);
    }

    #[test]
    fn test_ipv6_entry_is_decoded_from_ipv6_field() {
        // Arrange
        let entry = ServerEntry {
            address: "2001:db8::7".parse().unwrap(),
            server_id: 9,
            primary_port: 28800,
            secondary_port: 28801,
            stamp: 1,
            level: 2,
        };

        // Act
        let decoded = decode_server_list(&encode_server_list(&[entry.clone()])).unwrap();

        // Assert
        assert_eq!(decoded, vec![entry]);
        assert_eq!(
            decoded[0].socket_addr(),
            "[2001:db8::7]:28800".parse::<SocketAddr>().unwrap()
        );
    }

    #[test]
    fn test_ports_are_big_endian_on_the_wire() {
        let bytes = encode_server_list(&[ipv4_entry([10, 0, 0, 1], 1, 28800, 0)]);
        let entry = &bytes[COUNT_SIZE..];
        assert_eq!(&entry[24..26], &[0x70, 0x80]);
    }
}
