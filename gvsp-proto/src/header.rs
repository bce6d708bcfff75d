/* This Source Code Form is subject to the terms of the Mozilla Public
 * License, v. 2.0. If a copy of the MPL was not distributed with this
 * file, You can obtain one at https://mozilla.org/MPL/2.0/. */

//! Parsing of the 8-byte GVSP packet header and the leader payload that
//! follows it for uncompressed-image frames.
//!
//! These are pure functions over byte slices: no I/O, no session state.
//! Classification and reassembly live in `gvsp-receiver`.

use thiserror::Error;

/// Combined size of the IP + UDP + GVSP headers that the camera's packet
/// MTU budget must account for, per the GVSP wire specification.
pub const HEADER_OVERHEAD: usize = 36;

/// Size in bytes of the fixed GVSP packet header.
pub const HEADER_LEN: usize = 8;

/// Size in bytes of the leader payload for an uncompressed image frame.
pub const LEADER_PAYLOAD_LEN: usize = 36;

/// Payload type code for an uncompressed image, as carried in the leader.
const PAYLOAD_TYPE_UNCOMPRESSED_IMAGE: u16 = 0x0001;

/// Errors produced while parsing the fixed header or a leader's payload.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
pub enum HeaderError {
    /// The datagram is shorter than the 8-byte fixed header.
    #[error("datagram ({len} bytes) is shorter than the 8-byte GVSP header")]
    TooShort {
        /// Length of the datagram that was rejected.
        len: usize,
    },

    /// The datagram claims to be a leader but isn't long enough to hold the
    /// leader payload.
    #[error("leader payload ({len} bytes) is shorter than the required {LEADER_PAYLOAD_LEN} bytes")]
    LeaderTooShort {
        /// Length of the leader payload that was rejected.
        len: usize,
    },

    /// The leader's first payload byte indicates interlaced image data.
    #[error("interlaced payloads are not supported")]
    Interlaced,

    /// The leader's payload type field is not "uncompressed image".
    #[error("unsupported leader payload type {0:#06x}")]
    UnsupportedPayloadType(u16),
}

/// The packet-format nibble carried in byte 4 of the GVSP header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PacketFormat {
    /// Start-of-frame packet carrying frame metadata.
    Leader,
    /// End-of-frame packet.
    Trailer,
    /// A chunk of pixel payload data.
    Data,
    /// Any format nibble this receiver doesn't recognize (e.g. an extended
    /// chunk format). Carried through unchanged so the caller can decide
    /// whether to log and ignore it.
    Unknown(u8),
}

impl PacketFormat {
    fn from_nibble(nibble: u8) -> Self {
        match nibble & 0x0f {
            1 => Self::Leader,
            2 => Self::Trailer,
            3 => Self::Data,
            other => Self::Unknown(other),
        }
    }
}

/// The fixed 8-byte header shared by every GVSP packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PacketHeader {
    /// Device-reported status code; zero means OK.
    pub status: u16,
    /// Block (frame) ID. Zero is reserved and marks an invalid packet.
    pub block_id: u16,
    /// Extended packet ID flag (byte 4, high bit). Always rejected by this
    /// receiver when set; extended IDs are out of scope.
    pub ext_id: bool,
    /// Packet format nibble (byte 4, low nibble).
    pub format: PacketFormat,
    /// 24-bit packet ID (bytes 5-7). 1-based index for data packets, unused
    /// for leader/trailer.
    pub packet_id: u32,
}

/// Parses the fixed 8-byte header from the front of a GVSP datagram.
///
/// This does not look past byte 7; callers that need the leader or data
/// payload use the remaining bytes of the same datagram directly.
pub fn parse(datagram: &[u8]) -> Result<PacketHeader, HeaderError> {
    if datagram.len() < HEADER_LEN {
        return Err(HeaderError::TooShort {
            len: datagram.len(),
        });
    }

    let status = u16::from_be_bytes([datagram[0], datagram[1]]);
    let block_id = u16::from_be_bytes([datagram[2], datagram[3]]);
    let ext_id = datagram[4] & 0x80 != 0;
    let format = PacketFormat::from_nibble(datagram[4]);
    let packet_id = u32::from_be_bytes([0, datagram[5], datagram[6], datagram[7]]);

    Ok(PacketHeader {
        status,
        block_id,
        ext_id,
        format,
        packet_id,
    })
}

/// Validates a parsed header per spec: zero status, non-zero block ID, and
/// the extended-ID flag clear. Does not look at `format` or `packet_id`.
#[must_use]
pub fn validate(header: &PacketHeader) -> bool {
    header.status == 0 && header.block_id != 0 && !header.ext_id
}

/// Frame metadata extracted from an uncompressed-image leader payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LeaderInfo {
    /// Raw GVSP pixel format code (bytes 12-15 of the leader payload).
    pub pixel_format: u32,
    /// Width in pixels (bytes 16-19).
    pub size_x: u32,
    /// Height in pixels/spectral lines (bytes 20-23).
    pub size_s: u32,
}

/// Parses the 36-byte leader payload that follows the fixed header for an
/// uncompressed image frame.
///
/// `payload` is the datagram with the 8-byte header already stripped.
/// Region-of-interest offset, padding, and non-monochrome formats are
/// intentionally not extracted — see spec §4.2.
pub fn parse_leader_payload(payload: &[u8]) -> Result<LeaderInfo, HeaderError> {
    if payload.len() < LEADER_PAYLOAD_LEN {
        return Err(HeaderError::LeaderTooShort { len: payload.len() });
    }

    if payload[0] != 0 {
        return Err(HeaderError::Interlaced);
    }

    let payload_type = u16::from_be_bytes([payload[2], payload[3]]);
    if payload_type != PAYLOAD_TYPE_UNCOMPRESSED_IMAGE {
        return Err(HeaderError::UnsupportedPayloadType(payload_type));
    }

    let pixel_format = u32::from_be_bytes([payload[12], payload[13], payload[14], payload[15]]);
    let size_x = u32::from_be_bytes([payload[16], payload[17], payload[18], payload[19]]);
    let size_s = u32::from_be_bytes([payload[20], payload[21], payload[22], payload[23]]);

    Ok(LeaderInfo {
        pixel_format,
        size_x,
        size_s,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn header_bytes(status: u16, block_id: u16, byte4: u8, packet_id: u32) -> Vec<u8> {
        let mut buf = Vec::with_capacity(8);
        buf.extend_from_slice(&status.to_be_bytes());
        buf.extend_from_slice(&block_id.to_be_bytes());
        buf.push(byte4);
        let id = packet_id.to_be_bytes();
        buf.extend_from_slice(&id[1..]);
        buf
    }

    #[test]
    fn parses_leader_header() {
        let buf = header_bytes(0, 7, 0x01, 0);
        let header = parse(&buf).unwrap();
        assert_eq!(header.status, 0);
        assert_eq!(header.block_id, 7);
        assert!(!header.ext_id);
        assert_eq!(header.format, PacketFormat::Leader);
        assert!(validate(&header));
    }

    #[test]
    fn parses_data_header_with_packet_id() {
        let buf = header_bytes(0, 1, 0x03, 0x0002_01);
        let header = parse(&buf).unwrap();
        assert_eq!(header.format, PacketFormat::Data);
        assert_eq!(header.packet_id, 0x0002_01);
    }

    #[test]
    fn rejects_nonzero_status() {
        let header = parse(&header_bytes(0x8001, 1, 0x01, 0)).unwrap();
        assert!(!validate(&header));
    }

    #[test]
    fn rejects_zero_block_id() {
        let header = parse(&header_bytes(0, 0, 0x01, 0)).unwrap();
        assert!(!validate(&header));
    }

    #[test]
    fn rejects_extended_id_flag() {
        let header = parse(&header_bytes(0, 1, 0x81, 0)).unwrap();
        assert!(header.ext_id);
        assert!(!validate(&header));
    }

    #[test]
    fn reserved_bits_in_byte4_are_ignored() {
        // Bits 1-3 of byte 4 are reserved; only the high bit (ext id) and
        // low nibble (format) carry meaning.
        let header = parse(&header_bytes(0, 1, 0b0_110_0011, 0)).unwrap();
        assert_eq!(header.format, PacketFormat::Data);
        assert!(!header.ext_id);
    }

    #[test]
    fn unrecognized_format_nibble_is_carried_through() {
        let header = parse(&header_bytes(0, 1, 0x05, 0)).unwrap();
        assert_eq!(header.format, PacketFormat::Unknown(5));
    }

    #[test]
    fn too_short_datagram_is_rejected() {
        assert_eq!(parse(&[0u8; 4]), Err(HeaderError::TooShort { len: 4 }));
    }

    #[test]
    fn parses_uncompressed_image_leader_payload() {
        let mut payload = vec![0u8; LEADER_PAYLOAD_LEN];
        payload[2..4].copy_from_slice(&0x0001u16.to_be_bytes());
        payload[12..16].copy_from_slice(&0x0108_0001u32.to_be_bytes());
        payload[16..20].copy_from_slice(&4u32.to_be_bytes());
        payload[20..24].copy_from_slice(&2u32.to_be_bytes());

        let info = parse_leader_payload(&payload).unwrap();
        assert_eq!(info.pixel_format, 0x0108_0001);
        assert_eq!(info.size_x, 4);
        assert_eq!(info.size_s, 2);
    }

    #[test]
    fn rejects_interlaced_leader() {
        let mut payload = vec![0u8; LEADER_PAYLOAD_LEN];
        payload[0] = 1;
        payload[2..4].copy_from_slice(&0x0001u16.to_be_bytes());
        assert_eq!(parse_leader_payload(&payload), Err(HeaderError::Interlaced));
    }

    #[test]
    fn rejects_non_image_payload_type() {
        let mut payload = vec![0u8; LEADER_PAYLOAD_LEN];
        payload[2..4].copy_from_slice(&0x0002u16.to_be_bytes());
        assert_eq!(
            parse_leader_payload(&payload),
            Err(HeaderError::UnsupportedPayloadType(0x0002))
        );
    }

    #[test]
    fn rejects_short_leader_payload() {
        let payload = vec![0u8; 10];
        assert_eq!(
            parse_leader_payload(&payload),
            Err(HeaderError::LeaderTooShort { len: 10 })
        );
    }
}
