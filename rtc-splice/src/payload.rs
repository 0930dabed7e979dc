//! Payload window of a raw RTP packet.
//!
//! ```text
//!  0                   1                   2                   3
//!  0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1 2 3 4 5 6 7 8 9 0 1
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |V=2|P|X|  CC   |M|     PT      |       sequence number         |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                           timestamp                           |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |           synchronization source (SSRC) identifier            |
//! +=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+=+
//! |            contributing source (CSRC) identifiers             |
//! |                             ....                              |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! |                            payload                            |
//! |                               +-------------------------------+
//! |                               | padding ...   | pad count     |
//! +-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+-+
//! ```
//!
//! The payload starts right after the fixed header and the CSRC list. When
//! the padding bit is set, the last byte of the packet counts the padding
//! octets to strip, unless it claims more than the payload holds.
//! Header-extension data (X bit) is left inside the payload window.

use shared::error::{Error, Result};
use std::fmt;

/// Size of the fixed RTP header.
pub const HEADER_LENGTH: usize = 12;
/// Size of one CSRC identifier.
pub const CSRC_LENGTH: usize = 4;

const VERSION_SHIFT: u8 = 6;
const VERSION_MASK: u8 = 0x3;
const PADDING_SHIFT: u8 = 5;
const PADDING_MASK: u8 = 0x1;
const EXTENSION_SHIFT: u8 = 4;
const EXTENSION_MASK: u8 = 0x1;
const CC_MASK: u8 = 0xF;
const MARKER_SHIFT: u8 = 7;
const MARKER_MASK: u8 = 0x1;
const PT_MASK: u8 = 0x7F;
const SEQ_NUM_OFFSET: usize = 2;
const TIMESTAMP_OFFSET: usize = 4;
const SSRC_OFFSET: usize = 8;

/// Read-only view of the fixed RTP header fields.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct HeaderView {
    pub version: u8,
    pub padding: bool,
    pub extension: bool,
    pub csrc_count: u8,
    pub marker: bool,
    pub payload_type: u8,
    pub sequence_number: u16,
    pub timestamp: u32,
    pub ssrc: u32,
}

impl HeaderView {
    pub fn parse(buf: &[u8]) -> Result<Self> {
        if buf.len() < HEADER_LENGTH {
            return Err(Error::ErrMalformedPacket {
                len: buf.len(),
                offset: HEADER_LENGTH,
            });
        }

        let b0 = buf[0];
        let b1 = buf[1];
        Ok(Self {
            version: (b0 >> VERSION_SHIFT) & VERSION_MASK,
            padding: (b0 >> PADDING_SHIFT) & PADDING_MASK > 0,
            extension: (b0 >> EXTENSION_SHIFT) & EXTENSION_MASK > 0,
            csrc_count: b0 & CC_MASK,
            marker: (b1 >> MARKER_SHIFT) & MARKER_MASK > 0,
            payload_type: b1 & PT_MASK,
            sequence_number: u16::from_be_bytes([buf[SEQ_NUM_OFFSET], buf[SEQ_NUM_OFFSET + 1]]),
            timestamp: u32::from_be_bytes([
                buf[TIMESTAMP_OFFSET],
                buf[TIMESTAMP_OFFSET + 1],
                buf[TIMESTAMP_OFFSET + 2],
                buf[TIMESTAMP_OFFSET + 3],
            ]),
            ssrc: u32::from_be_bytes([
                buf[SSRC_OFFSET],
                buf[SSRC_OFFSET + 1],
                buf[SSRC_OFFSET + 2],
                buf[SSRC_OFFSET + 3],
            ]),
        })
    }

    /// Offset of the first payload byte.
    pub fn payload_offset(&self) -> usize {
        HEADER_LENGTH + self.csrc_count as usize * CSRC_LENGTH
    }
}

/// Location of the payload inside a packet buffer.
///
/// `offset + len <= packet length` always holds for windows produced by [`extract`].
#[derive(Debug, Default, Copy, Clone, PartialEq, Eq)]
pub struct PayloadWindow {
    pub offset: usize,
    pub len: usize,
}

impl PayloadWindow {
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    pub fn end(&self) -> usize {
        self.offset + self.len
    }

    pub fn slice<'a>(&self, packet: &'a [u8]) -> &'a [u8] {
        &packet[self.offset..self.end()]
    }

    pub fn slice_mut<'a>(&self, packet: &'a mut [u8]) -> &'a mut [u8] {
        &mut packet[self.offset..self.end()]
    }
}

impl fmt::Display for PayloadWindow {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[{}..{})", self.offset, self.end())
    }
}

/// A parsed header together with its payload window.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct Extracted {
    pub header: HeaderView,
    pub window: PayloadWindow,
}

/// Computes the payload window of `packet` without modifying it.
///
/// Packets shorter than the fixed header plus CSRC list are rejected with
/// [`Error::ErrMalformedPacket`].
pub fn extract(packet: &[u8]) -> Result<Extracted> {
    let header = HeaderView::parse(packet)?;
    let offset = header.payload_offset();
    if packet.len() < offset {
        return Err(Error::ErrMalformedPacket {
            len: packet.len(),
            offset,
        });
    }

    let mut len = packet.len() - offset;
    if header.padding && len > 0 {
        let pad_len = packet[offset + len - 1] as usize;
        if pad_len <= len {
            len -= pad_len;
        }
    }

    Ok(Extracted {
        header,
        window: PayloadWindow { offset, len },
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use rand::{Rng, rng};

    fn build_packet(csrc_count: u8, padding: bool, payload: &[u8]) -> Vec<u8> {
        let mut pkt = vec![
            (2 << VERSION_SHIFT) | ((padding as u8) << PADDING_SHIFT) | csrc_count,
            0x80 | 96,
            0x12,
            0x34,
            0xde,
            0xad,
            0xbe,
            0xef,
            0x01,
            0x02,
            0x03,
            0x04,
        ];
        for i in 0..csrc_count {
            pkt.extend_from_slice(&[0, 0, 0, i]);
        }
        pkt.extend_from_slice(payload);
        pkt
    }

    #[test]
    fn test_header_fields() {
        let pkt = build_packet(0, false, &[1, 2, 3]);
        let header = HeaderView::parse(&pkt).unwrap();
        assert_eq!(header.version, 2);
        assert!(!header.padding);
        assert!(!header.extension);
        assert_eq!(header.csrc_count, 0);
        assert!(header.marker);
        assert_eq!(header.payload_type, 96);
        assert_eq!(header.sequence_number, 0x1234);
        assert_eq!(header.timestamp, 0xdeadbeef);
        assert_eq!(header.ssrc, 0x01020304);
    }

    #[test]
    fn test_extract_plain_payload() {
        let pkt = build_packet(0, false, &[10, 20, 30, 40]);
        let extracted = extract(&pkt).unwrap();
        assert_eq!(extracted.window, PayloadWindow { offset: 12, len: 4 });
        assert_eq!(extracted.window.slice(&pkt), &[10, 20, 30, 40]);
    }

    #[test]
    fn test_extract_skips_csrc_list() {
        let pkt = build_packet(3, false, &[7, 8]);
        let window = extract(&pkt).unwrap().window;
        assert_eq!(window.offset, HEADER_LENGTH + 3 * CSRC_LENGTH);
        assert_eq!(window.slice(&pkt), &[7, 8]);
    }

    #[test]
    fn test_extract_header_only() {
        let pkt = build_packet(2, false, &[]);
        let window = extract(&pkt).unwrap().window;
        assert!(window.is_empty());
        assert_eq!(window.offset, pkt.len());
    }

    #[test]
    fn test_extract_rejects_short_packets() {
        assert_eq!(
            extract(&[0x80, 0x60, 0x00]),
            Err(Error::ErrMalformedPacket {
                len: 3,
                offset: HEADER_LENGTH
            })
        );

        // CC claims 4 CSRCs but only one is present
        let mut pkt = build_packet(1, false, &[]);
        pkt[0] = (pkt[0] & !CC_MASK) | 4;
        assert_eq!(
            extract(&pkt),
            Err(Error::ErrMalformedPacket {
                len: 16,
                offset: 28
            })
        );
    }

    #[test]
    fn test_extract_strips_consistent_padding() {
        let pkt = build_packet(0, true, &[1, 2, 3, 0, 0, 3]);
        let window = extract(&pkt).unwrap().window;
        assert_eq!(window.len, 3);
        assert_eq!(window.slice(&pkt), &[1, 2, 3]);
    }

    #[test]
    fn test_extract_padding_equal_to_payload() {
        let pkt = build_packet(0, true, &[0, 0, 3]);
        let window = extract(&pkt).unwrap().window;
        assert!(window.is_empty());
    }

    #[test]
    fn test_extract_ignores_inconsistent_padding() {
        let pkt = build_packet(0, true, &[1, 2, 9]);
        let window = extract(&pkt).unwrap().window;
        assert_eq!(window.len, 3);
    }

    #[test]
    fn test_extract_padding_flag_without_payload() {
        let pkt = build_packet(0, true, &[]);
        let window = extract(&pkt).unwrap().window;
        assert_eq!(window.len, 0);
    }

    #[test]
    fn test_extract_random_packets_stay_in_bounds() {
        let mut r = rng();
        for _ in 0..1000 {
            let csrc_count: u8 = r.random_range(0..=15);
            let padding: bool = r.random();
            let payload_len: usize = r.random_range(0..64);
            let payload: Vec<u8> = (0..payload_len).map(|_| r.random()).collect();
            let pkt = build_packet(csrc_count, padding, &payload);

            let window = extract(&pkt).unwrap().window;
            let unpadded = pkt.len() - HEADER_LENGTH - csrc_count as usize * CSRC_LENGTH;
            assert_eq!(window.offset, HEADER_LENGTH + csrc_count as usize * CSRC_LENGTH);
            assert!(window.end() <= pkt.len());

            if !padding || payload_len == 0 {
                assert_eq!(window.len, unpadded);
            } else {
                let pad_len = *payload.last().unwrap() as usize;
                if pad_len <= unpadded {
                    assert_eq!(window.len, unpadded - pad_len);
                } else {
                    assert_eq!(window.len, unpadded);
                }
            }
        }
    }
}
