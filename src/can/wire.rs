//! Board wire format: 16 bytes per CAN frame, little-endian.
//!
//! Layout as four 32-bit words:
//!
//! ```text
//! w0: address/flags  (bit 2 = extended; address in bits 31..3 extended,
//!                     31..21 normal; low bits are the frame marker)
//! w1: (bus_time << 16) | (src << 4) | len
//! w2..w3: up to 8 payload bytes, zero-padded
//! ```
//!
//! Bulk transfers carry `N` contiguous frames; `N = total_bytes / 16`.

use crate::can::CanFrame;
use crate::util::LogThrottle;
use bytes::{Buf, BufMut, BytesMut};
use thiserror::Error;
use tracing::warn;

/// Size of one frame slot on the wire.
pub const FRAME_SIZE: usize = 16;

/// Addresses at or above this threshold only fit an extended frame.
const EXTENDED_THRESHOLD: u32 = 0x800;

/// Marker bits in `w0`: `..01` for normal frames, `.101` for extended
/// (bit 2 is the extended flag itself).
const MARKER_NORMAL: u32 = 0b001;
const MARKER_EXTENDED: u32 = 0b101;
const FLAG_EXTENDED: u32 = 1 << 2;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
    #[error("frame length {0} exceeds 8 bytes")]
    OversizedPayload(u8),

    #[error("address 0x{0:X} does not fit a {1}-bit identifier")]
    AddressOutOfRange(u32, u8),

    #[error("short wire frame: {0} bytes (expected {FRAME_SIZE})")]
    ShortFrame(usize),
}

/// Encode one frame into the next 16 bytes of `buf`.
///
/// A frame is encoded extended when it is flagged extended or its address
/// does not fit 11 bits; addresses below `0x800` therefore round-trip as
/// normal frames.
pub fn encode_into(frame: &CanFrame, buf: &mut BytesMut) -> Result<(), WireError> {
    if frame.len > 8 {
        return Err(WireError::OversizedPayload(frame.len));
    }

    let extended = frame.is_extended || frame.address >= EXTENDED_THRESHOLD;
    let w0 = if extended {
        if frame.address >= (1 << 29) {
            return Err(WireError::AddressOutOfRange(frame.address, 29));
        }
        (frame.address << 3) | MARKER_EXTENDED
    } else {
        (frame.address << 21) | MARKER_NORMAL
    };
    let w1 = u32::from(frame.len)
        | (u32::from(frame.src) << 4)
        | (u32::from(frame.bus_time) << 16);

    buf.reserve(FRAME_SIZE);
    buf.put_u32_le(w0);
    buf.put_u32_le(w1);
    let mut payload = [0u8; 8];
    payload[..frame.payload().len()].copy_from_slice(frame.payload());
    buf.put_slice(&payload);
    Ok(())
}

/// Decode one 16-byte wire slot.
pub fn decode(slot: &[u8]) -> Result<CanFrame, WireError> {
    if slot.len() < FRAME_SIZE {
        return Err(WireError::ShortFrame(slot.len()));
    }
    let mut cur = slot;
    let w0 = cur.get_u32_le();
    let w1 = cur.get_u32_le();

    let is_extended = (w0 & FLAG_EXTENDED) != 0;
    let address = if is_extended { w0 >> 3 } else { w0 >> 21 };
    let len = (w1 & 0xF) as u8;
    if len > 8 {
        return Err(WireError::OversizedPayload(len));
    }

    let mut data = [0u8; 8];
    cur.copy_to_slice(&mut data);
    // only the first `len` bytes are live
    data[usize::from(len)..].fill(0);

    Ok(CanFrame {
        address,
        is_extended,
        bus_time: (w1 >> 16) as u16,
        src: ((w1 >> 4) & 0xFF) as u8,
        len,
        data,
    })
}

/// Encode a batch of frames into one contiguous `16 * N` byte buffer, in
/// order. Frames the codec rejects are skipped with a throttled log; the
/// buffer stays a multiple of [`FRAME_SIZE`].
pub fn encode_batch(frames: &[CanFrame]) -> BytesMut {
    static BAD_FRAME: LogThrottle = LogThrottle::new(100);

    let mut buf = BytesMut::with_capacity(frames.len() * FRAME_SIZE);
    for frame in frames {
        if let Err(e) = encode_into(frame, &mut buf) {
            if let Some(n) = BAD_FRAME.tick() {
                warn!("dropping unencodable outgoing frame ({} so far): {}", n, e);
            }
        }
    }
    buf
}

/// Decode a bulk payload of contiguous wire frames, preserving board order.
///
/// The frame count is `payload.len() / 16`; a trailing partial slot and
/// slots with a protocol violation (length nibble > 8) are skipped with a
/// throttled log rather than poisoning the whole batch.
pub fn decode_batch(payload: &[u8]) -> Vec<CanFrame> {
    static BAD_SLOT: LogThrottle = LogThrottle::new(100);

    let count = payload.len() / FRAME_SIZE;
    let mut frames = Vec::with_capacity(count);
    for slot in payload.chunks_exact(FRAME_SIZE) {
        match decode(slot) {
            Ok(frame) => frames.push(frame),
            Err(e) => {
                if let Some(n) = BAD_SLOT.tick() {
                    warn!("skipping undecodable wire slot ({} so far): {}", n, e);
                }
            }
        }
    }
    if payload.len() % FRAME_SIZE != 0
        && let Some(n) = BAD_SLOT.tick()
    {
        warn!(
            "bulk payload of {} bytes is not a multiple of {} ({} so far)",
            payload.len(),
            FRAME_SIZE,
            n
        );
    }
    frames
}

#[cfg(test)]
mod tests {
    use super::*;

    fn encode(frame: &CanFrame) -> BytesMut {
        let mut buf = BytesMut::new();
        encode_into(frame, &mut buf).unwrap();
        buf
    }

    fn word(buf: &[u8], i: usize) -> u32 {
        u32::from_le_bytes(buf[i * 4..i * 4 + 4].try_into().unwrap())
    }

    #[test]
    fn test_normal_frame_layout() {
        // OBD-II response frame on bus 0
        let frame = CanFrame {
            address: 0x7E8,
            is_extended: false,
            bus_time: 0x1234,
            src: 0,
            len: 3,
            data: [0x02, 0x01, 0x0C, 0, 0, 0, 0, 0],
        };
        let buf = encode(&frame);

        assert_eq!(buf.len(), FRAME_SIZE);
        assert_eq!(word(&buf, 0), (0x7E8 << 21) | 1);
        assert_eq!(word(&buf, 0), 0xFD00_0001);
        assert_eq!(word(&buf, 1), (0x1234 << 16) | 3);
        assert_eq!(&buf[8..11], &[0x02, 0x01, 0x0C]);
        assert_eq!(&buf[11..16], &[0u8; 5]);

        assert_eq!(decode(&buf).unwrap(), frame);
    }

    #[test]
    fn test_extended_frame_layout() {
        // ISO-TP physical addressing, bus 2, no payload
        let frame = CanFrame {
            address: 0x18DA_F110,
            is_extended: true,
            bus_time: 0,
            src: 2,
            len: 0,
            data: [0u8; 8],
        };
        let buf = encode(&frame);

        assert_eq!(word(&buf, 0), (0x18DA_F110 << 3) | 5);
        assert_eq!(word(&buf, 0), 0xC6D7_8885);
        assert_eq!(word(&buf, 1), 0x20);

        let decoded = decode(&buf).unwrap();
        assert_eq!(decoded.address, 0x18DA_F110);
        assert!(decoded.is_extended);
        assert_eq!(decoded, frame);
    }

    #[test]
    fn test_marker_bits() {
        let normal = encode(&CanFrame::new_standard(0x123, 1, &[0xAA]));
        assert_eq!(normal[0] & 0b11, 0b01);
        assert_eq!(normal[0] & 0b100, 0);

        let extended = encode(&CanFrame::new_extended(0x1FFF_FFFF, 0, &[0xBB; 8]));
        assert_eq!(extended[0] & 0b111, 0b101);
    }

    #[test]
    fn test_high_address_promotes_to_extended() {
        // not flagged extended, but 0x800 does not fit 11 bits
        let frame = CanFrame {
            address: 0x800,
            is_extended: false,
            bus_time: 0,
            src: 0,
            len: 0,
            data: [0u8; 8],
        };
        let buf = encode(&frame);
        assert_eq!(word(&buf, 0), (0x800 << 3) | 5);

        let decoded = decode(&buf).unwrap();
        assert!(decoded.is_extended);
        assert_eq!(decoded.address, 0x800);
    }

    #[test]
    fn test_roundtrip_all_fields() {
        let frame = CanFrame {
            address: 0x2AB,
            is_extended: false,
            bus_time: 0xBEEF,
            src: 0x7F,
            len: 8,
            data: [1, 2, 3, 4, 5, 6, 7, 8],
        };
        assert_eq!(decode(&encode(&frame)).unwrap(), frame);
    }

    #[test]
    fn test_decode_rejects_oversized_length_nibble() {
        let mut slot = [0u8; 16];
        slot[0..4].copy_from_slice(&((0x100u32 << 21) | 1).to_le_bytes());
        slot[4] = 0x0C; // len nibble = 12
        assert_eq!(decode(&slot), Err(WireError::OversizedPayload(12)));
    }

    #[test]
    fn test_decode_rejects_short_slot() {
        assert_eq!(decode(&[0u8; 10]), Err(WireError::ShortFrame(10)));
    }

    #[test]
    fn test_encode_rejects_address_over_29_bits() {
        let frame = CanFrame {
            address: 0x2000_0000,
            is_extended: true,
            bus_time: 0,
            src: 0,
            len: 0,
            data: [0u8; 8],
        };
        let mut buf = BytesMut::new();
        assert!(matches!(
            encode_into(&frame, &mut buf),
            Err(WireError::AddressOutOfRange(_, 29))
        ));
    }

    #[test]
    fn test_batch_roundtrip_preserves_order() {
        let frames = vec![
            CanFrame::new_standard(0x100, 0, &[1]),
            CanFrame::new_extended(0x18FF_0001, 1, &[2, 3]),
            CanFrame::new_standard(0x7FF, 2, &[4, 5, 6, 7, 8, 9, 10, 11]),
        ];
        let buf = encode_batch(&frames);
        assert_eq!(buf.len(), 3 * FRAME_SIZE);
        assert_eq!(decode_batch(&buf), frames);
    }

    #[test]
    fn test_batch_decode_skips_bad_slot_and_trailing_bytes() {
        let good = CanFrame::new_standard(0x42, 0, &[0xFF]);
        let mut buf = encode_batch(&[good]).to_vec();

        // corrupt slot with len nibble 0xF
        let mut bad = [0u8; 16];
        bad[4] = 0x0F;
        buf.extend_from_slice(&bad);

        // another good one, then trailing garbage
        let good2 = CanFrame::new_extended(0x1234_5678, 3, &[]);
        buf.extend_from_slice(&encode_batch(&[good2]));
        buf.extend_from_slice(&[0xAA, 0xBB]);

        assert_eq!(decode_batch(&buf), vec![good, good2]);
    }

    #[test]
    fn test_encode_batch_is_multiple_of_frame_size() {
        let frames = vec![CanFrame::new_standard(0x1, 0, &[]); 7];
        assert_eq!(encode_batch(&frames).len() % FRAME_SIZE, 0);
    }
}
