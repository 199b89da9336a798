//! Checksummed record framing shared by the node store and the element mapper.
//!
//! A frame is `crc32 (IEEE) | payload length | payload`, both header words little
//! endian, followed by zero padding up to the slot length. The checksum is
//! verified before the payload is handed to bincode.

use serde::de::DeserializeOwned;
use serde::Serialize;

use super::rtree_constants::FRAME_OVERHEAD;
use super::rtree_types::{SpatialError, SpatialResult};

/// Upper bound for any single decoded record
const DECODE_LIMIT: usize = 1 << 24;

fn config() -> impl bincode::config::Config {
    bincode::config::legacy().with_limit::<DECODE_LIMIT>()
}

/// Encode a value into a frame. The caller decides whether the frame fits
/// its slot.
pub fn encode_frame<T: Serialize>(value: &T) -> SpatialResult<Vec<u8>> {
    let payload = bincode::serde::encode_to_vec(value, config())
        .map_err(|e| SpatialError::Usage(format!("cannot encode record: {}", e)))?;

    let mut frame = Vec::with_capacity(payload.len() + FRAME_OVERHEAD);
    frame.extend_from_slice(&crc32fast::hash(&payload).to_le_bytes());
    frame.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    frame.extend_from_slice(&payload);
    Ok(frame)
}

/// Verify and decode a frame read from a slot of `slot.len()` bytes
pub fn decode_frame<T: DeserializeOwned>(slot: &[u8]) -> SpatialResult<T> {
    if slot.len() < FRAME_OVERHEAD {
        return Err(SpatialError::CorruptStore(format!(
            "slot of {} bytes cannot hold a record frame",
            slot.len()
        )));
    }

    let checksum = u32::from_le_bytes([slot[0], slot[1], slot[2], slot[3]]);
    let len = u32::from_le_bytes([slot[4], slot[5], slot[6], slot[7]]) as usize;

    if len == 0 {
        return Err(SpatialError::CorruptStore("blank record slot".into()));
    }
    if len > slot.len() - FRAME_OVERHEAD {
        return Err(SpatialError::CorruptStore(format!(
            "record length {} exceeds slot of {} bytes",
            len,
            slot.len()
        )));
    }

    let payload = &slot[FRAME_OVERHEAD..FRAME_OVERHEAD + len];
    let actual = crc32fast::hash(payload);
    if actual != checksum {
        return Err(SpatialError::CorruptStore(format!(
            "record checksum mismatch - possible corruption (expected: {:x}, got: {:x})",
            checksum, actual
        )));
    }

    bincode::serde::decode_from_slice(payload, config())
        .map(|(value, _)| value)
        .map_err(|e| SpatialError::CorruptStore(format!("cannot decode record: {}", e)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::disk_rtree::rtree_types::{Entry, Node, NodeRecord, Rect};

    fn sample() -> NodeRecord {
        NodeRecord::Node(Node::leaf(vec![Entry {
            rect: Rect::new(vec![0.0, 1.0], vec![2.0, 3.0]),
            pointer: 7,
        }]))
    }

    #[test]
    fn test_frame_decodes_with_padding() {
        let mut slot = encode_frame(&sample()).unwrap();
        slot.resize(256, 0);
        let decoded: NodeRecord = decode_frame(&slot).unwrap();
        assert_eq!(decoded, sample());
    }

    #[test]
    fn test_flipped_payload_byte_is_corruption() {
        let mut slot = encode_frame(&sample()).unwrap();
        let last = slot.len() - 1;
        slot[last] ^= 0xFF;
        let err = decode_frame::<NodeRecord>(&slot).unwrap_err();
        assert!(err.is_corrupt());
        assert!(err.to_string().contains("checksum"));
    }

    #[test]
    fn test_blank_slot_is_corruption() {
        let slot = vec![0u8; 64];
        assert!(decode_frame::<NodeRecord>(&slot).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_length_beyond_slot_is_corruption() {
        let mut slot = encode_frame(&sample()).unwrap();
        slot[4..8].copy_from_slice(&(10_000u32).to_le_bytes());
        assert!(decode_frame::<NodeRecord>(&slot).unwrap_err().is_corrupt());
    }

    #[test]
    fn test_frame_header_layout() {
        let frame = encode_frame(&sample()).unwrap();
        let payload = &frame[FRAME_OVERHEAD..];
        assert_eq!(frame[0..4], crc32fast::hash(payload).to_le_bytes());
        assert_eq!(frame[4..8], (payload.len() as u32).to_le_bytes());
        // IEEE check value
        assert_eq!(crc32fast::hash(b"123456789"), 0xCBF4_3926);
    }
}
