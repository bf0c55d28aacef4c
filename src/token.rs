//! Sync token codec (spec §4.2, §6).
//!
//! A sync token is the opaque blob a client stores after processing a
//! `sync_item` event. Its header leaves room for future subscription kinds
//! without breaking clients that only understand today's layout:
//!
//! ```text
//! offset  size  field
//! 0       1     version         = 0x01
//! 1       1     type            = 0x01 (crawl-sync)
//! 2       1     payload_length  = 0x04
//! 3       4     sequence (big-endian u32)
//! ```

const VERSION: u8 = 1;
const TYPE_CRAWL_SYNC: u8 = 1;
const PAYLOAD_LEN: u8 = 4;
const HEADER_LEN: usize = 3;
const TOKEN_LEN: usize = HEADER_LEN + PAYLOAD_LEN as usize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("invalid sync token")]
pub struct InvalidSyncToken;

/// Pack a sequence number into a 7-byte crawl-sync token.
pub fn encode(sequence: u32) -> [u8; TOKEN_LEN] {
    let mut out = [0u8; TOKEN_LEN];
    out[0] = VERSION;
    out[1] = TYPE_CRAWL_SYNC;
    out[2] = PAYLOAD_LEN;
    out[HEADER_LEN..].copy_from_slice(&sequence.to_be_bytes());
    out
}

/// Unpack a crawl-sync token, rejecting anything that doesn't match the
/// header exactly.
pub fn decode(bytes: &[u8]) -> Result<u32, InvalidSyncToken> {
    if bytes.len() < HEADER_LEN {
        return Err(InvalidSyncToken);
    }

    let version = bytes[0];
    let kind = bytes[1];
    let payload_length = bytes[2];

    if version != VERSION || kind != TYPE_CRAWL_SYNC || payload_length != PAYLOAD_LEN {
        return Err(InvalidSyncToken);
    }

    if bytes.len() != HEADER_LEN + payload_length as usize {
        return Err(InvalidSyncToken);
    }

    let payload: [u8; 4] = bytes[HEADER_LEN..].try_into().map_err(|_| InvalidSyncToken)?;
    Ok(u32::from_be_bytes(payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trip_full_range_sample() {
        for sequence in [0u32, 1, 2, 3, 255, 256, u16::MAX as u32, u32::MAX / 2, u32::MAX] {
            let encoded = encode(sequence);
            assert_eq!(decode(&encoded).unwrap(), sequence);
        }
    }

    #[test]
    fn encode_matches_bit_exact_layout() {
        let encoded = encode(2);
        assert_eq!(encoded, [0x01, 0x01, 0x04, 0x00, 0x00, 0x00, 0x02]);
    }

    #[test]
    fn rejects_short_input() {
        assert_eq!(decode(&[1, 1]), Err(InvalidSyncToken));
        assert_eq!(decode(&[]), Err(InvalidSyncToken));
    }

    #[test]
    fn rejects_bad_version() {
        assert_eq!(decode(&[2, 1, 4, 0, 0, 0, 0]), Err(InvalidSyncToken));
    }

    #[test]
    fn rejects_bad_type() {
        assert_eq!(decode(&[1, 2, 4, 0, 0, 0, 0]), Err(InvalidSyncToken));
    }

    #[test]
    fn rejects_bad_payload_length() {
        assert_eq!(decode(&[1, 1, 5, 0, 0, 0, 0, 0]), Err(InvalidSyncToken));
    }

    #[test]
    fn rejects_length_mismatch_with_header() {
        // header claims 4 bytes of payload but only 3 are present
        assert_eq!(decode(&[1, 1, 4, 0, 0, 0]), Err(InvalidSyncToken));
    }

    #[test]
    fn rejects_trailing_garbage() {
        assert_eq!(decode(&[1, 1, 4, 0, 0, 0, 2, 9]), Err(InvalidSyncToken));
    }
}
