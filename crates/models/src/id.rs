//! Row-id helpers: UUID v7 generation and the URL-safe base32 rendering
//! used wherever ids appear in paths or external identifiers.

use crate::{Error, Result};
use uuid::Uuid;

/// The codec alphabet; fixed, unpadded, lowercase.
const ALPHABET: &[u8; 32] = b"abcdefghijklmnopqrstuvwxyz156789";

/// Length of an encoded UUID: ceil(128 / 5).
pub const ENCODED_LEN: usize = 26;

/// Generate a fresh time-ordered row id.
pub fn new_row_id() -> Uuid {
    Uuid::now_v7()
}

/// Current wall-clock time in epoch milliseconds.
pub fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

/// Render a UUID as a 26-character base32 string.
pub fn encode_uuid(id: &Uuid) -> String {
    let bytes = id.as_bytes();
    let mut out = String::with_capacity(ENCODED_LEN);

    let mut buf: u32 = 0;
    let mut bits: u32 = 0;
    for &b in bytes {
        buf = (buf << 8) | b as u32;
        bits += 8;
        while bits >= 5 {
            bits -= 5;
            out.push(ALPHABET[((buf >> bits) & 0x1f) as usize] as char);
        }
    }
    // 128 = 25*5 + 3: the final character carries the trailing three bits.
    debug_assert_eq!(bits, 3);
    out.push(ALPHABET[((buf << (5 - bits)) & 0x1f) as usize] as char);
    out
}

/// Decode a 26-character base32 string back into its UUID.
pub fn decode_uuid(encoded: &str) -> Result<Uuid> {
    if encoded.len() != ENCODED_LEN {
        return Err(Error::validation(format!(
            "encoded id must be {ENCODED_LEN} characters, got {}",
            encoded.len()
        )));
    }

    let mut bytes = [0u8; 16];
    let mut filled = 0usize;
    let mut buf: u32 = 0;
    let mut bits: u32 = 0;
    for c in encoded.bytes() {
        let value = ALPHABET
            .iter()
            .position(|&a| a == c)
            .ok_or_else(|| Error::validation(format!("invalid id character {:?}", c as char)))?;
        buf = (buf << 5) | value as u32;
        bits += 5;
        if bits >= 8 {
            bits -= 8;
            if filled == 16 {
                return Err(Error::validation("encoded id overflows 128 bits"));
            }
            bytes[filled] = ((buf >> bits) & 0xff) as u8;
            filled += 1;
        }
    }
    // The trailing two pad bits of the final character must be zero.
    if filled != 16 || (buf & ((1 << bits) - 1)) != 0 {
        return Err(Error::validation("encoded id has non-zero padding"));
    }
    Ok(Uuid::from_bytes(bytes))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn test_known_vector() {
        let id = Uuid::parse_str("f81d4fae-7dec-11d0-a765-00a0c91e6bf6").unwrap();
        let encoded = encode_uuid(&id);
        assert_eq!(encoded, "9aou9lt77qi7bj5facqmshtl8y");
        assert_eq!(decode_uuid(&encoded).unwrap(), id);
    }

    #[test]
    fn test_round_trip() {
        for _ in 0..64 {
            let id = Uuid::new_v4();
            assert_eq!(decode_uuid(&encode_uuid(&id)).unwrap(), id);
        }
        assert_eq!(
            decode_uuid(&encode_uuid(&Uuid::nil())).unwrap(),
            Uuid::nil()
        );
    }

    #[test]
    fn test_decode_rejects_garbage() {
        assert!(decode_uuid("short").is_err());
        // '0' is not in the alphabet.
        assert!(decode_uuid("0aou9lt77qi7bj5facqmshtl8y").is_err());
        // Valid alphabet but non-zero trailing padding.
        assert!(decode_uuid("99999999999999999999999999").is_err());
    }

    #[test]
    fn test_v7_ids_are_time_ordered() {
        let a = new_row_id();
        let b = new_row_id();
        assert!(a <= b);
        assert_eq!(a.get_version_num(), 7);
    }
}
