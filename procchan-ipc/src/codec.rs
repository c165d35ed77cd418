//! Text-safe payload codec
//!
//! The transport only carries JSON text faithfully, so opaque payloads travel
//! as standard padded base64.

use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use bytes::Bytes;

use crate::error::IpcError;

/// Encode an opaque payload for the wire
pub fn encode(payload: &[u8]) -> String {
    STANDARD.encode(payload)
}

/// Decode a wire payload back to the exact original bytes
pub fn decode(encoded: &str) -> Result<Bytes, IpcError> {
    STANDARD
        .decode(encoded)
        .map(Bytes::from)
        .map_err(|e| IpcError::DecodeError(e.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn test_empty_payload() {
        let encoded = encode(&[]);
        assert_eq!(encoded, "");
        assert!(decode(&encoded).unwrap().is_empty());
    }

    #[test]
    fn test_every_byte_value_survives() {
        let payload: Vec<u8> = (0..=255u8).collect();
        let encoded = encode(&payload);

        assert!(encoded.is_ascii());
        assert!(!encoded.contains('\n'));
        assert_eq!(decode(&encoded).unwrap().as_ref(), payload.as_slice());
    }

    #[test]
    fn test_invalid_encoding_is_rejected() {
        let result = decode("not base64!");
        assert!(matches!(result, Err(IpcError::DecodeError(_))));
    }

    proptest! {
        #[test]
        fn prop_decode_inverts_encode(payload in proptest::collection::vec(any::<u8>(), 0..2048)) {
            let decoded = decode(&encode(&payload)).unwrap();
            prop_assert_eq!(decoded.as_ref(), payload.as_slice());
        }
    }
}
