use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;

use crate::{PrestoError, Result};

/// Decode a base64url application server key into raw bytes.
///
/// Missing padding is restored and the URL-safe alphabet mapped back to the
/// standard one before decoding.
pub fn url_base64_to_bytes(key: &str) -> Result<Vec<u8>> {
    let key = key.trim();
    if key.is_empty() {
        return Err(PrestoError::InvalidKey("key is empty".to_string()));
    }

    let padding = "=".repeat((4 - key.len() % 4) % 4);
    let standard = format!("{key}{padding}").replace('-', "+").replace('_', "/");

    STANDARD
        .decode(standard.as_bytes())
        .map_err(|err| PrestoError::InvalidKey(err.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use base64::engine::general_purpose::URL_SAFE_NO_PAD;

    #[test]
    fn round_trips_url_safe_encoding() {
        // Uncompressed P-256 point: 0x04 followed by 64 bytes.
        let mut key = vec![0x04u8];
        key.extend((0u8..64).map(|i| i.wrapping_mul(37).wrapping_add(250)));

        let encoded = URL_SAFE_NO_PAD.encode(&key);
        assert!(!encoded.contains('='));
        assert_eq!(url_base64_to_bytes(&encoded).expect("decode"), key);
    }

    #[test]
    fn handles_every_padding_length() {
        for len in 1..=6 {
            let bytes: Vec<u8> = (0..len).map(|i| 0xF8 | i as u8).collect();
            let encoded = URL_SAFE_NO_PAD.encode(&bytes);
            assert_eq!(url_base64_to_bytes(&encoded).expect("decode"), bytes);
        }
    }

    #[test]
    fn maps_url_alphabet() {
        // "-_" in base64url is "+/" in standard: 0xFB 0xFF.
        assert_eq!(url_base64_to_bytes("-_8").expect("decode"), vec![0xFB, 0xFF]);
    }

    #[test]
    fn rejects_garbage() {
        assert!(matches!(
            url_base64_to_bytes("not base64!"),
            Err(PrestoError::InvalidKey(_))
        ));
        assert!(matches!(url_base64_to_bytes("  "), Err(PrestoError::InvalidKey(_))));
    }
}
