//! Base64url codec for application server (VAPID) keys

use base64::alphabet;
use base64::engine::general_purpose::{GeneralPurpose, GeneralPurposeConfig, URL_SAFE_NO_PAD};
use base64::Engine;

/// Standard alphabet that ignores non-zero bits in the final symbol
const LENIENT: GeneralPurpose = GeneralPurpose::new(
    &alphabet::STANDARD,
    GeneralPurposeConfig::new().with_decode_allow_trailing_bits(true),
);

#[derive(Debug, thiserror::Error)]
#[error("malformed base64url key: {0}")]
pub struct DecodeError(#[from] base64::DecodeError);

/// Decode a base64url string, padded or not, into raw bytes
pub fn decode_key(input: &str) -> Result<Vec<u8>, DecodeError> {
    let padding = (4 - input.len() % 4) % 4;
    let standard: String = input
        .chars()
        .map(|c| match c {
            '-' => '+',
            '_' => '/',
            c => c,
        })
        .chain(std::iter::repeat('=').take(padding))
        .collect();
    Ok(LENIENT.decode(standard)?)
}

/// Unpadded base64url
pub fn encode_key(bytes: &[u8]) -> String {
    URL_SAFE_NO_PAD.encode(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VAPID_KEY: &str =
        "BJgtmyqbQNvXqZHZM6mAHkWoPJ1_fa2niOl9F_3draoZp7rgCoWRA9TIhjExgsdtBkF5fuYfhPCI0QNuTt_w7gA";

    #[test]
    fn test_decode_vapid_key() {
        let key = decode_key(VAPID_KEY).unwrap();
        assert_eq!(key.len(), 65);
        assert_eq!(key[0], 0x04);
    }

    #[test]
    fn test_round_trip() {
        let bytes: Vec<u8> = (0..=255).collect();
        for len in [0, 1, 2, 3, 64, 65, 256] {
            let slice = &bytes[..len];
            assert_eq!(decode_key(&encode_key(slice)).unwrap(), slice);
        }
    }

    #[test]
    fn test_url_safe_characters() {
        // 0xfb 0xff encodes to "-_8" in base64url
        assert_eq!(decode_key("-_8").unwrap(), vec![0xfb, 0xff]);
        assert_eq!(encode_key(&[0xfb, 0xff]), "-_8");
    }

    #[test]
    fn test_trailing_bits_are_ignored() {
        assert_eq!(decode_key("AR").unwrap(), vec![0x01]);

        let mut key = VAPID_KEY.to_string();
        key.pop();
        key.push('B');
        assert_eq!(decode_key(&key).unwrap(), decode_key(VAPID_KEY).unwrap());
    }

    #[test]
    fn test_malformed_input() {
        assert!(decode_key("not base64!").is_err());
        assert!(decode_key("A").is_err());
    }
}
