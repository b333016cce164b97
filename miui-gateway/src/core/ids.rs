//! Identifier generation

use chrono::Utc;
use rand::{Rng, RngCore};

fn random_hex(bytes: usize) -> String {
    let mut buf = vec![0u8; bytes];
    rand::thread_rng().fill_bytes(&mut buf);
    hex::encode(buf)
}

/// Client-visible object id such as `chatcmpl_<24 hex>`.
pub fn new_id(prefix: &str) -> String {
    format!("{}_{}", prefix, random_hex(12))
}

/// Key for a caller that sent no credentials.
pub fn anonymous_user_key() -> String {
    format!("anon_{}", random_hex(12))
}

/// Upstream device token: 8 random bytes as lowercase hex.
pub fn new_oaid() -> String {
    random_hex(8)
}

/// Synthetic 10-digit upstream account number.
pub fn new_mi_id() -> String {
    rand::thread_rng()
        .gen_range(1_000_000_000u64..=9_999_999_999)
        .to_string()
}

/// Upstream conversation id, fixed for the lifetime of a conversation.
pub fn internal_conversation_id(oaid: &str) -> String {
    format!("{}{}", oaid, Utc::now().timestamp_millis())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_id_formats() {
        let id = new_id("chatcmpl");
        let suffix = id.strip_prefix("chatcmpl_").unwrap();
        assert_eq!(suffix.len(), 24);
        assert!(suffix.chars().all(|c| c.is_ascii_hexdigit()));

        let key = anonymous_user_key();
        assert!(key.starts_with("anon_"));
        assert_eq!(key.len(), 5 + 24);

        let oaid = new_oaid();
        assert_eq!(oaid.len(), 16);
        assert!(oaid.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_mi_id_has_ten_digits() {
        for _ in 0..100 {
            let mi_id = new_mi_id();
            assert_eq!(mi_id.len(), 10);
            assert!(!mi_id.starts_with('0'));
            assert!(mi_id.chars().all(|c| c.is_ascii_digit()));
        }
    }

    #[test]
    fn test_internal_id_starts_with_oaid() {
        let id = internal_conversation_id("0011223344556677");
        let millis = id.strip_prefix("0011223344556677").unwrap();
        assert!(millis.parse::<i64>().unwrap() > 1_600_000_000_000);
    }
}
