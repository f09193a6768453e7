//! Timestamp and session id utilities

use chrono::{DateTime, Utc};
use rand::Rng;

const SESSION_SUFFIX_CHARS: &[u8] = b"abcdefghijklmnopqrstuvwxyz0123456789";

/// Get current UTC timestamp
pub fn now() -> DateTime<Utc> {
    Utc::now()
}

/// New session id: `YYYYMMDD_HHMMSS_xxxx` with four random `[a-z0-9]` characters
pub fn generate_session_id() -> String {
    let mut rng = rand::thread_rng();
    let suffix: String = (0..4)
        .map(|_| SESSION_SUFFIX_CHARS[rng.gen_range(0..SESSION_SUFFIX_CHARS.len())] as char)
        .collect();
    format!("{}_{}", chrono::Local::now().format("%Y%m%d_%H%M%S"), suffix)
}

/// True if `id` is safe to use as a session directory name
pub fn is_valid_session_id(id: &str) -> bool {
    !id.is_empty()
        && id.len() <= 64
        && id
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-')
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_session_id_shape() {
        let id = generate_session_id();
        let parts: Vec<&str> = id.split('_').collect();
        assert_eq!(parts.len(), 3, "unexpected id {}", id);
        assert_eq!(parts[0].len(), 8);
        assert_eq!(parts[1].len(), 6);
        assert_eq!(parts[2].len(), 4);
        assert!(parts[2]
            .chars()
            .all(|c| c.is_ascii_lowercase() || c.is_ascii_digit()));
        assert!(is_valid_session_id(&id));
    }

    #[test]
    fn test_session_id_rejects_path_tricks() {
        assert!(!is_valid_session_id(""));
        assert!(!is_valid_session_id("../etc"));
        assert!(!is_valid_session_id("a/b"));
        assert!(is_valid_session_id("20240101_120000_ab12"));
    }

    #[test]
    fn test_now_returns_recent_timestamp() {
        let timestamp = now();
        assert!(timestamp.timestamp() > 946_684_800);
    }
}
