//! Order number generation.
//!
//! Numbers carry a short uppercase prefix taken from the owning user's id.
//! Rows that arrive with an external id get a deterministic number, so
//! re-importing the same file collides on the unique index instead of
//! duplicating orders. Anonymous rows get a timestamp plus a random
//! suffix; re-importing those creates new orders.

use chrono::{DateTime, Utc};
use rand::Rng;
use uuid::Uuid;

const SUFFIX_CHARSET: &[u8] = b"ABCDEFGHIJKLMNOPQRSTUVWXYZ0123456789";
const SUFFIX_LEN: usize = 4;

/// First four hex characters of the user id, uppercased.
fn user_prefix(user_id: &Uuid) -> String {
    user_id.simple().to_string()[..4].to_uppercase()
}

/// Deterministic number for a row that supplied an external id:
/// `ORD-{USER}-{external_id}`.
pub fn deterministic(user_id: &Uuid, external_id: &str) -> String {
    format!("ORD-{}-{}", user_prefix(user_id), external_id)
}

/// Number for a row without an external id:
/// `ORD-{USER}-{yymmddHHMMSS}-{4 random chars}`.
pub fn anonymous(user_id: &Uuid, timestamp: DateTime<Utc>) -> String {
    format!(
        "ORD-{}-{}-{}",
        user_prefix(user_id),
        timestamp.format("%y%m%d%H%M%S"),
        random_suffix()
    )
}

fn random_suffix() -> String {
    let mut rng = rand::thread_rng();
    (0..SUFFIX_LEN)
        .map(|_| SUFFIX_CHARSET[rng.gen_range(0..SUFFIX_CHARSET.len())] as char)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn user() -> Uuid {
        Uuid::parse_str("a1b2c3d4-0000-0000-0000-000000000000").unwrap()
    }

    #[test]
    fn test_deterministic_number_is_stable() {
        let first = deterministic(&user(), "INV-42");
        let second = deterministic(&user(), "INV-42");
        assert_eq!(first, second);
        assert_eq!(first, "ORD-A1B2-INV-42");
    }

    #[test]
    fn test_deterministic_numbers_differ_per_user() {
        let other = Uuid::parse_str("ffee0000-0000-0000-0000-000000000000").unwrap();
        assert_ne!(
            deterministic(&user(), "INV-42"),
            deterministic(&other, "INV-42")
        );
    }

    #[test]
    fn test_anonymous_number_embeds_timestamp() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 0).unwrap();
        let number = anonymous(&user(), ts);
        assert!(number.starts_with("ORD-A1B2-240315103000-"));
        assert_eq!(number.len(), "ORD-A1B2-240315103000-".len() + SUFFIX_LEN);
    }

    #[test]
    fn test_anonymous_suffix_uses_expected_charset() {
        let ts = Utc.with_ymd_and_hms(2024, 3, 15, 10, 30, 0).unwrap();
        let number = anonymous(&user(), ts);
        let suffix = number.rsplit('-').next().unwrap();
        assert_eq!(suffix.len(), SUFFIX_LEN);
        assert!(
            suffix
                .bytes()
                .all(|b| b.is_ascii_uppercase() || b.is_ascii_digit())
        );
    }
}
