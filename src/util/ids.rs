//! Random identifiers
//!
//! Message and approval IDs are 128-bit random tokens encoded as hex.
//! Message IDs carry a source prefix (`queue:`, `event:`, `heartbeat:`,
//! `swarm:`) so a transcript is greppable by origin.

use rand::RngCore;

/// 32 lowercase hex chars from 16 random bytes.
pub fn random_hex_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

/// `<prefix>:<32-hex>` message identifier.
pub fn prefixed_id(prefix: &str) -> String {
    format!("{}:{}", prefix, random_hex_id())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn test_random_hex_id_shape() {
        let id = random_hex_id();
        assert_eq!(id.len(), 32);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit()));
    }

    #[test]
    fn test_ids_unique() {
        let ids: HashSet<String> = (0..256).map(|_| random_hex_id()).collect();
        assert_eq!(ids.len(), 256);
    }

    #[test]
    fn test_prefixed_id() {
        let id = prefixed_id("event");
        assert!(id.starts_with("event:"));
        assert_eq!(id.len(), "event:".len() + 32);
    }
}
