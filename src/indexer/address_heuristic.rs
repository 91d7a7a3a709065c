//! Address-detection heuristic.
//!
//! The heuristic is lossy by design — it may under-match some network prefixes and
//! over-match certain text fields — kept pluggable rather than hidden inline so a
//! deployment can swap in a prefix-aware SS58 check later without touching callers.

use crate::constants::{ADDRESS_LEN_LONG, ADDRESS_LEN_SHORT};

/// A pluggable "looks like a Substrate address" predicate.
pub trait IsAddressLike: Send + Sync {
    fn is_address_like(&self, s: &str) -> bool;
}

/// Default heuristic: Base58 alphabet, length 47 or 48.
pub struct Base58LengthHeuristic;

impl IsAddressLike for Base58LengthHeuristic {
    fn is_address_like(&self, s: &str) -> bool {
        is_base58_length_match(s)
    }
}

fn is_base58_length_match(s: &str) -> bool {
    let len = s.chars().count();
    if len != ADDRESS_LEN_SHORT && len != ADDRESS_LEN_LONG {
        return false;
    }
    s.bytes().all(is_base58_byte)
}

fn is_base58_byte(b: u8) -> bool {
    // Base58 alphabet: [1-9A-HJ-NP-Za-km-z] — excludes 0, O, I, l.
    matches!(b,
        b'1'..=b'9'
        | b'A'..=b'H' | b'J'..=b'N' | b'P'..=b'Z'
        | b'a'..=b'k' | b'm'..=b'z'
    )
}

/// Walks a JSON tree (an extrinsic's `args` or an event's `data`) collecting every
/// string leaf that looks like an address per `predicate`. The walked payload is never
/// mutated — `args`/`data` stay opaque blobs.
pub fn collect_addresses(value: &serde_json::Value, predicate: &dyn IsAddressLike, out: &mut Vec<String>) {
    match value {
        serde_json::Value::String(s) => {
            if predicate.is_address_like(s) {
                out.push(s.clone());
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_addresses(item, predicate, out);
            }
        }
        serde_json::Value::Object(map) => {
            for v in map.values() {
                collect_addresses(v, predicate, out);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE_ADDR_47: &str = "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQ";
    const SAMPLE_ADDR_48: &str = "5GrwvaEF5zXb26Fz9rcQpDWS57CtERHpNehXCPcNoHGKutQY";

    #[test]
    fn matches_length_47_and_48() {
        let h = Base58LengthHeuristic;
        assert!(h.is_address_like(SAMPLE_ADDR_47));
        assert!(h.is_address_like(SAMPLE_ADDR_48));
    }

    #[test]
    fn rejects_wrong_length() {
        let h = Base58LengthHeuristic;
        assert!(!h.is_address_like("tooshort"));
    }

    #[test]
    fn rejects_non_base58_chars() {
        let h = Base58LengthHeuristic;
        // contains '0' and 'O' and 'I' and 'l', none of which are valid base58.
        let bad = "0".repeat(47);
        assert!(!h.is_address_like(&bad));
    }

    #[test]
    fn collects_nested_addresses_without_mutating() {
        let h = Base58LengthHeuristic;
        let payload = serde_json::json!({
            "signer": SAMPLE_ADDR_48,
            "nested": { "dest": SAMPLE_ADDR_47, "amount": 100 },
            "list": [SAMPLE_ADDR_48, "not-an-address"],
        });
        let mut found = Vec::new();
        collect_addresses(&payload, &h, &mut found);
        assert_eq!(found.len(), 3);
        assert!(found.contains(&SAMPLE_ADDR_47.to_string()));
        assert!(found.contains(&SAMPLE_ADDR_48.to_string()));
    }
}
