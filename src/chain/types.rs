//! Wire-level and domain types shared by the Chain Client, Block Fetcher, and Indexer.
//!
//! Hash rendering is lowercase `0x` + 64 hex characters throughout.

use serde::{Deserialize, Serialize};

/// `(number, hash)` pair emitted by head subscriptions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HeadInfo {
    pub number: u64,
    pub hash: [u8; 32],
}

impl HeadInfo {
    pub fn rendered_hash(&self) -> String {
        render_hash(&self.hash)
    }
}

/// Which phase an event was emitted under.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EventPhase {
    ApplyExtrinsic(u32),
    Other,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    pub event_index: u32,
    pub section: String,
    pub method: String,
    pub data: serde_json::Value,
    #[serde(skip)]
    pub phase: EventPhaseSerde,
}

/// `EventPhase` is not directly (de)serializable in a stable shape across call sites
/// that need a default; this newtype exists purely so `EventRecord` can derive
/// `Serialize`/`Deserialize` for the cache/HTTP layers without hand-writing an impl.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EventPhaseSerde(pub Option<u32>);

impl From<EventPhase> for EventPhaseSerde {
    fn from(p: EventPhase) -> Self {
        match p {
            EventPhase::ApplyExtrinsic(i) => EventPhaseSerde(Some(i)),
            EventPhase::Other => EventPhaseSerde(None),
        }
    }
}

impl EventRecord {
    pub fn phase(&self) -> EventPhase {
        match self.phase.0 {
            Some(i) => EventPhase::ApplyExtrinsic(i),
            None => EventPhase::Other,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtrinsicRecord {
    pub hash: String,
    pub index: u32,
    pub section: String,
    pub method: String,
    pub signer: Option<String>,
    pub nonce: Option<u64>,
    pub args: serde_json::Value,
    pub signature: Option<String>,
    pub is_signed: bool,
    pub success: bool,
    pub events: Vec<EventRecord>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlockRecord {
    pub number: u64,
    pub hash: String,
    pub parent_hash: String,
    pub state_root: String,
    pub extrinsics_root: String,
    pub timestamp: i64,
    pub author: Option<String>,
    pub extrinsics: Vec<ExtrinsicRecord>,
    /// Events whose phase is not `ApplyExtrinsic` — not attached to any extrinsic.
    pub standalone_events: Vec<EventRecord>,
}

impl BlockRecord {
    pub fn extrinsics_count(&self) -> u32 {
        self.extrinsics.len() as u32
    }

    pub fn events_count(&self) -> u32 {
        self.extrinsics.iter().map(|e| e.events.len() as u32).sum::<u32>()
            + self.standalone_events.len() as u32
    }
}

/// Renders a 32-byte hash as lowercase `0x` + 64 hex chars.
pub fn render_hash(bytes: &[u8; 32]) -> String {
    format!("0x{}", hex::encode(bytes))
}

/// Validates the `0x` + 64-hex format required of extrinsic hash inputs.
pub fn is_well_formed_hash(s: &str) -> bool {
    s.len() == 66
        && s.starts_with("0x")
        && s[2..].chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn renders_hash_lowercase_0x_64() {
        let bytes = [0xABu8; 32];
        let rendered = render_hash(&bytes);
        assert_eq!(rendered.len(), 66);
        assert!(rendered.starts_with("0x"));
        assert_eq!(rendered, rendered.to_lowercase());
    }

    #[test]
    fn validates_well_formed_hash() {
        let good = format!("0x{}", "a".repeat(64));
        assert!(is_well_formed_hash(&good));
        assert!(!is_well_formed_hash("0xabc"));
        assert!(!is_well_formed_hash(&"a".repeat(66)));
    }
}
