//! Metadata-free envelope decoding for generic Substrate-style extrinsics.
//!
//! `subxt`'s dynamic API resolves a call's pallet/variant name and arguments from the
//! metadata it fetches at connection time, but it stops at the call body — the signed
//! envelope around it (address, signature, era, nonce, tip) is opaque to the dynamic
//! layer. The generic `MultiAddress`/`MultiSignature`/`Era` shapes are fixed across
//! runtimes regardless of pallet set, so this module walks them by hand with
//! `parity-scale-codec` (re-exported as `subxt::ext::codec`) rather than pulling in
//! per-chain metadata for fields that don't need it.

use subxt::ext::codec::{Compact, Decode};
use subxt::ext::scale_value::{Composite, Primitive, Value, ValueDef};

use blake2::digest::consts::U32;
use blake2::{Blake2b, Blake2b512, Digest};

type Blake2_256 = Blake2b<U32>;

/// Default network prefix used to render signer addresses when the deployment hasn't
/// pinned one. Matches Substrate's own "generic substrate" SS58 prefix (42).
const GENERIC_SS58_PREFIX: u8 = 42;

pub fn blake2_256(bytes: &[u8]) -> [u8; 32] {
    let digest = Blake2_256::digest(bytes);
    let mut out = [0u8; 32];
    out.copy_from_slice(&digest);
    out
}

/// SS58-encodes a 32-byte account id: `prefix ++ account_id ++ blake2b-512("SS58PRE" ++
/// prefix ++ account_id)[..2]`, base58-encoded.
pub fn ss58_encode(account_id: &[u8], prefix: u8) -> String {
    let mut body = Vec::with_capacity(1 + account_id.len() + 2);
    body.push(prefix);
    body.extend_from_slice(account_id);

    let mut preimage = b"SS58PRE".to_vec();
    preimage.extend_from_slice(&body);
    let checksum = Blake2b512::digest(&preimage);
    body.extend_from_slice(&checksum[..2]);

    bs58::encode(body).into_string()
}

#[derive(Debug, Default, Clone)]
pub struct ExtrinsicEnvelope {
    pub is_signed: bool,
    pub signer: Option<String>,
    pub nonce: Option<u64>,
}

/// Best-effort decode of the signed envelope wrapping an extrinsic's call body.
/// `bytes` is the full SCALE encoding of the extrinsic, compact-length prefix included
/// (what `ExtrinsicDetails::bytes()` returns). Any parse failure past the version byte
/// degrades to a partially-filled envelope rather than an error — the caller still has
/// a real hash and call decode to fall back on.
pub fn parse_envelope(bytes: &[u8]) -> ExtrinsicEnvelope {
    let mut cursor = bytes;
    if Compact::<u32>::decode(&mut cursor).is_err() {
        return ExtrinsicEnvelope::default();
    }

    let Some((&version_byte, rest)) = cursor.split_first() else {
        return ExtrinsicEnvelope::default();
    };
    cursor = rest;

    let is_signed = version_byte & 0b1000_0000 != 0;
    if !is_signed {
        return ExtrinsicEnvelope { is_signed: false, signer: None, nonce: None };
    }

    let signer = decode_multi_address(&mut cursor);
    if !skip_signature(&mut cursor) {
        return ExtrinsicEnvelope { is_signed: true, signer, nonce: None };
    }
    if !skip_era(&mut cursor) {
        return ExtrinsicEnvelope { is_signed: true, signer, nonce: None };
    }
    let nonce = Compact::<u64>::decode(&mut cursor).ok().map(|c| c.0);

    ExtrinsicEnvelope { is_signed: true, signer, nonce }
}

fn decode_multi_address(cursor: &mut &[u8]) -> Option<String> {
    let (&tag, rest) = cursor.split_first()?;
    *cursor = rest;
    match tag {
        // MultiAddress::Id(AccountId32)
        0 => {
            if cursor.len() < 32 {
                return None;
            }
            let (id, rest) = cursor.split_at(32);
            *cursor = rest;
            Some(ss58_encode(id, GENERIC_SS58_PREFIX))
        }
        // MultiAddress::Index(Compact<AccountIndex>)
        1 => Compact::<u32>::decode(cursor).ok().map(|c| format!("index:{}", c.0)),
        // MultiAddress::Raw(Vec<u8>)
        2 => {
            let len = Compact::<u32>::decode(cursor).ok()?.0 as usize;
            if cursor.len() < len {
                return None;
            }
            let (raw, rest) = cursor.split_at(len);
            *cursor = rest;
            Some(format!("0x{}", hex::encode(raw)))
        }
        // MultiAddress::Address32([u8; 32])
        3 => {
            if cursor.len() < 32 {
                return None;
            }
            let (raw, rest) = cursor.split_at(32);
            *cursor = rest;
            Some(format!("0x{}", hex::encode(raw)))
        }
        // MultiAddress::Address20([u8; 20])
        4 => {
            if cursor.len() < 20 {
                return None;
            }
            let (raw, rest) = cursor.split_at(20);
            *cursor = rest;
            Some(format!("0x{}", hex::encode(raw)))
        }
        _ => None,
    }
}

fn skip_signature(cursor: &mut &[u8]) -> bool {
    let Some((&tag, rest)) = cursor.split_first() else { return false };
    let len = match tag {
        0 /* Ed25519 */ | 1 /* Sr25519 */ => 64,
        2 /* Ecdsa */ => 65,
        _ => return false,
    };
    if rest.len() < len {
        return false;
    }
    *cursor = &rest[len..];
    true
}

fn skip_era(cursor: &mut &[u8]) -> bool {
    match cursor.first() {
        Some(0) => {
            *cursor = &cursor[1..];
            true
        }
        Some(_) => {
            if cursor.len() < 2 {
                return false;
            }
            *cursor = &cursor[2..];
            true
        }
        None => false,
    }
}

/// Renders a dynamically-decoded call/event argument tree as JSON. `scale_value`'s
/// `Composite`/`Value` shapes map onto JSON arrays (unnamed fields), objects (named
/// fields), and primitives; variants keep their name alongside their fields.
pub fn render_composite(composite: &Composite<u32>) -> serde_json::Value {
    match composite {
        Composite::Named(fields) => {
            serde_json::Value::Object(fields.iter().map(|(k, v)| (k.clone(), render_value(v))).collect())
        }
        Composite::Unnamed(items) => serde_json::Value::Array(items.iter().map(render_value).collect()),
    }
}

fn render_value(value: &Value<u32>) -> serde_json::Value {
    match &value.value {
        ValueDef::Composite(c) => render_composite(c),
        ValueDef::Variant(v) => {
            serde_json::json!({ "variant": v.name, "values": render_composite(&v.values) })
        }
        ValueDef::Primitive(p) => render_primitive(p),
        ValueDef::BitSequence(bits) => serde_json::Value::String(format!("{bits:?}")),
    }
}

fn render_primitive(primitive: &Primitive) -> serde_json::Value {
    match primitive {
        Primitive::Bool(b) => serde_json::Value::Bool(*b),
        Primitive::Char(c) => serde_json::Value::String(c.to_string()),
        Primitive::String(s) => serde_json::Value::String(s.clone()),
        Primitive::U128(n) => serde_json::Value::String(n.to_string()),
        Primitive::I128(n) => serde_json::Value::String(n.to_string()),
        other => serde_json::Value::String(format!("{other:?}")),
    }
}

/// Walks a rendered argument tree for the first plain integer leaf. Used to pull the
/// `now: Compact<Moment>` argument out of a decoded `timestamp.set` call without
/// depending on the field being named (dynamic decode of tuple-style calls often
/// yields an unnamed composite).
pub fn first_integer(value: &serde_json::Value) -> Option<i64> {
    match value {
        serde_json::Value::Number(n) => n.as_i64(),
        serde_json::Value::String(s) => s.parse().ok(),
        serde_json::Value::Array(items) => items.iter().find_map(first_integer),
        serde_json::Value::Object(map) => map.values().find_map(first_integer),
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn blake2_256_is_deterministic_and_32_bytes() {
        let a = blake2_256(b"hello");
        let b = blake2_256(b"hello");
        assert_eq!(a, b);
        assert_eq!(a.len(), 32);
        assert_ne!(a, blake2_256(b"world"));
    }

    #[test]
    fn ss58_encode_is_stable_for_a_fixed_input() {
        let id = [7u8; 32];
        let a = ss58_encode(&id, GENERIC_SS58_PREFIX);
        let b = ss58_encode(&id, GENERIC_SS58_PREFIX);
        assert_eq!(a, b);
        assert!(!a.is_empty());
    }

    #[test]
    fn unsigned_extrinsic_envelope_has_no_signer() {
        // single-byte compact-encoded length (4 << 2 = 0x10), then an unsigned version byte
        let bytes = [0x10, 0x04];
        let envelope = parse_envelope(&bytes);
        assert!(!envelope.is_signed);
        assert!(envelope.signer.is_none());
    }

    #[test]
    fn first_integer_finds_a_nested_number() {
        let v = serde_json::json!([{"a": [1, 2]}, 3]);
        assert_eq!(first_integer(&v), Some(1));
    }
}
