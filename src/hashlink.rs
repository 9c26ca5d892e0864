//! Hashlink codec
//!
//! Content-addressed URLs of the form `hl:<multibase-multihash>`, computed
//! over the canonical JSON serialization of a document. Two nodes hashing
//! semantically equal documents produce byte-identical hashlinks.

use serde::Serialize;
use serde_json::Value;
use sha2::{Digest, Sha256};

use crate::error::{AppError, Result};

/// URL scheme prefix for hashlinks.
pub const HL_PREFIX: &str = "hl:";

/// Multibase prefix for base58btc.
const MULTIBASE_BASE58BTC: char = 'z';

/// Serialize a document to canonical JSON bytes.
///
/// Canonical form: object keys in lexicographic order, no insignificant
/// whitespace. The value is round-tripped through `serde_json::Value`,
/// whose map type keeps keys sorted, so nested objects come out ordered
/// regardless of the field order of the source struct.
pub fn canonicalize<T: Serialize>(doc: &T) -> Result<Vec<u8>> {
    let value: Value = serde_json::to_value(doc)?;

    Ok(serde_json::to_vec(&value)?)
}

/// Create a hashlink over raw content bytes.
///
/// Format: `"hl:z" + base58btc(multihash(sha2-256, bytes))`.
pub fn create(content: &[u8]) -> String {
    let digest = Sha256::digest(content);

    // sha2-256 multihash: code 0x12, length 0x20, then the digest
    let mut multihash = Vec::with_capacity(2 + digest.len());
    multihash.push(0x12);
    multihash.push(0x20);
    multihash.extend_from_slice(&digest);

    format!(
        "{}{}{}",
        HL_PREFIX,
        MULTIBASE_BASE58BTC,
        bs58::encode(multihash).into_string()
    )
}

/// Create a hashlink over the canonical JSON form of a document.
pub fn create_for<T: Serialize>(doc: &T) -> Result<String> {
    Ok(create(&canonicalize(doc)?))
}

/// The parsed parts of a hashlink URL.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Parts {
    /// The multibase-encoded multihash of the content.
    pub resource_hash: String,
    /// Optional trailing metadata segment.
    pub metadata: Option<String>,
}

/// Parse a hashlink into its resource hash and optional metadata suffix.
///
/// Fails with `MalformedHashlink` when the `hl:` prefix is absent or the
/// hash portion is empty.
pub fn parse(hashlink: &str) -> Result<Parts> {
    let rest = hashlink
        .strip_prefix(HL_PREFIX)
        .ok_or_else(|| AppError::MalformedHashlink(hashlink.to_string()))?;

    let (resource_hash, metadata) = match rest.split_once(':') {
        Some((hash, meta)) => (hash, Some(meta.to_string())),
        None => (rest, None),
    };

    if resource_hash.is_empty() {
        return Err(AppError::MalformedHashlink(hashlink.to_string()));
    }

    Ok(Parts {
        resource_hash: resource_hash.to_string(),
        metadata,
    })
}

/// Verify that a hashlink matches the given canonical document.
pub fn verify<T: Serialize>(hashlink: &str, doc: &T) -> Result<bool> {
    // Surface malformed input as an error rather than a mismatch.
    parse(hashlink)?;

    Ok(create_for(doc)? == hashlink)
}
