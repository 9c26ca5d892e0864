//! Anchoring: operation-batch payloads and their content-object generators.

mod generator;

pub use generator::DidOrbGenerator;

use chrono::{DateTime, Utc};
use std::collections::BTreeMap;

/// The internal description of a DID-operation batch.
///
/// `previous_anchors` maps each operation suffix to the hashlink of the
/// batch that last anchored it, or to the empty string for a brand new
/// DID. The ordered map gives the generator a stable iteration order, so
/// the content object it emits is reproducible.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    pub namespace: String,
    pub version: u64,
    pub core_index: String,
    pub operation_count: u64,
    pub previous_anchors: BTreeMap<String, String>,
    pub anchor_origin: String,
    pub published: Option<DateTime<Utc>>,
}
