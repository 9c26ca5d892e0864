//! did:orb v0 content-object generator.
//!
//! Maps an operation-batch payload to the content object anchored by an
//! anchor event, and back. The resource IDs use the `did:orb:uAAA:`
//! multihash placeholder prefix; previous anchors are stored with their
//! trailing metadata segment stripped and restored by scanning the
//! event's parent list.

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AppError, Result};
use crate::vocab::{AnchorEvent, Document};

use super::Payload;

/// The ID of the did:orb v0 generator.
pub const ID: &str = "https://w3id.org/orb#v0";

/// The DID namespace of the generator.
pub const NAMESPACE: &str = "did:orb";

/// The version of the generator.
pub const VERSION: u64 = 0;

const MULTIHASH_PREFIX: &str = "did:orb:uAAA";
const MULTIHASH_PREFIX_DELIMITER: &str = ":";

/// Generates content objects for did:orb anchor events.
#[derive(Debug, Clone)]
pub struct DidOrbGenerator {
    id: String,
    namespace: String,
    version: u64,
}

impl DidOrbGenerator {
    pub fn new() -> Self {
        Self {
            id: ID.to_string(),
            namespace: NAMESPACE.to_string(),
            version: VERSION,
        }
    }

    pub fn with_id(mut self, id: &str) -> Self {
        self.id = id.to_string();
        self
    }

    pub fn with_namespace(mut self, namespace: &str) -> Self {
        self.namespace = namespace.to_string();
        self
    }

    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// Create a content object from the given payload.
    ///
    /// Resources are emitted in suffix order (the payload's map is
    /// ordered), so equal payloads always produce byte-identical
    /// canonical content objects.
    pub fn create_content_object(&self, payload: &Payload) -> Result<Document> {
        if payload.core_index.is_empty() {
            return Err(AppError::Validation(
                "payload is missing core index".to_string(),
            ));
        }

        if payload.previous_anchors.is_empty() {
            return Err(AppError::Validation(
                "payload is missing previous anchors".to_string(),
            ));
        }

        let mut resources = Vec::with_capacity(payload.previous_anchors.len());

        for (suffix, value) in &payload.previous_anchors {
            tracing::debug!(suffix = %suffix, value = %value, "adding resource");

            let resource_id = format!("{}{}{}", MULTIHASH_PREFIX, MULTIHASH_PREFIX_DELIMITER, suffix);

            let resource = if value.is_empty() {
                Resource {
                    id: resource_id,
                    previous_anchor: None,
                }
            } else {
                let pos = value
                    .rfind(':')
                    .ok_or_else(|| AppError::InvalidPreviousAnchor(value.clone()))?;

                Resource {
                    id: resource_id,
                    previous_anchor: Some(value[..pos].to_string()),
                }
            };

            resources.push(resource);
        }

        let content_object = ContentObject {
            subject: payload.core_index.clone(),
            properties: Some(Properties {
                generator: self.id.clone(),
                resources,
            }),
        };

        match serde_json::to_value(&content_object)? {
            serde_json::Value::Object(doc) => Ok(doc),
            _ => unreachable!("content object serializes to a JSON object"),
        }
    }

    /// Create a payload from the given anchor event.
    pub fn create_payload(&self, anchor_event: &AnchorEvent) -> Result<Payload> {
        let anchors = anchor_event.anchors.as_ref().ok_or_else(|| {
            AppError::Validation("anchor event is missing anchors URL".to_string())
        })?;

        let anchor_object = anchor_event.anchor_object(anchors)?;

        let content_object: ContentObject = serde_json::from_value(serde_json::Value::Object(
            anchor_object.content_object.clone(),
        ))?;

        if content_object.subject.is_empty() {
            return Err(AppError::Validation(
                "content object is missing subject".to_string(),
            ));
        }

        let resources = content_object.resources();
        let operation_count = resources.len() as u64;

        let previous_anchors = self.previous_anchors(resources, &anchor_event.parent)?;

        Ok(Payload {
            namespace: self.namespace.clone(),
            version: self.version,
            core_index: content_object.subject,
            operation_count,
            previous_anchors,
            anchor_origin: anchor_event
                .attributed_to
                .as_ref()
                .map(|u| u.to_string())
                .unwrap_or_default(),
            published: anchor_event.published,
        })
    }

    fn previous_anchors(
        &self,
        resources: &[Resource],
        parent: &crate::vocab::Urls,
    ) -> Result<BTreeMap<String, String>> {
        let mut previous_anchors = BTreeMap::new();

        for resource in resources {
            let suffix = remove_multihash_prefix(&resource.id)?;

            let prev_anchor = match resource.previous_anchor.as_deref() {
                Some(prev) if !prev.is_empty() => previous_anchor_for_resource(prev, parent)?,
                _ => String::new(),
            };

            previous_anchors.insert(suffix, prev_anchor);
        }

        Ok(previous_anchors)
    }
}

impl Default for DidOrbGenerator {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct ContentObject {
    #[serde(default, skip_serializing_if = "String::is_empty")]
    subject: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    properties: Option<Properties>,
}

impl ContentObject {
    fn resources(&self) -> &[Resource] {
        self.properties
            .as_ref()
            .map(|p| p.resources.as_slice())
            .unwrap_or_default()
    }
}

#[derive(Debug, Serialize, Deserialize)]
struct Properties {
    #[serde(rename = "https://w3id.org/activityanchors#generator")]
    generator: String,

    #[serde(rename = "https://w3id.org/activityanchors#resources")]
    resources: Vec<Resource>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Resource {
    #[serde(rename = "ID")]
    id: String,

    #[serde(
        rename = "previousAnchor",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    previous_anchor: Option<String>,
}

/// Find the parent URL that restores the truncated previous anchor.
fn previous_anchor_for_resource(prev: &str, parent: &crate::vocab::Urls) -> Result<String> {
    for parent_url in parent.iter() {
        if parent_url.as_str().starts_with(prev) {
            tracing::debug!(parent = %parent_url, "found previous anchor for resource");

            return Ok(parent_url.to_string());
        }
    }

    Err(AppError::ResourceNotInParent(prev.to_string()))
}

fn remove_multihash_prefix(id: &str) -> Result<String> {
    let prefix = format!("{}{}", MULTIHASH_PREFIX, MULTIHASH_PREFIX_DELIMITER);

    id.strip_prefix(&prefix)
        .map(str::to_string)
        .ok_or_else(|| AppError::MissingResourcePrefix(id.to_string(), prefix))
}
