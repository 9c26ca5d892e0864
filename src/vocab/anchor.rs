//! Anchor events and anchor objects.
//!
//! An anchor event commits to a batch of DID operations through a
//! content-addressed content object. Its attachments are anchor objects,
//! each carrying the canonical content document, a hashlink URL over it
//! and a witness credential.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use crate::error::{AppError, Result};
use crate::hashlink;

use super::object::{Document, Object, StringList, Urls};

/// An anchor event.
///
/// Either `anchors` points at a matching attachment, or `url` points at
/// an event stored elsewhere (the reference form); never neither.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnchorEvent {
    #[serde(
        rename = "@context",
        default,
        skip_serializing_if = "StringList::is_empty"
    )]
    pub context: StringList,

    #[serde(rename = "type", default, skip_serializing_if = "StringList::is_empty")]
    pub types: StringList,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub anchors: Option<Url>,

    #[serde(default, skip_serializing_if = "Urls::is_empty")]
    pub parent: Urls,

    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachment: Vec<AnchorObject>,

    #[serde(
        rename = "attributedTo",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub attributed_to: Option<Url>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Urls::is_empty")]
    pub url: Urls,
}

impl AnchorEvent {
    pub fn new() -> Self {
        Self {
            context: StringList::new([super::CONTEXT_ACTIVITY_ANCHORS]),
            types: super::TYPE_ANCHOR_EVENT.into(),
            anchors: None,
            parent: Urls::default(),
            attachment: Vec::new(),
            attributed_to: None,
            published: None,
            url: Urls::default(),
        }
    }

    pub fn with_anchors(mut self, anchors: Url) -> Self {
        self.anchors = Some(anchors);
        self
    }

    pub fn with_parent(mut self, parent: Url) -> Self {
        self.parent.push(parent);
        self
    }

    pub fn with_attachment(mut self, attachment: AnchorObject) -> Self {
        self.attachment.push(attachment);
        self
    }

    pub fn with_attributed_to(mut self, attributed_to: Url) -> Self {
        self.attributed_to = Some(attributed_to);
        self
    }

    pub fn with_published(mut self, published: DateTime<Utc>) -> Self {
        self.published = Some(published);
        self
    }

    pub fn with_url(mut self, url: Url) -> Self {
        self.url.push(url);
        self
    }

    /// True when the event is a reference to an event stored elsewhere.
    pub fn is_reference(&self) -> bool {
        self.anchors.is_none() && !self.url.is_empty()
    }

    /// The anchor object whose URL matches `url`.
    pub fn anchor_object(&self, url: &Url) -> Result<&AnchorObject> {
        self.attachment
            .iter()
            .find(|attachment| attachment.url.contains(url))
            .ok_or(AppError::ContentNotFound)
    }

    /// The witness credential of the first attachment.
    pub fn witness(&self) -> Option<&Object> {
        self.attachment
            .first()
            .and_then(|attachment| attachment.witness.as_deref())
    }

    /// Validate the anchor event.
    ///
    /// A full event must carry an attachment whose URL equals `anchors`
    /// and whose witness is present; a reference form carries `url` only.
    pub fn validate(&self) -> Result<()> {
        let anchors = match self.anchors.as_ref() {
            Some(anchors) => anchors,
            None => {
                if !self.url.is_empty() {
                    // This is an anchor event reference.
                    return Ok(());
                }

                return Err(AppError::Validation(
                    "either anchors or URL is required on anchor event".to_string(),
                ));
            }
        };

        let mut anchor_object = None;

        for attachment in &self.attachment {
            attachment.validate()?;

            if attachment.url.contains(anchors) {
                anchor_object = Some(attachment);
                break;
            }
        }

        let anchor_object = anchor_object.ok_or_else(|| {
            AppError::Validation(format!(
                "unable to find the attachment that matches the anchors URL in the anchor event [{}]",
                anchors
            ))
        })?;

        if anchor_object.witness.is_none() {
            return Err(AppError::Validation("witness is required".to_string()));
        }

        Ok(())
    }
}

impl Default for AnchorEvent {
    fn default() -> Self {
        Self::new()
    }
}

/// An anchor object: the attachment of an anchor event carrying the
/// canonical content document and its witness credential.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnchorObject {
    #[serde(rename = "type", default, skip_serializing_if = "StringList::is_empty")]
    pub types: StringList,

    #[serde(default, skip_serializing_if = "String::is_empty")]
    pub generator: String,

    #[serde(default, skip_serializing_if = "Urls::is_empty")]
    pub url: Urls,

    #[serde(
        rename = "contentObject",
        default,
        skip_serializing_if = "Document::is_empty"
    )]
    pub content_object: Document,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub witness: Option<Box<Object>>,
}

impl AnchorObject {
    /// Create an anchor object over the given content document.
    ///
    /// The URL is the hashlink of the canonical content-object bytes,
    /// making the object self-certifying.
    pub fn new(generator: &str, content_object: Document, witness: Option<Object>) -> Result<Self> {
        let hl = hashlink::create_for(&content_object)?;

        let url = Url::parse(&hl)
            .map_err(|e| AppError::Validation(format!("invalid hashlink URL [{}]: {}", hl, e)))?;

        Ok(Self {
            types: super::TYPE_ANCHOR_OBJECT.into(),
            generator: generator.to_string(),
            url: url.into(),
            content_object,
            witness: witness.map(Box::new),
        })
    }

    /// The anchor object's hashlink URL.
    pub fn url(&self) -> Option<&Url> {
        self.url.first()
    }

    /// Validate the anchor object.
    ///
    /// Recomputes the hashlink over the canonical content object and
    /// compares it to the stored URL; a mismatch means the object was
    /// tampered with or corrupted.
    pub fn validate(&self) -> Result<()> {
        if !self.types.contains(super::TYPE_ANCHOR_OBJECT) {
            return Err(AppError::Validation(format!(
                "unsupported attachment type [{}] in anchor event",
                self.types.first().unwrap_or_default()
            )));
        }

        if self.url.len() != 1 {
            return Err(AppError::Validation(
                "anchor object must have exactly one URL".to_string(),
            ));
        }

        if self.generator.is_empty() {
            return Err(AppError::Validation(
                "generator is required in anchor event".to_string(),
            ));
        }

        if self.content_object.is_empty() {
            return Err(AppError::Validation(
                "content object is required in anchor event".to_string(),
            ));
        }

        let hl = hashlink::create_for(&self.content_object)?;
        let url = self.url.first().expect("checked above");

        if hl != url.as_str() {
            return Err(AppError::Validation(format!(
                "hashlink of content object [{}] does not match the anchor object URL [{}]",
                hl, url
            )));
        }

        Ok(())
    }
}

/// A compact reference to an anchor credential stored in CAS.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AnchorCredentialReference {
    #[serde(
        rename = "@context",
        default,
        skip_serializing_if = "StringList::is_empty"
    )]
    pub context: StringList,

    pub id: Url,

    #[serde(rename = "type", default, skip_serializing_if = "StringList::is_empty")]
    pub types: StringList,

    pub target: CasReference,
}

impl AnchorCredentialReference {
    pub fn new(id: Url, cid: &str) -> Self {
        Self {
            context: StringList::new([super::CONTEXT_ACTIVITY_ANCHORS]),
            id,
            types: super::TYPE_ANCHOR_CREDENTIAL_REF.into(),
            target: CasReference {
                id: cid.to_string(),
                types: super::TYPE_CAS.into(),
            },
        }
    }

    /// The CAS CID of the referenced credential.
    pub fn cid(&self) -> &str {
        &self.target.id
    }
}

/// A content-addressed-storage target.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct CasReference {
    pub id: String,

    #[serde(rename = "type", default, skip_serializing_if = "StringList::is_empty")]
    pub types: StringList,
}
