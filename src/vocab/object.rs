//! The generic ActivityStreams object and its one-or-many field helpers.

use chrono::{DateTime, Utc};
use serde::de::Deserializer;
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use url::Url;

/// An opaque JSON document (content objects, credential bodies).
///
/// `serde_json`'s map keeps keys sorted, so documents round-trip in
/// canonical key order.
pub type Document = serde_json::Map<String, serde_json::Value>;

/// A set of strings that serializes as a bare string when it holds a
/// single element, and as an array otherwise. Used for `@context` and
/// `type` fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StringList(Vec<String>);

impl StringList {
    pub fn new<I, S>(values: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self(values.into_iter().map(Into::into).collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, value: &str) -> bool {
        self.0.iter().any(|v| v == value)
    }

    pub fn first(&self) -> Option<&str> {
        self.0.first().map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.0.iter().map(String::as_str)
    }

    pub fn push(&mut self, value: impl Into<String>) {
        let value = value.into();
        if !self.contains(&value) {
            self.0.push(value);
        }
    }
}

impl From<&str> for StringList {
    fn from(value: &str) -> Self {
        Self(vec![value.to_string()])
    }
}

impl Serialize for StringList {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0.len() == 1 {
            serializer.serialize_str(&self.0[0])
        } else {
            let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
            for value in &self.0 {
                seq.serialize_element(value)?;
            }
            seq.end()
        }
    }
}

impl<'de> Deserialize<'de> for StringList {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            One(String),
            Many(Vec<String>),
        }

        Ok(match OneOrMany::deserialize(deserializer)? {
            OneOrMany::One(value) => StringList(vec![value]),
            OneOrMany::Many(values) => StringList(values),
        })
    }
}

/// A set of IRIs with the same one-or-many wire representation as
/// [`StringList`]. Used for `to`, `url` and `parent` fields.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Urls(Vec<Url>);

impl Urls {
    pub fn new<I: IntoIterator<Item = Url>>(values: I) -> Self {
        Self(values.into_iter().collect())
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn contains(&self, url: &Url) -> bool {
        self.0.iter().any(|u| u == url)
    }

    pub fn first(&self) -> Option<&Url> {
        self.0.first()
    }

    pub fn iter(&self) -> impl Iterator<Item = &Url> {
        self.0.iter()
    }

    pub fn push(&mut self, url: Url) {
        if !self.contains(&url) {
            self.0.push(url);
        }
    }
}

impl From<Url> for Urls {
    fn from(url: Url) -> Self {
        Self(vec![url])
    }
}

impl From<Vec<Url>> for Urls {
    fn from(urls: Vec<Url>) -> Self {
        Self(urls)
    }
}

impl Serialize for Urls {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if self.0.len() == 1 {
            serializer.serialize_str(self.0[0].as_str())
        } else {
            let mut seq = serializer.serialize_seq(Some(self.0.len()))?;
            for url in &self.0 {
                seq.serialize_element(url.as_str())?;
            }
            seq.end()
        }
    }
}

impl<'de> Deserialize<'de> for Urls {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum OneOrMany {
            One(Url),
            Many(Vec<Url>),
        }

        Ok(match OneOrMany::deserialize(deserializer)? {
            OneOrMany::One(url) => Urls(vec![url]),
            OneOrMany::Many(urls) => Urls(urls),
        })
    }
}

/// A generic ActivityStreams object.
///
/// Used for service actors, embedded verifiable credentials and witness
/// documents. Fields not modeled explicitly are preserved verbatim in
/// `properties` so credentials survive a round-trip untouched.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct Object {
    #[serde(rename = "@context", default, skip_serializing_if = "StringList::is_empty")]
    pub context: StringList,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<Url>,

    #[serde(rename = "type", default, skip_serializing_if = "StringList::is_empty")]
    pub types: StringList,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,

    #[serde(
        rename = "attributedTo",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub attributed_to: Option<Url>,

    #[serde(default, skip_serializing_if = "Urls::is_empty")]
    pub to: Urls,

    #[serde(flatten)]
    pub properties: Document,
}

impl Object {
    pub fn new() -> Self {
        Self::default()
    }

    /// A `Service` actor object for the given IRI.
    pub fn service(iri: Url) -> Self {
        Self {
            context: super::CONTEXT_ACTIVITY_STREAMS.into(),
            id: Some(iri),
            types: super::TYPE_SERVICE.into(),
            ..Self::default()
        }
    }

    /// Build an object from an arbitrary JSON document.
    ///
    /// Fails when the document is not a JSON object or its known fields
    /// do not parse.
    pub fn from_document(doc: Document) -> Result<Self, serde_json::Error> {
        serde_json::from_value(serde_json::Value::Object(doc))
    }

    pub fn with_id(mut self, id: Url) -> Self {
        self.id = Some(id);
        self
    }

    pub fn with_type(mut self, object_type: &str) -> Self {
        self.types.push(object_type);
        self
    }

    /// True when any of the object's types matches `object_type`.
    pub fn is_type(&self, object_type: &str) -> bool {
        self.types.contains(object_type)
    }
}
