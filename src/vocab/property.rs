//! The polymorphic `object` / `target` property.
//!
//! ActivityStreams allows a property to hold an IRI, an embedded object,
//! an embedded activity, or a list of any of these. The JSON shape and
//! the embedded `type` field drive the discriminator.

use serde::de::{Deserializer, Error as DeError};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;

use super::activity::{Activity, ActivityKind};
use super::anchor::{AnchorCredentialReference, AnchorEvent, CasReference};
use super::object::Object;

/// A property that may hold any of the embeddable vocabulary types.
#[derive(Debug, Clone, PartialEq)]
pub enum ObjectProperty {
    /// A bare IRI reference.
    Iri(Url),
    /// An embedded generic object (credential, actor, witness).
    Object(Box<Object>),
    /// An embedded activity.
    Activity(Box<Activity>),
    /// An embedded anchor event.
    AnchorEvent(Box<AnchorEvent>),
    /// A compact reference to an anchor credential in CAS.
    AnchorCredentialReference(Box<AnchorCredentialReference>),
    /// A content-addressed-storage reference (a bare CID).
    Cas(Box<CasReference>),
    /// A list of properties.
    List(Vec<ObjectProperty>),
}

impl ObjectProperty {
    pub fn iri(&self) -> Option<&Url> {
        match self {
            Self::Iri(iri) => Some(iri),
            _ => None,
        }
    }

    pub fn object(&self) -> Option<&Object> {
        match self {
            Self::Object(object) => Some(object),
            _ => None,
        }
    }

    pub fn activity(&self) -> Option<&Activity> {
        match self {
            Self::Activity(activity) => Some(activity),
            _ => None,
        }
    }

    pub fn anchor_event(&self) -> Option<&AnchorEvent> {
        match self {
            Self::AnchorEvent(event) => Some(event),
            _ => None,
        }
    }

    pub fn anchor_credential_reference(&self) -> Option<&AnchorCredentialReference> {
        match self {
            Self::AnchorCredentialReference(reference) => Some(reference),
            _ => None,
        }
    }

    pub fn cas(&self) -> Option<&CasReference> {
        match self {
            Self::Cas(reference) => Some(reference),
            _ => None,
        }
    }
}

impl From<Url> for ObjectProperty {
    fn from(iri: Url) -> Self {
        Self::Iri(iri)
    }
}

impl From<Object> for ObjectProperty {
    fn from(object: Object) -> Self {
        Self::Object(Box::new(object))
    }
}

impl From<Activity> for ObjectProperty {
    fn from(activity: Activity) -> Self {
        Self::Activity(Box::new(activity))
    }
}

impl From<AnchorEvent> for ObjectProperty {
    fn from(event: AnchorEvent) -> Self {
        Self::AnchorEvent(Box::new(event))
    }
}

impl From<AnchorCredentialReference> for ObjectProperty {
    fn from(reference: AnchorCredentialReference) -> Self {
        Self::AnchorCredentialReference(Box::new(reference))
    }
}

impl From<CasReference> for ObjectProperty {
    fn from(reference: CasReference) -> Self {
        Self::Cas(Box::new(reference))
    }
}

impl Serialize for ObjectProperty {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Iri(iri) => serializer.serialize_str(iri.as_str()),
            Self::Object(object) => object.serialize(serializer),
            Self::Activity(activity) => activity.serialize(serializer),
            Self::AnchorEvent(event) => event.serialize(serializer),
            Self::AnchorCredentialReference(reference) => reference.serialize(serializer),
            Self::Cas(reference) => reference.serialize(serializer),
            Self::List(items) => {
                let mut seq = serializer.serialize_seq(Some(items.len()))?;
                for item in items {
                    seq.serialize_element(item)?;
                }
                seq.end()
            }
        }
    }
}

impl<'de> Deserialize<'de> for ObjectProperty {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let value = Value::deserialize(deserializer)?;

        from_value(value).map_err(DeError::custom)
    }
}

fn from_value(value: Value) -> Result<ObjectProperty, String> {
    match value {
        Value::String(s) => Url::parse(&s)
            .map(ObjectProperty::Iri)
            .map_err(|e| format!("invalid IRI [{}]: {}", s, e)),
        Value::Array(items) => items
            .into_iter()
            .map(from_value)
            .collect::<Result<Vec<_>, _>>()
            .map(ObjectProperty::List),
        Value::Object(_) => {
            let types = type_names(value.get("type"));

            if types.iter().any(|t| t == super::TYPE_ANCHOR_EVENT) {
                serde_json::from_value(value)
                    .map(|e| ObjectProperty::AnchorEvent(Box::new(e)))
                    .map_err(|e| e.to_string())
            } else if types.iter().any(|t| t == super::TYPE_ANCHOR_CREDENTIAL_REF) {
                serde_json::from_value(value)
                    .map(|r| ObjectProperty::AnchorCredentialReference(Box::new(r)))
                    .map_err(|e| e.to_string())
            } else if types.iter().any(|t| t == super::TYPE_CAS) {
                serde_json::from_value(value)
                    .map(|r| ObjectProperty::Cas(Box::new(r)))
                    .map_err(|e| e.to_string())
            } else if types.iter().any(|t| ActivityKind::parse(t).is_some()) {
                serde_json::from_value(value)
                    .map(|a| ObjectProperty::Activity(Box::new(a)))
                    .map_err(|e| e.to_string())
            } else {
                serde_json::from_value(value)
                    .map(|o| ObjectProperty::Object(Box::new(o)))
                    .map_err(|e| e.to_string())
            }
        }
        other => Err(format!("unsupported object property: {}", other)),
    }
}

fn type_names(value: Option<&Value>) -> Vec<String> {
    match value {
        Some(Value::String(s)) => vec![s.clone()],
        Some(Value::Array(items)) => items
            .iter()
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect(),
        _ => Vec::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn iri_discriminator() {
        let prop: ObjectProperty =
            serde_json::from_value(json!("http://localhost:8301/services/service1")).unwrap();

        assert!(prop.iri().is_some());
        assert_eq!(
            serde_json::to_value(&prop).unwrap(),
            json!("http://localhost:8301/services/service1")
        );
    }

    #[test]
    fn activity_discriminator() {
        let prop: ObjectProperty = serde_json::from_value(json!({
            "id": "http://localhost:8302/services/service2/activities/1",
            "type": "Follow",
            "actor": "http://localhost:8302/services/service2",
            "object": "http://localhost:8301/services/service1"
        }))
        .unwrap();

        let follow = prop.activity().expect("embedded activity");
        assert!(follow.is_kind(ActivityKind::Follow));
    }

    #[test]
    fn object_discriminator() {
        let prop: ObjectProperty = serde_json::from_value(json!({
            "type": ["VerifiableCredential", "AnchorCredential"],
            "id": "http://sally.example.com/transactions/bafkreihwsn",
            "issuer": "https://sally.example.com/services/orb"
        }))
        .unwrap();

        let credential = prop.object().expect("embedded object");
        assert!(credential.is_type(super::super::TYPE_ANCHOR_CREDENTIAL));
    }

    #[test]
    fn list_discriminator() {
        let prop: ObjectProperty = serde_json::from_value(json!([
            "http://localhost:8301/services/service1",
            "http://localhost:8302/services/service2"
        ]))
        .unwrap();

        match prop {
            ObjectProperty::List(items) => assert_eq!(items.len(), 2),
            other => panic!("expected list, got {:?}", other),
        }
    }

    #[test]
    fn invalid_iri_is_rejected() {
        let result: Result<ObjectProperty, _> = serde_json::from_value(json!("not a url"));
        assert!(result.is_err());
    }
}
