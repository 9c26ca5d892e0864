//! ActivityPub activities.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;

use super::object::{StringList, Urls};
use super::property::ObjectProperty;

/// The activity types understood by this node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ActivityKind {
    Create,
    Follow,
    Accept,
    Reject,
    Announce,
    Like,
    Undo,
}

impl ActivityKind {
    /// Parse activity type from string
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "Create" => Some(Self::Create),
            "Follow" => Some(Self::Follow),
            "Accept" => Some(Self::Accept),
            "Reject" => Some(Self::Reject),
            "Announce" => Some(Self::Announce),
            "Like" => Some(Self::Like),
            "Undo" => Some(Self::Undo),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Create => "Create",
            Self::Follow => "Follow",
            Self::Accept => "Accept",
            Self::Reject => "Reject",
            Self::Announce => "Announce",
            Self::Like => "Like",
            Self::Undo => "Undo",
        }
    }
}

impl std::fmt::Display for ActivityKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An ActivityPub activity.
///
/// The `type` field is kept as a raw string so that activities with
/// unrecognized types can be represented (and rejected by the handler
/// with an explicit error instead of a parse failure).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Activity {
    #[serde(
        rename = "@context",
        default,
        skip_serializing_if = "StringList::is_empty"
    )]
    pub context: StringList,

    pub id: Url,

    #[serde(rename = "type")]
    pub activity_type: String,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub actor: Option<Url>,

    #[serde(default, skip_serializing_if = "Urls::is_empty")]
    pub to: Urls,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub published: Option<DateTime<Utc>>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub object: Option<ObjectProperty>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub target: Option<ObjectProperty>,

    #[serde(
        rename = "inReplyTo",
        default,
        skip_serializing_if = "Option::is_none"
    )]
    pub in_reply_to: Option<Url>,
}

impl Activity {
    pub fn new(id: Url, kind: ActivityKind) -> Self {
        Self {
            context: super::CONTEXT_ACTIVITY_STREAMS.into(),
            id,
            activity_type: kind.as_str().to_string(),
            actor: None,
            to: Urls::default(),
            published: None,
            object: None,
            target: None,
            in_reply_to: None,
        }
    }

    pub fn with_actor(mut self, actor: Url) -> Self {
        self.actor = Some(actor);
        self
    }

    pub fn with_to(mut self, to: Url) -> Self {
        self.to.push(to);
        self
    }

    pub fn with_published(mut self, published: DateTime<Utc>) -> Self {
        self.published = Some(published);
        self
    }

    pub fn with_object(mut self, object: ObjectProperty) -> Self {
        self.object = Some(object);
        self
    }

    pub fn with_target(mut self, target: ObjectProperty) -> Self {
        self.target = Some(target);
        self
    }

    pub fn with_context(mut self, context: &str) -> Self {
        self.context.push(context);
        self
    }

    pub fn with_in_reply_to(mut self, in_reply_to: Url) -> Self {
        self.in_reply_to = Some(in_reply_to);
        self
    }

    /// The recognized kind of this activity, if any.
    pub fn kind(&self) -> Option<ActivityKind> {
        ActivityKind::parse(&self.activity_type)
    }

    pub fn is_kind(&self, kind: ActivityKind) -> bool {
        self.kind() == Some(kind)
    }

    /// True when the activity is addressed to the public audience.
    pub fn is_public(&self) -> bool {
        self.to.contains(&super::public_iri())
    }

    /// The object property as a bare IRI, when it is one.
    pub fn object_iri(&self) -> Option<&Url> {
        match self.object.as_ref() {
            Some(ObjectProperty::Iri(iri)) => Some(iri),
            _ => None,
        }
    }
}
