//! ActivityPub vocabulary
//!
//! Strongly typed ActivityStreams objects with canonical JSON round-trip:
//! - `Object`: the generic AS object (actors, credentials, witnesses)
//! - `Activity`: Create / Follow / Accept / Reject / Announce / Like / Undo
//! - `ObjectProperty`: the polymorphic `object` / `target` property
//! - `AnchorEvent` / `AnchorObject`: the anchoring content model
//! - `OrderedCollection` / `OrderedCollectionPage`: paged read views
//!
//! JSON-LD contexts are carried as opaque strings; no expansion is done.

mod activity;
mod anchor;
mod collection;
mod object;
mod property;

pub use activity::{Activity, ActivityKind};
pub use anchor::{AnchorCredentialReference, AnchorEvent, AnchorObject, CasReference};
pub use collection::{OrderedCollection, OrderedCollectionPage};
pub use object::{Document, Object, StringList, Urls};
pub use property::ObjectProperty;

use url::Url;

/// ActivityStreams context.
pub const CONTEXT_ACTIVITY_STREAMS: &str = "https://www.w3.org/ns/activitystreams";

/// Activity anchors context.
pub const CONTEXT_ACTIVITY_ANCHORS: &str = "https://w3id.org/activityanchors/v1";

/// did:orb generator context.
pub const CONTEXT_ORB: &str = "https://w3id.org/orb#v0";

/// The well-known "public" audience IRI.
pub const PUBLIC_IRI: &str = "https://www.w3.org/ns/activitystreams#Public";

/// Object type of an anchor event.
pub const TYPE_ANCHOR_EVENT: &str = "AnchorEvent";

/// Object type of an anchor object attachment.
pub const TYPE_ANCHOR_OBJECT: &str = "AnchorObject";

/// Object type of a compact anchor credential reference.
pub const TYPE_ANCHOR_CREDENTIAL_REF: &str = "AnchorCredentialReference";

/// Object type of an embedded verifiable credential.
pub const TYPE_VERIFIABLE_CREDENTIAL: &str = "VerifiableCredential";

/// Object type of an anchor credential.
pub const TYPE_ANCHOR_CREDENTIAL: &str = "AnchorCredential";

/// Object type of a content-addressed-storage reference.
pub const TYPE_CAS: &str = "ContentAddressedStorage";

/// Object type of an ActivityPub service actor.
pub const TYPE_SERVICE: &str = "Service";

/// Returns the public audience IRI as a URL.
pub fn public_iri() -> Url {
    Url::parse(PUBLIC_IRI).expect("public IRI is a valid URL")
}
