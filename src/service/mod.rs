//! Federation service layer
//!
//! - `handler`: the inbound activity state machine
//! - `pubsub`: the in-process publisher/subscriber fabric
//! - `outbox`: the local outbox used to emit activities
//! - `lifecycle`: the shared service state machine
//!
//! The traits in this module are the collaborator seams: transports,
//! CAS writers and follow policies live outside the core and are
//! injected through them.

pub mod lifecycle;
pub mod pubsub;

mod handler;
mod outbox;

pub use handler::{ActivityHandler, HandlerConfig};
pub use outbox::LocalOutbox;

use async_trait::async_trait;
use url::Url;

use crate::error::Result;
use crate::vocab::{Activity, Object};

/// Posts activities to followers and other recipients.
///
/// The delivery transport (HTTP signing, retries) is outside the core;
/// the handler only needs a place to emit `Accept` / `Reject` /
/// `Announce` activities.
#[async_trait]
pub trait Outbox: Send + Sync {
    async fn post(&self, activity: &Activity, recipients: &[Url]) -> Result<()>;
}

/// Processes the anchor credential carried by a `Create` or `Announce`
/// activity.
#[async_trait]
pub trait AnchorCredentialHandler: Send + Sync {
    async fn handle_anchor_credential(&self, actor: &Url, cid: &str, content: &[u8]) -> Result<()>;
}

/// Decides whether a follow request is accepted.
#[async_trait]
pub trait FollowerAuth: Send + Sync {
    /// Returns true to accept the follower, false to reject it.
    async fn authorize_follower(&self, follower: &Object) -> Result<bool>;
}
