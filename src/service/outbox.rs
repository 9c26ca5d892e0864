//! Local outbox.
//!
//! Persists posted activities, maintains the outbox reference sets and
//! hands the serialized activity to the pub/sub fabric, from which an
//! external delivery layer picks it up for transport to followers.

use std::sync::Arc;

use async_trait::async_trait;
use url::Url;

use crate::error::Result;
use crate::metrics::OUTBOX_ACTIVITIES_TOTAL;
use crate::store::{ActivityStore, ReferenceType};
use crate::vocab::Activity;

use super::pubsub::{Message, PubSub};
use super::Outbox;

/// The pub/sub topic on which outbound activities are published.
pub const OUTBOX_TOPIC: &str = "orb.activity.outbox";

/// An [`Outbox`] backed by the local store and the in-process fabric.
pub struct LocalOutbox {
    service_iri: Url,
    store: Arc<dyn ActivityStore>,
    pubsub: Arc<PubSub>,
}

impl LocalOutbox {
    pub fn new(service_iri: Url, store: Arc<dyn ActivityStore>, pubsub: Arc<PubSub>) -> Self {
        Self {
            service_iri,
            store,
            pubsub,
        }
    }
}

#[async_trait]
impl Outbox for LocalOutbox {
    async fn post(&self, activity: &Activity, recipients: &[Url]) -> Result<()> {
        self.store.put_activity(activity)?;

        self.store
            .add_reference(ReferenceType::Outbox, &self.service_iri, &activity.id)?;

        if activity.is_public() {
            self.store.add_reference(
                ReferenceType::PublicOutbox,
                &self.service_iri,
                &activity.id,
            )?;
        }

        OUTBOX_ACTIVITIES_TOTAL
            .with_label_values(&[activity.activity_type.as_str()])
            .inc();

        tracing::debug!(activity = %activity.id, recipients = recipients.len(),
            "posting activity to outbox");

        let payload = serde_json::to_vec(activity)?;

        self.pubsub
            .publish(OUTBOX_TOPIC, vec![Message::new(payload)])
            .await
    }
}
