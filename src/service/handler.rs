//! Inbound activity handler.
//!
//! Dispatches activities by type, enforces the semantic rules for each,
//! persists handled activities and fans them out to subscribers. The
//! handler holds no mutable state beyond its lifecycle flag; the store
//! is the only shared resource.

use std::sync::{Arc, Mutex};

use tokio::sync::broadcast;
use url::Url;

use crate::error::{AppError, Result};
use crate::hashlink;
use crate::metrics::{
    ACTIVITIES_HANDLED_TOTAL, ACTIVITIES_RECEIVED_TOTAL, DUPLICATE_ACTIVITIES_TOTAL,
};
use crate::store::{read_references, ActivityStore, ReferenceType};
use crate::vocab::{Activity, ActivityKind, AnchorEvent, ObjectProperty};

use super::lifecycle::{Lifecycle, State};
use super::{AnchorCredentialHandler, FollowerAuth, Outbox};

/// Configuration for the activity handler.
#[derive(Debug, Clone)]
pub struct HandlerConfig {
    /// The name of the local service, used in log fields.
    pub service_name: String,
    /// The IRI of the local service.
    pub service_iri: Url,
    /// Buffer size of the subscriber stream. A subscriber that lags
    /// more than this many activities behind loses the oldest entries.
    pub buffer_size: usize,
}

/// Handles inbox activities.
pub struct ActivityHandler {
    config: HandlerConfig,
    lifecycle: Lifecycle,
    store: Arc<dyn ActivityStore>,
    outbox: Arc<dyn Outbox>,
    anchor_credential_handler: Option<Arc<dyn AnchorCredentialHandler>>,
    follower_auth: Option<Arc<dyn FollowerAuth>>,
    subscribers: Mutex<Option<broadcast::Sender<Activity>>>,
}

impl ActivityHandler {
    pub fn new(
        config: HandlerConfig,
        store: Arc<dyn ActivityStore>,
        outbox: Arc<dyn Outbox>,
    ) -> Self {
        let (sender, _) = broadcast::channel(config.buffer_size.max(1));

        Self {
            lifecycle: Lifecycle::new(&format!("activity-handler-{}", config.service_name)),
            config,
            store,
            outbox,
            anchor_credential_handler: None,
            follower_auth: None,
            subscribers: Mutex::new(Some(sender)),
        }
    }

    pub fn with_anchor_credential_handler(
        mut self,
        handler: Arc<dyn AnchorCredentialHandler>,
    ) -> Self {
        self.anchor_credential_handler = Some(handler);
        self
    }

    pub fn with_follower_auth(mut self, auth: Arc<dyn FollowerAuth>) -> Self {
        self.follower_auth = Some(auth);
        self
    }

    pub fn start(&self) {
        self.lifecycle.start();
    }

    /// Stop the handler. Subscriber streams observe closure once they
    /// drain; further `handle_activity` calls fail with `NotStarted`.
    pub fn stop(&self) {
        if !self.lifecycle.stop() {
            return;
        }

        if let Ok(mut subscribers) = self.subscribers.lock() {
            subscribers.take();
        }
    }

    pub fn state(&self) -> State {
        self.lifecycle.state()
    }

    /// Subscribe to the stream of successfully handled activities.
    ///
    /// Every subscriber sees every delivered activity. A slow
    /// subscriber never blocks the handler: on overflow the oldest
    /// entries are dropped and the receiver observes the lag.
    pub fn subscribe(&self) -> broadcast::Receiver<Activity> {
        if let Ok(subscribers) = self.subscribers.lock() {
            if let Some(sender) = subscribers.as_ref() {
                return sender.subscribe();
            }
        }

        // Stopped: hand out a receiver that reports closure.
        let (sender, receiver) = broadcast::channel(1);
        drop(sender);
        receiver
    }

    /// Handle an inbound activity.
    ///
    /// Success means the activity was validated, persisted and
    /// broadcast to subscribers; the first error from validation, the
    /// store or a collaborator is returned as-is.
    pub async fn handle_activity(&self, activity: &Activity) -> Result<()> {
        if !self.lifecycle.is_started() {
            return Err(AppError::NotStarted);
        }

        ACTIVITIES_RECEIVED_TOTAL
            .with_label_values(&[activity.activity_type.as_str()])
            .inc();

        let kind = activity.kind().ok_or_else(|| {
            AppError::Validation(format!(
                "unsupported activity type [{}]",
                activity.activity_type
            ))
        })?;

        // Duplicate IDs are at-least-once redelivery from the same
        // actor; anything else is an attempt to squat a stored ID.
        match self.store.get_activity(&activity.id) {
            Ok(existing) => {
                if existing.actor == activity.actor {
                    DUPLICATE_ACTIVITIES_TOTAL.inc();

                    tracing::debug!(service = %self.config.service_name, activity = %activity.id,
                        "duplicate activity; already handled");

                    return Ok(());
                }

                return Err(AppError::Validation(format!(
                    "activity ID [{}] is already in use by another actor",
                    activity.id
                )));
            }
            Err(err) if err.is_not_found() => {}
            Err(err) => return Err(err),
        }

        if activity.to.is_empty() {
            return Err(AppError::Validation(format!(
                "no recipients specified in '{}' activity",
                kind
            )));
        }

        let result = match kind {
            ActivityKind::Create => self.handle_create(activity).await,
            ActivityKind::Follow => self.handle_follow(activity).await,
            ActivityKind::Accept => self.handle_accept(activity).await,
            ActivityKind::Reject => self.handle_reject(activity).await,
            ActivityKind::Announce => self.handle_announce(activity).await,
            ActivityKind::Like => self.handle_like(activity).await,
            ActivityKind::Undo => self.handle_undo(activity).await,
        };

        let outcome = if result.is_ok() { "handled" } else { "error" };
        ACTIVITIES_HANDLED_TOTAL
            .with_label_values(&[kind.as_str(), outcome])
            .inc();

        result
    }

    // =========================================================================
    // Activity type handlers
    // =========================================================================

    /// Handle a Create activity carrying an anchor credential, an
    /// anchor event, or an anchor credential reference.
    async fn handle_create(&self, activity: &Activity) -> Result<()> {
        let actor = self.require_actor(activity, ActivityKind::Create)?;

        let object = activity.object.as_ref().ok_or_else(|| {
            AppError::Validation("no object specified in 'Create' activity".to_string())
        })?;

        match object {
            ObjectProperty::Object(credential)
                if credential.is_type(crate::vocab::TYPE_VERIFIABLE_CREDENTIAL)
                    || credential.is_type(crate::vocab::TYPE_ANCHOR_CREDENTIAL) =>
            {
                // The CAS CID of an embedded credential travels in the
                // activity's target.
                let cid = activity
                    .target
                    .as_ref()
                    .and_then(|target| target.cas())
                    .map(|cas| cas.id.clone())
                    .ok_or_else(|| {
                        AppError::Validation(
                            "no CID specified in 'target' of 'Create' activity".to_string(),
                        )
                    })?;

                let content = hashlink::canonicalize(credential)?;

                self.deliver_anchor_credential(actor, &cid, &content).await?;

                if let Some(credential_iri) = credential.id.as_ref() {
                    self.store.add_reference(
                        ReferenceType::AnchorCredential,
                        &self.config.service_iri,
                        credential_iri,
                    )?;
                }
            }
            ObjectProperty::AnchorEvent(event) => {
                self.handle_embedded_anchor_event(actor, event).await?;
            }
            ObjectProperty::AnchorCredentialReference(reference) => {
                let content = hashlink::canonicalize(reference.as_ref())?;

                self.deliver_anchor_credential(actor, reference.cid(), &content)
                    .await?;

                self.store.add_reference(
                    ReferenceType::AnchorCredential,
                    &self.config.service_iri,
                    &reference.id,
                )?;
            }
            _ => {
                return Err(AppError::Validation(
                    "unsupported object type in 'Create' activity".to_string(),
                ));
            }
        }

        self.persist_to_inbox(activity)?;
        self.notify(activity);

        Ok(())
    }

    async fn handle_embedded_anchor_event(&self, actor: &Url, event: &AnchorEvent) -> Result<()> {
        event.validate()?;

        let anchors = event.anchors.as_ref().ok_or_else(|| {
            AppError::Validation("embedded anchor event has no anchors URL".to_string())
        })?;

        let cid = hashlink::parse(anchors.as_str())?.resource_hash;
        let content = hashlink::canonicalize(event)?;

        self.deliver_anchor_credential(actor, &cid, &content).await?;

        self.store.add_reference(
            ReferenceType::AnchorCredential,
            &self.config.service_iri,
            anchors,
        )?;

        Ok(())
    }

    /// Handle a Follow addressed to this service.
    ///
    /// An accepted follower is recorded and answered with an `Accept`;
    /// a rejected one is answered with a `Reject` and not forwarded to
    /// subscribers. A Follow whose object is some other service is
    /// silently ignored.
    async fn handle_follow(&self, activity: &Activity) -> Result<()> {
        let actor = self.require_actor(activity, ActivityKind::Follow)?.clone();

        let object_iri = activity.object_iri().ok_or_else(|| {
            AppError::Validation(
                "no IRI specified in 'object' field of the 'Follow' activity".to_string(),
            )
        })?;

        if *object_iri != self.config.service_iri {
            tracing::debug!(service = %self.config.service_name, object = %object_iri,
                "follow is not for this service; ignoring");

            return Ok(());
        }

        let actor_object = self.store.get_actor(&actor)?;

        if self.is_follower(&actor)? {
            // Already a follower: re-send the Accept so a lost reply
            // can be recovered.
            self.persist_to_inbox(activity)?;
            self.post_accept(activity, &actor).await?;
            self.notify(activity);

            return Ok(());
        }

        let accepted = match self.follower_auth.as_ref() {
            Some(auth) => auth.authorize_follower(&actor_object).await?,
            None => true,
        };

        if accepted {
            self.persist_to_inbox(activity)?;
            self.store
                .add_reference(ReferenceType::Follower, &self.config.service_iri, &actor)?;

            self.post_accept(activity, &actor).await?;
            self.notify(activity);
        } else {
            tracing::info!(service = %self.config.service_name, actor = %actor,
                "follower was rejected");

            self.store.put_activity(activity)?;
            self.post_reject(activity, &actor).await?;
        }

        Ok(())
    }

    /// Handle an Accept of an outbound Follow.
    async fn handle_accept(&self, activity: &Activity) -> Result<()> {
        let actor = self.require_actor(activity, ActivityKind::Accept)?.clone();

        self.validate_outbound_follow(activity, ActivityKind::Accept)?;

        self.store
            .add_reference(ReferenceType::Following, &self.config.service_iri, &actor)?;

        self.persist_to_inbox(activity)?;
        self.notify(activity);

        Ok(())
    }

    /// Handle a Reject of an outbound Follow. No set is mutated.
    async fn handle_reject(&self, activity: &Activity) -> Result<()> {
        let actor = self.require_actor(activity, ActivityKind::Reject)?;

        self.validate_outbound_follow(activity, ActivityKind::Reject)?;

        tracing::info!(service = %self.config.service_name, actor = %actor,
            "follow request was rejected");

        self.persist_to_inbox(activity)?;
        self.notify(activity);

        Ok(())
    }

    /// Handle an Announce referencing anchor credentials.
    async fn handle_announce(&self, activity: &Activity) -> Result<()> {
        let actor = self.require_actor(activity, ActivityKind::Announce)?.clone();

        let object = activity.object.as_ref().ok_or_else(|| {
            AppError::Validation("no object specified in 'Announce' activity".to_string())
        })?;

        let targets = self.announce_targets(&actor, object).await?;

        if targets.is_empty() {
            return Err(AppError::Validation(
                "unsupported object type in 'Announce' activity".to_string(),
            ));
        }

        for target in &targets {
            self.store
                .add_reference(ReferenceType::Share, target, &activity.id)?;
        }

        self.persist_to_inbox(activity)?;
        self.notify(activity);

        Ok(())
    }

    /// Resolve the IRIs announced by the object property, delivering
    /// each referenced credential to the anchor handler.
    async fn announce_targets(
        &self,
        actor: &Url,
        object: &ObjectProperty,
    ) -> Result<Vec<Url>> {
        match object {
            ObjectProperty::Iri(iri) => Ok(vec![iri.clone()]),
            ObjectProperty::AnchorCredentialReference(reference) => {
                let content = hashlink::canonicalize(reference.as_ref())?;

                self.deliver_anchor_credential(actor, reference.cid(), &content)
                    .await?;

                Ok(vec![reference.id.clone()])
            }
            ObjectProperty::AnchorEvent(event) => {
                self.handle_embedded_anchor_event(actor, event).await?;

                Ok(event.anchors.clone().into_iter().collect())
            }
            ObjectProperty::List(items) => {
                let mut targets = Vec::new();

                for item in items {
                    targets.extend(Box::pin(self.announce_targets(actor, item)).await?);
                }

                Ok(targets)
            }
            _ => Ok(Vec::new()),
        }
    }

    /// Handle a Like of an object known to this service.
    async fn handle_like(&self, activity: &Activity) -> Result<()> {
        self.require_actor(activity, ActivityKind::Like)?;

        let object_iri = activity
            .object_iri()
            .ok_or_else(|| {
                AppError::Validation(
                    "no IRI specified in 'object' field of the 'Like' activity".to_string(),
                )
            })?
            .clone();

        if !self.is_known_object(&object_iri)? {
            return Err(AppError::NotFound);
        }

        self.store
            .add_reference(ReferenceType::Like, &object_iri, &activity.id)?;

        self.persist_to_inbox(activity)?;
        self.notify(activity);

        Ok(())
    }

    /// Handle an Undo of a prior Follow, Like or Announce by the same
    /// actor.
    async fn handle_undo(&self, activity: &Activity) -> Result<()> {
        let actor = self.require_actor(activity, ActivityKind::Undo)?.clone();

        let undone_iri = match activity.object.as_ref() {
            Some(ObjectProperty::Iri(iri)) => iri.clone(),
            Some(ObjectProperty::Activity(embedded)) => embedded.id.clone(),
            _ => {
                return Err(AppError::Validation(
                    "no activity specified in 'object' field of the 'Undo' activity".to_string(),
                ));
            }
        };

        let undone = self.store.get_activity(&undone_iri)?;

        if undone.actor.as_ref() != Some(&actor) {
            return Err(AppError::Validation(format!(
                "not permitted to undo activity [{}]: actor mismatch",
                undone_iri
            )));
        }

        match undone.kind() {
            Some(ActivityKind::Follow) => {
                self.store.delete_reference(
                    ReferenceType::Follower,
                    &self.config.service_iri,
                    &actor,
                )?;
            }
            Some(ActivityKind::Like) => {
                if let Some(liked) = undone.object_iri() {
                    self.store
                        .delete_reference(ReferenceType::Like, liked, &undone.id)?;
                }
            }
            Some(ActivityKind::Announce) => {
                if let Some(object) = undone.object.as_ref() {
                    for target in self.share_targets(object) {
                        self.store
                            .delete_reference(ReferenceType::Share, &target, &undone.id)?;
                    }
                }
            }
            _ => {
                return Err(AppError::Validation(format!(
                    "'{}' activities cannot be undone",
                    undone.activity_type
                )));
            }
        }

        self.persist_to_inbox(activity)?;
        self.notify(activity);

        Ok(())
    }

    // =========================================================================
    // Helpers
    // =========================================================================

    fn require_actor<'a>(&self, activity: &'a Activity, kind: ActivityKind) -> Result<&'a Url> {
        activity.actor.as_ref().ok_or_else(|| {
            AppError::Validation(format!("no actor specified in '{}' activity", kind))
        })
    }

    async fn deliver_anchor_credential(&self, actor: &Url, cid: &str, content: &[u8]) -> Result<()> {
        match self.anchor_credential_handler.as_ref() {
            Some(handler) => handler.handle_anchor_credential(actor, cid, content).await,
            None => {
                tracing::warn!(service = %self.config.service_name, cid = %cid,
                    "no anchor credential handler is configured");

                Ok(())
            }
        }
    }

    /// Resolve and validate the prior outbound Follow referenced by an
    /// Accept or Reject reply.
    ///
    /// The reply names the Follow by `inReplyTo` or by its `object`
    /// IRI. The referenced activity must exist in the store, be a
    /// Follow posted by this service (present in the outbox set), and
    /// the reply must come from the actor that Follow targeted. An
    /// embedded Follow payload is never trusted on its own; only the
    /// stored activity counts.
    fn validate_outbound_follow(&self, activity: &Activity, kind: ActivityKind) -> Result<Activity> {
        let follow_iri = activity
            .in_reply_to
            .clone()
            .or_else(|| match activity.object.as_ref() {
                Some(ObjectProperty::Iri(iri)) => Some(iri.clone()),
                Some(ObjectProperty::Activity(embedded)) => Some(embedded.id.clone()),
                _ => None,
            })
            .ok_or_else(|| {
                AppError::Validation(format!(
                    "no 'Follow' activity referenced in the '{}' activity",
                    kind
                ))
            })?;

        let follow = self.store.get_activity(&follow_iri)?;

        if !follow.is_kind(ActivityKind::Follow) {
            return Err(AppError::Validation(format!(
                "activity [{}] referenced in the '{}' activity is not a 'Follow'",
                follow_iri, kind
            )));
        }

        if follow.actor.as_ref() != Some(&self.config.service_iri) {
            return Err(AppError::Validation(format!(
                "the 'Follow' activity referenced in the '{}' activity is not for this service",
                kind
            )));
        }

        if !self.was_posted(&follow.id)? {
            return Err(AppError::Validation(format!(
                "'Follow' activity [{}] referenced in the '{}' activity was not sent by this service",
                follow.id, kind
            )));
        }

        if follow.object_iri() != activity.actor.as_ref() {
            return Err(AppError::Validation(format!(
                "the '{}' activity is not from the target of the referenced 'Follow'",
                kind
            )));
        }

        Ok(follow)
    }

    /// True when the activity was posted through this service's outbox.
    fn was_posted(&self, iri: &Url) -> Result<bool> {
        let mut it = self
            .store
            .get_references(ReferenceType::Outbox, &self.config.service_iri)?;

        Ok(read_references(it.as_mut(), usize::MAX)?.contains(iri))
    }

    fn is_follower(&self, actor: &Url) -> Result<bool> {
        let mut it = self
            .store
            .get_references(ReferenceType::Follower, &self.config.service_iri)?;

        Ok(read_references(it.as_mut(), usize::MAX)?.contains(actor))
    }

    fn is_known_object(&self, iri: &Url) -> Result<bool> {
        match self.store.get_activity(iri) {
            Ok(_) => Ok(true),
            Err(err) if err.is_not_found() => {
                let mut it = self
                    .store
                    .get_references(ReferenceType::AnchorCredential, &self.config.service_iri)?;

                Ok(read_references(it.as_mut(), usize::MAX)?.contains(iri))
            }
            Err(err) => Err(err),
        }
    }

    fn share_targets(&self, object: &ObjectProperty) -> Vec<Url> {
        match object {
            ObjectProperty::Iri(iri) => vec![iri.clone()],
            ObjectProperty::AnchorCredentialReference(reference) => vec![reference.id.clone()],
            ObjectProperty::AnchorEvent(event) => event.anchors.clone().into_iter().collect(),
            ObjectProperty::List(items) => {
                items.iter().flat_map(|item| self.share_targets(item)).collect()
            }
            _ => Vec::new(),
        }
    }

    /// Reply to a persisted Follow with an Accept. The Follow is named
    /// by IRI so the recipient correlates against its own stored copy.
    async fn post_accept(&self, follow: &Activity, actor: &Url) -> Result<()> {
        let accept = Activity::new(self.new_activity_id(), ActivityKind::Accept)
            .with_actor(self.config.service_iri.clone())
            .with_to(actor.clone())
            .with_object(ObjectProperty::Iri(follow.id.clone()))
            .with_in_reply_to(follow.id.clone());

        self.outbox.post(&accept, &[actor.clone()]).await
    }

    /// Reply to a persisted Follow with a Reject.
    async fn post_reject(&self, follow: &Activity, actor: &Url) -> Result<()> {
        let reject = Activity::new(self.new_activity_id(), ActivityKind::Reject)
            .with_actor(self.config.service_iri.clone())
            .with_to(actor.clone())
            .with_object(ObjectProperty::Iri(follow.id.clone()))
            .with_in_reply_to(follow.id.clone());

        self.outbox.post(&reject, &[actor.clone()]).await
    }

    fn new_activity_id(&self) -> Url {
        let id = format!(
            "{}/activities/{}",
            self.config.service_iri,
            ulid::Ulid::new()
        );

        Url::parse(&id).expect("activity ID is a valid URL")
    }

    fn persist_to_inbox(&self, activity: &Activity) -> Result<()> {
        self.store.put_activity(activity)?;
        self.store
            .add_reference(ReferenceType::Inbox, &self.config.service_iri, &activity.id)
    }

    fn notify(&self, activity: &Activity) {
        let subscribers = match self.subscribers.lock() {
            Ok(subscribers) => subscribers,
            Err(_) => return,
        };

        if let Some(sender) = subscribers.as_ref() {
            if sender.receiver_count() > 0 {
                if let Err(err) = sender.send(activity.clone()) {
                    tracing::debug!(service = %self.config.service_name, error = %err,
                        "unable to broadcast activity to subscribers");
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemStore;
    use crate::vocab::{AnchorCredentialReference, CasReference, Object};
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::time::Duration;

    const CID: &str = "bafkreiarkubvukdidicmqynkyls3iqawdqvthi7e6mbky2amuw3inxsi3y";

    fn iri(s: &str) -> Url {
        Url::parse(s).unwrap()
    }

    fn service1() -> Url {
        iri("http://localhost:8301/services/service1")
    }

    fn service2() -> Url {
        iri("http://localhost:8302/services/service2")
    }

    fn service3() -> Url {
        iri("http://localhost:8303/services/service3")
    }

    fn new_activity_id(service: &Url) -> Url {
        iri(&format!("{}/activities/{}", service, ulid::Ulid::new()))
    }

    fn anchor_credential() -> Object {
        let doc = serde_json::json!({
            "@context": [
                "https://www.w3.org/2018/credentials/v1",
                "https://trustbloc.github.io/Context/orb-v1.json"
            ],
            "id": "http://sally.example.com/transactions/bafkreihwsn",
            "type": ["VerifiableCredential", "AnchorCredential"],
            "issuer": "https://sally.example.com/services/orb",
            "issuanceDate": "2021-01-27T09:30:10Z",
            "credentialSubject": {
                "anchorString": "bafkreihwsn",
                "namespace": "did:orb",
                "version": "1"
            }
        });

        serde_json::from_value(doc).unwrap()
    }

    struct MockOutbox {
        activities: Mutex<Vec<Activity>>,
    }

    impl MockOutbox {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                activities: Mutex::new(Vec::new()),
            })
        }

        fn count_by_kind(&self, kind: ActivityKind) -> usize {
            self.activities
                .lock()
                .unwrap()
                .iter()
                .filter(|a| a.is_kind(kind))
                .count()
        }
    }

    #[async_trait]
    impl Outbox for MockOutbox {
        async fn post(&self, activity: &Activity, _recipients: &[Url]) -> Result<()> {
            self.activities.lock().unwrap().push(activity.clone());
            Ok(())
        }
    }

    struct MockAnchorCredentialHandler {
        credentials: Mutex<HashMap<String, Vec<u8>>>,
        error: Mutex<Option<String>>,
    }

    impl MockAnchorCredentialHandler {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                credentials: Mutex::new(HashMap::new()),
                error: Mutex::new(None),
            })
        }

        fn credential(&self, cid: &str) -> Option<Vec<u8>> {
            self.credentials.lock().unwrap().get(cid).cloned()
        }

        fn set_error(&self, error: Option<&str>) {
            *self.error.lock().unwrap() = error.map(str::to_string);
        }
    }

    #[async_trait]
    impl AnchorCredentialHandler for MockAnchorCredentialHandler {
        async fn handle_anchor_credential(
            &self,
            _actor: &Url,
            cid: &str,
            content: &[u8],
        ) -> Result<()> {
            if let Some(message) = self.error.lock().unwrap().as_ref() {
                return Err(AppError::Internal(anyhow::anyhow!(message.clone())));
            }

            self.credentials
                .lock()
                .unwrap()
                .insert(cid.to_string(), content.to_vec());

            Ok(())
        }
    }

    struct MockFollowerAuth {
        accept: AtomicBool,
        error: Mutex<Option<String>>,
    }

    impl MockFollowerAuth {
        fn new() -> Arc<Self> {
            Arc::new(Self {
                accept: AtomicBool::new(true),
                error: Mutex::new(None),
            })
        }

        fn with_accept(&self) {
            self.accept.store(true, Ordering::SeqCst);
        }

        fn with_reject(&self) {
            self.accept.store(false, Ordering::SeqCst);
        }

        fn set_error(&self, error: Option<&str>) {
            *self.error.lock().unwrap() = error.map(str::to_string);
        }
    }

    #[async_trait]
    impl FollowerAuth for MockFollowerAuth {
        async fn authorize_follower(&self, _follower: &Object) -> Result<bool> {
            if let Some(message) = self.error.lock().unwrap().as_ref() {
                return Err(AppError::Internal(anyhow::anyhow!(message.clone())));
            }

            Ok(self.accept.load(Ordering::SeqCst))
        }
    }

    struct Fixture {
        handler: ActivityHandler,
        store: Arc<MemStore>,
        outbox: Arc<MockOutbox>,
        anchor_handler: Arc<MockAnchorCredentialHandler>,
        follower_auth: Arc<MockFollowerAuth>,
    }

    fn fixture() -> Fixture {
        let store = Arc::new(MemStore::new("service1"));
        let outbox = MockOutbox::new();
        let anchor_handler = MockAnchorCredentialHandler::new();
        let follower_auth = MockFollowerAuth::new();

        let handler = ActivityHandler::new(
            HandlerConfig {
                service_name: "service1".to_string(),
                service_iri: service1(),
                buffer_size: 100,
            },
            store.clone(),
            outbox.clone(),
        )
        .with_anchor_credential_handler(anchor_handler.clone())
        .with_follower_auth(follower_auth.clone());

        handler.start();

        Fixture {
            handler,
            store,
            outbox,
            anchor_handler,
            follower_auth,
        }
    }

    async fn expect_broadcast(rx: &mut broadcast::Receiver<Activity>, id: &Url) {
        let activity = tokio::time::timeout(Duration::from_millis(50), rx.recv())
            .await
            .expect("subscriber received the activity within 50ms")
            .unwrap();

        assert_eq!(&activity.id, id);
    }

    async fn expect_no_broadcast(rx: &mut broadcast::Receiver<Activity>) {
        assert!(
            tokio::time::timeout(Duration::from_millis(50), rx.recv())
                .await
                .is_err(),
            "no activity should have been broadcast"
        );
    }

    #[tokio::test]
    async fn lifecycle_transitions() {
        let fixture = fixture();

        assert_eq!(fixture.handler.state(), State::Started);

        fixture.handler.stop();
        assert_eq!(fixture.handler.state(), State::Stopped);

        let err = fixture
            .handler
            .handle_activity(
                &Activity::new(new_activity_id(&service2()), ActivityKind::Follow)
                    .with_actor(service2())
                    .with_to(service1()),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, AppError::NotStarted));

        // Subscribing after stop yields a closed stream.
        let mut rx = fixture.handler.subscribe();
        assert!(rx.recv().await.is_err());
    }

    #[tokio::test]
    async fn unsupported_activity_type_is_rejected() {
        let fixture = fixture();

        let mut activity = Activity::new(new_activity_id(&service1()), ActivityKind::Create);
        activity.activity_type = "unsupported_type".to_string();

        let err = fixture.handler.handle_activity(&activity).await.unwrap_err();
        assert!(err.to_string().contains("unsupported activity type"));
    }

    #[tokio::test]
    async fn create_with_anchor_credential() {
        let fixture = fixture();
        let mut rx = fixture.handler.subscribe();

        let create = Activity::new(new_activity_id(&service1()), ActivityKind::Create)
            .with_actor(service1())
            .with_to(service2())
            .with_context(crate::vocab::CONTEXT_ORB)
            .with_object(ObjectProperty::from(anchor_credential()))
            .with_target(ObjectProperty::from(CasReference {
                id: CID.to_string(),
                types: crate::vocab::TYPE_CAS.into(),
            }))
            .with_published(chrono::Utc::now());

        fixture.handler.handle_activity(&create).await.unwrap();

        expect_broadcast(&mut rx, &create.id).await;

        assert!(fixture.anchor_handler.credential(CID).is_some());
        assert_eq!(fixture.store.get_activity(&create.id).unwrap(), create);

        let mut inbox = fixture
            .store
            .get_references(ReferenceType::Inbox, &service1())
            .unwrap();
        assert!(read_references(inbox.as_mut(), usize::MAX)
            .unwrap()
            .contains(&create.id));
    }

    #[tokio::test]
    async fn create_with_anchor_credential_reference() {
        let fixture = fixture();
        let mut rx = fixture.handler.subscribe();

        let reference = AnchorCredentialReference::new(
            iri("http://sally.example.com/transactions/bafkreihwsnuregceqh263vgdathcprnbvatyat6h6mu7ipjhhodcdbyhoy"),
            CID,
        );

        let create = Activity::new(new_activity_id(&service1()), ActivityKind::Create)
            .with_actor(service1())
            .with_to(service2())
            .with_context(crate::vocab::CONTEXT_ORB)
            .with_object(ObjectProperty::from(reference));

        fixture.handler.handle_activity(&create).await.unwrap();

        expect_broadcast(&mut rx, &create.id).await;
        assert!(fixture.anchor_handler.credential(CID).is_some());
    }

    #[tokio::test]
    async fn create_anchor_handler_error_is_propagated() {
        let fixture = fixture();

        fixture
            .anchor_handler
            .set_error(Some("injected anchor cred handler error"));

        let create = Activity::new(new_activity_id(&service1()), ActivityKind::Create)
            .with_actor(service1())
            .with_to(service2())
            .with_object(ObjectProperty::from(anchor_credential()))
            .with_target(ObjectProperty::from(CasReference {
                id: CID.to_string(),
                types: crate::vocab::TYPE_CAS.into(),
            }));

        let err = fixture.handler.handle_activity(&create).await.unwrap_err();
        assert!(err
            .to_string()
            .contains("injected anchor cred handler error"));

        // The failed activity was not persisted; redelivery can retry.
        assert!(fixture.store.get_activity(&create.id).is_err());
    }

    #[tokio::test]
    async fn create_with_unsupported_object_is_rejected() {
        let fixture = fixture();

        let create = Activity::new(new_activity_id(&service1()), ActivityKind::Create)
            .with_actor(service1())
            .with_to(service2())
            .with_object(ObjectProperty::from(
                Object::new().with_type(crate::vocab::TYPE_SERVICE),
            ));

        let err = fixture.handler.handle_activity(&create).await.unwrap_err();
        assert!(err
            .to_string()
            .contains("unsupported object type in 'Create' activity"));
    }

    #[tokio::test]
    async fn follow_accept() {
        let fixture = fixture();
        let mut rx = fixture.handler.subscribe();

        fixture
            .store
            .put_actor(&Object::service(service2()))
            .unwrap();
        fixture.follower_auth.with_accept();

        let follow = Activity::new(new_activity_id(&service2()), ActivityKind::Follow)
            .with_actor(service2())
            .with_to(service1())
            .with_object(ObjectProperty::Iri(service1()));

        fixture.handler.handle_activity(&follow).await.unwrap();

        expect_broadcast(&mut rx, &follow.id).await;

        let mut followers = fixture
            .store
            .get_references(ReferenceType::Follower, &service1())
            .unwrap();
        assert!(read_references(followers.as_mut(), usize::MAX)
            .unwrap()
            .contains(&service2()));
        assert_eq!(fixture.outbox.count_by_kind(ActivityKind::Accept), 1);

        // A repeated follow from an existing follower re-sends the
        // Accept.
        let follow = Activity::new(new_activity_id(&service2()), ActivityKind::Follow)
            .with_actor(service2())
            .with_to(service1())
            .with_object(ObjectProperty::Iri(service1()));

        fixture.handler.handle_activity(&follow).await.unwrap();

        expect_broadcast(&mut rx, &follow.id).await;
        assert_eq!(fixture.outbox.count_by_kind(ActivityKind::Accept), 2);
    }

    #[tokio::test]
    async fn follow_reject() {
        let fixture = fixture();
        let mut rx = fixture.handler.subscribe();

        fixture
            .store
            .put_actor(&Object::service(service3()))
            .unwrap();
        fixture.follower_auth.with_reject();

        let follow = Activity::new(new_activity_id(&service3()), ActivityKind::Follow)
            .with_actor(service3())
            .with_to(service1())
            .with_object(ObjectProperty::Iri(service1()));

        fixture.handler.handle_activity(&follow).await.unwrap();

        expect_no_broadcast(&mut rx).await;

        let mut followers = fixture
            .store
            .get_references(ReferenceType::Follower, &service1())
            .unwrap();
        assert!(!read_references(followers.as_mut(), usize::MAX)
            .unwrap()
            .contains(&service3()));
        assert_eq!(fixture.outbox.count_by_kind(ActivityKind::Reject), 1);
    }

    #[tokio::test]
    async fn follow_for_another_service_is_ignored() {
        let fixture = fixture();
        let mut rx = fixture.handler.subscribe();

        let follow = Activity::new(new_activity_id(&service2()), ActivityKind::Follow)
            .with_actor(service2())
            .with_to(service1())
            .with_object(ObjectProperty::Iri(service3()));

        fixture.handler.handle_activity(&follow).await.unwrap();

        expect_no_broadcast(&mut rx).await;
        assert_eq!(fixture.outbox.count_by_kind(ActivityKind::Accept), 0);
        assert_eq!(fixture.outbox.count_by_kind(ActivityKind::Reject), 0);
    }

    #[tokio::test]
    async fn follow_without_actor_is_rejected() {
        let fixture = fixture();

        let follow = Activity::new(new_activity_id(&service2()), ActivityKind::Follow)
            .with_to(service1())
            .with_object(ObjectProperty::Iri(service1()));

        let err = fixture.handler.handle_activity(&follow).await.unwrap_err();
        assert_eq!(
            err.to_string(),
            "validation error: no actor specified in 'Follow' activity"
        );
    }

    #[tokio::test]
    async fn follow_without_object_iri_is_rejected() {
        let fixture = fixture();

        let follow = Activity::new(new_activity_id(&service2()), ActivityKind::Follow)
            .with_actor(service2())
            .with_to(service1());

        let err = fixture.handler.handle_activity(&follow).await.unwrap_err();
        assert!(err
            .to_string()
            .contains("no IRI specified in 'object' field of the 'Follow' activity"));
    }

    #[tokio::test]
    async fn follow_from_unknown_actor_is_not_found() {
        let fixture = fixture();

        let follow = Activity::new(
            new_activity_id(&iri("http://localhost:8304/services/service4")),
            ActivityKind::Follow,
        )
        .with_actor(iri("http://localhost:8304/services/service4"))
        .with_to(service1())
        .with_object(ObjectProperty::Iri(service1()));

        let err = fixture.handler.handle_activity(&follow).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn follower_auth_error_is_propagated() {
        let fixture = fixture();

        fixture
            .store
            .put_actor(&Object::service(service3()))
            .unwrap();
        fixture.follower_auth.set_error(Some("injected authorize error"));

        let follow = Activity::new(new_activity_id(&service3()), ActivityKind::Follow)
            .with_actor(service3())
            .with_to(service1())
            .with_object(ObjectProperty::Iri(service1()));

        let err = fixture.handler.handle_activity(&follow).await.unwrap_err();
        assert!(err.to_string().contains("injected authorize error"));
    }

    /// Persist a Follow as if this service had posted it through its
    /// outbox.
    fn seed_outbound_follow(fixture: &Fixture, target: &Url) -> Activity {
        let follow = Activity::new(new_activity_id(&service1()), ActivityKind::Follow)
            .with_actor(service1())
            .with_to(target.clone())
            .with_object(ObjectProperty::Iri(target.clone()));

        fixture.store.put_activity(&follow).unwrap();
        fixture
            .store
            .add_reference(ReferenceType::Outbox, &service1(), &follow.id)
            .unwrap();

        follow
    }

    #[tokio::test]
    async fn accept_records_following() {
        let fixture = fixture();
        let mut rx = fixture.handler.subscribe();

        let follow = seed_outbound_follow(&fixture, &service2());

        let accept = Activity::new(new_activity_id(&service2()), ActivityKind::Accept)
            .with_actor(service2())
            .with_to(service1())
            .with_object(ObjectProperty::Iri(follow.id.clone()))
            .with_in_reply_to(follow.id.clone());

        fixture.handler.handle_activity(&accept).await.unwrap();

        expect_broadcast(&mut rx, &accept.id).await;

        let mut following = fixture
            .store
            .get_references(ReferenceType::Following, &service1())
            .unwrap();
        assert!(read_references(following.as_mut(), usize::MAX)
            .unwrap()
            .contains(&service2()));
    }

    #[tokio::test]
    async fn accept_of_foreign_follow_is_rejected() {
        let fixture = fixture();

        // A stored follow by some other actor must not satisfy the
        // reply validation.
        let follow = Activity::new(new_activity_id(&service3()), ActivityKind::Follow)
            .with_actor(service3())
            .with_to(service2())
            .with_object(ObjectProperty::Iri(service2()));
        fixture.store.put_activity(&follow).unwrap();

        let accept = Activity::new(new_activity_id(&service2()), ActivityKind::Accept)
            .with_actor(service2())
            .with_to(service1())
            .with_in_reply_to(follow.id.clone());

        let err = fixture.handler.handle_activity(&accept).await.unwrap_err();
        assert!(err.to_string().contains("not for this service"));
    }

    #[tokio::test]
    async fn accept_of_unknown_follow_is_not_found() {
        let fixture = fixture();

        // The reply references a Follow that does not exist at all.
        let accept = Activity::new(new_activity_id(&service2()), ActivityKind::Accept)
            .with_actor(service2())
            .with_to(service1())
            .with_in_reply_to(iri(
                "http://localhost:8301/services/service1/activities/never-sent",
            ));

        let err = fixture.handler.handle_activity(&accept).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn accept_of_unsent_follow_is_rejected() {
        let fixture = fixture();

        // A forged Follow naming this service as actor, planted in the
        // store but never posted through the outbox. An embedded copy
        // in the reply must not make it acceptable either.
        let forged = Activity::new(new_activity_id(&service1()), ActivityKind::Follow)
            .with_actor(service1())
            .with_to(service2())
            .with_object(ObjectProperty::Iri(service2()));
        fixture.store.put_activity(&forged).unwrap();

        let accept = Activity::new(new_activity_id(&service2()), ActivityKind::Accept)
            .with_actor(service2())
            .with_to(service1())
            .with_object(ObjectProperty::from(forged.clone()));

        let err = fixture.handler.handle_activity(&accept).await.unwrap_err();
        assert!(err.to_string().contains("was not sent by this service"));

        let mut following = fixture
            .store
            .get_references(ReferenceType::Following, &service1())
            .unwrap();
        assert!(read_references(following.as_mut(), usize::MAX)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn accept_from_wrong_actor_is_rejected() {
        let fixture = fixture();

        let follow = seed_outbound_follow(&fixture, &service2());

        // service3 replies to a Follow that targeted service2.
        let accept = Activity::new(new_activity_id(&service3()), ActivityKind::Accept)
            .with_actor(service3())
            .with_to(service1())
            .with_in_reply_to(follow.id.clone());

        let err = fixture.handler.handle_activity(&accept).await.unwrap_err();
        assert!(err.to_string().contains("not from the target"));
    }

    #[tokio::test]
    async fn reject_does_not_mutate_following() {
        let fixture = fixture();

        let follow = seed_outbound_follow(&fixture, &service2());

        let reject = Activity::new(new_activity_id(&service2()), ActivityKind::Reject)
            .with_actor(service2())
            .with_to(service1())
            .with_object(ObjectProperty::Iri(follow.id.clone()))
            .with_in_reply_to(follow.id.clone());

        fixture.handler.handle_activity(&reject).await.unwrap();

        let mut following = fixture
            .store
            .get_references(ReferenceType::Following, &service1())
            .unwrap();
        assert!(read_references(following.as_mut(), usize::MAX)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn reject_of_unsent_follow_is_rejected() {
        let fixture = fixture();

        let forged = Activity::new(new_activity_id(&service1()), ActivityKind::Follow)
            .with_actor(service1())
            .with_to(service2())
            .with_object(ObjectProperty::Iri(service2()));
        fixture.store.put_activity(&forged).unwrap();

        let reject = Activity::new(new_activity_id(&service2()), ActivityKind::Reject)
            .with_actor(service2())
            .with_to(service1())
            .with_in_reply_to(forged.id.clone());

        let err = fixture.handler.handle_activity(&reject).await.unwrap_err();
        assert!(err.to_string().contains("was not sent by this service"));
    }

    #[tokio::test]
    async fn announce_records_share() {
        let fixture = fixture();
        let mut rx = fixture.handler.subscribe();

        let reference = AnchorCredentialReference::new(
            iri("http://sally.example.com/transactions/bafkreihwsn"),
            CID,
        );
        let target = reference.id.clone();

        let announce = Activity::new(new_activity_id(&service2()), ActivityKind::Announce)
            .with_actor(service2())
            .with_to(service1())
            .with_object(ObjectProperty::from(reference));

        fixture.handler.handle_activity(&announce).await.unwrap();

        expect_broadcast(&mut rx, &announce.id).await;

        assert!(fixture.anchor_handler.credential(CID).is_some());

        let mut shares = fixture
            .store
            .get_references(ReferenceType::Share, &target)
            .unwrap();
        assert!(read_references(shares.as_mut(), usize::MAX)
            .unwrap()
            .contains(&announce.id));
    }

    #[tokio::test]
    async fn like_of_known_object_is_recorded() {
        let fixture = fixture();
        let mut rx = fixture.handler.subscribe();

        // A stored activity serves as the liked object.
        let create = Activity::new(new_activity_id(&service1()), ActivityKind::Create)
            .with_actor(service1())
            .with_to(service2())
            .with_object(ObjectProperty::from(anchor_credential()))
            .with_target(ObjectProperty::from(CasReference {
                id: CID.to_string(),
                types: crate::vocab::TYPE_CAS.into(),
            }));
        fixture.handler.handle_activity(&create).await.unwrap();
        let _ = rx.recv().await;

        let like = Activity::new(new_activity_id(&service2()), ActivityKind::Like)
            .with_actor(service2())
            .with_to(service1())
            .with_object(ObjectProperty::Iri(create.id.clone()));

        fixture.handler.handle_activity(&like).await.unwrap();

        expect_broadcast(&mut rx, &like.id).await;

        let mut likes = fixture
            .store
            .get_references(ReferenceType::Like, &create.id)
            .unwrap();
        assert!(read_references(likes.as_mut(), usize::MAX)
            .unwrap()
            .contains(&like.id));
    }

    #[tokio::test]
    async fn like_of_unknown_object_is_not_found() {
        let fixture = fixture();

        let like = Activity::new(new_activity_id(&service2()), ActivityKind::Like)
            .with_actor(service2())
            .with_to(service1())
            .with_object(ObjectProperty::Iri(iri(
                "http://localhost:8301/services/service1/activities/unknown",
            )));

        let err = fixture.handler.handle_activity(&like).await.unwrap_err();
        assert!(err.is_not_found());
    }

    #[tokio::test]
    async fn undo_follow_removes_follower() {
        let fixture = fixture();

        fixture
            .store
            .put_actor(&Object::service(service2()))
            .unwrap();
        fixture.follower_auth.with_accept();

        let follow = Activity::new(new_activity_id(&service2()), ActivityKind::Follow)
            .with_actor(service2())
            .with_to(service1())
            .with_object(ObjectProperty::Iri(service1()));
        fixture.handler.handle_activity(&follow).await.unwrap();

        let undo = Activity::new(new_activity_id(&service2()), ActivityKind::Undo)
            .with_actor(service2())
            .with_to(service1())
            .with_object(ObjectProperty::Iri(follow.id.clone()));
        fixture.handler.handle_activity(&undo).await.unwrap();

        let mut followers = fixture
            .store
            .get_references(ReferenceType::Follower, &service1())
            .unwrap();
        assert!(read_references(followers.as_mut(), usize::MAX)
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn undo_by_different_actor_is_rejected() {
        let fixture = fixture();

        fixture
            .store
            .put_actor(&Object::service(service2()))
            .unwrap();

        let follow = Activity::new(new_activity_id(&service2()), ActivityKind::Follow)
            .with_actor(service2())
            .with_to(service1())
            .with_object(ObjectProperty::Iri(service1()));
        fixture.handler.handle_activity(&follow).await.unwrap();

        let undo = Activity::new(new_activity_id(&service3()), ActivityKind::Undo)
            .with_actor(service3())
            .with_to(service1())
            .with_object(ObjectProperty::Iri(follow.id.clone()));

        let err = fixture.handler.handle_activity(&undo).await.unwrap_err();
        assert!(err.to_string().contains("not permitted"));
    }

    #[tokio::test]
    async fn duplicate_activity_is_silently_ignored() {
        let fixture = fixture();
        let mut rx = fixture.handler.subscribe();

        fixture
            .store
            .put_actor(&Object::service(service2()))
            .unwrap();

        let follow = Activity::new(new_activity_id(&service2()), ActivityKind::Follow)
            .with_actor(service2())
            .with_to(service1())
            .with_object(ObjectProperty::Iri(service1()));

        fixture.handler.handle_activity(&follow).await.unwrap();
        expect_broadcast(&mut rx, &follow.id).await;

        // Redelivery of the identical activity succeeds without a
        // second broadcast or a second Accept.
        fixture.handler.handle_activity(&follow).await.unwrap();
        expect_no_broadcast(&mut rx).await;
        assert_eq!(fixture.outbox.count_by_kind(ActivityKind::Accept), 1);
    }

    #[tokio::test]
    async fn duplicate_id_from_another_actor_is_rejected() {
        let fixture = fixture();

        fixture
            .store
            .put_actor(&Object::service(service2()))
            .unwrap();
        fixture
            .store
            .put_actor(&Object::service(service3()))
            .unwrap();

        let follow = Activity::new(new_activity_id(&service2()), ActivityKind::Follow)
            .with_actor(service2())
            .with_to(service1())
            .with_object(ObjectProperty::Iri(service1()));
        fixture.handler.handle_activity(&follow).await.unwrap();

        let mut squatted = follow.clone();
        squatted.actor = Some(service3());

        let err = fixture
            .handler
            .handle_activity(&squatted)
            .await
            .unwrap_err();
        assert!(err.to_string().contains("already in use"));
    }
}
