/*
    service.rs - Signature-gated authoring of messages and associations

    Write path: parse envelope -> verify signature over the raw bytes ->
    store commit (assigns id and cdate) -> fan-out to streams.

    Everything before the commit is all-or-nothing. Everything after it is
    best-effort and reported in the returned FanoutReport.
*/

use super::errors::{AuthoringError, AuthoringResult};
use super::fanout::{
    dedup_streams, fan_out, AssociationTargetPolicy, FanoutEvent, FanoutPolicy, FanoutReport,
};
use crate::config::AuthoringConfig;
use crate::core_model::{
    Association, AssociationDraft, Message, MessageDraft, MessageWithAssociations, ObjectId,
    ObjectKind, StoredObject, StreamAction,
};
use crate::core_signature::{SignatureVerifier, SignedPayload};
use crate::core_store::{ObjectStore, StoreError};
use crate::core_stream::StreamService;
use crate::metrics::{self as fed_metrics, OBJECTS_AUTHORED, OBJECTS_DELETED, SIGNATURE_REJECTS};
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Result of a write: the stored object plus per-stream delivery
#[derive(Debug, Clone, Serialize)]
pub struct Authored<T> {
    pub object: T,
    pub fanout: FanoutReport,
}

pub struct AuthoringService {
    store: Arc<dyn ObjectStore>,
    verifier: Arc<dyn SignatureVerifier>,
    streams: Arc<StreamService>,
    fanout_policy: FanoutPolicy,
    target_policy: AssociationTargetPolicy,
}

impl AuthoringService {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        verifier: Arc<dyn SignatureVerifier>,
        streams: Arc<StreamService>,
    ) -> Self {
        Self {
            store,
            verifier,
            streams,
            fanout_policy: FanoutPolicy::default(),
            target_policy: AssociationTargetPolicy::default(),
        }
    }

    pub fn with_config(self, config: &AuthoringConfig) -> Self {
        self.with_fanout_policy(config.fanout_policy())
            .with_target_policy(config.association_target)
    }

    pub fn with_fanout_policy(mut self, policy: FanoutPolicy) -> Self {
        self.fanout_policy = policy;
        self
    }

    pub fn with_target_policy(mut self, policy: AssociationTargetPolicy) -> Self {
        self.target_policy = policy;
        self
    }

    /// Parse the envelope and check the signature of its claimed signer
    fn verify(&self, raw_payload: &str, signature: &str) -> AuthoringResult<SignedPayload> {
        let payload = SignedPayload::parse(raw_payload)?;

        if let Err(e) = self
            .verifier
            .verify(raw_payload.as_bytes(), &payload.signer, signature)
        {
            warn!(signer = %payload.signer, error = %e, "Rejected authoring request");
            fed_metrics::record_counter(SIGNATURE_REJECTS, 1);
            return Err(e.into());
        }
        Ok(payload)
    }

    /// Verify, persist and fan out a message
    pub async fn post_message(
        &self,
        raw_payload: &str,
        signature: &str,
        target_streams: &[String],
    ) -> AuthoringResult<Authored<Message>> {
        if target_streams.iter().any(|s| s.is_empty()) {
            return Err(AuthoringError::ValidationFailure(
                "target stream ids must not be empty".to_string(),
            ));
        }
        let streams = dedup_streams(target_streams);
        let payload = self.verify(raw_payload, signature)?;

        let message = self
            .store
            .create_message(MessageDraft {
                author: payload.signer,
                schema: payload.schema,
                payload: raw_payload.to_string(),
                signature: signature.to_string(),
                streams,
            })
            .await?;
        fed_metrics::record_kind_counter(OBJECTS_AUTHORED, ObjectKind::Message.as_str());
        info!(id = %message.id, author = %message.author, streams = message.streams.len(), "Message authored");

        let fanout = fan_out(
            &self.streams,
            &self.fanout_policy,
            &message.streams,
            FanoutEvent {
                object_id: &message.id,
                kind: ObjectKind::Message,
                action: StreamAction::Create,
                author: &message.author,
            },
        )
        .await;

        Ok(Authored {
            object: message,
            fanout,
        })
    }

    /// Verify, persist and fan out an association. Fan-out goes to the
    /// streams recorded on the target object right now; the target may be a
    /// message or another association.
    pub async fn post_association(
        &self,
        raw_payload: &str,
        signature: &str,
        target: &ObjectId,
    ) -> AuthoringResult<Authored<Association>> {
        if target.as_str().is_empty() {
            return Err(AuthoringError::ValidationFailure(
                "association target must not be empty".to_string(),
            ));
        }
        let payload = self.verify(raw_payload, signature)?;
        if let Some(signed_target) = &payload.target {
            if signed_target != target.as_str() {
                return Err(AuthoringError::ValidationFailure(format!(
                    "signed target {} does not match requested target {}",
                    signed_target, target
                )));
            }
        }

        let streams = match self.get(target).await {
            Ok(object) => object.streams().to_vec(),
            Err(AuthoringError::NotFound(_)) => match self.target_policy {
                AssociationTargetPolicy::Unchecked => {
                    debug!(target = %target, "Association target not stored; no fan-out");
                    Vec::new()
                }
                AssociationTargetPolicy::RequireExisting => {
                    return Err(AuthoringError::NotFound(format!("target object {}", target)));
                }
            },
            Err(e) => return Err(e),
        };

        let association = self
            .store
            .create_association(AssociationDraft {
                author: payload.signer,
                schema: payload.schema,
                target: target.clone(),
                payload: raw_payload.to_string(),
                signature: signature.to_string(),
                streams,
            })
            .await?;
        fed_metrics::record_kind_counter(OBJECTS_AUTHORED, ObjectKind::Association.as_str());
        info!(id = %association.id, target = %association.target, "Association authored");

        let fanout = fan_out(
            &self.streams,
            &self.fanout_policy,
            &association.streams,
            FanoutEvent {
                object_id: &association.id,
                kind: ObjectKind::Association,
                action: StreamAction::Create,
                author: &association.author,
            },
        )
        .await;

        Ok(Authored {
            object: association,
            fanout,
        })
    }

    /// Remove a message or association, then post a delete event to every
    /// stream it was recorded in
    pub async fn delete(&self, id: &ObjectId) -> AuthoringResult<Authored<StoredObject>> {
        let removed: StoredObject = match self.store.delete_message(id).await {
            Ok(message) => message.into(),
            Err(StoreError::NotFound(_)) => self.store.delete_association(id).await?.into(),
            Err(e) => return Err(e.into()),
        };
        fed_metrics::record_kind_counter(OBJECTS_DELETED, removed.kind().as_str());
        info!(id = %id, kind = %removed.kind(), "Object deleted");

        let fanout = fan_out(
            &self.streams,
            &self.fanout_policy,
            removed.streams(),
            FanoutEvent {
                object_id: removed.id(),
                kind: removed.kind(),
                action: StreamAction::Delete,
                author: removed.author(),
            },
        )
        .await;

        Ok(Authored {
            object: removed,
            fanout,
        })
    }

    /// Message or association by id
    pub async fn get(&self, id: &ObjectId) -> AuthoringResult<StoredObject> {
        match self.store.get_message(id).await {
            Ok(message) => Ok(message.into()),
            Err(StoreError::NotFound(_)) => Ok(self.store.get_association(id).await?.into()),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn get_message_with_associations(
        &self,
        id: &ObjectId,
    ) -> AuthoringResult<MessageWithAssociations> {
        let message = self.store.get_message(id).await?;
        let associations = self.store.associations_for_target(id).await?;
        Ok(MessageWithAssociations {
            message,
            associations,
        })
    }

    pub async fn list_associations_by_author(
        &self,
        author: &str,
    ) -> AuthoringResult<Vec<Association>> {
        Ok(self.store.associations_by_author(author).await?)
    }

    pub async fn list_messages_since(
        &self,
        since: DateTime<Utc>,
        limit: usize,
    ) -> AuthoringResult<Vec<Message>> {
        Ok(self.store.list_messages_since(since, limit).await?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_model::EventBody;
    use crate::core_signature::{Ed25519Verifier, Keypair};
    use crate::core_store::SqlStore;
    use crate::core_stream::{BroadcastNotifier, MemoryStreamLog, StreamLog};

    struct Harness {
        service: AuthoringService,
        streams: Arc<StreamService>,
        keys: Keypair,
    }

    fn harness() -> Harness {
        let store = Arc::new(SqlStore::memory().unwrap());
        let log: Arc<dyn StreamLog> = Arc::new(MemoryStreamLog::new());
        let streams = Arc::new(StreamService::new(log, Arc::new(BroadcastNotifier::new(16))));
        let service = AuthoringService::new(store, Arc::new(Ed25519Verifier::new()), streams.clone())
            .with_fanout_policy(FanoutPolicy::no_retry());
        Harness {
            service,
            streams,
            keys: Keypair::generate(),
        }
    }

    fn signed(keys: &Keypair, extra: &str) -> (String, String) {
        let raw = format!(
            r#"{{"signer":"{}","schema":"https://schema.example/note","body":{{"text":"hi"}}{}}}"#,
            keys.signer_id(),
            extra
        );
        let sig = keys.sign_hex(raw.as_bytes());
        (raw, sig)
    }

    fn streams(ids: &[&str]) -> Vec<String> {
        ids.iter().map(|s| s.to_string()).collect()
    }

    #[tokio::test]
    async fn test_post_message_fans_out() {
        let h = harness();
        let (raw, sig) = signed(&h.keys, "");

        let authored = h
            .service
            .post_message(&raw, &sig, &streams(&["s1", "s2", "s1"]))
            .await
            .unwrap();
        assert!(authored.fanout.is_complete());
        assert_eq!(authored.fanout.delivered, vec!["s1", "s2"]);
        assert_eq!(authored.object.author, h.keys.signer_id());
        assert_eq!(authored.object.payload, raw);

        let s1 = h.streams.backlog("s1", None).collect_all().await.unwrap();
        assert_eq!(s1.len(), 1);
        assert_eq!(s1[0].object_id(), &authored.object.id);
    }

    #[tokio::test]
    async fn test_bad_signature_persists_nothing() {
        let h = harness();
        let (raw, _) = signed(&h.keys, "");
        let forged = Keypair::generate().sign_hex(raw.as_bytes());

        let err = h
            .service
            .post_message(&raw, &forged, &streams(&["s1"]))
            .await
            .unwrap_err();
        assert!(matches!(err, AuthoringError::InvalidSignature(_)));

        let all = h
            .service
            .list_messages_since(DateTime::<Utc>::default(), 10)
            .await
            .unwrap();
        assert!(all.is_empty());
        assert!(h.streams.backlog("s1", None).collect_all().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_malformed_inputs_are_validation_failures() {
        let h = harness();
        let (raw, sig) = signed(&h.keys, "");

        assert!(matches!(
            h.service.post_message("not json", &sig, &[]).await,
            Err(AuthoringError::ValidationFailure(_))
        ));
        assert!(matches!(
            h.service.post_message(&raw, "zz", &[]).await,
            Err(AuthoringError::ValidationFailure(_))
        ));
        assert!(matches!(
            h.service.post_message(&raw, &sig, &streams(&[""])).await,
            Err(AuthoringError::ValidationFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_association_follows_target_streams() {
        let h = harness();
        let (raw, sig) = signed(&h.keys, "");
        let message = h
            .service
            .post_message(&raw, &sig, &streams(&["s1", "s2"]))
            .await
            .unwrap()
            .object;

        let liker = Keypair::generate();
        let (raw, sig) = signed(&liker, &format!(r#","target":"{}""#, message.id));
        let association = h
            .service
            .post_association(&raw, &sig, &message.id)
            .await
            .unwrap();
        assert_eq!(association.fanout.delivered, vec!["s1", "s2"]);

        let s2 = h.streams.backlog("s2", None).collect_all().await.unwrap();
        assert_eq!(s2.len(), 2);
        assert_eq!(s2[1].kind, ObjectKind::Association);

        let joined = h
            .service
            .get_message_with_associations(&message.id)
            .await
            .unwrap();
        assert_eq!(joined.associations.len(), 1);

        let own = h
            .service
            .list_associations_by_author(&liker.signer_id())
            .await
            .unwrap();
        assert_eq!(own.len(), 1);
    }

    #[tokio::test]
    async fn test_get_returns_submitted_bytes() {
        let h = harness();
        // Key order and spacing a re-serializer would not preserve
        let raw = format!(
            r#"{{ "schema":"https://schema.example/note",  "signer":"{}", "body":{{"z":1,"a":2}} }}"#,
            h.keys.signer_id()
        );
        let sig = h.keys.sign_hex(raw.as_bytes());

        let posted = h
            .service
            .post_message(&raw, &sig, &streams(&["s1"]))
            .await
            .unwrap()
            .object;

        let fetched = h.service.get(&posted.id).await.unwrap();
        assert_eq!(fetched.kind(), ObjectKind::Message);
        assert_eq!(fetched.payload().as_bytes(), raw.as_bytes());
        assert_eq!(fetched.signature(), sig);
        assert_eq!(fetched.author(), h.keys.signer_id());
    }

    #[tokio::test]
    async fn test_tampered_association_persists_nothing() {
        let h = harness();
        let (raw, sig) = signed(&h.keys, "");
        let message = h
            .service
            .post_message(&raw, &sig, &streams(&["s1"]))
            .await
            .unwrap()
            .object;

        let liker = Keypair::generate();
        let (raw, sig) = signed(&liker, &format!(r#","target":"{}""#, message.id));
        let tampered = raw.replace("hi", "ho");

        let err = h
            .service
            .post_association(&tampered, &sig, &message.id)
            .await
            .unwrap_err();
        assert!(matches!(err, AuthoringError::InvalidSignature(_)));

        assert!(h
            .service
            .list_associations_by_author(&liker.signer_id())
            .await
            .unwrap()
            .is_empty());
        let joined = h
            .service
            .get_message_with_associations(&message.id)
            .await
            .unwrap();
        assert!(joined.associations.is_empty());
        assert_eq!(h.streams.backlog("s1", None).collect_all().await.unwrap().len(), 1);

        // The untampered association goes through and is readable by id
        let accepted = h
            .service
            .post_association(&raw, &sig, &message.id)
            .await
            .unwrap()
            .object;
        let fetched = h.service.get(&accepted.id).await.unwrap();
        assert_eq!(fetched.payload(), raw);
        assert_eq!(fetched.signature(), sig);

        h.service.delete(&accepted.id).await.unwrap();
        assert!(matches!(
            h.service.get(&accepted.id).await,
            Err(AuthoringError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_association_on_association() {
        let h = harness();
        let (raw, sig) = signed(&h.keys, "");
        let message = h
            .service
            .post_message(&raw, &sig, &streams(&["s1", "s2"]))
            .await
            .unwrap()
            .object;

        let strict = h
            .service
            .with_target_policy(AssociationTargetPolicy::RequireExisting);

        let (raw, sig) = signed(&h.keys, &format!(r#","target":"{}""#, message.id));
        let first = strict
            .post_association(&raw, &sig, &message.id)
            .await
            .unwrap()
            .object;

        let replier = Keypair::generate();
        let (raw, sig) = signed(&replier, &format!(r#","target":"{}""#, first.id));
        let second = strict
            .post_association(&raw, &sig, &first.id)
            .await
            .unwrap();
        assert_eq!(second.object.target, first.id);
        assert_eq!(second.object.streams, vec!["s1", "s2"]);
        assert_eq!(second.fanout.delivered, vec!["s1", "s2"]);

        let s1 = h.streams.backlog("s1", None).collect_all().await.unwrap();
        assert_eq!(s1.len(), 3);
        assert_eq!(s1[2].object_id(), &second.object.id);
    }

    #[tokio::test]
    async fn test_association_target_mismatch() {
        let h = harness();
        let (raw, sig) = signed(&h.keys, r#","target":"m-other""#);
        assert!(matches!(
            h.service
                .post_association(&raw, &sig, &ObjectId::new("m-1"))
                .await,
            Err(AuthoringError::ValidationFailure(_))
        ));
    }

    #[tokio::test]
    async fn test_missing_target_policies() {
        let h = harness();
        let (raw, sig) = signed(&h.keys, "");

        let unchecked = h
            .service
            .post_association(&raw, &sig, &ObjectId::new("missing"))
            .await
            .unwrap();
        assert!(unchecked.fanout.delivered.is_empty());

        let strict = h
            .service
            .with_target_policy(AssociationTargetPolicy::RequireExisting);
        assert!(matches!(
            strict
                .post_association(&raw, &sig, &ObjectId::new("missing"))
                .await,
            Err(AuthoringError::NotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_delete_posts_reference_events() {
        let h = harness();
        let (raw, sig) = signed(&h.keys, "");
        let message = h
            .service
            .post_message(&raw, &sig, &streams(&["a", "b"]))
            .await
            .unwrap()
            .object;

        let deleted = h.service.delete(&message.id).await.unwrap();
        assert_eq!(deleted.fanout.delivered, vec!["a", "b"]);
        assert!(matches!(deleted.object, StoredObject::Message(_)));

        for stream in ["a", "b"] {
            let events = h.streams.backlog(stream, None).collect_all().await.unwrap();
            assert_eq!(events.len(), 2);
            assert_eq!(events[1].action, StreamAction::Delete);
            assert!(matches!(events[1].body, EventBody::Reference(_)));
        }

        assert!(matches!(
            h.service.get(&message.id).await,
            Err(AuthoringError::NotFound(_))
        ));
        assert!(matches!(
            h.service.delete(&message.id).await,
            Err(AuthoringError::NotFound(_))
        ));
    }
}
