/*
    service.rs - Stream post, backlog and subscription entry points

    post() appends to the durable log first and publishes to the live
    channel second. The two steps are not atomic: an event can be durable
    but never delivered live, never the other way around. Only a failed
    append fails the call, so re-posting after an error cannot duplicate
    a delivered event.

    Before the first post the key generator is lifted past the newest key
    already in the log, so keys keep increasing across restarts.
*/

use super::errors::{StreamError, StreamResult};
use super::key::OrderingKeyGenerator;
use super::log::StreamLog;
use super::notifier::{StreamNotifier, Subscription};
use crate::config::StreamConfig;
use crate::core_model::{
    EventBody, ObjectId, ObjectKind, ObjectRef, OrderingKey, StreamAction, StreamElement,
    StreamEvent,
};
use crate::metrics::{self as fed_metrics, STREAM_POSTS, STREAM_POST_FAILURES};
use serde_json::Value;
use std::ops::Bound;
use std::sync::Arc;
use tokio::sync::OnceCell;
use tracing::{debug, error, warn};

/// Durable log plus live channel for every stream id
pub struct StreamService {
    log: Arc<dyn StreamLog>,
    notifier: Arc<dyn StreamNotifier>,
    keys: OrderingKeyGenerator,
    keys_seeded: OnceCell<()>,
    page_size: usize,
}

impl StreamService {
    pub fn new(log: Arc<dyn StreamLog>, notifier: Arc<dyn StreamNotifier>) -> Self {
        Self {
            log,
            notifier,
            keys: OrderingKeyGenerator::new(),
            keys_seeded: OnceCell::new(),
            page_size: StreamConfig::default().backlog_page_size,
        }
    }

    pub fn from_config(
        config: &StreamConfig,
        log: Arc<dyn StreamLog>,
        notifier: Arc<dyn StreamNotifier>,
    ) -> Self {
        Self::new(log, notifier).with_page_size(config.backlog_page_size)
    }

    pub fn with_page_size(mut self, page_size: usize) -> Self {
        self.page_size = page_size.max(1);
        self
    }

    async fn next_key(&self) -> StreamResult<OrderingKey> {
        self.keys_seeded
            .get_or_try_init(|| async {
                if let Some(last) = self.log.last_key().await? {
                    debug!(last = %last, "Resuming ordering keys after stored log");
                    self.keys.advance_past(last);
                }
                Ok::<(), StreamError>(())
            })
            .await?;
        Ok(self.keys.next_key())
    }

    /// Record one occurrence of `object_id` in `stream`.
    ///
    /// Create events carry the owner and optional metadata, delete events
    /// only the object id.
    pub async fn post(
        &self,
        stream: &str,
        object_id: &ObjectId,
        kind: ObjectKind,
        action: StreamAction,
        author: &str,
        meta: Option<Value>,
    ) -> StreamResult<StreamEvent> {
        if stream.is_empty() {
            return Err(StreamError::InvalidStream("stream id is empty".to_string()));
        }

        let body = match action {
            StreamAction::Create => EventBody::Element(StreamElement {
                id: object_id.clone(),
                owner: author.to_string(),
                meta,
            }),
            StreamAction::Delete => EventBody::Reference(ObjectRef {
                id: object_id.clone(),
            }),
        };
        let event = StreamEvent {
            stream: stream.to_string(),
            key: self.next_key().await?,
            kind,
            action,
            body,
            owner: author.to_string(),
        };

        if let Err(e) = self.log.append(&event).await {
            error!(stream = %stream, id = %object_id, error = %e, "Stream log append failed");
            fed_metrics::record_counter(STREAM_POST_FAILURES, 1);
            return Err(e);
        }
        fed_metrics::record_counter(STREAM_POSTS, 1);

        match self.notifier.publish(&event).await {
            Ok(receivers) => {
                debug!(stream = %stream, key = %event.key, action = %action, receivers, "Posted stream event");
            }
            Err(e) => {
                warn!(stream = %stream, key = %event.key, error = %e, "Live publish failed; event is in backlog");
            }
        }

        Ok(event)
    }

    /// Bounded range read of a stream's backlog, ascending
    pub async fn range(
        &self,
        stream: &str,
        from: Bound<OrderingKey>,
        to: Bound<OrderingKey>,
        limit: usize,
    ) -> StreamResult<Vec<StreamEvent>> {
        self.log.range(stream, from, to, limit).await
    }

    /// Paged reader over the backlog, starting after `after` (or from the
    /// beginning)
    pub fn backlog(&self, stream: &str, after: Option<OrderingKey>) -> BacklogCursor {
        BacklogCursor {
            log: self.log.clone(),
            stream: stream.to_string(),
            position: after,
            page_size: self.page_size,
            exhausted: false,
        }
    }

    pub async fn subscribe(&self, stream: &str) -> StreamResult<Subscription> {
        self.notifier.subscribe(stream).await
    }
}

/// Lazy, resumable backlog reader
///
/// Each page starts strictly after the last key returned. A cursor can be
/// rebuilt from [`BacklogCursor::position`] to resume later.
pub struct BacklogCursor {
    log: Arc<dyn StreamLog>,
    stream: String,
    position: Option<OrderingKey>,
    page_size: usize,
    exhausted: bool,
}

impl BacklogCursor {
    /// Last key returned so far
    pub fn position(&self) -> Option<OrderingKey> {
        self.position
    }

    /// Next page; empty once the end of the log is reached
    pub async fn next_page(&mut self) -> StreamResult<Vec<StreamEvent>> {
        if self.exhausted {
            return Ok(Vec::new());
        }

        let from = match self.position {
            Some(key) => Bound::Excluded(key),
            None => Bound::Unbounded,
        };
        let page = self
            .log
            .range(&self.stream, from, Bound::Unbounded, self.page_size)
            .await?;

        if page.len() < self.page_size {
            self.exhausted = true;
        }
        if let Some(last) = page.last() {
            self.position = Some(last.key);
        }
        Ok(page)
    }

    /// Drain every remaining page
    pub async fn collect_all(mut self) -> StreamResult<Vec<StreamEvent>> {
        let mut events = Vec::new();
        loop {
            let page = self.next_page().await?;
            if page.is_empty() {
                return Ok(events);
            }
            events.extend(page);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_stream::{BroadcastNotifier, MemoryStreamLog};
    use async_trait::async_trait;
    use proptest::prelude::*;

    fn service() -> StreamService {
        StreamService::new(
            Arc::new(MemoryStreamLog::new()),
            Arc::new(BroadcastNotifier::new(16)),
        )
    }

    async fn post_create(service: &StreamService, stream: &str, id: &str) -> StreamEvent {
        service
            .post(
                stream,
                &ObjectId::new(id),
                ObjectKind::Message,
                StreamAction::Create,
                "ab",
                None,
            )
            .await
            .unwrap()
    }

    #[tokio::test]
    async fn test_post_then_backlog_in_order() {
        let service = service();
        for i in 0..5 {
            post_create(&service, "s1", &format!("m-{}", i)).await;
        }

        let events = service.backlog("s1", None).collect_all().await.unwrap();
        let ids: Vec<&str> = events.iter().map(|e| e.object_id().as_str()).collect();
        assert_eq!(ids, vec!["m-0", "m-1", "m-2", "m-3", "m-4"]);
    }

    #[tokio::test]
    async fn test_keys_continue_after_restart() {
        use crate::core_store::SqlStore;
        use crate::core_stream::SqlStreamLog;

        let store = SqlStore::memory().unwrap();
        let log: Arc<dyn StreamLog> = Arc::new(SqlStreamLog::from_store(&store));
        let first = StreamService::new(log.clone(), Arc::new(BroadcastNotifier::new(16)));
        let mut ahead = post_create(&first, "s1", "m-0").await;

        // An entry written while the wall clock was further ahead
        ahead.key = OrderingKey::new(ahead.key.micros + 60_000_000, 7);
        ahead.stream = "s2".to_string();
        log.append(&ahead).await.unwrap();

        let restarted = StreamService::new(log, Arc::new(BroadcastNotifier::new(16)));
        let next = post_create(&restarted, "s1", "m-1").await;
        assert!(next.key > ahead.key);

        let ids: Vec<String> = restarted
            .backlog("s1", None)
            .collect_all()
            .await
            .unwrap()
            .iter()
            .map(|e| e.object_id().to_string())
            .collect();
        assert_eq!(ids, vec!["m-0", "m-1"]);
    }

    #[tokio::test]
    async fn test_event_bodies() {
        let service = service();
        let created = service
            .post(
                "s1",
                &ObjectId::new("m-1"),
                ObjectKind::Message,
                StreamAction::Create,
                "ab",
                Some(serde_json::json!({"lang": "en"})),
            )
            .await
            .unwrap();
        assert!(matches!(created.body, EventBody::Element(ref el) if el.owner == "ab"));

        let deleted = service
            .post(
                "s1",
                &ObjectId::new("m-1"),
                ObjectKind::Message,
                StreamAction::Delete,
                "ab",
                None,
            )
            .await
            .unwrap();
        assert_eq!(
            deleted.to_wire_json().unwrap(),
            r#"{"type":"message","action":"delete","body":{"id":"m-1"}}"#
        );
    }

    #[tokio::test]
    async fn test_backlog_pages_and_resume() {
        let service = service().with_page_size(2);
        for i in 0..5 {
            post_create(&service, "s1", &format!("m-{}", i)).await;
        }

        let mut cursor = service.backlog("s1", None);
        assert_eq!(cursor.next_page().await.unwrap().len(), 2);
        let resume_at = cursor.position();

        let rest = service.backlog("s1", resume_at).collect_all().await.unwrap();
        assert_eq!(rest.len(), 3);
        assert_eq!(rest[0].object_id().as_str(), "m-2");
    }

    #[tokio::test]
    async fn test_live_subscriber_receives_post() {
        let service = service();
        let mut sub = service.subscribe("s1").await.unwrap();

        let posted = post_create(&service, "s1", "m-1").await;
        let received = sub.recv().await.unwrap();
        assert_eq!(received, posted);
    }

    #[tokio::test]
    async fn test_empty_stream_rejected() {
        let service = service();
        let result = service
            .post(
                "",
                &ObjectId::new("m-1"),
                ObjectKind::Message,
                StreamAction::Create,
                "ab",
                None,
            )
            .await;
        assert!(matches!(result, Err(StreamError::InvalidStream(_))));
    }

    struct BrokenLog;

    #[async_trait]
    impl StreamLog for BrokenLog {
        async fn append(&self, _event: &StreamEvent) -> StreamResult<()> {
            Err(StreamError::Log("disk full".to_string()))
        }

        async fn range(
            &self,
            _stream: &str,
            _from: Bound<OrderingKey>,
            _to: Bound<OrderingKey>,
            _limit: usize,
        ) -> StreamResult<Vec<StreamEvent>> {
            Ok(Vec::new())
        }
    }

    #[tokio::test]
    async fn test_append_failure_delivers_nothing() {
        let notifier = Arc::new(BroadcastNotifier::new(16));
        let service = StreamService::new(Arc::new(BrokenLog), notifier.clone());
        let mut sub = service.subscribe("s1").await.unwrap();

        let result = service
            .post(
                "s1",
                &ObjectId::new("m-1"),
                ObjectKind::Message,
                StreamAction::Create,
                "ab",
                None,
            )
            .await;
        assert!(matches!(result, Err(StreamError::Log(_))));
        assert!(sub.try_recv().unwrap().is_none());
    }

    struct BrokenNotifier;

    #[async_trait]
    impl StreamNotifier for BrokenNotifier {
        async fn publish(&self, _event: &StreamEvent) -> StreamResult<usize> {
            Err(StreamError::Notify("connection reset".to_string()))
        }

        async fn subscribe(&self, _stream: &str) -> StreamResult<Subscription> {
            Err(StreamError::Notify("connection reset".to_string()))
        }
    }

    #[tokio::test]
    async fn test_publish_failure_keeps_event_durable() {
        let service = StreamService::new(Arc::new(MemoryStreamLog::new()), Arc::new(BrokenNotifier));
        let posted = post_create(&service, "s1", "m-1").await;

        let backlog = service.backlog("s1", None).collect_all().await.unwrap();
        assert_eq!(backlog, vec![posted]);
    }

    proptest! {
        #[test]
        fn prop_backlog_preserves_post_order(streams in proptest::collection::vec(0u8..3, 1..40)) {
            let rt = tokio::runtime::Builder::new_current_thread().enable_all().build().unwrap();
            rt.block_on(async {
                let service = service().with_page_size(7);
                let mut expected: [Vec<String>; 3] = Default::default();
                for (i, s) in streams.iter().enumerate() {
                    let id = format!("m-{}", i);
                    post_create(&service, &format!("s{}", s), &id).await;
                    expected[*s as usize].push(id);
                }
                for (s, ids) in expected.iter().enumerate() {
                    let events = service.backlog(&format!("s{}", s), None).collect_all().await.unwrap();
                    let got: Vec<String> = events.iter().map(|e| e.object_id().to_string()).collect();
                    prop_assert_eq!(&got, ids);
                }
                Ok::<(), TestCaseError>(())
            })?;
        }
    }
}
