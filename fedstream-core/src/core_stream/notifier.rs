/*
    notifier.rs - Live per-stream notification channels

    Channels are created on first subscribe and dropped once a publish
    finds nobody listening. Delivery is best-effort: a subscriber that
    connects while a publish is in flight may miss that event, and a slow
    subscriber is told how far it lagged. Both recover from the backlog.
*/

use super::errors::{StreamError, StreamResult};
use crate::core_model::{OrderingKey, StreamEvent};
use async_trait::async_trait;
use std::collections::HashMap;
use tokio::sync::{broadcast, RwLock};
use tracing::debug;

/// Live fan-out to connected subscribers
#[async_trait]
pub trait StreamNotifier: Send + Sync {
    /// Deliver to current subscribers of `event.stream`; returns how many
    async fn publish(&self, event: &StreamEvent) -> StreamResult<usize>;

    async fn subscribe(&self, stream: &str) -> StreamResult<Subscription>;
}

/// Receiving end of one stream's live channel
pub struct Subscription {
    stream: String,
    rx: broadcast::Receiver<StreamEvent>,
    last_key: Option<OrderingKey>,
}

impl Subscription {
    pub fn new(stream: impl Into<String>, rx: broadcast::Receiver<StreamEvent>) -> Self {
        Self {
            stream: stream.into(),
            rx,
            last_key: None,
        }
    }

    pub fn stream(&self) -> &str {
        &self.stream
    }

    /// Key of the last event received, the resume point after a lag
    pub fn last_key(&self) -> Option<OrderingKey> {
        self.last_key
    }

    pub async fn recv(&mut self) -> StreamResult<StreamEvent> {
        match self.rx.recv().await {
            Ok(event) => {
                self.last_key = Some(event.key);
                Ok(event)
            }
            Err(broadcast::error::RecvError::Lagged(skipped)) => Err(StreamError::Lagged {
                stream: self.stream.clone(),
                skipped,
                resume_after: self.last_key,
            }),
            Err(broadcast::error::RecvError::Closed) => Err(StreamError::Closed(self.stream.clone())),
        }
    }

    /// Non-blocking receive; `None` when nothing is queued
    pub fn try_recv(&mut self) -> StreamResult<Option<StreamEvent>> {
        match self.rx.try_recv() {
            Ok(event) => {
                self.last_key = Some(event.key);
                Ok(Some(event))
            }
            Err(broadcast::error::TryRecvError::Empty) => Ok(None),
            Err(broadcast::error::TryRecvError::Lagged(skipped)) => Err(StreamError::Lagged {
                stream: self.stream.clone(),
                skipped,
                resume_after: self.last_key,
            }),
            Err(broadcast::error::TryRecvError::Closed) => {
                Err(StreamError::Closed(self.stream.clone()))
            }
        }
    }
}

/// In-process notifier on tokio broadcast channels, one per stream
pub struct BroadcastNotifier {
    channels: RwLock<HashMap<String, broadcast::Sender<StreamEvent>>>,
    capacity: usize,
}

impl BroadcastNotifier {
    /// `capacity` is how many undelivered events a subscriber may fall behind by
    pub fn new(capacity: usize) -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            capacity: capacity.max(1),
        }
    }

    /// Streams that currently have a live channel
    pub async fn active_streams(&self) -> usize {
        self.channels.read().await.len()
    }
}

impl Default for BroadcastNotifier {
    fn default() -> Self {
        Self::new(256)
    }
}

#[async_trait]
impl StreamNotifier for BroadcastNotifier {
    async fn publish(&self, event: &StreamEvent) -> StreamResult<usize> {
        let sent = {
            let channels = self.channels.read().await;
            match channels.get(&event.stream) {
                Some(tx) => tx.send(event.clone()),
                None => return Ok(0),
            }
        };

        match sent {
            Ok(receivers) => Ok(receivers),
            Err(_) => {
                // Everyone unsubscribed; drop the channel unless someone
                // subscribed in the meantime
                let mut channels = self.channels.write().await;
                if channels
                    .get(&event.stream)
                    .is_some_and(|tx| tx.receiver_count() == 0)
                {
                    channels.remove(&event.stream);
                    debug!(stream = %event.stream, "Dropped idle live channel");
                }
                Ok(0)
            }
        }
    }

    async fn subscribe(&self, stream: &str) -> StreamResult<Subscription> {
        if stream.is_empty() {
            return Err(StreamError::InvalidStream("stream id is empty".to_string()));
        }
        let mut channels = self.channels.write().await;
        let tx = channels
            .entry(stream.to_string())
            .or_insert_with(|| broadcast::channel(self.capacity).0);
        Ok(Subscription::new(stream, tx.subscribe()))
    }
}
