/*
    sync.rs - Pull-based registry replication

    Each round, for every configured peer:
    1. read the stored cursor (epoch if the peer was never synced)
    2. ask the peer for everything modified after the cursor
    3. apply each record through EntityRegistry::apply_remote
    4. advance the cursor to the largest modified_at seen

    A missed round only makes the next response larger. Re-applying a
    record is a no-op, so overlapping or repeated rounds are harmless.
*/

use super::errors::{FederationError, FederationResult};
use super::registry::{ApplyOutcome, EntityRegistry};
use crate::config::FederationConfig;
use crate::core_model::SafeEntity;
use crate::metrics::{self as fed_metrics, ENTITIES_SYNCED, PEER_SYNC_FAILURES};
use crate::shutdown::ShutdownListener;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

/// Read side of a peer's registry
#[async_trait]
pub trait PeerClient: Send + Sync {
    /// The peer's `list_modified(since)`
    async fn list_modified(
        &self,
        peer: &str,
        since: DateTime<Utc>,
    ) -> FederationResult<Vec<SafeEntity>>;
}

/// Serves registries living in the same process, keyed by host
#[derive(Default)]
pub struct LocalPeerClient {
    registries: RwLock<HashMap<String, Arc<EntityRegistry>>>,
}

impl LocalPeerClient {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn register(&self, registry: Arc<EntityRegistry>) {
        let host = registry.host().to_string();
        self.registries.write().await.insert(host, registry);
    }

    pub async fn unregister(&self, host: &str) {
        self.registries.write().await.remove(host);
    }
}

#[async_trait]
impl PeerClient for LocalPeerClient {
    async fn list_modified(
        &self,
        peer: &str,
        since: DateTime<Utc>,
    ) -> FederationResult<Vec<SafeEntity>> {
        let registry = self
            .registries
            .read()
            .await
            .get(peer)
            .cloned()
            .ok_or_else(|| FederationError::PeerUnavailable {
                peer: peer.to_string(),
                reason: "not registered".to_string(),
            })?;
        registry.list_modified(since).await
    }
}

/// Outcome of one peer pull
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct SyncReport {
    pub peer: String,
    pub fetched: usize,
    pub inserted: usize,
    pub updated: usize,
    pub unchanged: usize,
    pub skipped: usize,
    /// Cursor after the pull
    pub cursor: Option<DateTime<Utc>>,
}

/// Outcome of one round over all peers
#[derive(Debug, Default)]
pub struct SyncRound {
    pub reports: Vec<SyncReport>,
    pub failures: Vec<(String, FederationError)>,
}

pub struct SyncWorker {
    registry: Arc<EntityRegistry>,
    client: Arc<dyn PeerClient>,
    peers: Vec<String>,
    interval: Duration,
}

impl SyncWorker {
    pub fn new(
        registry: Arc<EntityRegistry>,
        client: Arc<dyn PeerClient>,
        peers: Vec<String>,
        interval: Duration,
    ) -> Self {
        Self {
            registry,
            client,
            peers,
            interval,
        }
    }

    pub fn from_config(
        config: &FederationConfig,
        registry: Arc<EntityRegistry>,
        client: Arc<dyn PeerClient>,
    ) -> Self {
        Self::new(registry, client, config.peers.clone(), config.sync_interval)
    }

    pub fn peers(&self) -> &[String] {
        &self.peers
    }

    /// Pull and apply everything `peer` changed since the last pull
    pub async fn sync_peer(&self, peer: &str) -> FederationResult<SyncReport> {
        let since = self.registry.peer_cursor(peer).await?.unwrap_or_default();
        let records = self.client.list_modified(peer, since).await?;

        let mut report = SyncReport {
            peer: peer.to_string(),
            fetched: records.len(),
            ..SyncReport::default()
        };
        let mut cursor: Option<DateTime<Utc>> = None;

        for record in &records {
            let outcome = match self.registry.apply_remote(peer, record).await {
                Ok(outcome) => outcome,
                Err(e) => {
                    // Keep what was applied so far; the rest comes next round
                    if let Some(at) = cursor {
                        self.registry.set_peer_cursor(peer, at).await?;
                    }
                    return Err(e);
                }
            };
            match outcome {
                ApplyOutcome::Inserted => report.inserted += 1,
                ApplyOutcome::Updated => report.updated += 1,
                ApplyOutcome::Unchanged => report.unchanged += 1,
                ApplyOutcome::Skipped => report.skipped += 1,
            }
            cursor = Some(cursor.map_or(record.modified_at, |c| c.max(record.modified_at)));
        }

        if let Some(at) = cursor {
            if at > since {
                self.registry.set_peer_cursor(peer, at).await?;
            }
        }
        report.cursor = Some(cursor.map_or(since, |c| c.max(since)));

        let applied = (report.inserted + report.updated) as u64;
        if applied > 0 {
            fed_metrics::record_counter(ENTITIES_SYNCED, applied);
        }
        debug!(
            peer = %peer,
            fetched = report.fetched,
            inserted = report.inserted,
            updated = report.updated,
            "Peer sync complete"
        );
        Ok(report)
    }

    /// One round over every configured peer. A failing peer is logged and
    /// does not stop the others.
    pub async fn sync_all(&self) -> SyncRound {
        let mut round = SyncRound::default();
        for peer in &self.peers {
            match self.sync_peer(peer).await {
                Ok(report) => round.reports.push(report),
                Err(e) => {
                    warn!(peer = %peer, error = %e, "Peer sync failed");
                    fed_metrics::record_counter(PEER_SYNC_FAILURES, 1);
                    round.failures.push((peer.clone(), e));
                }
            }
        }
        round
    }

    /// Sync every `interval` until shutdown is requested
    pub async fn run(self: Arc<Self>, mut shutdown: ShutdownListener) {
        info!(peers = self.peers.len(), interval = ?self.interval, "Starting federation sync");
        let mut ticker = tokio::time::interval(self.interval.max(Duration::from_millis(1)));
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let round = self.sync_all().await;
                    if !round.failures.is_empty() {
                        error!(failed = round.failures.len(), "Sync round finished with failures");
                    }
                }
                signal = shutdown.recv() => {
                    info!(?signal, "Stopping federation sync");
                    break;
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_model::Entity;
    use crate::core_store::SqlStore;
    use crate::shutdown::ShutdownCoordinator;
    use serde_json::json;

    fn registry(host: &str) -> Arc<EntityRegistry> {
        Arc::new(EntityRegistry::new(Arc::new(SqlStore::memory().unwrap()), host))
    }

    #[tokio::test]
    async fn test_sync_peer_pulls_and_advances_cursor() {
        let a = registry("a.example");
        let b = registry("b.example");
        b.create(&Entity::local("bob")).await.unwrap();
        b.create(&Entity::local("carol")).await.unwrap();

        let client = Arc::new(LocalPeerClient::new());
        client.register(b.clone()).await;
        let worker = SyncWorker::new(a.clone(), client, vec!["b.example".into()], Duration::from_secs(60));

        let report = worker.sync_peer("b.example").await.unwrap();
        assert_eq!(report.fetched, 2);
        assert_eq!(report.inserted, 2);
        assert_eq!(a.get("bob").await.unwrap().host, "b.example");

        let cursor = a.peer_cursor("b.example").await.unwrap().unwrap();
        assert_eq!(cursor, b.get("carol").await.unwrap().modified_at);

        // Nothing new
        let again = worker.sync_peer("b.example").await.unwrap();
        assert_eq!(again.fetched, 0);

        // Only the change comes back
        b.update(&Entity::local("bob").with_meta(json!({"v": 2})))
            .await
            .unwrap();
        let delta = worker.sync_peer("b.example").await.unwrap();
        assert_eq!(delta.fetched, 1);
        assert_eq!(delta.updated, 1);
        assert_eq!(a.get("bob").await.unwrap().meta["v"], 2);
    }

    #[tokio::test]
    async fn test_sync_all_continues_past_failing_peer() {
        let a = registry("a.example");
        let b = registry("b.example");
        b.create(&Entity::local("bob")).await.unwrap();

        let client = Arc::new(LocalPeerClient::new());
        client.register(b).await;
        let worker = SyncWorker::new(
            a.clone(),
            client,
            vec!["down.example".into(), "b.example".into()],
            Duration::from_secs(60),
        );

        let round = worker.sync_all().await;
        assert_eq!(round.failures.len(), 1);
        assert!(matches!(
            round.failures[0].1,
            FederationError::PeerUnavailable { .. }
        ));
        assert_eq!(round.reports.len(), 1);
        assert!(a.get("bob").await.is_ok());
    }

    #[tokio::test]
    async fn test_mutual_sync_settles() {
        let a = registry("a.example");
        let b = registry("b.example");
        a.create(&Entity::local("alice")).await.unwrap();
        b.create(&Entity::local("bob")).await.unwrap();

        let client = Arc::new(LocalPeerClient::new());
        client.register(a.clone()).await;
        client.register(b.clone()).await;
        let a_worker = SyncWorker::new(a.clone(), client.clone(), vec!["b.example".into()], Duration::from_secs(60));
        let b_worker = SyncWorker::new(b.clone(), client, vec!["a.example".into()], Duration::from_secs(60));

        for _ in 0..3 {
            a_worker.sync_all().await;
            b_worker.sync_all().await;
        }

        assert!(a.get("alice").await.unwrap().is_local());
        assert_eq!(a.get("bob").await.unwrap().host, "b.example");
        assert_eq!(b.get("alice").await.unwrap().host, "a.example");

        let a_round = a_worker.sync_peer("b.example").await.unwrap();
        assert_eq!(a_round.inserted + a_round.updated, 0);
    }

    #[tokio::test]
    async fn test_run_stops_on_shutdown() {
        let a = registry("a.example");
        let worker = Arc::new(SyncWorker::new(
            a,
            Arc::new(LocalPeerClient::new()),
            Vec::new(),
            Duration::from_millis(5),
        ));
        let coordinator = ShutdownCoordinator::new(Duration::from_millis(1));

        let handle = tokio::spawn(worker.run(coordinator.listener()));
        tokio::time::sleep(Duration::from_millis(20)).await;
        coordinator.shutdown().await;

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
    }
}
