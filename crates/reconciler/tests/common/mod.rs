//! Shared fixture for the reconciler integration tests.
//!
//! The cluster starts with a bound claim `default/data` on a 10 GiB CSI
//! volume, a storage class `fast` provisioned by [`DRIVER`], and a default
//! snapshot class `gold` with deletion policy `Delete`. Every sync helper
//! refreshes the reconciler's cache from the cluster first, as a watch
//! would between two deliveries of a key.

#![allow(clippy::unwrap_used)]
#![allow(clippy::expect_used)]
#![allow(clippy::panic)]
#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tracing_subscriber::layer::SubscriberExt;
use tracing_subscriber::util::SubscriberInitExt;
use vsnap_core::constants::GIB;
use vsnap_core::{
    ApiClient, DeletionPolicy, EventRecorder, InMemoryCluster, InMemoryEventRecorder, JournalEntry,
    ObjectCache, PersistentVolume, PersistentVolumeClaim, ResourceKind, StorageClass, Verb,
    VolumeSnapshot, VolumeSnapshotClass, VolumeSnapshotContent, VolumeSnapshotContentStatus,
};
use vsnap_reconciler::{Reconciler, ReconcilerConfig, Result, RetryPolicy};

pub const DRIVER: &str = "csi.example.com";
pub const NAMESPACE: &str = "default";
pub const CLAIM: &str = "data";
pub const VOLUME_HANDLE: &str = "vol-data";

/// Install a test-writer subscriber once per test binary.
pub fn init_tracing() {
    let _ = tracing_subscriber::registry()
        .with(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "vsnap_reconciler=debug".into()),
        )
        .with(tracing_subscriber::fmt::layer().with_test_writer())
        .try_init();
}

/// Configuration with retries short enough for tests.
pub fn test_config() -> ReconcilerConfig {
    ReconcilerConfig::default()
        .retry(RetryPolicy::new(3, Duration::from_millis(1)))
        .workers(2)
        .resync_period(Duration::from_millis(20))
        .requeue_delay(Duration::from_millis(5))
}

pub struct Env {
    pub cluster: Arc<InMemoryCluster>,
    pub recorder: Arc<InMemoryEventRecorder>,
    pub reconciler: Reconciler,
}

impl Env {
    pub async fn new() -> Self {
        init_tracing();
        let cluster = Arc::new(InMemoryCluster::new());
        seed_storage(&cluster).await;
        let recorder = InMemoryEventRecorder::new_arc();
        let reconciler = reconciler_for(&cluster, &recorder);
        let env = Self {
            cluster,
            recorder,
            reconciler,
        };
        env.refresh().await;
        env
    }

    /// Mirror the cluster into the reconciler's cache.
    pub async fn refresh(&self) {
        self.cluster
            .sync_cache(self.reconciler.cache())
            .await
            .expect("cache refresh");
    }

    pub async fn seed_snapshot(&self, snapshot: VolumeSnapshot) -> VolumeSnapshot {
        let stored = self.cluster.seed(snapshot).await.expect("seed snapshot");
        self.refresh().await;
        stored
    }

    pub async fn seed_content(&self, content: VolumeSnapshotContent) -> VolumeSnapshotContent {
        let stored = self.cluster.seed(content).await.expect("seed content");
        self.refresh().await;
        stored
    }

    pub async fn sync_snapshot(&self, key: &str) -> Result<()> {
        self.refresh().await;
        self.reconciler.sync_snapshot_by_key(key).await
    }

    pub async fn sync_content(&self, name: &str) -> Result<()> {
        self.refresh().await;
        self.reconciler.sync_content_by_key(name).await
    }

    /// Sync the snapshot and every content, `rounds` times over.
    pub async fn converge(&self, key: &str, rounds: usize) {
        for _ in 0..rounds {
            let _ = self.sync_snapshot(key).await;
            for content in self.cluster.list::<VolumeSnapshotContent>().await {
                let _ = self.sync_content(&content.metadata.name).await;
            }
        }
    }

    pub async fn snapshot(&self, key: &str) -> Option<VolumeSnapshot> {
        self.cluster.get::<VolumeSnapshot>(key).await
    }

    pub async fn content(&self, name: &str) -> Option<VolumeSnapshotContent> {
        self.cluster.get::<VolumeSnapshotContent>(name).await
    }

    /// Act as the storage agent: the snapshot was cut and is `size` bytes.
    pub async fn report_ready(&self, content: &str, size: u64) {
        self.cluster
            .modify::<VolumeSnapshotContent>(content, |c| {
                c.status = Some(VolumeSnapshotContentStatus {
                    snapshot_handle: Some(format!("snap-{}", c.metadata.name)),
                    creation_time: Some(Utc::now()),
                    restore_size: Some(size),
                    ready_to_use: Some(true),
                    error: None,
                });
            })
            .await
            .expect("report ready");
    }

    /// Act as the storage agent: the backend snapshot is gone.
    pub async fn release_content(&self, content: &str) {
        self.cluster
            .modify::<VolumeSnapshotContent>(content, |c| c.metadata.finalizers.clear())
            .await
            .expect("release content");
    }

    pub fn writes_to(&self, kind: ResourceKind, verb: Verb, since: usize) -> Vec<JournalEntry> {
        self.cluster
            .writes_since(since)
            .into_iter()
            .filter(|entry| entry.kind == kind && entry.verb == verb)
            .collect()
    }
}

pub async fn seed_storage(cluster: &InMemoryCluster) {
    cluster
        .seed(PersistentVolumeClaim::bound(NAMESPACE, CLAIM, "pv-data").with_storage_class("fast"))
        .await
        .expect("seed claim");
    cluster
        .seed(PersistentVolume::csi("pv-data", DRIVER, VOLUME_HANDLE, 10 * GIB))
        .await
        .expect("seed volume");
    cluster
        .seed(StorageClass::new("fast", DRIVER))
        .await
        .expect("seed storage class");
    cluster
        .seed(VolumeSnapshotClass::new("gold", DRIVER, DeletionPolicy::Delete).as_default())
        .await
        .expect("seed snapshot class");
}

/// A reconciler over `cluster` with its own, empty cache.
pub fn reconciler_for(
    cluster: &Arc<InMemoryCluster>,
    recorder: &Arc<InMemoryEventRecorder>,
) -> Reconciler {
    Reconciler::builder()
        .with_client(Arc::clone(cluster) as Arc<dyn ApiClient>)
        .with_cache(ObjectCache::new())
        .with_recorder(Arc::clone(recorder) as Arc<dyn EventRecorder>)
        .with_config(test_config())
        .build()
        .expect("build reconciler")
}

/// Every content bound by UID has at most one live snapshot with that UID.
pub async fn assert_uid_invariant(cluster: &InMemoryCluster) {
    let snapshots = cluster.list::<VolumeSnapshot>().await;
    for content in cluster.list::<VolumeSnapshotContent>().await {
        let Some(uid) = content.bound_uid() else {
            continue;
        };
        let holders = snapshots
            .iter()
            .filter(|s| s.uid() == uid && !s.metadata.is_being_deleted())
            .count();
        assert!(
            holders <= 1,
            "content {} is held by {holders} live snapshots",
            content.metadata.name
        );
    }
}
