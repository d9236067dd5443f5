use crate::blob::BlobStore;
use crate::captcha::CaptchaStore;
use crate::store::ObjectStore;
use std::collections::HashSet;
use std::io;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};

/// Outcome of one sweep
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct SweepReport {
    pub evicted: usize,
    pub bytes_freed: u64,
    /// Locations whose deletion failed during this sweep
    pub leaked: usize,
    /// Previously leaked locations deleted during this sweep
    pub recovered: usize,
    pub captchas_purged: usize,
}

/// Reclaims expired objects: drops them from the index, then deletes their
/// backing bytes outside the store lock.
pub struct Sweeper {
    store: Arc<ObjectStore>,
    blobs: Arc<dyn BlobStore>,
    captcha: Option<Arc<CaptchaStore>>,
    ttl: Duration,
    /// Locations evicted from the index whose bytes could not be deleted yet
    leaks: HashSet<String>,
}

impl Sweeper {
    pub fn new(store: Arc<ObjectStore>, blobs: Arc<dyn BlobStore>, ttl: Duration) -> Self {
        Self {
            store,
            blobs,
            captcha: None,
            ttl,
            leaks: HashSet::new(),
        }
    }

    pub fn with_captcha(mut self, captcha: Arc<CaptchaStore>) -> Self {
        self.captcha = Some(captcha);
        self
    }

    pub fn leaked(&self) -> impl Iterator<Item = &str> {
        self.leaks.iter().map(String::as_str)
    }

    /// Runs one sweep as of `now` (unix seconds).
    pub async fn sweep(&mut self, now: i64) -> SweepReport {
        let mut report = SweepReport::default();

        let pending: Vec<String> = self.leaks.drain().collect();
        for location in pending {
            if self.delete(&location).await {
                tracing::info!(id = %location, "Reclaimed previously leaked object");
                report.recovered += 1;
            } else {
                self.leaks.insert(location);
            }
        }

        let expired = self.store.evict_expired(now, self.ttl);
        for record in expired {
            report.evicted += 1;
            report.bytes_freed += record.size_bytes;

            if !self.delete(&record.id).await {
                report.leaked += 1;
                self.leaks.insert(record.id);
            }
        }

        if let Some(captcha) = &self.captcha {
            report.captchas_purged = captcha.purge_expired(now);
        }

        report
    }

    /// Deletes one location. Returns false if the bytes may still be there.
    async fn delete(&self, location: &str) -> bool {
        match self.blobs.delete_all(location).await {
            Ok(()) => true,
            Err(e) if e.kind() == io::ErrorKind::NotFound => {
                tracing::warn!(id = %location, "Expired object was already gone from storage");
                true
            }
            Err(e) => {
                tracing::error!(
                    id = %location,
                    error = %e,
                    "Failed to delete expired object, will retry"
                );
                false
            }
        }
    }

    /// Starts the periodic sweep on the tokio runtime.
    ///
    /// The task runs until [`SweeperHandle::shutdown`] is called or the
    /// handle is dropped.
    pub fn spawn(mut self, interval: Duration) -> SweeperHandle {
        let (shutdown, mut shutdown_rx) = watch::channel(false);

        let task = tokio::spawn(async move {
            let mut ticker = time::interval(interval);
            ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

            tracing::info!(
                interval_secs = interval.as_secs(),
                ttl_secs = self.ttl.as_secs(),
                "🧹 Starting sweeper"
            );

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        let report = self.sweep(chrono::Utc::now().timestamp()).await;
                        if report.evicted > 0 || report.recovered > 0 {
                            tracing::info!(
                                evicted = report.evicted,
                                bytes_freed = report.bytes_freed,
                                leaked = report.leaked,
                                recovered = report.recovered,
                                "🗑️  Swept expired objects"
                            );
                        }
                        if !self.leaks.is_empty() {
                            tracing::warn!(
                                pending = self.leaks.len(),
                                "Objects awaiting deletion retry"
                            );
                        }
                    }
                    _ = shutdown_rx.changed() => {
                        tracing::info!("Sweeper stopped");
                        break;
                    }
                }
            }
        });

        SweeperHandle { shutdown, task }
    }
}

pub struct SweeperHandle {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

impl SweeperHandle {
    /// Stops the sweeper and waits for an in-progress sweep to finish.
    pub async fn shutdown(self) {
        let _ = self.shutdown.send(true);
        if let Err(e) = self.task.await {
            tracing::error!("Sweeper task failed: {}", e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::blob::FsBlobStore;
    use crate::store::ObjectRecord;
    use async_trait::async_trait;
    use std::sync::Mutex;

    const TTL: Duration = Duration::from_secs(60);

    /// Records deletions and fails the ones it is told to
    #[derive(Default)]
    struct ScriptedBlobs {
        failing: Mutex<HashSet<String>>,
        missing: HashSet<String>,
        deleted: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl BlobStore for ScriptedBlobs {
        async fn create(&self, _location: &str) -> io::Result<()> {
            Ok(())
        }

        async fn write(&self, _location: &str, _filename: &str, _data: &[u8]) -> io::Result<()> {
            Ok(())
        }

        async fn delete_all(&self, location: &str) -> io::Result<()> {
            if self.failing.lock().unwrap().contains(location) {
                return Err(io::Error::new(io::ErrorKind::PermissionDenied, "busy"));
            }
            if self.missing.contains(location) {
                return Err(io::ErrorKind::NotFound.into());
            }
            self.deleted.lock().unwrap().push(location.to_string());
            Ok(())
        }

        async fn purge_all(&self) -> io::Result<usize> {
            Ok(0)
        }
    }

    fn seeded_store() -> Arc<ObjectStore> {
        let store = Arc::new(ObjectStore::new(1_000));
        store.admit(ObjectRecord::new("old", "a", 10, 0)).unwrap();
        store.admit(ObjectRecord::new("stuck", "b", 20, 0)).unwrap();
        store.admit(ObjectRecord::new("new", "c", 30, 100)).unwrap();
        store
    }

    #[tokio::test]
    async fn sweep_deletes_bytes_of_expired_objects() {
        let dir = tempfile::tempdir().unwrap();
        let blobs = Arc::new(FsBlobStore::new(dir.path()));
        let store = Arc::new(ObjectStore::new(1_000));

        for (id, created_at) in [("expired", 0), ("live", 50)] {
            blobs.create(id).await.unwrap();
            blobs.write(id, "f.txt", b"payload").await.unwrap();
            store.admit(ObjectRecord::new(id, "f.txt", 7, created_at)).unwrap();
        }

        let mut sweeper = Sweeper::new(store.clone(), blobs, TTL);
        let report = sweeper.sweep(60).await;

        assert_eq!(report.evicted, 1);
        assert_eq!(report.bytes_freed, 7);
        assert!(!dir.path().join("expired").exists());
        assert!(dir.path().join("live").join("f.txt").exists());
        assert_eq!(store.used_bytes(), 7);
    }

    #[tokio::test]
    async fn failed_delete_does_not_stop_the_sweep() {
        let blobs = Arc::new(ScriptedBlobs::default());
        blobs.failing.lock().unwrap().insert("stuck".to_string());
        let store = seeded_store();

        let mut sweeper = Sweeper::new(store.clone(), blobs.clone(), TTL);
        let report = sweeper.sweep(100).await;

        assert_eq!(report.evicted, 2);
        assert_eq!(report.leaked, 1);
        assert_eq!(*blobs.deleted.lock().unwrap(), vec!["old".to_string()]);
        assert!(store.get("stuck").is_none());
        assert_eq!(store.used_bytes(), 30);
        assert_eq!(sweeper.leaked().collect::<Vec<_>>(), vec!["stuck"]);
    }

    #[tokio::test]
    async fn leaked_locations_are_retried_on_later_sweeps() {
        let blobs = Arc::new(ScriptedBlobs::default());
        blobs.failing.lock().unwrap().insert("stuck".to_string());
        let mut sweeper = Sweeper::new(seeded_store(), blobs.clone(), TTL);

        sweeper.sweep(100).await;
        let report = sweeper.sweep(101).await;
        assert_eq!(report.recovered, 0);

        blobs.failing.lock().unwrap().clear();
        let report = sweeper.sweep(102).await;
        assert_eq!(report.recovered, 1);
        assert_eq!(sweeper.leaked().count(), 0);
    }

    #[tokio::test]
    async fn already_missing_bytes_are_not_a_leak() {
        let blobs = Arc::new(ScriptedBlobs {
            missing: HashSet::from(["old".to_string()]),
            ..ScriptedBlobs::default()
        });
        let mut sweeper = Sweeper::new(seeded_store(), blobs, TTL);

        let report = sweeper.sweep(100).await;
        assert_eq!(report.evicted, 2);
        assert_eq!(report.leaked, 0);
    }

    #[tokio::test]
    async fn second_sweep_at_same_instant_is_a_no_op() {
        let blobs = Arc::new(ScriptedBlobs::default());
        let mut sweeper = Sweeper::new(seeded_store(), blobs.clone(), TTL);

        assert_eq!(sweeper.sweep(100).await.evicted, 2);
        assert_eq!(sweeper.sweep(100).await, SweepReport::default());
        assert_eq!(blobs.deleted.lock().unwrap().len(), 2);
    }

    #[tokio::test]
    async fn sweep_purges_stale_captchas() {
        let captcha = Arc::new(CaptchaStore::new(true, Duration::from_secs(10)));
        captcha.issue(0);
        let mut sweeper = Sweeper::new(
            Arc::new(ObjectStore::new(10)),
            Arc::new(ScriptedBlobs::default()),
            TTL,
        )
        .with_captcha(captcha);

        assert_eq!(sweeper.sweep(5).await.captchas_purged, 0);
        assert_eq!(sweeper.sweep(10).await.captchas_purged, 1);
    }

    #[tokio::test]
    async fn spawned_sweeper_runs_until_shutdown() {
        let store = Arc::new(ObjectStore::new(100));
        let long_ago = chrono::Utc::now().timestamp() - 3_600;
        store.admit(ObjectRecord::new("ancient", "f", 5, long_ago)).unwrap();

        let handle = Sweeper::new(store.clone(), Arc::new(ScriptedBlobs::default()), TTL)
            .spawn(Duration::from_millis(10));

        let drained = tokio::time::timeout(Duration::from_secs(5), async {
            while store.stats().count > 0 {
                tokio::time::sleep(Duration::from_millis(5)).await;
            }
        })
        .await;
        assert!(drained.is_ok(), "sweeper never evicted the expired object");

        tokio::time::timeout(Duration::from_secs(5), handle.shutdown())
            .await
            .expect("sweeper did not stop");
    }
}
