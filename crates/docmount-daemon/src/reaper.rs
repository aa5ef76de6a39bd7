//! Idle shadow reaper - background cache cleanup
//!
//! Every `release` already sweeps idle shadow files. The reaper runs the
//! same sweep on a timer so shadows of files that are read once and never
//! released again still get cleaned up.
//!
//! # Configuration
//! - idle TTL: 300 seconds since last read or write (shadow cache setting)
//! - interval: 60 seconds between sweeps

use std::sync::Arc;
use std::time::Duration;

use tokio::time::interval;
use tracing::{debug, info};

use docmount_core::DEFAULT_REAP_INTERVAL_SECS;

use crate::shadow_cache::ShadowCache;

/// Periodic sweeper for idle shadow files
pub struct Reaper {
    cache: Arc<ShadowCache>,
    interval: Duration,
}

impl Reaper {
    /// Create a reaper with the default interval
    pub fn new(cache: Arc<ShadowCache>) -> Self {
        Self::with_interval(cache, Duration::from_secs(DEFAULT_REAP_INTERVAL_SECS))
    }

    pub fn with_interval(cache: Arc<ShadowCache>, interval: Duration) -> Self {
        Self { cache, interval }
    }

    /// Run the sweep loop (call from a tokio task)
    pub async fn run_loop(self) {
        info!(
            "Reaper started: every {:?}, idle TTL {:?}",
            self.interval,
            self.cache.idle_ttl()
        );
        let mut tick = interval(self.interval);

        loop {
            tick.tick().await;
            let cache = self.cache.clone();
            // The sweep takes the release lock and touches the disk
            match tokio::task::spawn_blocking(move || cache.reap()).await {
                Ok(reaped) => debug!("Reaper sweep removed {} shadow files", reaped),
                Err(e) => info!("Reaper sweep aborted: {}", e),
            }
        }
    }

    /// Run one sweep synchronously
    pub fn sweep(&self) -> usize {
        self.cache.reap()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mirror::HostMirror;
    use crate::shadow_cache::OpenMode;
    use docmount_core::{DocPath, MemoryStore};
    use std::time::SystemTime;
    use tempfile::TempDir;

    fn cache_with_doc(temp: &TempDir, remote: &MemoryStore) -> (Arc<ShadowCache>, DocPath) {
        let mirror = HostMirror::new(temp.path()).unwrap();
        let cache = Arc::new(ShadowCache::with_idle_ttl(mirror, Duration::from_secs(10)));
        remote.add_document("/a.doc", b"abc", &[], 1);
        let path = DocPath::parse("/a.doc").unwrap();
        let fh = cache.open(&path, OpenMode::Read, false, remote).unwrap();
        cache.release(&path, fh, remote).unwrap();
        (cache, path)
    }

    #[test]
    fn test_sweep_leaves_fresh_shadows() {
        let temp = TempDir::new().unwrap();
        let remote = MemoryStore::new();
        let (cache, path) = cache_with_doc(&temp, &remote);

        let reaper = Reaper::new(cache.clone());
        assert_eq!(reaper.sweep(), 0);
        assert!(cache.has_shadow(&path));
    }

    #[test]
    fn test_sweep_removes_idle_shadows() {
        let temp = TempDir::new().unwrap();
        let remote = MemoryStore::new();
        let (cache, path) = cache_with_doc(&temp, &remote);
        cache.set_last_access(&path, SystemTime::now() - Duration::from_secs(11));

        let reaper = Reaper::new(cache.clone());
        assert_eq!(reaper.sweep(), 1);
        assert!(!cache.has_shadow(&path));
    }

    #[tokio::test]
    async fn test_run_loop_sweeps_on_interval() {
        let temp = TempDir::new().unwrap();
        let remote = MemoryStore::new();
        let (cache, path) = cache_with_doc(&temp, &remote);
        cache.set_last_access(&path, SystemTime::now() - Duration::from_secs(11));

        let reaper = Reaper::with_interval(cache.clone(), Duration::from_millis(20));
        let task = tokio::spawn(reaper.run_loop());

        for _ in 0..100 {
            if !cache.has_shadow(&path) {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        task.abort();
        assert!(!cache.has_shadow(&path));
    }
}
