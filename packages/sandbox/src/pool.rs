// ABOUTME: Sandbox pool owning the project-to-sandbox mapping
// ABOUTME: Single-flight creation per owner, LRU eviction at capacity, best-effort drain

use crate::provider::{ProviderError, SandboxHandle, SandboxProvider};
use chrono::{DateTime, Utc};
use nanoid::nanoid;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use thiserror::Error;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info, warn};

#[derive(Error, Debug)]
pub enum PoolError {
    #[error("Provider error: {0}")]
    Provider(#[from] ProviderError),

    #[error("Timed out after {0:?} while starting sandbox for {1}")]
    CreateTimeout(Duration, String),
}

pub type Result<T> = std::result::Result<T, PoolError>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SandboxState {
    Starting,
    Ready,
    Closing,
    Closed,
}

/// One pooled sandbox and its bookkeeping. Mutated only under the pool's
/// write lock.
struct SandboxEntry {
    id: String,
    owner_project_id: String,
    created_at: DateTime<Utc>,
    last_accessed_at: DateTime<Utc>,
    state: SandboxState,
    handle: Arc<dyn SandboxHandle>,
}

/// Snapshot of pool bookkeeping for one owner
#[derive(Debug, Clone, Serialize)]
pub struct SandboxInfo {
    pub sandbox_id: String,
    pub state: SandboxState,
    pub created_at: DateTime<Utc>,
    pub last_accessed_at: DateTime<Utc>,
}

/// Handle returned by `get_or_start`; cheap to clone
#[derive(Clone)]
pub struct SandboxLease {
    pub sandbox_id: String,
    pub handle: Arc<dyn SandboxHandle>,
}

pub struct SandboxPool {
    provider: Arc<dyn SandboxProvider>,
    max_sandboxes: Option<usize>,
    create_timeout: Duration,
    entries: RwLock<HashMap<String, SandboxEntry>>,
    creation_locks: OwnerLocks,
}

impl SandboxPool {
    pub fn new(
        provider: Arc<dyn SandboxProvider>,
        max_sandboxes: Option<usize>,
        create_timeout: Duration,
    ) -> Self {
        Self {
            provider,
            max_sandboxes,
            create_timeout,
            entries: RwLock::new(HashMap::new()),
            creation_locks: OwnerLocks::new(),
        }
    }

    /// Return the owner's sandbox, starting one if none exists. Concurrent
    /// callers for the same owner are serialized so at most one provider
    /// create is in flight per owner.
    pub async fn get_or_start(&self, owner_id: &str) -> Result<SandboxLease> {
        let owner_lock = self.creation_locks.acquire(owner_id);
        let _guard = owner_lock.lock().await;

        {
            let mut entries = self.entries.write().await;
            if let Some(entry) = entries.get_mut(owner_id) {
                entry.last_accessed_at = Utc::now();
                debug!("Reusing sandbox {} for {}", entry.id, owner_id);
                return Ok(SandboxLease {
                    sandbox_id: entry.id.clone(),
                    handle: entry.handle.clone(),
                });
            }
        }

        let handle = tokio::time::timeout(self.create_timeout, self.provider.create(owner_id))
            .await
            .map_err(|_| PoolError::CreateTimeout(self.create_timeout, owner_id.to_string()))??;

        let now = Utc::now();
        let new_entry = SandboxEntry {
            id: format!("sbx-{}", nanoid!()),
            owner_project_id: owner_id.to_string(),
            created_at: now,
            last_accessed_at: now,
            state: SandboxState::Ready,
            handle: handle.clone(),
        };
        let lease = SandboxLease {
            sandbox_id: new_entry.id.clone(),
            handle,
        };
        info!("Started sandbox {} for {}", new_entry.id, owner_id);

        // Eviction and insert share one write-lock critical section so the
        // tracked count never exceeds the cap, even when creations for
        // distinct owners land at the same time.
        let evicted = {
            let mut entries = self.entries.write().await;
            let mut evicted = Vec::new();
            if let Some(max) = self.max_sandboxes {
                while entries.len() >= max {
                    let victim = entries
                        .values()
                        .min_by_key(|e| e.last_accessed_at)
                        .map(|e| e.owner_project_id.clone());
                    let Some(victim_owner) = victim else { break };
                    if let Some(mut victim_entry) = entries.remove(&victim_owner) {
                        victim_entry.state = SandboxState::Closing;
                        info!(
                            "Pool at capacity ({}), evicting least-recently-used sandbox {} for {}",
                            max, victim_entry.id, victim_owner
                        );
                        evicted.push((victim_owner, victim_entry));
                    }
                }
            }
            entries.insert(owner_id.to_string(), new_entry);
            evicted
        };

        for (victim_owner, victim_entry) in evicted {
            if let Err(e) = victim_entry.handle.kill().await {
                warn!(
                    "Eviction of sandbox {} for {} failed: {}",
                    victim_entry.id, victim_owner, e
                );
            }
        }

        Ok(lease)
    }

    /// Release the owner's sandbox and drop its bookkeeping. Returns
    /// `Ok(false)` when no sandbox is tracked for the owner.
    pub async fn close(&self, owner_id: &str) -> Result<bool> {
        let entry = self.entries.write().await.remove(owner_id);
        let Some(mut entry) = entry else {
            debug!("No sandbox tracked for {}, close is a no-op", owner_id);
            return Ok(false);
        };
        entry.state = SandboxState::Closing;
        entry.handle.kill().await?;
        entry.state = SandboxState::Closed;
        info!("Closed sandbox {} for {}", entry.id, owner_id);
        Ok(true)
    }

    /// Drain the whole pool, logging kill failures instead of aborting the
    /// sweep. Returns the number of sandboxes that were tracked.
    pub async fn close_all(&self) -> usize {
        let drained: Vec<(String, SandboxEntry)> =
            self.entries.write().await.drain().collect();
        let count = drained.len();
        for (owner, entry) in drained {
            if let Err(e) = entry.handle.kill().await {
                warn!("Failed to close sandbox {} for {}: {}", entry.id, owner, e);
            }
        }
        if count > 0 {
            info!("Drained {} sandbox(es)", count);
        }
        count
    }

    pub async fn count(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn has(&self, owner_id: &str) -> bool {
        self.entries.read().await.contains_key(owner_id)
    }

    pub async fn info(&self, owner_id: &str) -> Option<SandboxInfo> {
        self.entries.read().await.get(owner_id).map(|e| SandboxInfo {
            sandbox_id: e.id.clone(),
            state: e.state,
            created_at: e.created_at,
            last_accessed_at: e.last_accessed_at,
        })
    }

}

/// Per-owner creation locks. Entries are removed as soon as the last
/// holder releases, so the map does not grow with owner churn.
struct OwnerLocks {
    inner: std::sync::Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl OwnerLocks {
    fn new() -> Self {
        Self {
            inner: std::sync::Mutex::new(HashMap::new()),
        }
    }

    fn acquire(&self, owner_id: &str) -> OwnerLock<'_> {
        let lock = self
            .lock_inner()
            .entry(owner_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone();
        OwnerLock {
            locks: self,
            owner_id: owner_id.to_string(),
            lock,
        }
    }

    fn release(&self, owner_id: &str, lock: &Arc<Mutex<()>>) {
        let mut inner = self.lock_inner();
        // the map's clone plus the departing holder's
        if Arc::strong_count(lock) == 2 {
            inner.remove(owner_id);
        }
    }

    fn lock_inner(&self) -> std::sync::MutexGuard<'_, HashMap<String, Arc<Mutex<()>>>> {
        self.inner
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    #[cfg(test)]
    fn len(&self) -> usize {
        self.lock_inner().len()
    }
}

struct OwnerLock<'a> {
    locks: &'a OwnerLocks,
    owner_id: String,
    lock: Arc<Mutex<()>>,
}

impl OwnerLock<'_> {
    async fn lock(&self) -> tokio::sync::MutexGuard<'_, ()> {
        self.lock.lock().await
    }
}

impl Drop for OwnerLock<'_> {
    fn drop(&mut self) {
        self.locks.release(&self.owner_id, &self.lock);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::provider::ExecResult;
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct MockHandle {
        remote_id: String,
        kills: Arc<AtomicUsize>,
        kill_fails: bool,
    }

    #[async_trait]
    impl SandboxHandle for MockHandle {
        fn remote_id(&self) -> &str {
            &self.remote_id
        }

        async fn run_command(&self, _command: &[String]) -> crate::provider::Result<ExecResult> {
            Ok(ExecResult {
                exit_code: 0,
                stdout: String::new(),
                stderr: String::new(),
            })
        }

        async fn read_file(&self, _path: &str) -> crate::provider::Result<Vec<u8>> {
            Ok(Vec::new())
        }

        async fn write_file(&self, _path: &str, _contents: &[u8]) -> crate::provider::Result<()> {
            Ok(())
        }

        async fn kill(&self) -> crate::provider::Result<()> {
            self.kills.fetch_add(1, Ordering::SeqCst);
            if self.kill_fails {
                return Err(ProviderError::Connection("kill failed".to_string()));
            }
            Ok(())
        }
    }

    struct MockProvider {
        creates: Arc<AtomicUsize>,
        kills: Arc<AtomicUsize>,
        create_delay: Duration,
        fail_creates: bool,
        kill_fails: bool,
    }

    impl MockProvider {
        fn new() -> Self {
            Self {
                creates: Arc::new(AtomicUsize::new(0)),
                kills: Arc::new(AtomicUsize::new(0)),
                create_delay: Duration::from_millis(5),
                fail_creates: false,
                kill_fails: false,
            }
        }
    }

    #[async_trait]
    impl SandboxProvider for MockProvider {
        async fn create(&self, owner_id: &str) -> crate::provider::Result<Arc<dyn SandboxHandle>> {
            tokio::time::sleep(self.create_delay).await;
            if self.fail_creates {
                return Err(ProviderError::CreationFailed("mock failure".to_string()));
            }
            let n = self.creates.fetch_add(1, Ordering::SeqCst);
            Ok(Arc::new(MockHandle {
                remote_id: format!("remote-{owner_id}-{n}"),
                kills: self.kills.clone(),
                kill_fails: self.kill_fails,
            }))
        }
    }

    fn pool_with(provider: MockProvider, max: Option<usize>) -> (Arc<SandboxPool>, Arc<AtomicUsize>) {
        let creates = provider.creates.clone();
        let pool = Arc::new(SandboxPool::new(
            Arc::new(provider),
            max,
            Duration::from_secs(5),
        ));
        (pool, creates)
    }

    #[tokio::test]
    async fn test_get_or_start_reuses_existing_sandbox() {
        let (pool, creates) = pool_with(MockProvider::new(), None);

        let first = pool.get_or_start("proj-a").await.unwrap();
        let second = pool.get_or_start("proj-a").await.unwrap();

        assert_eq!(first.sandbox_id, second.sandbox_id);
        assert_eq!(creates.load(Ordering::SeqCst), 1);
        assert_eq!(pool.count().await, 1);
    }

    #[tokio::test]
    async fn test_concurrent_get_or_start_is_single_flight() {
        let (pool, creates) = pool_with(MockProvider::new(), None);

        let (a, b, c) = tokio::join!(
            pool.get_or_start("proj-a"),
            pool.get_or_start("proj-a"),
            pool.get_or_start("proj-a"),
        );
        let (a, b, c) = (a.unwrap(), b.unwrap(), c.unwrap());

        assert_eq!(a.sandbox_id, b.sandbox_id);
        assert_eq!(b.sandbox_id, c.sandbox_id);
        assert_eq!(creates.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_distinct_owners_get_distinct_sandboxes() {
        let (pool, creates) = pool_with(MockProvider::new(), None);

        let a = pool.get_or_start("proj-a").await.unwrap();
        let b = pool.get_or_start("proj-b").await.unwrap();

        assert_ne!(a.sandbox_id, b.sandbox_id);
        assert_eq!(creates.load(Ordering::SeqCst), 2);
        assert_eq!(pool.count().await, 2);
    }

    #[tokio::test]
    async fn test_capacity_evicts_least_recently_used() {
        let (pool, _creates) = pool_with(MockProvider::new(), Some(2));

        pool.get_or_start("proj-a").await.unwrap();
        pool.get_or_start("proj-b").await.unwrap();
        // Touch A so B becomes the LRU entry
        pool.get_or_start("proj-a").await.unwrap();
        pool.get_or_start("proj-c").await.unwrap();

        assert_eq!(pool.count().await, 2);
        assert!(pool.has("proj-a").await);
        assert!(!pool.has("proj-b").await);
        assert!(pool.has("proj-c").await);
    }

    #[tokio::test]
    async fn test_concurrent_new_owners_respect_capacity() {
        let mut provider = MockProvider::new();
        provider.create_delay = Duration::from_millis(50);
        let (pool, _creates) = pool_with(provider, Some(1));

        pool.get_or_start("proj-a").await.unwrap();
        let (b, c) = tokio::join!(pool.get_or_start("proj-b"), pool.get_or_start("proj-c"));
        b.unwrap();
        c.unwrap();

        assert_eq!(pool.count().await, 1);
    }

    #[tokio::test]
    async fn test_creation_locks_do_not_accumulate() {
        let (pool, _creates) = pool_with(MockProvider::new(), None);

        pool.get_or_start("proj-a").await.unwrap();
        pool.get_or_start("proj-b").await.unwrap();
        pool.close("proj-a").await.unwrap();

        assert_eq!(pool.creation_locks.len(), 0);
    }

    #[tokio::test]
    async fn test_eviction_kill_failure_does_not_block_creation() {
        let mut provider = MockProvider::new();
        provider.kill_fails = true;
        let (pool, creates) = pool_with(provider, Some(1));

        pool.get_or_start("proj-a").await.unwrap();
        let b = pool.get_or_start("proj-b").await.unwrap();

        assert!(!b.sandbox_id.is_empty());
        assert_eq!(creates.load(Ordering::SeqCst), 2);
        assert!(!pool.has("proj-a").await);
        assert!(pool.has("proj-b").await);
    }

    #[tokio::test]
    async fn test_close_then_get_creates_new_identity() {
        let (pool, creates) = pool_with(MockProvider::new(), None);

        let first = pool.get_or_start("proj-a").await.unwrap();
        assert!(pool.close("proj-a").await.unwrap());
        let second = pool.get_or_start("proj-a").await.unwrap();

        assert_ne!(first.sandbox_id, second.sandbox_id);
        assert_eq!(creates.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_close_without_sandbox_is_noop() {
        let (pool, _creates) = pool_with(MockProvider::new(), None);
        assert!(!pool.close("proj-a").await.unwrap());
    }

    #[tokio::test]
    async fn test_close_all_drains_pool() {
        let provider = MockProvider::new();
        let kills = provider.kills.clone();
        let (pool, _creates) = pool_with(provider, None);

        pool.get_or_start("proj-a").await.unwrap();
        pool.get_or_start("proj-b").await.unwrap();

        assert_eq!(pool.close_all().await, 2);
        assert_eq!(pool.count().await, 0);
        assert_eq!(kills.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_create_failure_leaves_pool_unchanged() {
        let mut provider = MockProvider::new();
        provider.fail_creates = true;
        let (pool, _creates) = pool_with(provider, None);

        let result = pool.get_or_start("proj-a").await;
        assert!(matches!(
            result,
            Err(PoolError::Provider(ProviderError::CreationFailed(_)))
        ));
        assert_eq!(pool.count().await, 0);
        assert!(!pool.has("proj-a").await);
    }

    #[tokio::test]
    async fn test_create_timeout_is_typed() {
        let mut provider = MockProvider::new();
        provider.create_delay = Duration::from_millis(200);
        let pool = SandboxPool::new(Arc::new(provider), None, Duration::from_millis(10));

        let result = pool.get_or_start("proj-a").await;
        assert!(matches!(result, Err(PoolError::CreateTimeout(_, _))));
        assert_eq!(pool.count().await, 0);
    }

    #[tokio::test]
    async fn test_info_reports_bookkeeping() {
        let (pool, _creates) = pool_with(MockProvider::new(), None);

        assert!(pool.info("proj-a").await.is_none());
        let lease = pool.get_or_start("proj-a").await.unwrap();
        let info = pool.info("proj-a").await.unwrap();

        assert_eq!(info.sandbox_id, lease.sandbox_id);
        assert_eq!(info.state, SandboxState::Ready);
    }
}
