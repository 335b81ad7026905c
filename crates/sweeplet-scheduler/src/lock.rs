//! Mutual exclusion for one dispatch round
//!
//! Neither backend is fair, reentrant or owner-aware: any caller may release,
//! and releasing an unheld lock is a no-op.

use async_trait::async_trait;
use rand::Rng;
use std::fs::OpenOptions;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;
use sweeplet_core::{SweepError, SweepResult};
use tokio::sync::Semaphore;
use tracing::{debug, info};
use uuid::Uuid;

const MARKER_PREFIX: &str = "sweeplet-";
const MARKER_SUFFIX: &str = ".lock";

/// `base` plus up to 20% random extra, so that pollers drift apart
pub fn with_jitter(base: Duration) -> Duration {
    if base.is_zero() {
        return base;
    }
    let extra = rand::thread_rng().gen_range(0.0..0.2);
    base + base.mul_f64(extra)
}

/// Lock guarding the load table of one round
#[async_trait]
pub trait RoundLock: Send + Sync {
    /// Wait until the lock is free and take it
    async fn acquire(&self) -> SweepResult<()>;

    /// Give the lock up
    fn release(&self) -> SweepResult<()>;

    /// Clear a lock left behind by a holder that never released it
    fn force_release(&self) -> SweepResult<()> {
        self.release()
    }

    /// Get the backend name
    fn name(&self) -> &'static str;
}

/// Marker-file lock: the lock is held while the marker exists
pub struct FileLock {
    path: PathBuf,
    poll: Duration,
}

impl FileLock {
    pub fn new(path: impl Into<PathBuf>, poll: Duration) -> Self {
        Self {
            path: path.into(),
            poll,
        }
    }

    /// Lock whose marker is named after one round
    pub fn for_round(dir: &Path, run_id: &Uuid, poll: Duration) -> Self {
        Self::new(
            dir.join(format!("{}{}{}", MARKER_PREFIX, run_id, MARKER_SUFFIX)),
            poll,
        )
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn is_locked(&self) -> bool {
        self.path.exists()
    }

    /// Remove every round marker in `dir`. Returns how many were removed.
    pub fn clear_stale(dir: &Path) -> SweepResult<usize> {
        if !dir.exists() {
            return Ok(0);
        }

        let mut removed = 0;
        for entry in std::fs::read_dir(dir)? {
            let path = entry?.path();
            let is_marker = path
                .file_name()
                .and_then(|n| n.to_str())
                .map_or(false, |n| n.starts_with(MARKER_PREFIX) && n.ends_with(MARKER_SUFFIX));
            if is_marker {
                FileLock::new(&path, Duration::ZERO).release()?;
                info!(marker = %path.display(), "Removed stale lock marker");
                removed += 1;
            }
        }
        Ok(removed)
    }
}

#[async_trait]
impl RoundLock for FileLock {
    async fn acquire(&self) -> SweepResult<()> {
        loop {
            // create_new makes the existence check and the creation one step
            match OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&self.path)
            {
                Ok(_) => {
                    debug!(marker = %self.path.display(), "Lock acquired");
                    return Ok(());
                }
                Err(e) if e.kind() == ErrorKind::AlreadyExists => {
                    tokio::time::sleep(with_jitter(self.poll)).await;
                }
                Err(e) => {
                    return Err(SweepError::Lock(format!(
                        "Failed to create lock marker {}: {}",
                        self.path.display(),
                        e
                    )))
                }
            }
        }
    }

    fn release(&self) -> SweepResult<()> {
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(marker = %self.path.display(), "Lock released");
                Ok(())
            }
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(SweepError::Lock(format!(
                "Failed to remove lock marker {}: {}",
                self.path.display(),
                e
            ))),
        }
    }

    fn name(&self) -> &'static str {
        "file"
    }
}

/// In-process lock for rounds whose workers are tasks of one process
pub struct LocalLock {
    permit: Semaphore,
    held: AtomicBool,
}

impl LocalLock {
    pub fn new() -> Self {
        Self {
            permit: Semaphore::new(1),
            held: AtomicBool::new(false),
        }
    }

    pub fn is_locked(&self) -> bool {
        self.held.load(Ordering::SeqCst)
    }
}

impl Default for LocalLock {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl RoundLock for LocalLock {
    async fn acquire(&self) -> SweepResult<()> {
        let permit = self
            .permit
            .acquire()
            .await
            .map_err(|e| SweepError::Internal(format!("Lock semaphore closed: {}", e)))?;
        permit.forget();
        self.held.store(true, Ordering::SeqCst);
        Ok(())
    }

    fn release(&self) -> SweepResult<()> {
        if self.held.swap(false, Ordering::SeqCst) {
            self.permit.add_permits(1);
        }
        Ok(())
    }

    fn name(&self) -> &'static str {
        "local"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;
    use tempfile::tempdir;

    /// Hammer `lock` from many tasks and return the highest number of
    /// simultaneous holders observed.
    async fn peak_holders(lock: Arc<dyn RoundLock>) -> usize {
        let inside = Arc::new(AtomicUsize::new(0));
        let peak = Arc::new(AtomicUsize::new(0));

        let mut tasks = Vec::new();
        for _ in 0..16 {
            let lock = lock.clone();
            let inside = inside.clone();
            let peak = peak.clone();
            tasks.push(tokio::spawn(async move {
                for _ in 0..5 {
                    lock.acquire().await.unwrap();
                    let now = inside.fetch_add(1, Ordering::SeqCst) + 1;
                    peak.fetch_max(now, Ordering::SeqCst);
                    tokio::task::yield_now().await;
                    inside.fetch_sub(1, Ordering::SeqCst);
                    lock.release().unwrap();
                }
            }));
        }
        for task in tasks {
            task.await.unwrap();
        }
        peak.load(Ordering::SeqCst)
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_file_lock_single_holder() {
        let dir = tempdir().unwrap();
        let lock = Arc::new(FileLock::new(dir.path().join("round.lock"), Duration::from_millis(1)));
        assert_eq!(peak_holders(lock.clone()).await, 1);
        assert!(!lock.is_locked());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_local_lock_single_holder() {
        let lock = Arc::new(LocalLock::new());
        assert_eq!(peak_holders(lock.clone()).await, 1);
        assert!(!lock.is_locked());
    }

    #[tokio::test]
    async fn test_file_lock_blocks_until_released() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("round.lock");
        let lock = Arc::new(FileLock::new(&path, Duration::from_millis(5)));

        lock.acquire().await.unwrap();
        assert!(path.exists());

        let waiter = {
            let lock = lock.clone();
            tokio::spawn(async move { lock.acquire().await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(!waiter.is_finished());

        lock.release().unwrap();
        waiter.await.unwrap().unwrap();
        assert!(lock.is_locked());
    }

    #[tokio::test]
    async fn test_release_is_idempotent() {
        let dir = tempdir().unwrap();
        let file_lock = FileLock::new(dir.path().join("round.lock"), Duration::from_millis(1));
        file_lock.release().unwrap();
        file_lock.acquire().await.unwrap();
        file_lock.release().unwrap();
        file_lock.release().unwrap();

        let local = LocalLock::new();
        local.release().unwrap();
        local.acquire().await.unwrap();
        local.release().unwrap();
        local.release().unwrap();
        // A double release must not hand out two permits
        local.acquire().await.unwrap();
        assert!(local.permit.try_acquire().is_err());
    }

    #[tokio::test]
    async fn test_force_release_clears_stale_marker() {
        let dir = tempdir().unwrap();
        let run_id = Uuid::new_v4();
        let lock = FileLock::for_round(dir.path(), &run_id, Duration::from_millis(1));
        std::fs::write(lock.path(), b"").unwrap();
        assert!(lock.is_locked());

        lock.force_release().unwrap();
        assert!(!lock.is_locked());
        lock.acquire().await.unwrap();
    }

    #[test]
    fn test_clear_stale() {
        let dir = tempdir().unwrap();
        for _ in 0..2 {
            let lock = FileLock::for_round(dir.path(), &Uuid::new_v4(), Duration::ZERO);
            std::fs::write(lock.path(), b"").unwrap();
        }
        std::fs::write(dir.path().join("unrelated.lock"), b"").unwrap();

        assert_eq!(FileLock::clear_stale(dir.path()).unwrap(), 2);
        assert!(dir.path().join("unrelated.lock").exists());
        assert_eq!(FileLock::clear_stale(&dir.path().join("missing")).unwrap(), 0);
    }

    #[test]
    fn test_jitter_bounds() {
        assert_eq!(with_jitter(Duration::ZERO), Duration::ZERO);
        for _ in 0..100 {
            let d = with_jitter(Duration::from_millis(100));
            assert!(d >= Duration::from_millis(100));
            assert!(d <= Duration::from_millis(120));
        }
    }
}
