//! Admission control over per-resource job slots

use std::sync::Arc;
use std::time::Duration;
use sweeplet_core::{ResourceId, SchedulingPolicy, SweepResult};
use tokio::sync::{Notify, RwLock};
use tracing::{debug, info, warn};

use crate::lock::{with_jitter, RoundLock};
use crate::placement::{PlacementStrategy, RandomTieBreak};

/// Active job count per resource, in configuration order
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadTable {
    loads: Vec<(ResourceId, u32)>,
}

impl LoadTable {
    /// Every resource starts at zero
    pub fn new(resources: &[ResourceId]) -> Self {
        Self {
            loads: resources.iter().map(|&id| (id, 0)).collect(),
        }
    }

    pub fn get(&self, id: ResourceId) -> Option<u32> {
        self.loads.iter().find(|(r, _)| *r == id).map(|(_, l)| *l)
    }

    /// Minimum load and the resources tied at it
    pub fn least_loaded(&self) -> Option<(u32, Vec<ResourceId>)> {
        let min = self.loads.iter().map(|(_, l)| *l).min()?;
        let tied = self
            .loads
            .iter()
            .filter(|(_, l)| *l == min)
            .map(|(r, _)| *r)
            .collect();
        Some((min, tied))
    }

    pub fn total(&self) -> u32 {
        self.loads.iter().map(|(_, l)| *l).sum()
    }

    pub fn iter(&self) -> impl Iterator<Item = (ResourceId, u32)> + '_ {
        self.loads.iter().copied()
    }

    fn increment(&mut self, id: ResourceId) {
        if let Some((_, load)) = self.loads.iter_mut().find(|(r, _)| *r == id) {
            *load += 1;
        }
    }

    fn decrement(&mut self, id: ResourceId) {
        if let Some((_, load)) = self.loads.iter_mut().find(|(r, _)| *r == id) {
            if *load == 0 {
                warn!(resource = id, "Release of a resource with no active jobs");
            }
            *load = load.saturating_sub(1);
        }
    }
}

/// Resources granted to one job
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Allocation {
    /// One slot on one resource
    Single(ResourceId),
    /// The whole resource set (distributed mode, not counted in the table)
    All(Vec<ResourceId>),
}

impl Allocation {
    pub fn resources(&self) -> Vec<ResourceId> {
        match self {
            Allocation::Single(id) => vec![*id],
            Allocation::All(ids) => ids.clone(),
        }
    }
}

/// Allocate/wait/release protocol enforcing `max_jobs_per_resource`
pub struct AdmissionController {
    policy: SchedulingPolicy,
    /// Load table, only mutated while `lock` is held
    table: RwLock<LoadTable>,
    lock: Arc<dyn RoundLock>,
    placement: Arc<dyn PlacementStrategy>,
    /// Wakes saturated waiters when a slot frees up
    released: Notify,
    backoff: Duration,
    strict: bool,
}

impl AdmissionController {
    /// Create a controller with every resource at zero load
    pub fn new(policy: SchedulingPolicy, lock: Arc<dyn RoundLock>) -> Self {
        let table = LoadTable::new(&policy.resources);
        Self {
            policy,
            table: RwLock::new(table),
            lock,
            placement: Arc::new(RandomTieBreak),
            released: Notify::new(),
            backoff: Duration::from_secs(60),
            strict: true,
        }
    }

    pub fn with_placement(mut self, placement: Arc<dyn PlacementStrategy>) -> Self {
        self.placement = placement;
        self
    }

    /// Longest a saturated waiter sleeps before looking again
    pub fn with_backoff(mut self, backoff: Duration) -> Self {
        self.backoff = backoff;
        self
    }

    /// Re-check capacity inside the critical section. Without it, the
    /// decision is taken on the snapshot read before locking.
    pub fn with_strict(mut self, strict: bool) -> Self {
        self.strict = strict;
        self
    }

    pub fn policy(&self) -> &SchedulingPolicy {
        &self.policy
    }

    /// Copy of the current load table
    pub async fn loads(&self) -> LoadTable {
        self.table.read().await.clone()
    }

    /// One admission attempt. `None` means every resource is at capacity.
    pub async fn try_allocate(&self) -> SweepResult<Option<Allocation>> {
        if self.policy.distributed {
            return Ok(Some(Allocation::All(self.policy.resources.clone())));
        }

        let cap = self.policy.max_jobs_per_resource;
        let snapshot = self.table.read().await.clone();
        let tied = match snapshot.least_loaded() {
            Some((min, tied)) if min < cap => tied,
            _ => return Ok(None),
        };

        self.lock.acquire().await?;
        let chosen = {
            let mut table = self.table.write().await;
            let candidates = if self.strict {
                match table.least_loaded() {
                    Some((min, tied)) if min < cap => Some(tied),
                    _ => None,
                }
            } else {
                Some(tied)
            };

            let chosen = candidates.and_then(|tied| self.placement.choose(&tied));
            if let Some(id) = chosen {
                table.increment(id);
                info!(
                    resource = id,
                    load = table.get(id).unwrap_or_default(),
                    cap = cap,
                    "Allocated resource slot"
                );
            }
            chosen
        };
        self.lock.release()?;

        Ok(chosen.map(Allocation::Single))
    }

    /// Wait until a slot is free and take it. There is no retry limit.
    pub async fn allocate(&self) -> SweepResult<Allocation> {
        let mut attempt = 1u64;
        loop {
            let notified = self.released.notified();
            tokio::pin!(notified);
            // Register before looking so a release during the attempt still wakes us
            notified.as_mut().enable();

            if let Some(allocation) = self.try_allocate().await? {
                return Ok(allocation);
            }

            let wait = with_jitter(self.backoff);
            debug!(
                attempt = attempt,
                wait_secs = wait.as_secs_f64(),
                "All resources at capacity, waiting"
            );
            attempt += 1;

            tokio::select! {
                _ = &mut notified => {}
                _ = tokio::time::sleep(wait) => {}
            }
        }
    }

    /// Return the slot taken by `allocation`
    pub async fn release(&self, allocation: &Allocation) -> SweepResult<()> {
        let id = match allocation {
            Allocation::Single(id) => *id,
            Allocation::All(_) => return Ok(()),
        };

        self.lock.acquire().await?;
        {
            let mut table = self.table.write().await;
            table.decrement(id);
            debug!(
                resource = id,
                load = table.get(id).unwrap_or_default(),
                "Released resource slot"
            );
        }
        self.lock.release()?;
        self.released.notify_waiters();
        Ok(())
    }
}
