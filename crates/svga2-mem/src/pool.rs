//! Tiered page pool allocator.
//!
//! A fixed set of contiguous pools of increasing size is reserved once at
//! init. Allocation scans the pools smallest-first with a first-fit scan
//! over a per-page bitmap; each live run is recorded in a start-to-length
//! map so `free` can recover the run length from its base address alone.
//! Exhaustion is an ordinary, non-fatal error.

use std::collections::HashMap;
use std::sync::{Mutex, PoisonError};

use thiserror::Error;
use tracing::{debug, warn};

use crate::host::{HostMemory, HostMemoryError};
use crate::{PageRun, PhysicalPageNumber, PAGE_SIZE};

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PoolError {
    /// No tier currently has a fitting free run. Ordinary and retryable.
    #[error("no pool has a free run of {pages} pages")]
    Exhausted { pages: usize },

    #[error("page {ppn:#x} does not start an allocation in any pool")]
    UnknownAddress { ppn: u64 },

    #[error("cannot allocate zero pages")]
    ZeroPages,

    #[error("no pool could be reserved")]
    NoPools,

    #[error(transparent)]
    Host(#[from] HostMemoryError),
}

/// Geometry of one pool tier.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct TierSpec {
    pub pages: usize,
    /// Largest run this tier will serve; bigger requests skip straight to
    /// the next tier so small pools are not fragmented by large runs.
    pub max_run: Option<usize>,
}

impl TierSpec {
    pub const fn new(pages: usize) -> Self {
        Self { pages, max_run: None }
    }

    pub const fn capped(pages: usize, max_run: usize) -> Self {
        Self {
            pages,
            max_run: Some(max_run),
        }
    }
}

const MIB: u64 = 1024 * 1024;
const PAGES_PER_MIB: usize = (MIB as usize) / PAGE_SIZE;

/// Tier table derived from reported host memory. Larger machines get a
/// fourth 256 MiB tier.
pub fn default_tiers(host_bytes: u64) -> Vec<TierSpec> {
    let mut tiers = vec![
        TierSpec::capped(8 * PAGES_PER_MIB, 1024),
        TierSpec::capped(32 * PAGES_PER_MIB, 4096),
        TierSpec::new(128 * PAGES_PER_MIB),
    ];
    if host_bytes >= 4096 * MIB {
        tiers.push(TierSpec::new(256 * PAGES_PER_MIB));
    }
    tiers
}

#[derive(Debug)]
struct MemoryPool {
    base: PhysicalPageNumber,
    pages: usize,
    max_run: Option<usize>,
    allocated: Vec<bool>,
    /// Start index of each live run and its length in pages.
    runs: HashMap<usize, usize>,
    used_pages: usize,
}

impl MemoryPool {
    fn new(run: PageRun, max_run: Option<usize>) -> Self {
        Self {
            base: run.base,
            pages: run.count,
            max_run,
            allocated: vec![false; run.count],
            runs: HashMap::new(),
            used_pages: 0,
        }
    }

    fn contains(&self, ppn: PhysicalPageNumber) -> bool {
        ppn >= self.base && ppn.0 < self.base.0 + self.pages as u64
    }

    /// First-fit scan for `count` contiguous clear pages.
    fn allocate(&mut self, count: usize) -> Option<usize> {
        if let Some(cap) = self.max_run {
            if count > cap {
                return None;
            }
        }
        if count > self.pages - self.used_pages {
            return None;
        }

        let mut run_start = 0;
        let mut run_len = 0;
        for i in 0..self.pages {
            if self.allocated[i] {
                run_start = i + 1;
                run_len = 0;
                continue;
            }
            run_len += 1;
            if run_len == count {
                for page in run_start..run_start + count {
                    self.allocated[page] = true;
                }
                self.runs.insert(run_start, count);
                self.used_pages += count;
                return Some(run_start);
            }
        }
        None
    }

    /// Frees the run starting at `start`, returning its length.
    fn free(&mut self, start: usize) -> Option<usize> {
        let len = self.runs.remove(&start)?;
        for page in start..start + len {
            self.allocated[page] = false;
        }
        self.used_pages -= len;
        Some(len)
    }
}

/// The shared pool set. Interior mutex: the allocator lock is distinct
/// from the submission scope and held only around page bookkeeping.
#[derive(Debug)]
pub struct PoolSet {
    pools: Mutex<Vec<MemoryPool>>,
}

impl PoolSet {
    /// Reserves the default tier table for a host with `host_bytes` of
    /// memory. Larger tiers that cannot be reserved are skipped; failing
    /// to reserve even the smallest tier is fatal to init.
    pub fn initialize<H: HostMemory>(host: &mut H, host_bytes: u64) -> Result<Self, PoolError> {
        Self::with_tiers(host, &default_tiers(host_bytes))
    }

    /// Reserves an explicit tier table, smallest tier first.
    pub fn with_tiers<H: HostMemory>(host: &mut H, tiers: &[TierSpec]) -> Result<Self, PoolError> {
        let mut pools = Vec::with_capacity(tiers.len());
        for tier in tiers {
            match host.reserve_contiguous(tier.pages) {
                Ok(run) => {
                    debug!(pages = tier.pages, base = run.base.0, "reserved pool tier");
                    pools.push(MemoryPool::new(run, tier.max_run));
                }
                Err(err) if !pools.is_empty() => {
                    warn!(pages = tier.pages, %err, "skipping unreservable pool tier");
                    break;
                }
                Err(err) => return Err(err.into()),
            }
        }
        if pools.is_empty() {
            return Err(PoolError::NoPools);
        }
        Ok(Self {
            pools: Mutex::new(pools),
        })
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, Vec<MemoryPool>> {
        self.pools.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Allocates `pages` contiguous pages from the smallest eligible tier.
    pub fn allocate(&self, pages: usize) -> Result<PageRun, PoolError> {
        if pages == 0 {
            return Err(PoolError::ZeroPages);
        }
        let mut pools = self.lock();
        for pool in pools.iter_mut() {
            if let Some(start) = pool.allocate(pages) {
                return Ok(PageRun::new(pool.base.add(start as u64), pages));
            }
        }
        Err(PoolError::Exhausted { pages })
    }

    /// Frees the run whose first page is `base`, returning its length.
    pub fn free(&self, base: PhysicalPageNumber) -> Result<usize, PoolError> {
        let mut pools = self.lock();
        for pool in pools.iter_mut() {
            if pool.contains(base) {
                let start = (base.0 - pool.base.0) as usize;
                return pool
                    .free(start)
                    .ok_or(PoolError::UnknownAddress { ppn: base.0 });
            }
        }
        Err(PoolError::UnknownAddress { ppn: base.0 })
    }

    /// Total pages currently allocated across all tiers.
    pub fn used_pages(&self) -> usize {
        self.lock().iter().map(|p| p.used_pages).sum()
    }

    pub fn pool_count(&self) -> usize {
        self.lock().len()
    }
}
