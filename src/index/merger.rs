//! Memory-pressure merge scheduler.
//!
//! Shard builders register an appender (flush cache to a fragment) and a
//! merger (fold fragments into the canonical shard). A control thread polls
//! a [`MemoryProbe`] and runs all appenders when tracked memory crosses
//! `append_fraction` of the total, and all mergers once enough bytes were
//! flushed since the last merge. While a pass runs the scheduler state is
//! not [`SchedulerState::Idle`] and registration waits.

use crate::error::{Error, Result};
use crate::index::types::MergeConfig;
use log::{debug, error, info};
use parking_lot::Mutex;
use rayon::prelude::*;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, AtomicU8, AtomicU64, AtomicUsize, Ordering};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Shared byte counter that builders update as their caches grow and shrink
#[derive(Debug, Clone, Default)]
pub struct MemoryCounter(Arc<AtomicUsize>);

impl MemoryCounter {
    pub fn add(&self, bytes: usize) {
        self.0.fetch_add(bytes, Ordering::Relaxed);
    }

    pub fn sub(&self, bytes: usize) {
        // saturate; a racing add may land after the matching sub
        let _ = self
            .0
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| Some(v.saturating_sub(bytes)));
    }

    pub fn get(&self) -> usize {
        self.0.load(Ordering::Relaxed)
    }
}

/// Source of memory usage figures for the control loop
pub trait MemoryProbe: Send + Sync {
    /// Bytes currently in use
    fn allocated(&self) -> u64;
    /// Bytes available in total
    fn total(&self) -> u64;
}

/// Probe reporting the bytes held by registered builder caches
pub struct TrackedMemory {
    counter: MemoryCounter,
    total: u64,
}

impl TrackedMemory {
    pub fn new(counter: MemoryCounter, total: u64) -> Self {
        Self { counter, total }
    }

}

impl MemoryProbe for TrackedMemory {
    fn allocated(&self) -> u64 {
        self.counter.get() as u64
    }

    fn total(&self) -> u64 {
        self.total
    }
}

/// Probe reporting the resident set size of this process (Linux only,
/// reads as 0 elsewhere)
pub struct ProcessMemory {
    total: u64,
}

impl ProcessMemory {
    pub fn new(total: u64) -> Self {
        Self { total }
    }
}

impl MemoryProbe for ProcessMemory {
    fn allocated(&self) -> u64 {
        resident_memory().unwrap_or(0)
    }

    fn total(&self) -> u64 {
        self.total
    }
}

/// The probe selected by `config`: process RSS or tracked cache bytes
pub fn memory_probe(config: &MergeConfig, counter: MemoryCounter) -> Box<dyn MemoryProbe> {
    let total = config.total_memory.unwrap_or_else(physical_memory);
    if config.process_memory {
        Box::new(ProcessMemory::new(total))
    } else {
        Box::new(TrackedMemory::new(counter, total))
    }
}

/// Physical memory of the machine, 8 GiB if it cannot be determined
#[cfg(unix)]
pub fn physical_memory() -> u64 {
    // SAFETY: sysconf has no preconditions
    let (pages, page_size) =
        unsafe { (libc::sysconf(libc::_SC_PHYS_PAGES), libc::sysconf(libc::_SC_PAGESIZE)) };
    if pages > 0 && page_size > 0 {
        pages as u64 * page_size as u64
    } else {
        8 << 30
    }
}

#[cfg(not(unix))]
pub fn physical_memory() -> u64 {
    8 << 30
}

#[cfg(target_os = "linux")]
fn resident_memory() -> Option<u64> {
    let statm = std::fs::read_to_string("/proc/self/statm").ok()?;
    let pages: u64 = statm.split_whitespace().nth(1)?.parse().ok()?;
    // SAFETY: sysconf has no preconditions
    let page_size = unsafe { libc::sysconf(libc::_SC_PAGESIZE) };
    (page_size > 0).then(|| pages * page_size as u64)
}

#[cfg(not(target_os = "linux"))]
fn resident_memory() -> Option<u64> {
    None
}

/// What the scheduler is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum SchedulerState {
    Idle = 0,
    Flushing = 1,
    Merging = 2,
}

impl SchedulerState {
    fn from_u8(v: u8) -> Self {
        match v {
            1 => Self::Flushing,
            2 => Self::Merging,
            _ => Self::Idle,
        }
    }

    fn label(self) -> &'static str {
        match self {
            Self::Idle => "idle",
            Self::Flushing => "append",
            Self::Merging => "merge",
        }
    }
}

/// A flush or merge callback. Must not call back into the scheduler.
pub type Callback = Arc<dyn Fn() -> Result<()> + Send + Sync>;

struct Registration {
    append: Callback,
    merge: Callback,
}

/// Outcome of one append or merge pass
#[derive(Debug, Default)]
pub struct PassReport {
    pub callbacks: usize,
    pub errors: Vec<Error>,
}

impl PassReport {
    fn into_result(self, kind: SchedulerState) -> Result<usize> {
        let Some(first) = self.errors.first() else {
            return Ok(self.callbacks);
        };
        Err(Error::task(format!(
            "{} of {} {} callbacks failed, first: {}",
            self.errors.len(),
            self.callbacks,
            kind.label(),
            first
        )))
    }
}

struct IdleOnDrop<'a>(&'a AtomicU8);

impl Drop for IdleOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(SchedulerState::Idle as u8, Ordering::SeqCst);
    }
}

struct Shared {
    config: MergeConfig,
    probe: Box<dyn MemoryProbe>,
    pool: rayon::ThreadPool,
    state: AtomicU8,
    running: AtomicBool,
    next_id: AtomicU64,
    registry: Mutex<BTreeMap<u64, Registration>>,
    /// Serializes passes between the control loop and explicit requests
    pass_lock: Mutex<()>,
    /// Bytes released by append passes since the last merge pass
    flushed_bytes: AtomicU64,
    failures: Mutex<Vec<Error>>,
}

impl Shared {
    fn state(&self) -> SchedulerState {
        SchedulerState::from_u8(self.state.load(Ordering::SeqCst))
    }

    fn wait_for_idle(&self) {
        while self.state() != SchedulerState::Idle {
            thread::sleep(Duration::from_millis(1));
        }
    }

    fn run_pass(&self, kind: SchedulerState) -> PassReport {
        let _pass = self.pass_lock.lock();
        self.state.store(kind as u8, Ordering::SeqCst);
        // back to idle even if a callback panics
        let idle = IdleOnDrop(&self.state);
        if self.config.settle_ms > 0 {
            thread::sleep(Duration::from_millis(self.config.settle_ms));
        }

        let callbacks: Vec<Callback> = self
            .registry
            .lock()
            .values()
            .map(|r| match kind {
                SchedulerState::Merging => r.merge.clone(),
                _ => r.append.clone(),
            })
            .collect();

        let before = self.probe.allocated();
        let results: Vec<Result<()>> =
            self.pool.install(|| callbacks.par_iter().map(|cb| cb()).collect());
        let after = self.probe.allocated();

        match kind {
            SchedulerState::Merging => self.flushed_bytes.store(0, Ordering::SeqCst),
            _ => {
                self.flushed_bytes
                    .fetch_add(before.saturating_sub(after), Ordering::SeqCst);
            }
        }
        drop(idle);

        let errors: Vec<Error> = results.into_iter().filter_map(|r| r.err()).collect();
        info!(
            "{} pass: {} callbacks, {} failed, memory {} -> {} of {}",
            kind.label(),
            callbacks.len(),
            errors.len(),
            before,
            after,
            self.probe.total()
        );
        PassReport {
            callbacks: callbacks.len(),
            errors,
        }
    }

    /// One control loop step; returns the passes it ran
    fn poll(&self) -> Vec<SchedulerState> {
        let mut ran = Vec::new();
        let total = self.probe.total() as f64;

        let allocated = self.probe.allocated();
        if allocated as f64 > total * self.config.append_fraction {
            debug!("memory {} over append limit, flushing", allocated);
            self.record(self.run_pass(SchedulerState::Flushing));
            ran.push(SchedulerState::Flushing);
        }

        let flushed = self.flushed_bytes.load(Ordering::SeqCst);
        if flushed as f64 > total * self.config.merge_multiple * self.config.merge_fraction {
            debug!("{} bytes flushed since last merge, merging", flushed);
            self.record(self.run_pass(SchedulerState::Merging));
            ran.push(SchedulerState::Merging);
        }
        ran
    }

    fn record(&self, report: PassReport) {
        for e in &report.errors {
            error!("scheduled pass failed: {}", e);
        }
        self.failures.lock().extend(report.errors);
    }
}

/// Coordinates flushes and merges of all active shard builders
pub struct MergeScheduler {
    shared: Arc<Shared>,
    thread: Mutex<Option<JoinHandle<()>>>,
}

impl MergeScheduler {
    /// Scheduler running callbacks on `threads` workers (0 = CPU count)
    pub fn new(config: MergeConfig, probe: Box<dyn MemoryProbe>, threads: usize) -> Result<Self> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("shardex-merge-{}", i))
            .build()?;

        Ok(Self {
            shared: Arc::new(Shared {
                config,
                probe,
                pool,
                state: AtomicU8::new(SchedulerState::Idle as u8),
                running: AtomicBool::new(false),
                next_id: AtomicU64::new(0),
                registry: Mutex::new(BTreeMap::new()),
                pass_lock: Mutex::new(()),
                flushed_bytes: AtomicU64::new(0),
                failures: Mutex::new(Vec::new()),
            }),
            thread: Mutex::new(None),
        })
    }

    pub fn state(&self) -> SchedulerState {
        self.shared.state()
    }

    pub fn num_registered(&self) -> usize {
        self.shared.registry.lock().len()
    }

    /// Register a builder's callbacks; waits while a pass is running
    pub fn register(&self, append: Callback, merge: Callback) -> u64 {
        self.wait_for_merges();
        let _pass = self.shared.pass_lock.lock();
        let id = self.shared.next_id.fetch_add(1, Ordering::SeqCst);
        self.shared
            .registry
            .lock()
            .insert(id, Registration { append, merge });
        id
    }

    pub fn deregister(&self, id: u64) -> bool {
        self.wait_for_merges();
        let _pass = self.shared.pass_lock.lock();
        self.shared.registry.lock().remove(&id).is_some()
    }

    /// Block until no append or merge pass is in progress.
    /// Never call this while holding a lock a callback needs.
    pub fn wait_for_merges(&self) {
        self.shared.wait_for_idle();
    }

    /// Run every appender now; returns the number of callbacks run
    pub fn request_flush(&self) -> Result<usize> {
        self.shared
            .run_pass(SchedulerState::Flushing)
            .into_result(SchedulerState::Flushing)
    }

    /// Run every merger now; returns the number of callbacks run
    pub fn request_merge(&self) -> Result<usize> {
        self.shared
            .run_pass(SchedulerState::Merging)
            .into_result(SchedulerState::Merging)
    }

    /// Run a single control loop step on the calling thread
    pub fn poll(&self) -> Vec<SchedulerState> {
        self.shared.poll()
    }

    /// Start the background control loop. A second call is a no-op.
    pub fn start(&self) -> Result<()> {
        let mut thread = self.thread.lock();
        if thread.is_some() {
            return Ok(());
        }

        self.shared.running.store(true, Ordering::SeqCst);
        let shared = Arc::clone(&self.shared);
        let interval = Duration::from_millis(self.shared.config.poll_interval_ms.max(1));
        let handle = thread::Builder::new()
            .name("shardex-scheduler".into())
            .spawn(move || {
                while shared.running.load(Ordering::SeqCst) {
                    thread::sleep(interval);
                    shared.poll();
                }
            })?;
        *thread = Some(handle);
        Ok(())
    }

    pub fn is_running(&self) -> bool {
        self.shared.running.load(Ordering::SeqCst)
    }

    fn stop(&self) {
        self.shared.running.store(false, Ordering::SeqCst);
        if let Some(handle) = self.thread.lock().take() {
            let _ = handle.join();
        }
    }

    /// Failures of passes started by the control loop since the last call
    pub fn take_failures(&self) -> Vec<Error> {
        std::mem::take(&mut *self.shared.failures.lock())
    }

    /// Stop the control loop, then flush and merge everything registered.
    /// The merge pass runs even when the flush pass fails; the first
    /// error is returned.
    pub fn shutdown(&self) -> Result<()> {
        self.stop();
        let flushed = self.request_flush();
        let merged = self.request_merge();
        flushed?;
        merged?;
        Ok(())
    }
}

impl Drop for MergeScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
