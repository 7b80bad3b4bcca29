//! Per-connection flow tracking
//!
//! Counts in-flight jobs and guards resource loads so a second load trigger while one
//! is running is dropped instead of duplicating work.

use std::sync::atomic::{AtomicU8, AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum LoadState {
    Idle = 0,
    Loading = 1,
    Ready = 2,
}

impl LoadState {
    fn from_raw(raw: u8) -> Self {
        match raw {
            1 => LoadState::Loading,
            2 => LoadState::Ready,
            _ => LoadState::Idle,
        }
    }
}

#[derive(Debug, Default)]
pub struct FlowTracker {
    jobs: Arc<AtomicUsize>,
    load: AtomicU8,
}

impl FlowTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a running job; the count drops again when the guard is dropped
    pub fn job(&self) -> JobGuard {
        self.jobs.fetch_add(1, Ordering::SeqCst);
        JobGuard {
            jobs: self.jobs.clone(),
        }
    }

    pub fn running_jobs(&self) -> usize {
        self.jobs.load(Ordering::SeqCst)
    }

    pub fn load_state(&self) -> LoadState {
        LoadState::from_raw(self.load.load(Ordering::SeqCst))
    }

    /// Move to `Loading` unless a load is already running
    pub fn try_begin_load(&self) -> bool {
        let mut current = self.load.load(Ordering::SeqCst);
        loop {
            if current == LoadState::Loading as u8 {
                debug!("Load already running, trigger dropped");
                return false;
            }
            match self.load.compare_exchange(
                current,
                LoadState::Loading as u8,
                Ordering::SeqCst,
                Ordering::SeqCst,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub fn finish_load(&self, success: bool) {
        let next = if success {
            LoadState::Ready
        } else {
            LoadState::Idle
        };
        self.load.store(next as u8, Ordering::SeqCst);
    }

    pub fn reset(&self) {
        self.load.store(LoadState::Idle as u8, Ordering::SeqCst);
    }
}

pub struct JobGuard {
    jobs: Arc<AtomicUsize>,
}

impl Drop for JobGuard {
    fn drop(&mut self) {
        self.jobs.fetch_sub(1, Ordering::SeqCst);
    }
}
