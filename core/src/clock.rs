//! Run clock: the injected reference date, the caller's deadline and the
//! shared cancel flag.
//!
//! Long computations (k-search, Monte Carlo, time-series fits) call
//! `checkpoint()` between units of work. Once the deadline passes or the
//! flag is raised every checkpoint returns `Cancelled`, and the engine
//! marks that section unavailable.

use crate::error::{AnalyticsError, AnalyticsResult};
use chrono::NaiveDate;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

#[derive(Debug, Clone)]
pub struct RunClock {
    pub reference_date: NaiveDate,
    deadline:           Option<Instant>,
    cancelled:          Arc<AtomicBool>,
}

/// Lets another thread stop a running analysis.
#[derive(Debug, Clone)]
pub struct CancelHandle {
    cancelled: Arc<AtomicBool>,
}

impl CancelHandle {
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }
}

impl RunClock {
    pub fn new(reference_date: NaiveDate) -> Self {
        Self {
            reference_date,
            deadline: None,
            cancelled: Arc::new(AtomicBool::new(false)),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.deadline = Instant::now().checked_add(timeout);
        self
    }

    /// Share an externally owned cancel flag.
    pub fn with_handle(mut self, handle: &CancelHandle) -> Self {
        self.cancelled = Arc::clone(&handle.cancelled);
        self
    }

    pub fn handle(&self) -> CancelHandle {
        CancelHandle { cancelled: Arc::clone(&self.cancelled) }
    }

    pub fn new_handle() -> CancelHandle {
        CancelHandle { cancelled: Arc::new(AtomicBool::new(false)) }
    }

    pub fn is_cancelled(&self) -> bool {
        if self.cancelled.load(Ordering::Relaxed) {
            return true;
        }
        matches!(self.deadline, Some(d) if Instant::now() >= d)
    }

    pub fn checkpoint(&self, stage: &'static str) -> AnalyticsResult<()> {
        if self.is_cancelled() {
            log::warn!("{stage}: cancelled (deadline passed or cancel requested)");
            return Err(AnalyticsError::Cancelled { stage });
        }
        Ok(())
    }

    /// Whole days from `date` to the reference date. Negative when `date`
    /// lies after it.
    pub fn days_since(&self, date: NaiveDate) -> i64 {
        (self.reference_date - date).num_days()
    }
}
