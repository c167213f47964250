//! Frame coalescing
//!
//! Inbound frames can arrive far faster than a consumer can redraw. The
//! coalescer keeps only the newest frame and asks a [`TickScheduler`] for a
//! single flush; frames landing before that flush replace the pending one.

use std::sync::Arc;
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::warn;

use crate::orderbook::{normalize_frame, NormalizedBook};
use crate::parser::DepthFrame;

/// One display frame at 60 Hz
pub const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_millis(16);

pub type TickTask = Box<dyn FnOnce() + Send>;

/// Cancellation handle for a scheduled tick
pub trait TickHandle: Send {
    fn cancel(&self);
}

/// Source of flush ticks
///
/// A UI host can drive flushes from its frame clock; without one,
/// [`IntervalTicker`] runs each task after a fixed delay.
///
/// `schedule` is called with the store lock held and must not run the task
/// before returning.
#[cfg_attr(test, mockall::automock)]
pub trait TickScheduler: Send + Sync {
    fn schedule(&self, task: TickTask) -> Box<dyn TickHandle>;
}

/// Fixed-delay ticker on the Tokio runtime
#[derive(Debug, Clone)]
pub struct IntervalTicker {
    interval: Duration,
}

impl IntervalTicker {
    pub fn new(interval: Duration) -> Self {
        Self { interval }
    }
}

impl Default for IntervalTicker {
    fn default() -> Self {
        Self::new(DEFAULT_FLUSH_INTERVAL)
    }
}

struct TaskTickHandle(JoinHandle<()>);

impl TickHandle for TaskTickHandle {
    fn cancel(&self) {
        self.0.abort();
    }
}

/// Handle for a tick that was never started
struct IdleTickHandle;

impl TickHandle for IdleTickHandle {
    fn cancel(&self) {}
}

impl TickScheduler for IntervalTicker {
    fn schedule(&self, task: TickTask) -> Box<dyn TickHandle> {
        let Ok(runtime) = Handle::try_current() else {
            warn!("No Tokio runtime for flush tick, dropping it");
            return Box::new(IdleTickHandle);
        };
        let interval = self.interval;
        Box::new(TaskTickHandle(runtime.spawn(async move {
            sleep(interval).await;
            task();
        })))
    }
}

/// Last-write-wins buffer with at most one pending flush
pub struct FrameCoalescer {
    scheduler: Arc<dyn TickScheduler>,
    depth: usize,
    pending: Option<DepthFrame>,
    scheduled: Option<Box<dyn TickHandle>>,
}

impl FrameCoalescer {
    pub fn new(scheduler: Arc<dyn TickScheduler>, depth: usize) -> Self {
        Self {
            scheduler,
            depth,
            pending: None,
            scheduled: None,
        }
    }

    /// Record `frame` as the pending one
    ///
    /// `on_tick` is handed to the scheduler only when no flush is pending; it
    /// is expected to call [`FrameCoalescer::flush`]. Returns whether a new
    /// tick was scheduled.
    pub fn schedule<F>(&mut self, frame: DepthFrame, on_tick: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        self.pending = Some(frame);
        if self.scheduled.is_some() {
            return false;
        }
        self.scheduled = Some(self.scheduler.schedule(Box::new(on_tick)));
        true
    }

    /// Normalize and hand out the pending frame, at most once per frame
    pub fn flush(&mut self) -> Option<NormalizedBook> {
        self.scheduled = None;
        self.pending
            .take()
            .map(|frame| normalize_frame(&frame, self.depth))
    }

    /// Drop the pending frame and any scheduled tick
    pub fn cancel(&mut self) {
        if let Some(handle) = self.scheduled.take() {
            handle.cancel();
        }
        self.pending = None;
    }

    pub fn is_scheduled(&self) -> bool {
        self.scheduled.is_some()
    }

    pub fn has_pending(&self) -> bool {
        self.pending.is_some()
    }
}
