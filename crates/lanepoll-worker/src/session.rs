//! Poll session state: the shared stop flag and the countdown latch that forms the
//! stop barrier.
//!
//! A session is created by every `Consumer::poll` call. Lanes read the stop flag at
//! their checkpoints and count the latch down when they retire; `Consumer::stop`
//! waits on the latch.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;

/// Countdown latch initialized to the number of lanes in a session.
///
/// Counts retirements, not flag reads: a lane in the middle of a backend call only
/// counts down after that call completes and it reaches its checkpoint.
#[derive(Debug)]
pub struct CountdownLatch {
    total: usize,
    retired: watch::Sender<usize>,
}

impl CountdownLatch {
    pub fn new(total: usize) -> Self {
        let (retired, _) = watch::channel(0);
        Self { total, retired }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Number of lanes retired so far; never exceeds `total()`
    pub fn retired(&self) -> usize {
        *self.retired.borrow()
    }

    pub fn is_done(&self) -> bool {
        self.retired() >= self.total
    }

    /// Record one retirement and return the updated count.
    pub fn count_down(&self) -> usize {
        let mut count = 0;
        self.retired.send_modify(|retired| {
            if *retired < self.total {
                *retired += 1;
            } else {
                tracing::warn!(total = self.total, "Latch counted down past its lane count");
            }
            count = *retired;
        });
        count
    }

    /// Resolve once every lane has retired
    pub async fn wait(&self) {
        let mut rx = self.retired.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|retired| *retired >= self.total).await;
    }
}

/// Read side of a session's stop flag, handed to lanes and polling strategies.
#[derive(Clone, Debug)]
pub struct StopSignal {
    rx: watch::Receiver<bool>,
    _keepalive: Option<Arc<watch::Sender<bool>>>,
}

impl StopSignal {
    /// A signal that is never raised, for running a polling strategy outside a session
    pub fn never() -> Self {
        let (tx, rx) = watch::channel(false);
        Self {
            rx,
            _keepalive: Some(Arc::new(tx)),
        }
    }

    pub fn is_stop_requested(&self) -> bool {
        *self.rx.borrow()
    }

    /// Sleep for `duration` unless a stop is requested first.
    ///
    /// Returns `true` when the full duration elapsed, `false` when woken by a stop.
    pub async fn sleep(&self, duration: Duration) -> bool {
        if self.is_stop_requested() {
            return false;
        }
        let mut rx = self.rx.clone();
        tokio::select! {
            _ = tokio::time::sleep(duration) => true,
            _ = rx.wait_for(|stopped| *stopped) => false,
        }
    }
}

/// Snapshot of a session's counters
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionState {
    pub lanes_requested: usize,
    pub lanes_stopped: usize,
    pub stop_requested: bool,
}

/// One `poll()`/`stop()` session
#[derive(Debug)]
pub(crate) struct Session {
    stop_tx: watch::Sender<bool>,
    latch: CountdownLatch,
    error_reported: AtomicBool,
    lanes: std::sync::Mutex<Vec<tokio::task::JoinHandle<()>>>,
}

impl Session {
    pub(crate) fn new(lane_count: usize) -> Self {
        let (stop_tx, _) = watch::channel(false);
        Self {
            stop_tx,
            latch: CountdownLatch::new(lane_count),
            error_reported: AtomicBool::new(false),
            lanes: std::sync::Mutex::new(Vec::with_capacity(lane_count)),
        }
    }

    pub(crate) fn signal(&self) -> StopSignal {
        StopSignal {
            rx: self.stop_tx.subscribe(),
            _keepalive: None,
        }
    }

    pub(crate) fn stop_requested(&self) -> bool {
        *self.stop_tx.borrow()
    }

    /// Set the stop flag. Returns `true` only for the call that set it.
    pub(crate) fn request_stop(&self) -> bool {
        self.stop_tx.send_if_modified(|stopped| {
            if *stopped {
                false
            } else {
                *stopped = true;
                true
            }
        })
    }

    /// Claim the session's single error report. Returns `true` only for the first caller.
    pub(crate) fn claim_error_report(&self) -> bool {
        !self.error_reported.swap(true, Ordering::SeqCst)
    }

    pub(crate) fn latch(&self) -> &CountdownLatch {
        &self.latch
    }

    pub(crate) fn is_running(&self) -> bool {
        !self.latch.is_done()
    }

    pub(crate) fn track(&self, handle: tokio::task::JoinHandle<()>) {
        if let Ok(mut lanes) = self.lanes.lock() {
            lanes.retain(|lane| !lane.is_finished());
            lanes.push(handle);
        }
    }

    pub(crate) fn take_handles(&self) -> Vec<tokio::task::JoinHandle<()>> {
        self.lanes
            .lock()
            .map(|mut lanes| std::mem::take(&mut *lanes))
            .unwrap_or_default()
    }

    pub(crate) fn state(&self) -> SessionState {
        SessionState {
            lanes_requested: self.latch.total(),
            lanes_stopped: self.latch.retired(),
            stop_requested: self.stop_requested(),
        }
    }
}
