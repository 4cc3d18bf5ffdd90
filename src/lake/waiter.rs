//! Pipeline completion waiter.
//!
//! Polls a pipeline at a fixed interval until it reports a terminal status
//! or the deadline passes. Sleeps go through a [`Clock`] and are woken early
//! by a [`CancelToken`], so a stuck pipeline never pins the caller for the
//! full deadline.
//!
//! Loop shape, per iteration:
//!
//! 1. cancelled? -> `Cancelled`
//! 2. elapsed >= deadline? -> `PipelineTimeout`
//! 3. poll; terminal status -> return it
//! 4. sleep `min(interval, remaining)`; woken by cancel -> `Cancelled`

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant};

use crossbeam_channel::{Receiver, RecvTimeoutError, Sender, bounded};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use super::client::LakeClient;
use super::types::{Pipeline, PipelineStatus};
use super::{LakeError, LakeResult};

pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);
pub const DEFAULT_MAX_WAIT: Duration = Duration::from_secs(1800);

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Shared cancellation flag with a wakeable timed wait.
///
/// Cancelling drops the only sender, which disconnects every receiver and
/// wakes all pending [`CancelToken::wait_timeout`] calls at once.
#[derive(Clone)]
pub struct CancelToken {
    inner: Arc<CancelInner>,
}

struct CancelInner {
    cancelled: AtomicBool,
    sender: Mutex<Option<Sender<()>>>,
    receiver: Receiver<()>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (tx, rx) = bounded(0);
        Self {
            inner: Arc::new(CancelInner {
                cancelled: AtomicBool::new(false),
                sender: Mutex::new(Some(tx)),
                receiver: rx,
            }),
        }
    }

    /// Idempotent.
    pub fn cancel(&self) {
        self.inner.cancelled.store(true, Ordering::SeqCst);
        self.inner.sender.lock().take();
    }

    pub fn is_cancelled(&self) -> bool {
        self.inner.cancelled.load(Ordering::SeqCst)
    }

    /// Block for up to `timeout`. Returns true if cancelled.
    pub fn wait_timeout(&self, timeout: Duration) -> bool {
        if self.is_cancelled() {
            return true;
        }
        match self.inner.receiver.recv_timeout(timeout) {
            Err(RecvTimeoutError::Disconnected) => true,
            Err(RecvTimeoutError::Timeout) | Ok(()) => self.is_cancelled(),
        }
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for CancelToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CancelToken")
            .field("cancelled", &self.is_cancelled())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Clock
// ---------------------------------------------------------------------------

pub trait Clock {
    /// Monotonic time since an arbitrary origin.
    fn now(&self) -> Duration;

    /// Sleep for `duration` unless cancelled first. Returns true if cancelled.
    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool;
}

#[derive(Debug, Clone, Copy)]
pub struct SystemClock {
    origin: Instant,
}

impl SystemClock {
    pub fn new() -> Self {
        Self {
            origin: Instant::now(),
        }
    }
}

impl Default for SystemClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for SystemClock {
    fn now(&self) -> Duration {
        self.origin.elapsed()
    }

    fn sleep(&self, duration: Duration, cancel: &CancelToken) -> bool {
        cancel.wait_timeout(duration)
    }
}

// ---------------------------------------------------------------------------
// Status source
// ---------------------------------------------------------------------------

pub trait PipelineStatusSource {
    fn pipeline_status(&self, pipeline_id: i64) -> LakeResult<Pipeline>;
}

impl PipelineStatusSource for LakeClient {
    fn pipeline_status(&self, pipeline_id: i64) -> LakeResult<Pipeline> {
        self.get_pipeline(pipeline_id)
    }
}

// ---------------------------------------------------------------------------
// Policy
// ---------------------------------------------------------------------------

/// What a transport failure during polling does to the loop.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportErrorPolicy {
    /// Surface `RemoteUnavailable` immediately.
    #[default]
    Abort,
    /// Log and keep polling until the deadline.
    Tolerate,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitPolicy {
    pub interval: Duration,
    pub deadline: Duration,
    pub on_transport_error: TransportErrorPolicy,
}

impl Default for WaitPolicy {
    fn default() -> Self {
        Self {
            interval: DEFAULT_POLL_INTERVAL,
            deadline: DEFAULT_MAX_WAIT,
            on_transport_error: TransportErrorPolicy::Abort,
        }
    }
}

impl WaitPolicy {
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = deadline;
        self
    }
}

// ---------------------------------------------------------------------------
// Waiter
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct WaitOutcome {
    /// Last observed pipeline record.
    pub pipeline: Pipeline,
    /// Terminal status: `Completed` or `Failed`.
    pub status: PipelineStatus,
    pub polls: u32,
    pub elapsed: Duration,
}

pub struct PipelineWaiter<'a, S: ?Sized, C: ?Sized> {
    source: &'a S,
    clock: &'a C,
    policy: WaitPolicy,
}

impl<'a, S, C> PipelineWaiter<'a, S, C>
where
    S: PipelineStatusSource + ?Sized,
    C: Clock + ?Sized,
{
    pub fn new(source: &'a S, clock: &'a C, policy: WaitPolicy) -> Self {
        Self {
            source,
            clock,
            policy,
        }
    }

    pub fn policy(&self) -> &WaitPolicy {
        &self.policy
    }

    /// Wait for `pipeline_id` to reach a terminal status.
    ///
    /// A `Failed` terminal status is returned as `Ok`; deciding what a failed
    /// pipeline means is the caller's job.
    pub fn wait(&self, pipeline_id: i64, cancel: &CancelToken) -> LakeResult<WaitOutcome> {
        let started = self.clock.now();
        let deadline = self.policy.deadline;
        let mut polls = 0u32;
        let mut last_transport_error: Option<String> = None;

        info!(
            pipeline_id,
            interval_secs = self.policy.interval.as_secs(),
            deadline_secs = deadline.as_secs(),
            "waiting for pipeline"
        );

        loop {
            if cancel.is_cancelled() {
                info!(pipeline_id, polls, "wait cancelled");
                return Err(LakeError::Cancelled { pipeline_id });
            }

            let elapsed = self.clock.now().saturating_sub(started);
            if elapsed >= deadline {
                warn!(
                    pipeline_id,
                    polls,
                    deadline_secs = deadline.as_secs(),
                    last_transport_error = last_transport_error.as_deref(),
                    "pipeline wait deadline exceeded"
                );
                return Err(LakeError::PipelineTimeout {
                    pipeline_id,
                    deadline,
                });
            }

            polls += 1;
            match self.source.pipeline_status(pipeline_id) {
                Ok(pipeline) => {
                    let status = pipeline.status();
                    debug!(
                        pipeline_id,
                        poll = polls,
                        raw = %pipeline.status,
                        %status,
                        "polled pipeline"
                    );
                    if status.is_terminal() {
                        let elapsed = self.clock.now().saturating_sub(started);
                        info!(
                            pipeline_id,
                            %status,
                            polls,
                            elapsed_secs = elapsed.as_secs(),
                            "pipeline finished"
                        );
                        return Ok(WaitOutcome {
                            pipeline,
                            status,
                            polls,
                            elapsed,
                        });
                    }
                    info!(pipeline_id, %status, "pipeline still running");
                }
                Err(err) => match (self.policy.on_transport_error, err) {
                    (TransportErrorPolicy::Tolerate, LakeError::RemoteUnavailable(msg)) => {
                        warn!(pipeline_id, poll = polls, error = %msg, "transient poll failure");
                        last_transport_error = Some(msg);
                    }
                    (_, err) => return Err(err),
                },
            }

            let remaining = deadline.saturating_sub(self.clock.now().saturating_sub(started));
            if remaining.is_zero() {
                continue;
            }
            if self.clock.sleep(self.policy.interval.min(remaining), cancel) {
                info!(pipeline_id, polls, "wait cancelled");
                return Err(LakeError::Cancelled { pipeline_id });
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
