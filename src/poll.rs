use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;
use std::time::{Duration, Instant};

use crate::error::{Error, Result};
use crate::order::{Order, OrderBackend, OrderKind, OrderStatus};

const CANCEL_CHECK: Duration = Duration::from_millis(100);

/// How long and how often to wait on a server-side job.
///
/// Unbounded by default; set [`PollPolicy::with_max_attempts`] or
/// [`PollPolicy::with_max_elapsed`] to give up with [`Error::PollTimeout`].
/// With `max_elapsed` the sleep before the deadline is cut short, so the last
/// poll happens once `max_elapsed` has passed and the job is given up only
/// after that poll.
#[derive(Debug, Clone)]
pub struct PollPolicy {
    interval: Duration,
    max_attempts: Option<usize>,
    max_elapsed: Option<Duration>,
    cancel: Option<Arc<AtomicBool>>,
}

impl Default for PollPolicy {
    fn default() -> Self {
        Self::new(Duration::from_secs(10))
    }
}

impl PollPolicy {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval,
            max_attempts: None,
            max_elapsed: None,
            cancel: None,
        }
    }

    pub fn with_max_attempts(mut self, attempts: usize) -> Self {
        self.max_attempts = Some(attempts.max(1));
        self
    }

    pub fn with_max_elapsed(mut self, elapsed: Duration) -> Self {
        self.max_elapsed = Some(elapsed);
        self
    }

    /// Polling stops with [`Error::PollCancelled`] once `flag` is set.
    pub fn with_cancel(mut self, flag: Arc<AtomicBool>) -> Self {
        self.cancel = Some(flag);
        self
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    fn cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }

    /// Polls `order` until it completes, fails or pauses.
    ///
    /// Returns the final status (`Complete`, `CompleteWithErrors` or
    /// `Paused`); a failed job becomes [`Error::OrderFailed`] carrying the
    /// backend's messages.
    pub fn wait<B: OrderBackend + ?Sized>(&self, backend: &B, order: &mut Order) -> Result<OrderStatus> {
        if order.kind == OrderKind::WholeGranule {
            return Ok(order.status);
        }

        let started = Instant::now();
        let mut attempts = 0usize;
        loop {
            if self.cancelled() {
                return Err(Error::PollCancelled(order.job_id.clone()));
            }

            attempts += 1;
            let status = backend.poll_status(order)?;
            log::debug!("order {} poll #{}: {}", order.job_id, attempts, status);
            match status {
                OrderStatus::Failed => {
                    return Err(Error::OrderFailed {
                        job_id: order.job_id.clone(),
                        messages: order.messages.clone(),
                    });
                }
                OrderStatus::Paused => {
                    log::info!("order {} is paused; resume it to continue", order.job_id);
                    return Ok(status);
                }
                s if s.is_success() => return Ok(s),
                _ => {}
            }

            let elapsed = started.elapsed();
            let out_of_attempts = self.max_attempts.is_some_and(|max| attempts >= max);
            let out_of_time = self.max_elapsed.is_some_and(|max| elapsed >= max);
            if out_of_attempts || out_of_time {
                return Err(Error::PollTimeout {
                    job_id: order.job_id.clone(),
                    attempts,
                    elapsed,
                });
            }

            let pause = match self.max_elapsed {
                Some(max) => self.interval.min(max - elapsed),
                None => self.interval,
            };
            self.sleep(pause);
            if self.cancelled() {
                return Err(Error::PollCancelled(order.job_id.clone()));
            }
        }
    }

    fn sleep(&self, pause: Duration) {
        if self.cancel.is_none() {
            thread::sleep(pause);
            return;
        }
        let deadline = Instant::now() + pause;
        while !self.cancelled() {
            let now = Instant::now();
            if now >= deadline {
                break;
            }
            thread::sleep(CANCEL_CHECK.min(deadline - now));
        }
    }
}
