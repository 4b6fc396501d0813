//! Bounded polling and fixed-attempt retry
//!
//! Every remote condition (resource exists, phase reached, pod count
//! satisfied, catalog ready) is observed by repeated reads. Timeout is the
//! default failure mode: a poll that runs out of time yields
//! `Error::ResourceWrongStatus` carrying what was expected and what was last
//! seen. All sleeping goes through the injected [`Clock`].

use crate::domain::ports::{Clock, ClockRef};
use crate::error::{Error, Result};
use std::future::Future;
use std::time::Duration;
use tracing::{debug, error, warn};

// =============================================================================
// Probe Result
// =============================================================================

/// Outcome of a single observation
#[derive(Debug, Clone, PartialEq)]
pub enum Probe<T> {
    /// Condition holds, carry the observed value out of the poll
    Ready(T),
    /// Condition does not hold yet; the string describes what was observed
    Pending(String),
}

impl Probe<()> {
    pub fn check(ok: bool, observed: impl Into<String>) -> Self {
        if ok {
            Probe::Ready(())
        } else {
            Probe::Pending(observed.into())
        }
    }
}

// =============================================================================
// Poll Target
// =============================================================================

/// What a poll is waiting for, used in logs and timeout errors
#[derive(Debug, Clone)]
pub struct PollTarget {
    pub kind: String,
    pub name: String,
    pub expected: String,
}

impl PollTarget {
    pub fn new(kind: impl Into<String>, name: impl Into<String>, expected: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            name: name.into(),
            expected: expected.into(),
        }
    }

    fn timed_out(&self, observed: String, waited: Duration) -> Error {
        Error::ResourceWrongStatus {
            kind: self.kind.clone(),
            name: self.name.clone(),
            expected: self.expected.clone(),
            observed,
            waited,
        }
    }
}

// =============================================================================
// Poller
// =============================================================================

/// Polls a probe at a fixed interval until it reports ready or time runs out
#[derive(Clone)]
pub struct Poller {
    clock: ClockRef,
}

impl Poller {
    pub fn new(clock: ClockRef) -> Self {
        Self { clock }
    }

    pub fn clock(&self) -> &dyn Clock {
        self.clock.as_ref()
    }

    /// Poll `probe` every `interval` until it is ready or `timeout` elapses.
    ///
    /// Not-found and transient API errors (429, 5xx, transport) count as
    /// "not ready yet"; any other error aborts the poll immediately.
    pub async fn until<T, F, Fut>(
        &self,
        target: &PollTarget,
        interval: Duration,
        timeout: Duration,
        mut probe: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Probe<T>>>,
    {
        let start = self.clock.now();
        let mut observed = String::from("<nothing>");

        loop {
            match probe().await {
                Ok(Probe::Ready(value)) => return Ok(value),
                Ok(Probe::Pending(seen)) => observed = seen,
                Err(e) if e.is_not_found() || e.is_transient() => {
                    debug!("{}/{}: probe failed: {}", target.kind, target.name, e);
                    observed = e.to_string();
                }
                Err(e) => return Err(e),
            }

            let waited = self.clock.now().saturating_duration_since(start);
            if waited >= timeout {
                warn!(
                    "Timed out after {:?} waiting for {}/{} to be {} (last: {})",
                    waited, target.kind, target.name, target.expected, observed
                );
                return Err(target.timed_out(observed, waited));
            }

            debug!(
                "Waiting for {}/{} to be {} (currently {})",
                target.kind, target.name, target.expected, observed
            );
            self.clock.sleep(interval).await;
        }
    }

    /// Probe at most `attempts` times, sleeping `interval` between misses.
    ///
    /// Succeeds on the first attempt whose probe is ready, so a condition that
    /// first holds on attempt N returns after exactly N probes.
    pub async fn attempts<T, F, Fut>(
        &self,
        target: &PollTarget,
        attempts: u32,
        interval: Duration,
        mut probe: F,
    ) -> Result<T>
    where
        F: FnMut() -> Fut,
        Fut: Future<Output = Result<Probe<T>>>,
    {
        let start = self.clock.now();
        let mut observed = String::from("<nothing>");

        for attempt in 1..=attempts {
            match probe().await? {
                Probe::Ready(value) => {
                    debug!("{}/{} ready after {} attempt(s)", target.kind, target.name, attempt);
                    return Ok(value);
                }
                Probe::Pending(seen) => {
                    debug!(
                        "{}/{} attempt {}/{}: {}",
                        target.kind, target.name, attempt, attempts, seen
                    );
                    observed = seen;
                }
            }
            if attempt < attempts {
                self.clock.sleep(interval).await;
            }
        }

        let waited = self.clock.now().saturating_duration_since(start);
        Err(target.timed_out(observed, waited))
    }
}

// =============================================================================
// Fixed-Attempt Retry
// =============================================================================

/// Retry a whole operation a fixed number of times with a constant delay.
///
/// Only errors classified as retryable are retried; the last error is
/// returned once `tries` is exhausted.
pub async fn retry<T, F, Fut>(
    clock: &dyn Clock,
    operation_name: &str,
    tries: u32,
    delay: Duration,
    mut operation: F,
) -> Result<T>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T>>,
{
    let mut attempt = 0u32;

    loop {
        attempt += 1;

        match operation().await {
            Ok(result) => return Ok(result),
            Err(e) if e.is_retryable() && attempt < tries => {
                warn!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    delay_ms = delay.as_millis(),
                    "Operation failed, retrying"
                );
                clock.sleep(delay).await;
            }
            Err(e) => {
                error!(
                    operation = %operation_name,
                    attempt = attempt,
                    error = %e,
                    "Operation failed"
                );
                return Err(e);
            }
        }
    }
}
