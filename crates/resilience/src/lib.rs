use serde::{Deserialize, Serialize};
use std::fmt;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{error, warn};

/// Delays to wait before each retry. An empty schedule means a single attempt.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Backoff {
    delays_ms: Vec<u64>,
}

impl Backoff {
    pub fn from_secs(delays: &[u64]) -> Self {
        Self {
            delays_ms: delays.iter().map(|secs| secs * 1000).collect(),
        }
    }

    pub fn from_millis(delays: &[u64]) -> Self {
        Self {
            delays_ms: delays.to_vec(),
        }
    }

    /// Delay before retry number `retry` (zero-based), if that retry exists.
    pub fn delay(&self, retry: usize) -> Option<Duration> {
        self.delays_ms.get(retry).copied().map(Duration::from_millis)
    }

    pub fn retries(&self) -> usize {
        self.delays_ms.len()
    }

    pub fn max_attempts(&self) -> usize {
        self.retries() + 1
    }

    pub fn total(&self) -> Duration {
        Duration::from_millis(self.delays_ms.iter().sum())
    }
}

/// Key/value pairs identifying what an attempt was working on. Only ever
/// rendered into log lines.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RetryContext {
    entries: Vec<(&'static str, String)>,
}

impl RetryContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, key: &'static str, value: impl Into<String>) -> Self {
        let value = value.into();
        match self.entries.iter_mut().find(|(existing, _)| *existing == key) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((key, value)),
        }
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(existing, _)| *existing == key)
            .map(|(_, value)| value.as_str())
    }
}

impl fmt::Display for RetryContext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (index, (key, value)) in self.entries.iter().enumerate() {
            if index > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{}: {}", key, value)?;
        }
        Ok(())
    }
}

/// Bounded retry around a fallible step: which errors are retried, how long
/// to wait before each retry, and (per call) what to repair in between.
pub struct RetryPolicy<E> {
    name: &'static str,
    backoff: Backoff,
    trigger: fn(&E) -> bool,
}

impl<E: fmt::Display> RetryPolicy<E> {
    pub fn new(name: &'static str, backoff: Backoff, trigger: fn(&E) -> bool) -> Self {
        Self {
            name,
            backoff,
            trigger,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn backoff(&self) -> &Backoff {
        &self.backoff
    }

    pub fn triggers_on(&self, error: &E) -> bool {
        (self.trigger)(error)
    }

    /// Runs `op` against `target` until it succeeds, fails with an error the
    /// policy does not handle, or the schedule is exhausted. Before every
    /// retry the policy waits out the next delay and then runs `recover`; an
    /// error from `recover` ends the run immediately.
    pub async fn run<S, T, Op, Rec>(
        &self,
        target: &mut S,
        context: &RetryContext,
        mut recover: Rec,
        mut op: Op,
    ) -> Result<T, E>
    where
        Op: FnMut(&mut S) -> Result<T, E>,
        Rec: FnMut(&mut S) -> Result<(), E>,
    {
        let mut retry = 0usize;
        loop {
            let error = match op(&mut *target) {
                Ok(value) => return Ok(value),
                Err(error) => error,
            };

            if !self.triggers_on(&error) {
                return Err(error);
            }

            let Some(delay) = self.backoff.delay(retry) else {
                error!(
                    "{} policy gave up after {} attempts - {} - {}",
                    self.name,
                    retry + 1,
                    context,
                    error
                );
                return Err(error);
            };

            retry += 1;
            warn!(
                "Retry attempt: {} ({} policy, waiting {:?}) - {} - {}",
                retry, self.name, delay, context, error
            );
            sleep(delay).await;
            recover(&mut *target)?;
        }
    }

    /// Like [`run`](Self::run) without recovery, but an exhausted schedule
    /// degrades to `Ok(None)` instead of an error.
    pub async fn run_or_fallback<S, T, Op>(
        &self,
        target: &mut S,
        context: &RetryContext,
        op: Op,
    ) -> Result<Option<T>, E>
    where
        Op: FnMut(&mut S) -> Result<T, E>,
    {
        match self.run(target, context, |_| Ok(()), op).await {
            Ok(value) => Ok(Some(value)),
            Err(error) if self.triggers_on(&error) => {
                warn!("{} policy fell back to no result - {}", self.name, context);
                Ok(None)
            }
            Err(error) => Err(error),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ResilienceConfig {
    pub navigation: Backoff,
    pub element_wait: Backoff,
    pub extraction: Backoff,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            navigation: Backoff::from_secs(&[10, 60, 120]),
            element_wait: Backoff::from_secs(&[10, 20, 60]),
            extraction: Backoff::from_secs(&[2, 3, 4]),
        }
    }
}
