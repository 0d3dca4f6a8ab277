use rand::Rng;
use std::time::{Duration, Instant};
use tonic::Code;

/// Configuration for retry behavior with exponential backoff and jitter.
///
/// Shared by row scans and mutation batches. The delay before retry `n` is
/// `initial_backoff_ms * backoff_multiplier^n` plus a random jitter of up to
/// `max_jitter_ms`, never more than `max_backoff_ms`.
#[derive(Debug, Clone, PartialEq)]
pub struct RetryPolicy {
    /// Maximum number of retries (not including the initial attempt)
    pub max_retries: u32,

    /// Initial backoff duration in milliseconds
    pub initial_backoff_ms: u64,

    /// Maximum backoff duration in milliseconds
    pub max_backoff_ms: u64,

    /// Multiplier applied to backoff after each retry
    pub backoff_multiplier: f64,

    /// Upper bound of the uniform random jitter added to each delay
    pub max_jitter_ms: u64,

    /// No retry is started once this much time has passed since the
    /// operation began. `None` bounds only the number of retries.
    pub total_timeout: Option<Duration>,
}

impl RetryPolicy {
    /// Creates a new retry policy with the specified parameters.
    pub fn new(
        max_retries: u32,
        initial_backoff_ms: u64,
        max_backoff_ms: u64,
        backoff_multiplier: f64,
    ) -> Self {
        Self {
            max_retries,
            initial_backoff_ms,
            max_backoff_ms,
            backoff_multiplier,
            max_jitter_ms: 100,
            total_timeout: None,
        }
    }

    /// Returns a policy with no retries.
    pub fn no_retry() -> Self {
        Self {
            max_retries: 0,
            initial_backoff_ms: 0,
            max_backoff_ms: 0,
            backoff_multiplier: 1.0,
            max_jitter_ms: 0,
            total_timeout: None,
        }
    }

    /// Returns a policy with tiny delays, for tests and local emulators.
    pub fn fast() -> Self {
        Self {
            max_retries: 3,
            initial_backoff_ms: 1,
            max_backoff_ms: 10,
            backoff_multiplier: 2.0,
            max_jitter_ms: 0,
            total_timeout: None,
        }
    }

    /// Default policy for streaming row reads.
    pub fn read_rows() -> Self {
        Self::new(10, 10, 60_000, 2.0)
    }

    /// Default policy for batched mutations.
    pub fn mutate_rows() -> Self {
        Self::new(3, 10, 60_000, 2.0)
    }

    /// Sets the jitter bound.
    pub fn with_max_jitter_ms(mut self, max_jitter_ms: u64) -> Self {
        self.max_jitter_ms = max_jitter_ms;
        self
    }

    /// Sets the overall deadline of an operation, retries included.
    pub fn with_total_timeout(mut self, total_timeout: Duration) -> Self {
        self.total_timeout = Some(total_timeout);
        self
    }

    /// Returns true if another attempt is allowed after `failures` failed ones.
    pub fn allows_retry(&self, failures: u32) -> bool {
        failures <= self.max_retries
    }

    /// Returns true once an operation that began at `started` has used up
    /// its total timeout.
    pub fn deadline_passed(&self, started: Instant) -> bool {
        self.total_timeout
            .is_some_and(|timeout| started.elapsed() >= timeout)
    }

    /// Deterministic part of the backoff for a given retry number.
    pub fn base_backoff(&self, attempt: u32) -> Duration {
        let exponent = attempt.min(i32::MAX as u32) as i32;
        let backoff_ms = (self.initial_backoff_ms as f64 * self.backoff_multiplier.powi(exponent))
            .min(self.max_backoff_ms as f64) as u64;
        Duration::from_millis(backoff_ms)
    }

    /// Backoff for a given retry number with an explicit jitter, capped at the maximum.
    pub fn backoff_with_jitter(&self, attempt: u32, jitter_ms: u64) -> Duration {
        let base = self.base_backoff(attempt).as_millis() as u64;
        Duration::from_millis(base.saturating_add(jitter_ms).min(self.max_backoff_ms))
    }

    /// Calculates the jittered backoff duration for a given retry number.
    pub fn backoff_duration(&self, attempt: u32) -> Duration {
        let jitter_ms = if self.max_jitter_ms == 0 {
            0
        } else {
            rand::thread_rng().gen_range(0..=self.max_jitter_ms)
        };
        self.backoff_with_jitter(attempt, jitter_ms)
    }
}

impl Default for RetryPolicy {
    /// Returns the mutation policy, the more conservative of the two presets.
    fn default() -> Self {
        Self::mutate_rows()
    }
}

/// Status codes that mark an attempt (or a single mutation entry) as transient.
///
/// Stream attempts additionally retry INTERNAL resets, see
/// [`is_rst_stream_message`]. Mutation entries retry on these codes only.
pub fn is_retryable_code(code: Code) -> bool {
    matches!(
        code,
        Code::DeadlineExceeded | Code::ResourceExhausted | Code::Aborted | Code::Unavailable
    )
}

/// True if an INTERNAL status message describes an HTTP/2 stream reset.
pub fn is_rst_stream_message(message: &str) -> bool {
    let message = message.to_ascii_lowercase();
    message.contains("rst_stream") || message.contains("rst stream")
}
