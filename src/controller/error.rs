//! Error types for the Redis and DormantDatabase controllers

use std::time::Duration;

use thiserror::Error;

use crate::store::StoreError;
use crate::topology::TopologyError;

/// Variants carry the `Error` suffix (`KubeError`, `ValidationError`).
#[allow(clippy::enum_variant_names)]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Kubernetes API error: {0}")]
    KubeError(#[from] kube::Error),

    #[error("Store error: {0}")]
    StoreError(#[from] StoreError),

    #[error("Serialization error: {0}")]
    SerializationError(#[from] serde_json::Error),

    #[error("Missing object key: {0}")]
    MissingObjectKey(&'static str),

    #[error("Validation error: {0}")]
    ValidationError(String),

    /// A dormant record blocks provisioning; needs a human to resolve
    #[error("{0}")]
    FatalMismatch(String),

    #[error("Topology error: {0}")]
    TopologyError(#[from] TopologyError),

    #[error("Transient error (will retry): {0}")]
    TransientError(String),
}

impl Error {
    /// Check if this error is retryable
    pub fn is_retryable(&self) -> bool {
        match self {
            Error::KubeError(e) => match e {
                kube::Error::Api(api_err) => {
                    // Other 4xx answers will not change on retry
                    let code = api_err.code;
                    if (400..500).contains(&code) {
                        return code == 409 || code == 429;
                    }
                    true
                }
                _ => true,
            },
            Error::StoreError(e) => e.is_retryable(),
            Error::TransientError(_) => true,
            Error::ValidationError(_) => false,
            Error::FatalMismatch(_) => false,
            // A timed-out convergence may still settle; the rest is malformed input
            Error::TopologyError(e) => {
                matches!(e, TopologyError::Timeout { .. } | TopologyError::Probe(_))
            }
            Error::SerializationError(_) => false,
            Error::MissingObjectKey(_) => false,
        }
    }
}

pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Exponential backoff configuration
#[derive(Clone, Debug)]
pub struct BackoffConfig {
    /// Initial delay for first retry
    pub initial_delay: Duration,
    /// Maximum delay between retries
    pub max_delay: Duration,
    /// Multiplier for each subsequent retry
    pub multiplier: f64,
    /// Random jitter factor (0.0 to 1.0)
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial_delay: Duration::from_secs(5),
            max_delay: Duration::from_secs(300),
            multiplier: 2.0,
            jitter: 0.1,
        }
    }
}

impl BackoffConfig {
    /// Calculate the backoff delay for a given retry attempt
    pub fn delay_for_attempt(&self, attempt: u32) -> Duration {
        let base_delay_secs =
            self.initial_delay.as_secs_f64() * self.multiplier.powi(attempt.min(32) as i32);

        let jitter_range = base_delay_secs * self.jitter;
        let jitter = rand::random::<f64>() * jitter_range * 2.0 - jitter_range;
        let delay_with_jitter = (base_delay_secs + jitter).max(0.0);

        let capped_delay = delay_with_jitter.min(self.max_delay.as_secs_f64());

        Duration::from_secs_f64(capped_delay)
    }

    /// Non-retryable errors wait the maximum delay so an operator can step in.
    pub fn delay_for_error(&self, error: &Error, attempt: u32) -> Duration {
        if error.is_retryable() {
            self.delay_for_attempt(attempt)
        } else {
            self.max_delay
        }
    }
}

/// Consecutive-failure tracking for one object
#[derive(Clone, Debug, Default)]
pub struct ErrorContext {
    pub consecutive_errors: u32,
    pub last_error: Option<String>,
}

impl ErrorContext {
    pub fn record_error(&mut self, error: &Error) {
        self.consecutive_errors += 1;
        self.last_error = Some(error.to_string());
    }

    /// Called on successful reconciliation
    pub fn reset(&mut self) {
        self.consecutive_errors = 0;
        self.last_error = None;
    }

    pub fn exceeded_max_retries(&self, max_retries: u32) -> bool {
        self.consecutive_errors >= max_retries
    }
}
