//! Operator configuration
//!
//! Built once at startup from `REDIS_OPERATOR_*` environment variables and
//! shared through the controller context.

use std::net::SocketAddr;
use std::time::Duration;

use thiserror::Error;

use crate::store::RetryConfig;
use crate::topology::PollConfig;

#[derive(Error, Debug, PartialEq, Eq)]
pub enum ConfigError {
    #[error("{name} must be {expected}: {value:?}")]
    InvalidValue {
        name: &'static str,
        expected: &'static str,
        value: String,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

#[derive(Debug, Clone)]
pub struct OperatorConfig {
    /// Headless service shared by every StatefulSet in a namespace
    pub governing_service: String,
    /// Registry prefix for the database image
    pub image_registry: String,
    /// Field manager recorded on every write
    pub field_manager: String,
    /// Optimistic-concurrency retry budget
    pub retry: RetryConfig,
    /// Topology convergence polling
    pub topology_poll: PollConfig,
    /// Poll cluster members after scale events
    pub verify_topology: bool,
    /// Timeout for one cluster connection
    pub connect_timeout: Duration,
    /// Concurrent reconciles per resource kind
    pub worker_count: usize,
    /// Work queue capacity per resource kind
    pub queue_capacity: usize,
    /// Restrict watches to one namespace
    pub watch_namespace: Option<String>,
    /// Requeue interval while pods are starting
    pub pending_requeue: Duration,
    /// Periodic resync of healthy objects
    pub resync_interval: Duration,
    pub health_addr: SocketAddr,
}

impl Default for OperatorConfig {
    fn default() -> Self {
        Self {
            governing_service: "kubedb".to_string(),
            image_registry: "docker.io/library".to_string(),
            field_manager: crate::resources::FIELD_MANAGER.to_string(),
            retry: RetryConfig::default(),
            topology_poll: PollConfig::default(),
            verify_topology: true,
            connect_timeout: Duration::from_secs(5),
            worker_count: 4,
            queue_capacity: 1024,
            watch_namespace: None,
            pending_requeue: Duration::from_secs(10),
            resync_interval: Duration::from_secs(300),
            health_addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
        }
    }
}

impl OperatorConfig {
    /// Read configuration from the process environment.
    ///
    /// # Errors
    ///
    /// Returns an error if a variable is present but cannot be parsed.
    pub fn from_env() -> ConfigResult<Self> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Read configuration through `lookup`; unset keys keep their defaults.
    pub fn from_lookup<L>(lookup: L) -> ConfigResult<Self>
    where
        L: Fn(&str) -> Option<String>,
    {
        let env = Env { lookup };
        let mut config = Self::default();

        if let Some(v) = env.string("REDIS_OPERATOR_GOVERNING_SERVICE") {
            config.governing_service = v;
        }
        if let Some(v) = env.string("REDIS_OPERATOR_IMAGE_REGISTRY") {
            config.image_registry = v;
        }
        if let Some(v) = env.string("REDIS_OPERATOR_FIELD_MANAGER") {
            config.field_manager = v;
        }
        if let Some(ms) = env.parse::<u64>("REDIS_OPERATOR_RETRY_INTERVAL_MS", "milliseconds")? {
            config.retry.interval = Duration::from_millis(ms);
        }
        if let Some(n) = env.parse::<u32>("REDIS_OPERATOR_RETRY_ATTEMPTS", "a positive integer")? {
            config.retry.max_attempts = n.max(1);
        }
        if let Some(secs) =
            env.parse::<u64>("REDIS_OPERATOR_TOPOLOGY_POLL_INTERVAL_SECS", "seconds")?
        {
            config.topology_poll.interval = Duration::from_secs(secs);
        }
        if let Some(secs) = env.parse::<u64>("REDIS_OPERATOR_TOPOLOGY_TIMEOUT_SECS", "seconds")? {
            config.topology_poll.timeout = Duration::from_secs(secs);
        }
        if let Some(v) = env.bool("REDIS_OPERATOR_VERIFY_TOPOLOGY")? {
            config.verify_topology = v;
        }
        if let Some(secs) = env.parse::<u64>("REDIS_OPERATOR_CONNECT_TIMEOUT_SECS", "seconds")? {
            config.connect_timeout = Duration::from_secs(secs);
        }
        if let Some(n) = env.parse::<usize>("REDIS_OPERATOR_WORKERS", "a positive integer")? {
            config.worker_count = n.max(1);
        }
        if let Some(n) =
            env.parse::<usize>("REDIS_OPERATOR_QUEUE_CAPACITY", "a positive integer")?
        {
            config.queue_capacity = n.max(1);
        }
        config.watch_namespace = env.string("REDIS_OPERATOR_WATCH_NAMESPACE");
        if let Some(secs) = env.parse::<u64>("REDIS_OPERATOR_PENDING_REQUEUE_SECS", "seconds")? {
            config.pending_requeue = Duration::from_secs(secs);
        }
        if let Some(secs) = env.parse::<u64>("REDIS_OPERATOR_RESYNC_SECS", "seconds")? {
            config.resync_interval = Duration::from_secs(secs);
        }
        if let Some(addr) =
            env.parse::<SocketAddr>("REDIS_OPERATOR_HEALTH_ADDR", "a socket address")?
        {
            config.health_addr = addr;
        }

        Ok(config)
    }
}

struct Env<L> {
    lookup: L,
}

impl<L: Fn(&str) -> Option<String>> Env<L> {
    fn string(&self, name: &str) -> Option<String> {
        (self.lookup)(name).and_then(|v| {
            let trimmed = v.trim();
            if trimmed.is_empty() {
                None
            } else {
                Some(trimmed.to_string())
            }
        })
    }

    fn parse<T: std::str::FromStr>(
        &self,
        name: &'static str,
        expected: &'static str,
    ) -> ConfigResult<Option<T>> {
        let Some(value) = self.string(name) else {
            return Ok(None);
        };
        value
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidValue {
                name,
                expected,
                value,
            })
    }

    fn bool(&self, name: &'static str) -> ConfigResult<Option<bool>> {
        let Some(value) = self.string(name) else {
            return Ok(None);
        };
        match value.to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" => Ok(Some(true)),
            "false" | "0" | "no" => Ok(Some(false)),
            _ => Err(ConfigError::InvalidValue {
                name,
                expected: "a boolean",
                value,
            }),
        }
    }
}
