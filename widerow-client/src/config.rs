use crate::retry::RetryPolicy;
use std::time::Duration;

/// Connection and retry settings for a [`Client`](crate::Client)
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Server address (e.g., "https://bigtable.googleapis.com" or "http://127.0.0.1:8086")
    pub endpoint: String,

    /// Project that owns the instance
    pub project: String,

    /// Instance holding the tables
    pub instance: String,

    /// Application profile used for routing (None = instance default)
    pub app_profile: Option<String>,

    /// Retry policy for streaming row reads
    pub read_retry: RetryPolicy,

    /// Retry policy for batched mutations
    pub mutate_retry: RetryPolicy,

    /// Deadline applied to each individual RPC attempt (None = no deadline)
    pub attempt_timeout: Option<Duration>,

    /// Timeout for establishing the channel
    pub connect_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            endpoint: "http://127.0.0.1:8086".to_string(),
            project: String::new(),
            instance: String::new(),
            app_profile: None,
            read_retry: RetryPolicy::read_rows(),
            mutate_retry: RetryPolicy::mutate_rows(),
            attempt_timeout: None,
            connect_timeout: Duration::from_secs(10),
        }
    }
}

impl ClientConfig {
    /// Create a configuration for `project`/`instance` with default values
    pub fn new(project: impl Into<String>, instance: impl Into<String>) -> Self {
        Self {
            project: project.into(),
            instance: instance.into(),
            ..Self::default()
        }
    }

    /// Set the server address
    pub fn with_endpoint(mut self, endpoint: impl Into<String>) -> Self {
        self.endpoint = endpoint.into();
        self
    }

    /// Set the application profile
    pub fn with_app_profile(mut self, app_profile: impl Into<String>) -> Self {
        self.app_profile = Some(app_profile.into());
        self
    }

    pub fn with_read_retry(mut self, policy: RetryPolicy) -> Self {
        self.read_retry = policy;
        self
    }

    pub fn with_mutate_retry(mut self, policy: RetryPolicy) -> Self {
        self.mutate_retry = policy;
        self
    }

    /// Set the per-attempt deadline
    pub fn with_attempt_timeout(mut self, timeout: Duration) -> Self {
        self.attempt_timeout = Some(timeout);
        self
    }

    /// Bound every read and mutation, retries included, to `timeout` overall
    pub fn with_total_timeout(mut self, timeout: Duration) -> Self {
        self.read_retry.total_timeout = Some(timeout);
        self.mutate_retry.total_timeout = Some(timeout);
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    /// Fully qualified name of `table` inside the configured instance
    pub fn table_name(&self, table: &str) -> String {
        format!(
            "projects/{}/instances/{}/tables/{}",
            self.project, self.instance, table
        )
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), String> {
        if self.endpoint.is_empty() {
            return Err("endpoint must not be empty".to_string());
        }

        if self.project.is_empty() {
            return Err("project must not be empty".to_string());
        }

        if self.instance.is_empty() {
            return Err("instance must not be empty".to_string());
        }

        if let Some(profile) = &self.app_profile {
            if profile.is_empty() {
                return Err("app_profile must not be empty when set".to_string());
            }
        }

        for (name, policy) in [("read_retry", &self.read_retry), ("mutate_retry", &self.mutate_retry)] {
            if policy.backoff_multiplier.is_nan() || policy.backoff_multiplier < 1.0 {
                return Err(format!("{name}.backoff_multiplier must be at least 1.0"));
            }
            if policy.initial_backoff_ms > policy.max_backoff_ms {
                return Err(format!(
                    "{name}.initial_backoff_ms must not exceed max_backoff_ms"
                ));
            }
            if policy.total_timeout == Some(Duration::ZERO) {
                return Err(format!("{name}.total_timeout must be greater than 0 when set"));
            }
        }

        if self.attempt_timeout == Some(Duration::ZERO) {
            return Err("attempt_timeout must be greater than 0 when set".to_string());
        }

        if self.connect_timeout.is_zero() {
            return Err("connect_timeout must be greater than 0".to_string());
        }

        Ok(())
    }
}
