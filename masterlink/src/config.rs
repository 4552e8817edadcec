//! Client configuration.

use std::time::Duration;

pub const DEFAULT_MASTER_HOST: &str = "127.0.0.1";
pub const DEFAULT_MASTER_PORT: u16 = 5557;
pub const DEFAULT_QUEUE_CAPACITY: usize = 100;

/// Fixed-count, fixed-delay retry for outbound frames. No backoff, no jitter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt. Total attempts = `max_retries + 1`.
    pub max_retries: u32,
    pub delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 3,
            delay: Duration::from_millis(5),
        }
    }
}

impl RetryPolicy {
    pub fn max_attempts(&self) -> u32 {
        self.max_retries.saturating_add(1)
    }
}

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub master_host: String,
    pub master_port: u16,
    /// Routing identity registered with the transport. Fixed for the
    /// connection's lifetime.
    pub identity: String,
    pub inbound_capacity: usize,
    pub outbound_capacity: usize,
    pub retry: RetryPolicy,
    pub connect_timeout: Duration,
    /// Upper bound on how long `close()` waits for the loops to exit.
    pub close_timeout: Duration,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            master_host: DEFAULT_MASTER_HOST.to_string(),
            master_port: DEFAULT_MASTER_PORT,
            identity: generate_identity(),
            inbound_capacity: DEFAULT_QUEUE_CAPACITY,
            outbound_capacity: DEFAULT_QUEUE_CAPACITY,
            retry: RetryPolicy::default(),
            connect_timeout: Duration::from_secs(5),
            close_timeout: Duration::from_secs(1),
        }
    }
}

impl ClientConfig {
    pub fn new(master_host: impl Into<String>, master_port: u16, identity: impl Into<String>) -> Self {
        Self {
            master_host: master_host.into(),
            master_port,
            identity: identity.into(),
            ..Self::default()
        }
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn with_queue_capacity(mut self, inbound: usize, outbound: usize) -> Self {
        self.inbound_capacity = inbound;
        self.outbound_capacity = outbound;
        self
    }

    pub fn with_connect_timeout(mut self, timeout: Duration) -> Self {
        self.connect_timeout = timeout;
        self
    }

    pub fn with_close_timeout(mut self, timeout: Duration) -> Self {
        self.close_timeout = timeout;
        self
    }

    /// Transport address of the master, `tcp://<host>:<port>`.
    pub fn endpoint(&self) -> String {
        format!("tcp://{}:{}", self.master_host, self.master_port)
    }
}

/// Default worker identity: `<hostname>_<uuid>`.
pub fn generate_identity() -> String {
    let host = std::env::var("HOSTNAME")
        .ok()
        .filter(|h| !h.is_empty())
        .unwrap_or_else(|| "localhost".to_string());
    format!("{}_{}", host, uuid::Uuid::new_v4().simple())
}
