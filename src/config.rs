use std::net::SocketAddr;
use std::time::Duration;

/// Configuration for a terrarium server process.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address the WebSocket listener binds to.
    pub listen_addr: SocketAddr,
    /// How often the workload enforcer reconciles job assignments.
    pub enforce_interval: Duration,
    /// Workers whose last pledge is older than this are deactivated.
    pub stale_worker_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            // SAFETY: This is a hardcoded valid address that will always parse
            listen_addr: "127.0.0.1:24816"
                .parse()
                .expect("default listen address is valid"),
            enforce_interval: Duration::from_secs(60),
            stale_worker_timeout: Duration::from_secs(300),
        }
    }
}

impl ServerConfig {
    pub fn new(listen_addr: SocketAddr) -> Self {
        Self {
            listen_addr,
            ..Default::default()
        }
    }

    pub fn with_enforce_interval(mut self, interval: Duration) -> Self {
        self.enforce_interval = interval;
        self
    }

    pub fn with_stale_worker_timeout(mut self, timeout: Duration) -> Self {
        self.stale_worker_timeout = timeout;
        self
    }
}
