//! Pooled HTTP client construction
//!
//! One `reqwest::Client` is built per engine and cloned into every component.
//! Clones share the same connection pool, so TLS handshakes are amortized over
//! the whole run instead of paid per call.

use reqwest::Client;
use std::time::Duration;

use crate::config::{HttpConfig, USER_AGENT};

/// Idle pooled connections kept per host.
const POOL_MAX_IDLE_PER_HOST: usize = 16;

/// How long an idle pooled connection is kept open.
const POOL_IDLE_TIMEOUT_SECS: u64 = 90;

/// Build the pooled client shared by the credential manager and the executor.
pub fn build_http_client(config: &HttpConfig) -> Result<Client, reqwest::Error> {
    Client::builder()
        .user_agent(USER_AGENT)
        .connect_timeout(Duration::from_secs(config.connect_timeout_secs))
        .timeout(Duration::from_secs(config.request_timeout_secs))
        .pool_max_idle_per_host(POOL_MAX_IDLE_PER_HOST)
        .pool_idle_timeout(Duration::from_secs(POOL_IDLE_TIMEOUT_SECS))
        .build()
}
