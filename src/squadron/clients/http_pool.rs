//! Shared HTTP client with persistent connection pooling.
//!
//! One `reqwest::Client` serves every provider adapter and the web-search
//! tool.  Keeping a single instance keeps TLS sessions and DNS lookups warm,
//! which matters when many concurrent requests fan out to upstream providers.
//! Per-request timeouts are applied by the callers, so the pool itself only
//! carries a generous outer bound.

use lazy_static::lazy_static;
use std::time::Duration;

lazy_static! {
    static ref SHARED_HTTP_CLIENT: reqwest::Client = {
        reqwest::ClientBuilder::new()
            .pool_idle_timeout(Some(Duration::from_secs(90)))
            .pool_max_idle_per_host(10)
            .tcp_keepalive(Some(Duration::from_secs(60)))
            .timeout(Duration::from_secs(300))
            .connect_timeout(Duration::from_secs(30))
            .build()
            .expect("Failed to build shared HTTP client")
    };
}

/// Borrow the lazily initialised shared [`reqwest::Client`].
///
/// The returned reference can be cloned and reused by individual adapters.
pub fn get_shared_http_client() -> &'static reqwest::Client {
    &SHARED_HTTP_CLIENT
}
