//! Client-level settings shared by every request the process serves.
//!
//! Per-request knobs (categories, size ceiling, retries, parallelism) live on
//! [`MirrorRequest`](crate::types::MirrorRequest); this struct covers what the
//! HTTP client and the console need.

use crate::error::MirrorError;
use std::time::Duration;

#[derive(Debug, Clone)]
pub struct MirrorConfig {
    pub connect_timeout: Duration,
    /// Applied to every request, root document and resources alike.
    pub request_timeout: Duration,
    pub probe_timeout: Duration,
    /// Multiplied by the attempt number between retries.
    pub retry_delay: Duration,
    pub user_agent: String,
    pub show_progress: bool,
}

impl Default for MirrorConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(10),
            request_timeout: Duration::from_secs(30),
            probe_timeout: Duration::from_secs(5),
            retry_delay: Duration::from_millis(500),
            user_agent: format!("Mozilla/5.0 (compatible; webdl/{})", env!("CARGO_PKG_VERSION")),
            show_progress: true,
        }
    }
}

impl MirrorConfig {
    /// Settings for tests: no progress bars, no back-off, short timeouts.
    #[cfg(test)]
    pub fn quiet() -> Self {
        Self {
            connect_timeout: Duration::from_secs(2),
            request_timeout: Duration::from_secs(5),
            probe_timeout: Duration::from_secs(2),
            retry_delay: Duration::ZERO,
            show_progress: false,
            ..Self::default()
        }
    }

    pub fn build_client(&self) -> Result<reqwest::Client, MirrorError> {
        let client = reqwest::Client::builder()
            .user_agent(self.user_agent.clone())
            .connect_timeout(self.connect_timeout)
            .timeout(self.request_timeout)
            .build()?;
        Ok(client)
    }
}
