//! Bounded retry with proxy failover for provider calls.
//!
//! Providers wrap each remote step with [`run`]. Transient failures back off
//! and retry up to the policy cap; invalid-reference and malformed-response
//! failures are definitive; a blocked-egress report asks the backend to
//! switch to its configured proxy and retries through it.

use std::future::Future;
use std::time::Duration;

use async_trait::async_trait;
use tracing::{debug, warn};

use super::DebridError;
use crate::metrics;

/// Retry budget for a single remote operation.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            base_delay: Duration::from_secs(1),
        }
    }
}

impl From<&crate::config::RetryConfig> for RetryPolicy {
    fn from(config: &crate::config::RetryConfig) -> Self {
        Self::new(
            config.max_attempts,
            Duration::from_millis(config.base_delay_ms),
        )
    }
}

impl RetryPolicy {
    pub fn new(max_attempts: u32, base_delay: Duration) -> Self {
        Self {
            max_attempts: max_attempts.max(1),
            base_delay,
        }
    }

    /// Linear backoff: attempt number times the base delay.
    fn backoff(&self, attempt: u32) -> Duration {
        self.base_delay * attempt
    }
}

/// Hook a backend exposes so the executor can reroute it through the
/// configured egress proxy when the provider blacklists the server's IP.
#[async_trait]
pub trait ProxyFailover: Send + Sync {
    /// Switch subsequent outbound calls to the configured proxy.
    /// Returns `false` when no proxy is configured or the switch failed.
    async fn activate_proxy(&self) -> bool;
}

/// Run `call` under the retry policy.
///
/// `service`/`op`/`ident` only feed logs and metrics; `ident` is whatever
/// identifies the operand (an info hash, a remote job id).
pub(crate) async fn run<T, F, Fut>(
    policy: &RetryPolicy,
    service: &str,
    op: &str,
    ident: &str,
    failover: Option<&dyn ProxyFailover>,
    mut call: F,
) -> Result<T, DebridError>
where
    F: FnMut() -> Fut,
    Fut: Future<Output = Result<T, DebridError>>,
{
    let mut attempt = 1u32;
    loop {
        match call().await {
            Ok(value) => {
                metrics::PROVIDER_REQUESTS
                    .with_label_values(&[service, op, "success"])
                    .inc();
                return Ok(value);
            }
            Err(e) => {
                metrics::PROVIDER_REQUESTS
                    .with_label_values(&[service, op, "error"])
                    .inc();

                match &e {
                    DebridError::InvalidReference(_) => {
                        debug!(service, op, ident, error = %e, "Invalid remote reference, not retrying");
                        return Err(e);
                    }
                    DebridError::BlockedEgress => {
                        warn!(service, op, ident, "Provider reports egress IP blocked");
                        metrics::PROXY_FAILOVERS.with_label_values(&[service]).inc();

                        let switched = match failover {
                            Some(f) => f.activate_proxy().await,
                            None => false,
                        };
                        if !switched || attempt >= policy.max_attempts {
                            return Err(e);
                        }
                        // Retry immediately through the proxy, no backoff.
                    }
                    transient if transient.is_transient() => {
                        if attempt >= policy.max_attempts {
                            warn!(service, op, ident, attempts = attempt, error = %e,
                                  "Retries exhausted");
                            return Err(DebridError::Exhausted {
                                op: op.to_string(),
                                attempts: attempt,
                            });
                        }
                        let delay = policy.backoff(attempt);
                        warn!(service, op, ident, attempt, delay_ms = delay.as_millis() as u64,
                              error = %e, "Transient failure, retrying");
                        metrics::RETRY_ATTEMPTS
                            .with_label_values(&[service, op])
                            .inc();
                        tokio::time::sleep(delay).await;
                    }
                    _ => {
                        warn!(service, op, ident, error = %e, "Non-retryable failure");
                        return Err(e);
                    }
                }

                attempt += 1;
            }
        }
    }
}
