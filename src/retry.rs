//! Bounded reconnect policy.
//!
//! Each call to [`ReconnectPolicy::establish`] is one establishment sequence
//! with its own [`RetryCounter`]. Nothing carries over between calls, so a
//! sustained outage costs at most `max_attempts` tries per supervisor tick.
//!
//! ```text
//!  probe ──unreachable (first try)──► Err(TransportUnreachable)
//!    │
//!    ├─unreachable (later try)──┐
//!    ▼                          │
//!  establish ──ok──► Ok(session)│
//!    │                          │
//!    └─fail──► attempts += 1 ◄──┘
//!                 │
//!       attempts < max ? sleep(delay), loop : Err(RetriesExhausted)
//! ```

use std::time::Duration;

use tracing::{info, warn};

use crate::config::RetryConfig;
use crate::error::{Result, WatchdogError};
use crate::transport::{Connector, ControlSession, Endpoint};

/// Attempt bookkeeping for one establishment sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryCounter {
    /// Attempts consumed so far
    pub attempts: u32,
    /// Budget
    pub max_attempts: u32,
    /// Pause between attempts
    pub delay: Duration,
}

impl RetryCounter {
    /// Fresh counter
    pub fn new(max_attempts: u32, delay: Duration) -> Self {
        Self {
            attempts: 0,
            max_attempts,
            delay,
        }
    }

    /// Count a failed attempt; true while budget remains
    pub fn record_failure(&mut self) -> bool {
        self.attempts += 1;
        self.attempts < self.max_attempts
    }

    /// Back to zero after a success
    pub fn reset(&mut self) {
        self.attempts = 0;
    }

    /// Nothing consumed yet
    pub fn is_fresh(&self) -> bool {
        self.attempts == 0
    }
}

/// Reconnect policy around session establishment.
#[derive(Debug, Clone)]
pub struct ReconnectPolicy {
    /// Attempts per establishment sequence
    pub max_attempts: u32,
    /// Delay between attempts
    pub delay: Duration,
    /// Reachability probe timeout
    pub probe_timeout: Duration,
    /// Bound on reaching `Identified`
    pub handshake_timeout: Duration,
}

impl Default for ReconnectPolicy {
    fn default() -> Self {
        Self::from_config(&RetryConfig::default())
    }
}

impl ReconnectPolicy {
    /// Build from the `[retry]` config section
    pub fn from_config(config: &RetryConfig) -> Self {
        Self {
            max_attempts: config.max_retries.max(1),
            delay: config.retry_delay(),
            probe_timeout: config.probe_timeout(),
            handshake_timeout: config.handshake_timeout(),
        }
    }

    /// Set attempt budget
    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts.max(1);
        self
    }

    /// Set delay between attempts
    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.delay = delay;
        self
    }

    /// Establish a session, retrying up to the attempt budget.
    ///
    /// An unreachable endpoint on the very first probe fails fast without
    /// consuming an attempt. Later unreachable probes count as failures.
    pub async fn establish<C: Connector>(
        &self,
        connector: &C,
        endpoint: &Endpoint,
    ) -> Result<C::Session> {
        let mut counter = RetryCounter::new(self.max_attempts, self.delay);

        loop {
            let failure = if connector.probe(endpoint, self.probe_timeout).await {
                match connector.establish(endpoint, self.handshake_timeout).await {
                    Ok(session) => {
                        info!(
                            %endpoint,
                            session_id = %session.id(),
                            attempt = counter.attempts + 1,
                            "Control session established"
                        );
                        counter.reset();
                        return Ok(session);
                    },
                    Err(e) => e,
                }
            } else {
                let err = WatchdogError::TransportUnreachable(format!(
                    "{} did not accept a TCP connection",
                    endpoint.address()
                ));
                if counter.is_fresh() {
                    warn!(%endpoint, "Control endpoint unreachable");
                    return Err(err);
                }
                err
            };

            let retry = counter.record_failure();
            warn!(
                %endpoint,
                attempt = counter.attempts,
                max_attempts = counter.max_attempts,
                error = %failure,
                "Session establishment failed"
            );

            if !retry {
                return Err(WatchdogError::RetriesExhausted {
                    attempts: counter.attempts,
                    last: Box::new(failure),
                });
            }

            tokio::time::sleep(counter.delay).await;
        }
    }
}
