//! Periodic supervision loop.
//!
//! Each tick:
//!
//! 1. Ask the [`ProcessProbe`] whether the application runs. If not, drop
//!    any session, clear the tracked status, and stop there.
//! 2. Without a usable session, run the [`ReconnectPolicy`].
//! 3. With one, fire a status query, wait the grace period, and fire one
//!    start request if the tracked state is not active.
//! 4. Without one (or when the start request could not be sent), trigger
//!    the [`FallbackActuator`] if enabled.
//!
//! A failing tick is logged and the loop carries on after the normal
//! interval. Only cancellation ends [`Supervisor::run`].

use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Duration;

use futures::FutureExt;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::config::WatchdogConfig;
use crate::error::Result;
use crate::process::{FallbackActuator, ProcessProbe};
use crate::retry::ReconnectPolicy;
use crate::status::StatusTracker;
use crate::transport::{Connector, ControlSession, Endpoint};

/// What a tick did
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickOutcome {
    /// Application not running; nothing attempted
    AppNotRunning,
    /// Stream confirmed active
    Streaming,
    /// Stream not active; one start request sent
    StartRequested,
    /// No usable session; fallback fired
    FallbackTriggered,
    /// No usable session and fallback disabled; no action
    Degraded,
}

/// Loop timing and fallback switch
#[derive(Debug, Clone)]
pub struct SupervisorSettings {
    /// Tick period
    pub check_interval: Duration,
    /// Wait between status query and reading the tracked state
    pub status_grace: Duration,
    /// Fire the fallback when the protocol path is unavailable
    pub use_fallback: bool,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self::from_config(&WatchdogConfig::default())
    }
}

impl SupervisorSettings {
    /// Build from the `[watchdog]` config section
    pub fn from_config(config: &WatchdogConfig) -> Self {
        Self {
            check_interval: config.check_interval(),
            status_grace: config.status_grace(),
            use_fallback: config.use_fallback_on_failure,
        }
    }
}

/// Supervision loop state.
pub struct Supervisor<C, P, F>
where
    C: Connector,
{
    endpoint: Endpoint,
    connector: C,
    policy: ReconnectPolicy,
    probe: P,
    fallback: F,
    status: Arc<StatusTracker>,
    settings: SupervisorSettings,
    session: Option<C::Session>,
}

impl<C, P, F> Supervisor<C, P, F>
where
    C: Connector,
    P: ProcessProbe,
    F: FallbackActuator,
{
    /// Create a supervisor. `status` must be the tracker the connector's
    /// sessions write into.
    pub fn new(
        endpoint: Endpoint,
        connector: C,
        policy: ReconnectPolicy,
        probe: P,
        fallback: F,
        status: Arc<StatusTracker>,
        settings: SupervisorSettings,
    ) -> Self {
        Self {
            endpoint,
            connector,
            policy,
            probe,
            fallback,
            status,
            settings,
            session: None,
        }
    }

    /// Whether a usable session is currently held
    pub fn has_usable_session(&self) -> bool {
        self.session.as_ref().is_some_and(ControlSession::is_usable)
    }

    /// Run one supervision tick.
    pub async fn tick(&mut self) -> Result<TickOutcome> {
        if !self.probe.is_running().await? {
            info!("Controlled application is not running");
            self.drop_session().await;
            return Ok(TickOutcome::AppNotRunning);
        }

        if !self.has_usable_session() {
            self.drop_session().await;
            match self.policy.establish(&self.connector, &self.endpoint).await {
                Ok(session) => self.session = Some(session),
                Err(e) => {
                    warn!(endpoint = %self.endpoint, error = %e, "No usable control session");
                    return Ok(self.degrade());
                },
            }
        }

        let Some(session) = self.session.as_ref() else {
            return Ok(self.degrade());
        };

        if let Err(e) = session.query_status() {
            warn!(error = %e, "Status query failed");
            self.drop_session().await;
            return Ok(self.degrade());
        }

        tokio::time::sleep(self.settings.status_grace).await;

        let state = self.status.snapshot();
        if state.is_known() && state.active {
            debug!(last_updated = ?state.last_updated, "Stream is active");
            return Ok(TickOutcome::Streaming);
        }

        info!(known = state.is_known(), "Stream is not active, requesting start");
        let sent = self
            .session
            .as_ref()
            .map_or(Ok(()), ControlSession::request_start);
        match sent {
            Ok(()) => Ok(TickOutcome::StartRequested),
            Err(e) => {
                warn!(error = %e, "Start request could not be sent");
                self.drop_session().await;
                Ok(self.degrade())
            },
        }
    }

    fn degrade(&self) -> TickOutcome {
        if self.settings.use_fallback {
            info!("Using fallback start");
            self.fallback.trigger_start();
            TickOutcome::FallbackTriggered
        } else {
            warn!("Protocol path unavailable and fallback disabled; no action this tick");
            TickOutcome::Degraded
        }
    }

    async fn drop_session(&mut self) {
        if let Some(mut session) = self.session.take() {
            debug!(session_id = %session.id(), "Closing control session");
            session.close().await;
        }
        self.status.clear();
    }

    /// Tick every `check_interval` until `shutdown` fires, then close the
    /// session.
    pub async fn run(mut self, shutdown: CancellationToken) {
        info!(
            endpoint = %self.endpoint,
            interval_secs = self.settings.check_interval.as_secs(),
            fallback = self.settings.use_fallback,
            "Supervisor started"
        );

        loop {
            tokio::select! {
                () = shutdown.cancelled() => break,
                outcome = AssertUnwindSafe(self.tick()).catch_unwind() => match outcome {
                    Ok(Ok(outcome)) => debug!(?outcome, "Tick complete"),
                    Ok(Err(e)) => error!(error = %e, "Tick failed"),
                    Err(_) => error!("Tick panicked"),
                },
            }

            tokio::select! {
                () = shutdown.cancelled() => break,
                () = tokio::time::sleep(self.settings.check_interval) => {},
            }
        }

        self.drop_session().await;
        info!("Supervisor stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::WatchdogError;
    use crate::transport::BoxFuture;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};

    #[derive(Default)]
    struct Counters {
        probes: AtomicU32,
        establishes: AtomicU32,
        queries: AtomicU32,
        starts: AtomicU32,
        closes: AtomicU32,
        fallbacks: AtomicU32,
    }

    struct FakeSession {
        counters: Arc<Counters>,
        status: Arc<StatusTracker>,
        usable: Arc<AtomicBool>,
        report_active: bool,
        fail_start: bool,
    }

    impl ControlSession for FakeSession {
        fn id(&self) -> &str {
            "fake"
        }
        fn is_usable(&self) -> bool {
            self.usable.load(Ordering::SeqCst)
        }
        fn query_status(&self) -> Result<()> {
            self.counters.queries.fetch_add(1, Ordering::SeqCst);
            self.status.set(self.report_active);
            Ok(())
        }
        fn request_start(&self) -> Result<()> {
            if self.fail_start {
                return Err(WatchdogError::RequestFailed("socket gone".into()));
            }
            self.counters.starts.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
        fn close(&mut self) -> BoxFuture<'_, ()> {
            self.counters.closes.fetch_add(1, Ordering::SeqCst);
            Box::pin(async {})
        }
    }

    struct FakeConnector {
        counters: Arc<Counters>,
        status: Arc<StatusTracker>,
        reachable: bool,
        handshake_ok: bool,
        report_active: bool,
        fail_start: bool,
        usable: Arc<AtomicBool>,
    }

    impl Connector for FakeConnector {
        type Session = FakeSession;

        fn probe<'a>(&'a self, _: &'a Endpoint, _: Duration) -> BoxFuture<'a, bool> {
            self.counters.probes.fetch_add(1, Ordering::SeqCst);
            let reachable = self.reachable;
            Box::pin(async move { reachable })
        }

        fn establish<'a>(
            &'a self,
            _: &'a Endpoint,
            _: Duration,
        ) -> BoxFuture<'a, Result<FakeSession>> {
            self.counters.establishes.fetch_add(1, Ordering::SeqCst);
            let result = if self.handshake_ok {
                self.usable.store(true, Ordering::SeqCst);
                Ok(FakeSession {
                    counters: Arc::clone(&self.counters),
                    status: Arc::clone(&self.status),
                    usable: Arc::clone(&self.usable),
                    report_active: self.report_active,
                    fail_start: self.fail_start,
                })
            } else {
                Err(WatchdogError::AuthRejected("bad password".into()))
            };
            Box::pin(async move { result })
        }
    }

    struct FakeProbe(bool);

    impl ProcessProbe for FakeProbe {
        fn is_running(&self) -> BoxFuture<'_, Result<bool>> {
            let running = self.0;
            Box::pin(async move { Ok(running) })
        }
    }

    struct BrokenProbe;

    impl ProcessProbe for BrokenProbe {
        fn is_running(&self) -> BoxFuture<'_, Result<bool>> {
            Box::pin(async {
                Err(WatchdogError::Io(std::io::Error::new(
                    std::io::ErrorKind::NotFound,
                    "pgrep missing",
                )))
            })
        }
    }

    struct FakeFallback(Arc<Counters>);

    impl FallbackActuator for FakeFallback {
        fn trigger_start(&self) {
            self.0.fallbacks.fetch_add(1, Ordering::SeqCst);
        }
    }

    struct Harness {
        running: bool,
        reachable: bool,
        handshake_ok: bool,
        report_active: bool,
        fail_start: bool,
        use_fallback: bool,
    }

    impl Default for Harness {
        fn default() -> Self {
            Self {
                running: true,
                reachable: true,
                handshake_ok: true,
                report_active: false,
                fail_start: false,
                use_fallback: true,
            }
        }
    }

    impl Harness {
        fn build(
            self,
        ) -> (
            Supervisor<FakeConnector, FakeProbe, FakeFallback>,
            Arc<Counters>,
            Arc<AtomicBool>,
        ) {
            let counters = Arc::new(Counters::default());
            let status = Arc::new(StatusTracker::new());
            let usable = Arc::new(AtomicBool::new(false));
            let connector = FakeConnector {
                counters: Arc::clone(&counters),
                status: Arc::clone(&status),
                reachable: self.reachable,
                handshake_ok: self.handshake_ok,
                report_active: self.report_active,
                fail_start: self.fail_start,
                usable: Arc::clone(&usable),
            };
            let settings = SupervisorSettings {
                check_interval: Duration::from_secs(10),
                status_grace: Duration::from_secs(1),
                use_fallback: self.use_fallback,
            };
            let supervisor = Supervisor::new(
                Endpoint::new("127.0.0.1", 4444, None),
                connector,
                ReconnectPolicy::default()
                    .with_max_attempts(3)
                    .with_delay(Duration::from_secs(5)),
                FakeProbe(self.running),
                FakeFallback(Arc::clone(&counters)),
                status,
                settings,
            );
            (supervisor, counters, usable)
        }
    }

    #[tokio::test(start_paused = true)]
    async fn test_app_not_running_attempts_nothing() {
        let (mut supervisor, counters, _) = Harness {
            running: false,
            ..Default::default()
        }
        .build();

        assert_eq!(supervisor.tick().await.unwrap(), TickOutcome::AppNotRunning);
        assert_eq!(counters.probes.load(Ordering::SeqCst), 0);
        assert_eq!(counters.establishes.load(Ordering::SeqCst), 0);
        assert_eq!(counters.fallbacks.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_app_stopping_closes_session_and_clears_status() {
        let (mut supervisor, counters, _) = Harness {
            report_active: true,
            ..Default::default()
        }
        .build();
        assert_eq!(supervisor.tick().await.unwrap(), TickOutcome::Streaming);
        assert!(supervisor.status.is_active());

        supervisor.probe = FakeProbe(false);
        assert_eq!(supervisor.tick().await.unwrap(), TickOutcome::AppNotRunning);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
        assert!(!supervisor.status.snapshot().is_known());
        assert!(!supervisor.has_usable_session());
    }

    #[tokio::test(start_paused = true)]
    async fn test_active_stream_needs_no_start() {
        let (mut supervisor, counters, _) = Harness {
            report_active: true,
            ..Default::default()
        }
        .build();

        assert_eq!(supervisor.tick().await.unwrap(), TickOutcome::Streaming);
        assert_eq!(counters.queries.load(Ordering::SeqCst), 1);
        assert_eq!(counters.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_one_start_per_tick_while_inactive() {
        let (mut supervisor, counters, _) = Harness::default().build();

        for tick in 1..=3 {
            assert_eq!(supervisor.tick().await.unwrap(), TickOutcome::StartRequested);
            assert_eq!(counters.starts.load(Ordering::SeqCst), tick);
        }
        // Session reused across ticks
        assert_eq!(counters.establishes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_status_grace_elapses_before_decision() {
        let (mut supervisor, _, _) = Harness::default().build();
        let started = tokio::time::Instant::now();
        supervisor.tick().await.unwrap();
        assert!(started.elapsed() >= Duration::from_secs(1));
    }

    #[tokio::test(start_paused = true)]
    async fn test_unreachable_endpoint_goes_to_fallback() {
        let (mut supervisor, counters, _) = Harness {
            reachable: false,
            ..Default::default()
        }
        .build();

        assert_eq!(
            supervisor.tick().await.unwrap(),
            TickOutcome::FallbackTriggered
        );
        assert_eq!(counters.probes.load(Ordering::SeqCst), 1);
        assert_eq!(counters.establishes.load(Ordering::SeqCst), 0);
        assert_eq!(counters.fallbacks.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_exhausted_without_fallback_takes_no_action() {
        let (mut supervisor, counters, _) = Harness {
            handshake_ok: false,
            use_fallback: false,
            ..Default::default()
        }
        .build();

        assert_eq!(supervisor.tick().await.unwrap(), TickOutcome::Degraded);
        assert_eq!(counters.establishes.load(Ordering::SeqCst), 3);
        assert_eq!(counters.fallbacks.load(Ordering::SeqCst), 0);
        assert_eq!(counters.starts.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_failed_start_send_falls_back() {
        let (mut supervisor, counters, _) = Harness {
            fail_start: true,
            ..Default::default()
        }
        .build();

        assert_eq!(
            supervisor.tick().await.unwrap(),
            TickOutcome::FallbackTriggered
        );
        assert_eq!(counters.fallbacks.load(Ordering::SeqCst), 1);
        assert!(!supervisor.has_usable_session());
    }

    #[tokio::test(start_paused = true)]
    async fn test_lost_session_is_reestablished() {
        let (mut supervisor, counters, usable) = Harness::default().build();
        supervisor.tick().await.unwrap();

        usable.store(false, Ordering::SeqCst);
        supervisor.tick().await.unwrap();
        assert_eq!(counters.establishes.load(Ordering::SeqCst), 2);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn test_probe_error_is_reported_not_fatal() {
        let (supervisor, counters, _) = Harness::default().build();
        let mut supervisor = Supervisor {
            probe: BrokenProbe,
            endpoint: supervisor.endpoint,
            connector: supervisor.connector,
            policy: supervisor.policy,
            fallback: supervisor.fallback,
            status: supervisor.status,
            settings: supervisor.settings,
            session: None,
        };

        assert!(supervisor.tick().await.is_err());
        assert_eq!(counters.establishes.load(Ordering::SeqCst), 0);

        // The loop keeps running across failing ticks until cancelled
        let shutdown = CancellationToken::new();
        let stopper = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(25)).await;
            stopper.cancel();
        });
        supervisor.run(shutdown).await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_run_closes_session_on_shutdown() {
        let (supervisor, counters, _) = Harness::default().build();
        let shutdown = CancellationToken::new();
        let stopper = shutdown.clone();

        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_secs(15)).await;
            stopper.cancel();
        });
        supervisor.run(shutdown).await;

        // Ticks at t=0 and t=11, then cancelled during the sleep
        assert_eq!(counters.starts.load(Ordering::SeqCst), 2);
        assert_eq!(counters.closes.load(Ordering::SeqCst), 1);
    }
}
