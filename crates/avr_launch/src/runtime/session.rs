//! Run session - starts the selected services, supervises them and shuts
//! them down again
//!
//! State machine: `Idle -> Launching -> Running -> Stopping -> Stopped`.
//! A failed or interrupted launch rolls back and goes straight from
//! `Launching` to `Stopped`. `Stopped` is terminal.

use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, watch};

use crate::runtime::backend::{ContainerRuntime, RuntimeError};
use crate::runtime::order::StartOrder;
use crate::runtime::process::{split_log_line, ManagedProcess, ProcessEvent};

/// Session timing configuration
#[derive(Debug, Clone)]
pub struct SessionConfig {
    /// Time a service gets to stop before the runtime kills it
    pub stop_timeout: Duration,
    /// Extra time allowed for the runtime call itself on top of
    /// `stop_timeout`; past that the stop is reported as timed out
    pub stop_grace: Duration,
    /// Interval between liveness checks while running
    pub health_interval: Duration,
    /// Stream container logs while running
    pub follow_logs: bool,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            stop_timeout: Duration::from_secs(10),
            stop_grace: Duration::from_secs(5),
            health_interval: Duration::from_secs(2),
            follow_logs: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Idle,
    Launching,
    Running,
    Stopping,
    Stopped,
}

impl fmt::Display for SessionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SessionState::Idle => "idle",
            SessionState::Launching => "launching",
            SessionState::Running => "running",
            SessionState::Stopping => "stopping",
            SessionState::Stopped => "stopped",
        };
        f.write_str(name)
    }
}

/// Why [`RunSession::wait`] returned
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitOutcome {
    /// Shutdown was requested
    Interrupted,
    /// None of the services are running any more
    AllExited,
    /// The session was not running
    NotRunning,
}

/// Result of a shutdown pass
#[derive(Debug, Default)]
pub struct ShutdownReport {
    /// Services stopped cleanly, in stop order
    pub stopped: Vec<String>,
    pub errors: Vec<StopError>,
}

impl ShutdownReport {
    pub fn is_clean(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Outcome of a supervised run
#[derive(Debug)]
pub struct RunOutcome {
    pub wait: WaitOutcome,
    pub shutdown: ShutdownReport,
}

impl RunOutcome {
    /// Process exit code: 0 after a requested shutdown, 1 when the
    /// services went away on their own. Stop errors are warnings only.
    pub fn exit_code(&self) -> i32 {
        match self.wait {
            WaitOutcome::Interrupted => 0,
            WaitOutcome::AllExited | WaitOutcome::NotRunning => 1,
        }
    }
}

/// The single orchestration session of a launcher process
pub struct RunSession {
    runtime: Arc<dyn ContainerRuntime>,
    order: StartOrder,
    config: SessionConfig,
    state: SessionState,
    /// Services started so far, in start order
    started: Vec<String>,
    log_follower: Option<ManagedProcess>,
    event_tx: mpsc::UnboundedSender<(String, ProcessEvent)>,
    event_rx: mpsc::UnboundedReceiver<(String, ProcessEvent)>,
}

impl RunSession {
    pub fn new(
        runtime: Arc<dyn ContainerRuntime>,
        order: StartOrder,
        config: SessionConfig,
    ) -> Self {
        let (event_tx, event_rx) = mpsc::unbounded_channel();
        Self {
            runtime,
            order,
            config,
            state: SessionState::Idle,
            started: Vec::new(),
            log_follower: None,
            event_tx,
            event_rx,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    /// Services currently owned by the session, in start order
    pub fn active_services(&self) -> &[String] {
        &self.started
    }

    /// Start every service in order.
    ///
    /// On a start failure, or if shutdown is requested part way, the
    /// services already started are stopped again before returning. A
    /// service whose start call failed is stopped too, since its
    /// container may have been created anyway.
    pub async fn launch(&mut self, shutdown_rx: &watch::Receiver<()>) -> Result<(), LaunchError> {
        if self.state != SessionState::Idle {
            return Err(LaunchError::InvalidState(self.state));
        }
        self.state = SessionState::Launching;

        log::info!("Launching {} services...", self.order.len());

        let services = self.order.services().to_vec();
        for service in services {
            if interrupted(shutdown_rx) {
                log::info!("Shutdown requested, aborting launch");
                let rollback = self.rollback().await;
                return Err(LaunchError::Interrupted { rollback });
            }

            log::info!("[{}] Starting", service);
            match self.runtime.start(&service).await {
                Ok(()) => {
                    log::info!("[{}] Started", service);
                    self.started.push(service);
                }
                // Ctrl+C reaches the runtime's child processes as well
                Err(_) if interrupted(shutdown_rx) => {
                    log::info!("Shutdown requested, aborting launch");
                    // The container may exist even though the start call failed
                    self.started.push(service);
                    let rollback = self.rollback().await;
                    return Err(LaunchError::Interrupted { rollback });
                }
                Err(e) => {
                    log::error!("[{}] Failed to start: {}", service, e);
                    self.started.push(service.clone());
                    let rollback = self.rollback().await;
                    return Err(LaunchError::Service {
                        service,
                        source: e,
                        rollback,
                    });
                }
            }
        }

        self.state = SessionState::Running;

        if self.config.follow_logs {
            match self
                .runtime
                .follow_logs(&self.started, self.event_tx.clone())
                .await
            {
                Ok(follower) => self.log_follower = follower,
                Err(e) => log::warn!("Not streaming container logs: {}", e),
            }
        }

        log::info!("All {} services launched", self.started.len());
        Ok(())
    }

    /// Block until shutdown is requested or every service has exited
    pub async fn wait(&mut self, shutdown_rx: &mut watch::Receiver<()>) -> WaitOutcome {
        if self.state != SessionState::Running {
            return WaitOutcome::NotRunning;
        }

        let mut health = tokio::time::interval(self.config.health_interval);
        // The first tick completes immediately
        health.tick().await;
        let mut down: HashSet<String> = HashSet::new();

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => {
                    log::info!("Shutdown signal received");
                    return WaitOutcome::Interrupted;
                }

                Some((name, event)) = self.event_rx.recv() => {
                    log_event(&name, event);
                }

                _ = health.tick() => {
                    if let Some(follower) = self.log_follower.as_mut() {
                        if follower.check_status().is_stopped() {
                            log::debug!("Log follower exited");
                            self.log_follower = None;
                        }
                    }

                    match self.runtime.running(&self.started).await {
                        Ok(running) if running.is_empty() => {
                            log::error!("All services have exited");
                            return WaitOutcome::AllExited;
                        }
                        Ok(running) => {
                            for service in &self.started {
                                let is_up = running.contains(service);
                                if !is_up && down.insert(service.clone()) {
                                    log::warn!("[{}] Service is not running", service);
                                } else if is_up && down.remove(service) {
                                    log::info!("[{}] Service is running again", service);
                                }
                            }
                        }
                        Err(e) => log::warn!("Failed to query service status: {}", e),
                    }
                }
            }
        }
    }

    /// Stop every started service in reverse start order.
    ///
    /// Each stop is bounded by `stop_timeout + stop_grace`. A failed stop
    /// never prevents the remaining ones. Calling this on a stopped
    /// session does nothing.
    pub async fn shutdown(&mut self) -> ShutdownReport {
        match self.state {
            SessionState::Stopping | SessionState::Stopped => return ShutdownReport::default(),
            SessionState::Idle => {
                self.state = SessionState::Stopped;
                return ShutdownReport::default();
            }
            SessionState::Launching | SessionState::Running => {}
        }

        self.state = SessionState::Stopping;
        log::info!("Shutting down {} services...", self.started.len());

        if let Some(mut follower) = self.log_follower.take() {
            if let Err(e) = follower.stop(Duration::from_secs(2)).await {
                log::warn!("Failed to stop log follower: {}", e);
            }
        }

        let report = self.stop_started().await;
        self.state = SessionState::Stopped;

        for error in &report.errors {
            log::warn!("{}", error);
        }
        if report.is_clean() {
            log::info!("All services shut down");
        } else {
            log::warn!(
                "Shutdown finished with {} stop error(s)",
                report.errors.len()
            );
        }
        report
    }

    async fn rollback(&mut self) -> Vec<StopError> {
        if !self.started.is_empty() {
            log::warn!("Rolling back {} started services", self.started.len());
        }
        let report = self.stop_started().await;
        self.state = SessionState::Stopped;
        report.errors
    }

    async fn stop_started(&mut self) -> ShutdownReport {
        let mut report = ShutdownReport::default();
        let budget = self.config.stop_timeout + self.config.stop_grace;

        while let Some(service) = self.started.pop() {
            log::info!("[{}] Stopping", service);
            let stop = self.runtime.stop(&service, self.config.stop_timeout);
            match tokio::time::timeout(budget, stop).await {
                Ok(Ok(())) => {
                    log::info!("[{}] Stopped", service);
                    report.stopped.push(service);
                }
                Ok(Err(e)) => report.errors.push(StopError::Failed { service, source: e }),
                Err(_) => report.errors.push(StopError::Timeout {
                    service,
                    timeout: budget,
                }),
            }
        }

        report
    }
}

/// Create a session and launch it
pub async fn launch(
    runtime: Arc<dyn ContainerRuntime>,
    order: StartOrder,
    config: SessionConfig,
    shutdown_rx: &watch::Receiver<()>,
) -> Result<RunSession, LaunchError> {
    let mut session = RunSession::new(runtime, order, config);
    session.launch(shutdown_rx).await?;
    Ok(session)
}

/// Wait for the session to end, then shut it down
pub async fn supervise(
    session: &mut RunSession,
    shutdown_rx: &mut watch::Receiver<()>,
) -> RunOutcome {
    let wait = session.wait(shutdown_rx).await;
    let shutdown = session.shutdown().await;
    RunOutcome { wait, shutdown }
}

fn interrupted(shutdown_rx: &watch::Receiver<()>) -> bool {
    shutdown_rx.has_changed().unwrap_or(false)
}

fn log_event(name: &str, event: ProcessEvent) {
    match event {
        ProcessEvent::Output { line, is_stderr } => {
            let (service, message) = split_log_line(&line);
            let service = service.unwrap_or(name);
            if is_stderr {
                log::warn!("[{}] {}", service, message);
            } else {
                log::info!("[{}] {}", service, message);
            }
        }
        ProcessEvent::Started { pid } => log::debug!("[{}] Started with PID {}", name, pid),
        ProcessEvent::Exited { code } => log::debug!("[{}] Exited with code {:?}", name, code),
    }
}

/// A service that did not stop cleanly
#[derive(Debug, thiserror::Error)]
pub enum StopError {
    #[error("[{service}] Failed to stop: {source}")]
    Failed {
        service: String,
        #[source]
        source: RuntimeError,
    },

    #[error("[{service}] Did not stop within {timeout:?}")]
    Timeout { service: String, timeout: Duration },
}

impl StopError {
    pub fn service(&self) -> &str {
        match self {
            StopError::Failed { service, .. } | StopError::Timeout { service, .. } => service,
        }
    }
}

/// Errors from launching a session
#[derive(Debug, thiserror::Error)]
pub enum LaunchError {
    #[error("Failed to start service '{service}': {source}")]
    Service {
        service: String,
        #[source]
        source: RuntimeError,
        /// Services that could not be rolled back
        rollback: Vec<StopError>,
    },

    #[error("Launch interrupted")]
    Interrupted { rollback: Vec<StopError> },

    #[error("Cannot launch a session that is {0}")]
    InvalidState(SessionState),
}

impl LaunchError {
    /// Stop errors hit while rolling back
    pub fn rollback_errors(&self) -> &[StopError] {
        match self {
            LaunchError::Service { rollback, .. } | LaunchError::Interrupted { rollback } => {
                rollback
            }
            LaunchError::InvalidState(_) => &[],
        }
    }

    pub fn is_interrupt(&self) -> bool {
        matches!(self, LaunchError::Interrupted { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Runtime where every call succeeds and nothing is ever running
    struct IdleRuntime;

    #[async_trait]
    impl ContainerRuntime for IdleRuntime {
        async fn start(&self, _service: &str) -> Result<(), RuntimeError> {
            Ok(())
        }
        async fn stop(&self, _service: &str, _timeout: Duration) -> Result<(), RuntimeError> {
            Ok(())
        }
        async fn running(&self, _services: &[String]) -> Result<Vec<String>, RuntimeError> {
            Ok(Vec::new())
        }
        async fn build(&self, _services: &[String]) -> Result<(), RuntimeError> {
            Ok(())
        }
        async fn pull(&self, _services: &[String]) -> Result<(), RuntimeError> {
            Ok(())
        }
        async fn down(&self) -> Result<(), RuntimeError> {
            Ok(())
        }
    }

    fn session(services: &[&str]) -> RunSession {
        let order = StartOrder::from_services(services.iter().map(|s| s.to_string()).collect());
        let config = SessionConfig {
            health_interval: Duration::from_millis(10),
            ..Default::default()
        };
        RunSession::new(Arc::new(IdleRuntime), order, config)
    }

    #[tokio::test]
    async fn test_shutdown_of_idle_session() {
        let mut session = session(&["mqtt"]);
        let report = session.shutdown().await;
        assert!(report.is_clean());
        assert!(report.stopped.is_empty());
        assert_eq!(session.state(), SessionState::Stopped);
    }

    #[tokio::test]
    async fn test_stopped_session_cannot_relaunch() {
        let (_tx, rx) = watch::channel(());
        let mut session = session(&["mqtt"]);
        session.launch(&rx).await.unwrap();
        session.shutdown().await;

        let result = session.launch(&rx).await;
        assert!(matches!(
            result,
            Err(LaunchError::InvalidState(SessionState::Stopped))
        ));
    }

    #[tokio::test]
    async fn test_wait_reports_all_exited() {
        let (_tx, mut rx) = watch::channel(());
        let mut session = session(&["mqtt", "fcm"]);
        session.launch(&rx).await.unwrap();
        assert_eq!(session.state(), SessionState::Running);

        let outcome = supervise(&mut session, &mut rx).await;
        assert_eq!(outcome.wait, WaitOutcome::AllExited);
        assert_eq!(outcome.exit_code(), 1);
        assert_eq!(outcome.shutdown.stopped, vec!["fcm", "mqtt"]);
    }

    #[tokio::test]
    async fn test_wait_on_idle_session() {
        let (_tx, mut rx) = watch::channel(());
        let mut session = session(&["mqtt"]);
        assert_eq!(session.wait(&mut rx).await, WaitOutcome::NotRunning);
    }

    #[test]
    fn test_exit_codes() {
        let outcome = RunOutcome {
            wait: WaitOutcome::Interrupted,
            shutdown: ShutdownReport::default(),
        };
        assert_eq!(outcome.exit_code(), 0);
    }
}
