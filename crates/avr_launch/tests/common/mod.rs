//! Test helpers for session integration tests

#![allow(dead_code)]

use async_trait::async_trait;
use avr_launch::runtime::{ContainerRuntime, RuntimeError, SessionConfig, StartOrder};
use avr_launch::Registry;
use std::collections::{BTreeSet, HashSet};
use std::sync::Mutex;
use std::time::Duration;
use tokio::sync::watch;

/// A runtime call as seen by [`RecordingRuntime`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Call {
    Start(String),
    Stop(String),
}

/// In-memory container runtime that records every call
#[derive(Default)]
pub struct RecordingRuntime {
    calls: Mutex<Vec<Call>>,
    running: Mutex<BTreeSet<String>>,
    fail_start: HashSet<String>,
    /// Services whose container comes up although the start call fails
    fail_after_create: HashSet<String>,
    fail_stop: HashSet<String>,
    hang_stop: HashSet<String>,
    /// Fires the shutdown signal while the named service starts
    interrupt_on: Mutex<Option<(String, watch::Sender<()>)>>,
}

impl RecordingRuntime {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing_start(mut self, service: &str) -> Self {
        self.fail_start.insert(service.to_string());
        self
    }

    pub fn failing_after_create(mut self, service: &str) -> Self {
        self.fail_after_create.insert(service.to_string());
        self
    }

    pub fn failing_stop(mut self, service: &str) -> Self {
        self.fail_stop.insert(service.to_string());
        self
    }

    /// The named service never finishes stopping
    pub fn hanging_stop(mut self, service: &str) -> Self {
        self.hang_stop.insert(service.to_string());
        self
    }

    pub fn interrupt_on_start(self, service: &str, shutdown_tx: watch::Sender<()>) -> Self {
        *self.interrupt_on.lock().unwrap() = Some((service.to_string(), shutdown_tx));
        self
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().unwrap().clone()
    }

    pub fn started(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Start(s) => Some(s),
                Call::Stop(_) => None,
            })
            .collect()
    }

    pub fn stopped(&self) -> Vec<String> {
        self.calls()
            .into_iter()
            .filter_map(|c| match c {
                Call::Stop(s) => Some(s),
                Call::Start(_) => None,
            })
            .collect()
    }

    pub fn running_now(&self) -> BTreeSet<String> {
        self.running.lock().unwrap().clone()
    }

    /// Simulate a container exiting on its own
    pub fn exit(&self, service: &str) {
        self.running.lock().unwrap().remove(service);
    }
}

#[async_trait]
impl ContainerRuntime for RecordingRuntime {
    async fn start(&self, service: &str) -> Result<(), RuntimeError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Start(service.to_string()));

        if let Some((target, tx)) = self.interrupt_on.lock().unwrap().as_ref() {
            if target == service {
                let _ = tx.send(());
            }
        }

        if self.fail_start.contains(service) {
            return Err(RuntimeError::Other(format!("image for {} not found", service)));
        }
        self.running.lock().unwrap().insert(service.to_string());
        if self.fail_after_create.contains(service) {
            return Err(RuntimeError::Other(format!("{} start was interrupted", service)));
        }
        Ok(())
    }

    async fn stop(&self, service: &str, _timeout: Duration) -> Result<(), RuntimeError> {
        self.calls
            .lock()
            .unwrap()
            .push(Call::Stop(service.to_string()));

        if self.hang_stop.contains(service) {
            tokio::time::sleep(Duration::from_secs(30)).await;
        }
        if self.fail_stop.contains(service) {
            return Err(RuntimeError::Other(format!("{} refused to stop", service)));
        }
        self.running.lock().unwrap().remove(service);
        Ok(())
    }

    async fn running(&self, services: &[String]) -> Result<Vec<String>, RuntimeError> {
        let running = self.running.lock().unwrap();
        Ok(services
            .iter()
            .filter(|s| running.contains(*s))
            .cloned()
            .collect())
    }

    async fn build(&self, _services: &[String]) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn pull(&self, _services: &[String]) -> Result<(), RuntimeError> {
        Ok(())
    }

    async fn down(&self) -> Result<(), RuntimeError> {
        self.running.lock().unwrap().clear();
        Ok(())
    }
}

/// Start order for the given user tokens against the built-in registry
pub fn order_for(tokens: &[&str]) -> StartOrder {
    let registry = Registry::builtin();
    let selection = registry.resolve(tokens).unwrap();
    StartOrder::build(&registry, &selection).unwrap()
}

/// Short timings so the tests don't wait on real stop timeouts
pub fn fast_config() -> SessionConfig {
    SessionConfig {
        stop_timeout: Duration::from_millis(50),
        stop_grace: Duration::from_millis(50),
        health_interval: Duration::from_millis(20),
        follow_logs: false,
    }
}
