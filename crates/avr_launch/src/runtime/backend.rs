//! Container runtime boundary
//!
//! The launcher only ever asks the runtime to start, stop, list, build or
//! pull named services. [`DockerCompose`] drives the `docker compose` CLI.

use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::time::Duration;
use tokio::process::Command;

use crate::runtime::process::{EventSender, ManagedProcess, ProcessConfig};

/// Operations the launcher needs from a container runtime
#[async_trait]
pub trait ContainerRuntime: Send + Sync {
    /// Start one service, without its dependencies
    async fn start(&self, service: &str) -> Result<(), RuntimeError>;

    /// Stop one service, giving it `timeout` to exit
    async fn stop(&self, service: &str, timeout: Duration) -> Result<(), RuntimeError>;

    /// Which of `services` are currently running
    async fn running(&self, services: &[String]) -> Result<Vec<String>, RuntimeError>;

    /// Spawn a process streaming the services' logs into `events`
    async fn follow_logs(
        &self,
        _services: &[String],
        _events: EventSender,
    ) -> Result<Option<ManagedProcess>, RuntimeError> {
        Ok(None)
    }

    async fn build(&self, services: &[String]) -> Result<(), RuntimeError>;

    async fn pull(&self, services: &[String]) -> Result<(), RuntimeError>;

    /// Tear down the whole project
    async fn down(&self) -> Result<(), RuntimeError>;
}

/// `docker compose` (or legacy `docker-compose`) driver
#[derive(Debug, Clone)]
pub struct DockerCompose {
    /// Program and leading arguments, e.g. `["docker", "compose"]`
    base: Vec<String>,
    project_name: String,
    compose_file: PathBuf,
}

impl DockerCompose {
    pub fn new(base: Vec<String>, project_name: &str, compose_file: &Path) -> Self {
        Self {
            base,
            project_name: project_name.to_string(),
            compose_file: compose_file.to_path_buf(),
        }
    }

    /// Prefer the `docker compose` plugin, fall back to `docker-compose`
    pub async fn detect(project_name: &str, compose_file: &Path) -> Self {
        let plugin = Command::new("docker")
            .args(["compose", "--help"])
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .await
            .map(|s| s.success())
            .unwrap_or(false);

        let base = if plugin {
            vec!["docker".to_string(), "compose".to_string()]
        } else {
            log::debug!("docker compose plugin not available, using docker-compose");
            vec!["docker-compose".to_string()]
        };

        Self::new(base, project_name, compose_file)
    }

    /// Full argument list (after the program) for a compose subcommand
    pub fn args(&self, subcommand: &[&str]) -> Vec<String> {
        let mut args: Vec<String> = self.base[1..].to_vec();
        args.push("--project-name".to_string());
        args.push(self.project_name.clone());
        args.push("--file".to_string());
        args.push(self.compose_file.display().to_string());
        args.extend(subcommand.iter().map(|s| s.to_string()));
        args
    }

    fn program(&self) -> &str {
        &self.base[0]
    }

    fn describe(&self, subcommand: &[&str]) -> String {
        format!("{} {}", self.program(), self.args(subcommand).join(" "))
    }

    /// Run a subcommand capturing its output; stdout on success
    async fn run_captured(&self, subcommand: &[&str]) -> Result<String, RuntimeError> {
        log::debug!("Running: {}", self.describe(subcommand));
        let output = Command::new(self.program())
            .args(self.args(subcommand))
            .stdin(Stdio::null())
            .output()
            .await
            .map_err(|e| RuntimeError::Spawn {
                command: self.describe(subcommand),
                source: e,
            })?;

        if !output.status.success() {
            return Err(RuntimeError::CommandFailed {
                command: self.describe(subcommand),
                code: output.status.code(),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }

        Ok(String::from_utf8_lossy(&output.stdout).into_owned())
    }

    /// Run a subcommand attached to the terminal
    async fn run_attached(&self, subcommand: &[&str]) -> Result<(), RuntimeError> {
        log::info!("Running command: {}", self.describe(subcommand));
        let status = Command::new(self.program())
            .args(self.args(subcommand))
            .status()
            .await
            .map_err(|e| RuntimeError::Spawn {
                command: self.describe(subcommand),
                source: e,
            })?;

        if !status.success() {
            return Err(RuntimeError::CommandFailed {
                command: self.describe(subcommand),
                code: status.code(),
                stderr: String::new(),
            });
        }
        Ok(())
    }
}

fn with_services<'a>(subcommand: &[&'a str], services: &'a [String]) -> Vec<&'a str> {
    let mut args = subcommand.to_vec();
    args.extend(services.iter().map(String::as_str));
    args
}

#[async_trait]
impl ContainerRuntime for DockerCompose {
    async fn start(&self, service: &str) -> Result<(), RuntimeError> {
        self.run_captured(&[
            "up",
            "--detach",
            "--no-deps",
            "--force-recreate",
            "--remove-orphans",
            service,
        ])
        .await
        .map(|_| ())
    }

    async fn stop(&self, service: &str, timeout: Duration) -> Result<(), RuntimeError> {
        let secs = timeout.as_secs().max(1).to_string();
        self.run_captured(&["stop", "--timeout", secs.as_str(), service])
            .await
            .map(|_| ())
    }

    async fn running(&self, services: &[String]) -> Result<Vec<String>, RuntimeError> {
        let stdout = self
            .run_captured(&["ps", "--services", "--filter", "status=running"])
            .await?;
        let up: Vec<&str> = stdout.lines().map(str::trim).collect();
        Ok(services
            .iter()
            .filter(|s| up.contains(&s.as_str()))
            .cloned()
            .collect())
    }

    async fn follow_logs(
        &self,
        services: &[String],
        events: EventSender,
    ) -> Result<Option<ManagedProcess>, RuntimeError> {
        let subcommand = with_services(
            &["logs", "--follow", "--no-color", "--tail", "0"],
            services,
        );
        let mut process = ManagedProcess::new(ProcessConfig {
            name: "logs".to_string(),
            program: self.program().to_string(),
            args: self.args(&subcommand),
            working_dir: None,
        })
        .with_event_sender(events);

        process.start().await.map_err(|e| RuntimeError::Logs(e.to_string()))?;
        Ok(Some(process))
    }

    async fn build(&self, services: &[String]) -> Result<(), RuntimeError> {
        self.run_attached(&with_services(&["build"], services)).await
    }

    async fn pull(&self, services: &[String]) -> Result<(), RuntimeError> {
        self.run_attached(&with_services(&["pull"], services)).await
    }

    async fn down(&self) -> Result<(), RuntimeError> {
        self.run_attached(&["down", "--remove-orphans", "--volumes"])
            .await
    }
}

/// Errors reported by a container runtime
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    #[error("Failed to run '{command}': {source}")]
    Spawn {
        command: String,
        #[source]
        source: std::io::Error,
    },

    #[error("'{command}' exited with {}{}", exit_label(.code), stderr_suffix(.stderr))]
    CommandFailed {
        command: String,
        code: Option<i32>,
        stderr: String,
    },

    #[error("Failed to follow logs: {0}")]
    Logs(String),

    #[error("{0}")]
    Other(String),
}

fn exit_label(code: &Option<i32>) -> String {
    match code {
        Some(code) => format!("code {}", code),
        None => "a signal".to_string(),
    }
}

fn stderr_suffix(stderr: &str) -> String {
    if stderr.is_empty() {
        String::new()
    } else {
        format!(": {}", stderr)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn compose(base: &[&str]) -> DockerCompose {
        DockerCompose::new(
            base.iter().map(|s| s.to_string()).collect(),
            "avr",
            Path::new("/opt/avr/docker-compose.yml"),
        )
    }

    #[test]
    fn test_args_plugin() {
        let dc = compose(&["docker", "compose"]);
        assert_eq!(
            dc.args(&["up", "fcm"]),
            vec![
                "compose",
                "--project-name",
                "avr",
                "--file",
                "/opt/avr/docker-compose.yml",
                "up",
                "fcm"
            ]
        );
    }

    #[test]
    fn test_args_legacy() {
        let dc = compose(&["docker-compose"]);
        assert_eq!(dc.args(&["down"])[0], "--project-name");
        assert_eq!(
            dc.describe(&["down"]),
            "docker-compose --project-name avr --file /opt/avr/docker-compose.yml down"
        );
    }

    #[test]
    fn test_with_services() {
        let services = vec!["fcm".to_string(), "vio".to_string()];
        assert_eq!(with_services(&["pull"], &services), vec!["pull", "fcm", "vio"]);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_failed_command_reports_exit_code() {
        let dc = compose(&["false"]);
        let result = dc.start("fcm").await;
        match result {
            Err(RuntimeError::CommandFailed { code, command, .. }) => {
                assert_eq!(code, Some(1));
                assert!(command.contains("fcm"));
            }
            other => panic!("expected CommandFailed, got {:?}", other),
        }
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_running_parses_service_lines() {
        // `sh -c 'printf ...' <args>` ignores the compose arguments
        let dc = compose(&["sh", "-c", "printf 'mqtt\\nfcm\\n'"]);
        let services = vec!["fcm".to_string(), "vio".to_string()];
        let running = dc.running(&services).await.unwrap();
        assert_eq!(running, vec!["fcm"]);
    }

    #[tokio::test]
    async fn test_missing_program() {
        let dc = compose(&["/nonexistent/docker"]);
        assert!(matches!(
            dc.stop("fcm", Duration::from_secs(1)).await,
            Err(RuntimeError::Spawn { .. })
        ));
    }
}
