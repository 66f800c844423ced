//! Managed child process used for long-running runtime commands
//! (the container log follower)

use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::{Child, Command};
use tokio::sync::mpsc;

/// Process status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessStatus {
    /// Not started yet
    Pending,
    Running,
    /// Exited with code (None when killed by a signal)
    Stopped(Option<i32>),
    /// Failed to spawn
    Failed,
}

impl ProcessStatus {
    pub fn is_running(&self) -> bool {
        matches!(self, ProcessStatus::Running)
    }

    pub fn is_stopped(&self) -> bool {
        matches!(self, ProcessStatus::Stopped(_) | ProcessStatus::Failed)
    }
}

/// Command line of a managed process
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessConfig {
    /// Name used in log lines
    pub name: String,
    pub program: String,
    pub args: Vec<String>,
    pub working_dir: Option<PathBuf>,
}

/// Event emitted by a managed process
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProcessEvent {
    Started { pid: u32 },
    /// One line of stdout or stderr
    Output { line: String, is_stderr: bool },
    Exited { code: Option<i32> },
}

/// Events are tagged with the process name
pub type EventSender = mpsc::UnboundedSender<(String, ProcessEvent)>;

/// A child process whose output is forwarded as [`ProcessEvent`]s
pub struct ManagedProcess {
    pub config: ProcessConfig,
    pub status: ProcessStatus,
    pub pid: Option<u32>,
    child: Option<Child>,
    event_tx: Option<EventSender>,
}

impl ManagedProcess {
    pub fn new(config: ProcessConfig) -> Self {
        Self {
            config,
            status: ProcessStatus::Pending,
            pid: None,
            child: None,
            event_tx: None,
        }
    }

    pub fn with_event_sender(mut self, tx: EventSender) -> Self {
        self.event_tx = Some(tx);
        self
    }

    fn emit(&self, event: ProcessEvent) {
        if let Some(tx) = &self.event_tx {
            let _ = tx.send((self.config.name.clone(), event));
        }
    }

    /// Spawn the process and start forwarding its output
    pub async fn start(&mut self) -> Result<(), ProcessError> {
        if self.status.is_running() {
            return Err(ProcessError::AlreadyRunning(self.config.name.clone()));
        }

        log::debug!(
            "[{}] Starting: {} {}",
            self.config.name,
            self.config.program,
            self.config.args.join(" ")
        );

        let mut cmd = Command::new(&self.config.program);
        cmd.args(&self.config.args)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);

        if let Some(dir) = &self.config.working_dir {
            cmd.current_dir(dir);
        }

        let mut child = match cmd.spawn() {
            Ok(child) => child,
            Err(e) => {
                self.status = ProcessStatus::Failed;
                return Err(ProcessError::SpawnFailed {
                    name: self.config.name.clone(),
                    source: e,
                });
            }
        };

        let pid = child.id().unwrap_or(0);
        self.pid = Some(pid);
        self.status = ProcessStatus::Running;
        self.emit(ProcessEvent::Started { pid });

        if let Some(tx) = self.event_tx.clone() {
            if let Some(stdout) = child.stdout.take() {
                forward_lines(self.config.name.clone(), stdout, false, tx.clone());
            }
            if let Some(stderr) = child.stderr.take() {
                forward_lines(self.config.name.clone(), stderr, true, tx);
            }
        }

        self.child = Some(child);
        Ok(())
    }

    /// Stop the process: SIGINT, then SIGKILL once `timeout` passes
    pub async fn stop(&mut self, timeout: Duration) -> Result<(), ProcessError> {
        let Some(mut child) = self.child.take() else {
            return Ok(());
        };

        log::debug!("[{}] Stopping process...", self.config.name);

        #[cfg(unix)]
        {
            use nix::sys::signal::{kill, Signal};
            use nix::unistd::Pid;

            if let Some(pid) = self.pid {
                let _ = kill(Pid::from_raw(pid as i32), Signal::SIGINT);
            }
        }

        #[cfg(not(unix))]
        {
            let _ = child.start_kill();
        }

        let code = match tokio::time::timeout(timeout, child.wait()).await {
            Ok(Ok(status)) => status.code(),
            Ok(Err(e)) => {
                log::warn!("[{}] Error waiting for process: {}", self.config.name, e);
                None
            }
            Err(_) => {
                log::warn!(
                    "[{}] Process did not exit in {:?}, killing",
                    self.config.name,
                    timeout
                );
                child.kill().await.map_err(|e| ProcessError::KillFailed {
                    name: self.config.name.clone(),
                    source: e,
                })?;
                None
            }
        };

        self.status = ProcessStatus::Stopped(code);
        self.pid = None;
        self.emit(ProcessEvent::Exited { code });
        Ok(())
    }

    /// Poll whether the process has exited
    pub fn check_status(&mut self) -> ProcessStatus {
        if let Some(child) = &mut self.child {
            match child.try_wait() {
                Ok(Some(status)) => {
                    let code = status.code();
                    self.status = ProcessStatus::Stopped(code);
                    self.pid = None;
                    self.child = None;
                    self.emit(ProcessEvent::Exited { code });
                }
                Ok(None) => {}
                Err(e) => {
                    log::warn!(
                        "[{}] Error checking process status: {}",
                        self.config.name,
                        e
                    );
                }
            }
        }

        self.status
    }
}

fn forward_lines<R>(name: String, reader: R, is_stderr: bool, tx: EventSender)
where
    R: tokio::io::AsyncRead + Unpin + Send + 'static,
{
    tokio::spawn(async move {
        let mut lines = BufReader::new(reader).lines();
        while let Ok(Some(line)) = lines.next_line().await {
            if tx
                .send((name.clone(), ProcessEvent::Output { line, is_stderr }))
                .is_err()
            {
                break;
            }
        }
    });
}

/// Split a `docker compose logs` line (`fcm-1  | message`) into service
/// and message. Lines without the prefix are returned whole.
pub fn split_log_line(line: &str) -> (Option<&str>, &str) {
    match line.split_once(" | ") {
        Some((prefix, message)) => {
            let container = prefix.trim();
            // Strip the replica suffix compose adds to container names
            let service = match container.rsplit_once('-') {
                Some((service, replica)) if replica.chars().all(|c| c.is_ascii_digit()) => service,
                _ => container,
            };
            (Some(service), message)
        }
        None => (None, line),
    }
}

/// Errors that can occur with managed processes
#[derive(Debug, thiserror::Error)]
pub enum ProcessError {
    #[error("Process '{0}' is already running")]
    AlreadyRunning(String),

    #[error("Failed to spawn process '{name}': {source}")]
    SpawnFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to kill process '{name}': {source}")]
    KillFailed {
        name: String,
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_log_line() {
        assert_eq!(split_log_line("fcm-1  | armed"), (Some("fcm"), "armed"));
        assert_eq!(
            split_log_line("mavp2p-12 | a | b"),
            (Some("mavp2p"), "a | b")
        );
        assert_eq!(split_log_line("no prefix here"), (None, "no prefix here"));
        assert_eq!(split_log_line("avr-sim | ok"), (Some("avr-sim"), "ok"));
    }

    #[test]
    fn test_status_predicates() {
        assert!(ProcessStatus::Running.is_running());
        assert!(!ProcessStatus::Pending.is_running());
        assert!(ProcessStatus::Failed.is_stopped());
        assert!(ProcessStatus::Stopped(Some(0)).is_stopped());
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_output_forwarded_and_exit_seen() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut process = ManagedProcess::new(ProcessConfig {
            name: "echo".to_string(),
            program: "sh".to_string(),
            args: vec!["-c".to_string(), "echo hello".to_string()],
            working_dir: None,
        })
        .with_event_sender(tx);

        process.start().await.unwrap();
        assert!(matches!(rx.recv().await, Some((_, ProcessEvent::Started { .. }))));
        match rx.recv().await {
            Some((name, ProcessEvent::Output { line, is_stderr })) => {
                assert_eq!(name, "echo");
                assert_eq!(line, "hello");
                assert!(!is_stderr);
            }
            other => panic!("unexpected event: {:?}", other),
        }

        let mut status = process.check_status();
        for _ in 0..50 {
            if status.is_stopped() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
            status = process.check_status();
        }
        assert_eq!(status, ProcessStatus::Stopped(Some(0)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_stop_long_running() {
        let mut process = ManagedProcess::new(ProcessConfig {
            name: "sleeper".to_string(),
            program: "sleep".to_string(),
            args: vec!["30".to_string()],
            working_dir: None,
        });

        process.start().await.unwrap();
        assert!(process.status.is_running());
        process.stop(Duration::from_secs(2)).await.unwrap();
        assert!(process.status.is_stopped());
        assert!(process.pid.is_none());

        // Second stop is a no-op
        process.stop(Duration::from_secs(2)).await.unwrap();
    }

    #[tokio::test]
    async fn test_spawn_failure() {
        let mut process = ManagedProcess::new(ProcessConfig {
            name: "missing".to_string(),
            program: "/nonexistent/avr-binary".to_string(),
            args: vec![],
            working_dir: None,
        });

        let result = process.start().await;
        assert!(matches!(result, Err(ProcessError::SpawnFailed { .. })));
        assert_eq!(process.status, ProcessStatus::Failed);
    }
}
