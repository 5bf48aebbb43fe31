//! Process manager for spawning and terminating managed services

use anyhow::{Context, Result};
use std::collections::HashMap;
use std::process::Stdio;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use tokio::sync::mpsc;
use tracing::{debug, warn};

use crate::core::{ProcessEvent, ServiceSpec};

use super::ProcessHandle;

/// Spawns child services and owns their process handles
pub struct ProcessManager {
    /// Map of running process handles, keyed by service name
    handles: HashMap<String, ProcessHandle>,
    /// Channel to send events to the supervisor
    event_tx: mpsc::UnboundedSender<ProcessEvent>,
}

impl ProcessManager {
    /// Create a new process manager
    pub fn new(event_tx: mpsc::UnboundedSender<ProcessEvent>) -> Self {
        Self {
            handles: HashMap::new(),
            event_tx,
        }
    }

    /// Spawn a service, capturing its output streams
    pub fn spawn(&mut self, spec: &ServiceSpec) -> Result<u32> {
        if self.handles.contains_key(&spec.name) {
            anyhow::bail!("service '{}' is already running", spec.name);
        }

        let mut cmd = Command::new(&spec.program);
        cmd.args(&spec.args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .stdin(Stdio::null())
            .kill_on_drop(true);

        if let Some(dir) = &spec.working_dir {
            cmd.current_dir(dir);
        }

        // Own process group so termination also reaches grandchildren
        #[cfg(unix)]
        cmd.process_group(0);

        let mut child = cmd
            .spawn()
            .with_context(|| format!("failed to spawn service '{}'", spec.name))?;

        let pid = child.id().unwrap_or(0);
        let _ = self.event_tx.send(ProcessEvent::Started {
            name: spec.name.clone(),
            pid,
        });

        let stdout = child.stdout.take();
        let stderr = child.stderr.take();

        let mut reader_tasks = Vec::new();

        // Spawn stdout reader task
        if let Some(stdout) = stdout {
            let tx = self.event_tx.clone();
            let name = spec.name.clone();
            let task = tokio::spawn(async move {
                let reader = BufReader::new(stdout);
                let mut lines = reader.lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx
                        .send(ProcessEvent::Output {
                            name: name.clone(),
                            line,
                            is_stderr: false,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
            });
            reader_tasks.push(task);
        }

        // Spawn stderr reader task
        if let Some(stderr) = stderr {
            let tx = self.event_tx.clone();
            let name = spec.name.clone();
            let task = tokio::spawn(async move {
                let reader = BufReader::new(stderr);
                let mut lines = reader.lines();
                while let Ok(Some(line)) = lines.next_line().await {
                    if tx
                        .send(ProcessEvent::Output {
                            name: name.clone(),
                            line,
                            is_stderr: true,
                        })
                        .is_err()
                    {
                        break;
                    }
                }
            });
            reader_tasks.push(task);
        }

        let handle = ProcessHandle::new(spec.name.clone(), child, reader_tasks);
        self.handles.insert(spec.name.clone(), handle);

        Ok(pid)
    }

    /// Reap exited processes and emit `Exited` events
    pub fn check_processes(&mut self) {
        let mut exited = Vec::new();

        for (name, handle) in &mut self.handles {
            match handle.child.try_wait() {
                Ok(Some(status)) => {
                    let exit_code = status.code().unwrap_or(-1);
                    let _ = self.event_tx.send(ProcessEvent::Exited {
                        name: name.clone(),
                        exit_code,
                    });
                    exited.push(name.clone());
                }
                Ok(None) => {
                    // Still running
                }
                Err(e) => {
                    let _ = self.event_tx.send(ProcessEvent::Error {
                        name: name.clone(),
                        error: e.to_string(),
                    });
                    exited.push(name.clone());
                }
            }
        }

        // Remove exited processes from handles
        for name in exited {
            if let Some(handle) = self.handles.remove(&name) {
                handle.abort_readers();
            }
        }
    }

    /// Terminate a service: graceful signal, bounded wait, then force kill.
    ///
    /// Returns `Ok(true)` when the process had to be force-killed. A service
    /// with no live handle is a no-op.
    pub async fn terminate(&mut self, name: &str, grace: Duration) -> Result<bool> {
        let Some(mut handle) = self.handles.remove(name) else {
            return Ok(false);
        };

        #[cfg(unix)]
        if let Some(pid) = handle.pid {
            signal_group(pid, nix::sys::signal::Signal::SIGTERM);
        }

        #[cfg(not(unix))]
        {
            let _ = handle.child.start_kill();
        }

        let forced = match tokio::time::timeout(grace, handle.child.wait()).await {
            Ok(Ok(status)) => {
                debug!("Service '{}' exited with {}", name, status);
                false
            }
            Ok(Err(e)) => {
                warn!("Failed waiting on service '{}': {}", name, e);
                false
            }
            Err(_) => {
                warn!(
                    "Service '{}' did not exit within {:?}, force killing",
                    name, grace
                );

                #[cfg(unix)]
                if let Some(pid) = handle.pid {
                    signal_group(pid, nix::sys::signal::Signal::SIGKILL);
                }

                if let Err(e) = handle.child.kill().await {
                    warn!("Failed to kill service '{}': {}", name, e);
                }
                true
            }
        };

        handle.abort_readers();
        Ok(forced)
    }

    /// Check if a service currently has a live handle
    pub fn is_running(&self, name: &str) -> bool {
        self.handles.contains_key(name)
    }

    /// Names of all services with live handles
    pub fn running_services(&self) -> Vec<String> {
        self.handles.keys().cloned().collect()
    }

    /// Get the number of running processes
    pub fn running_count(&self) -> usize {
        self.handles.len()
    }
}

/// Deliver a signal to a child's whole process group
#[cfg(unix)]
fn signal_group(pid: u32, signal: nix::sys::signal::Signal) {
    use nix::sys::signal::killpg;
    use nix::unistd::Pid;

    // ESRCH just means the group is already gone
    if let Err(e) = killpg(Pid::from_raw(pid as i32), signal) {
        if e != nix::errno::Errno::ESRCH {
            warn!("Failed to signal process group {}: {}", pid, e);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ReadinessPreferences;

    fn shell_spec(name: &str, script: &str) -> ServiceSpec {
        ServiceSpec {
            name: name.to_string(),
            program: "sh".to_string(),
            args: vec!["-c".to_string(), script.to_string()],
            working_dir: None,
            base_url: "http://127.0.0.1:9999".to_string(),
            health_path: "/health".to_string(),
            required: false,
            readiness: ReadinessPreferences::default(),
            fatal_when_unhealthy: false,
        }
    }

    #[tokio::test]
    async fn test_spawn_and_capture_output() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut manager = ProcessManager::new(tx);

        manager
            .spawn(&shell_spec("echoer", "echo hello; echo oops >&2"))
            .unwrap();

        let mut saw_stdout = false;
        let mut saw_stderr = false;
        let mut exit_code = None;

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        while tokio::time::Instant::now() < deadline {
            manager.check_processes();
            while let Ok(event) = rx.try_recv() {
                match event {
                    ProcessEvent::Output {
                        line, is_stderr, ..
                    } => {
                        if line == "hello" && !is_stderr {
                            saw_stdout = true;
                        }
                        if line == "oops" && is_stderr {
                            saw_stderr = true;
                        }
                    }
                    ProcessEvent::Exited {
                        exit_code: code, ..
                    } => exit_code = Some(code),
                    _ => {}
                }
            }
            if saw_stdout && saw_stderr && exit_code.is_some() {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }

        assert!(saw_stdout);
        assert!(saw_stderr);
        assert_eq!(exit_code, Some(0));
        assert_eq!(manager.running_count(), 0);
    }

    #[tokio::test]
    async fn test_terminate_graceful() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut manager = ProcessManager::new(tx);

        manager.spawn(&shell_spec("sleeper", "sleep 30")).unwrap();
        assert!(manager.is_running("sleeper"));

        let forced = manager
            .terminate("sleeper", Duration::from_secs(5))
            .await
            .unwrap();

        assert!(!forced);
        assert!(!manager.is_running("sleeper"));
    }

    #[tokio::test]
    async fn test_terminate_missing_service_is_noop() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut manager = ProcessManager::new(tx);

        manager.spawn(&shell_spec("sleeper", "sleep 30")).unwrap();
        manager
            .terminate("sleeper", Duration::from_secs(5))
            .await
            .unwrap();

        // Second terminate has no handle left to signal
        let forced = manager
            .terminate("sleeper", Duration::from_secs(5))
            .await
            .unwrap();
        assert!(!forced);
        assert_eq!(manager.running_count(), 0);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_terminate_escalates_to_kill() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut manager = ProcessManager::new(tx);

        manager
            .spawn(&shell_spec("stubborn", "trap '' TERM; sleep 30"))
            .unwrap();

        // Give the shell a moment to install its trap
        tokio::time::sleep(Duration::from_millis(200)).await;

        let forced = manager
            .terminate("stubborn", Duration::from_millis(300))
            .await
            .unwrap();

        assert!(forced);
        assert!(!manager.is_running("stubborn"));
    }

    #[tokio::test]
    async fn test_duplicate_spawn_rejected() {
        let (tx, _rx) = mpsc::unbounded_channel();
        let mut manager = ProcessManager::new(tx);

        let spec = shell_spec("sleeper", "sleep 30");
        manager.spawn(&spec).unwrap();
        assert!(manager.spawn(&spec).is_err());

        manager
            .terminate("sleeper", Duration::from_secs(5))
            .await
            .unwrap();
    }
}
