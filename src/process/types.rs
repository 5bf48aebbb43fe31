//! Service types and state management

use chrono::{DateTime, Local};

use crate::core::{LogBuffer, ServiceSpec};

/// Lifecycle state of a managed service
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceState {
    /// Process spawned, readiness not yet confirmed
    Starting,
    /// Readiness probe succeeded, service is serving
    Running,
    /// A later health check reported the service unhealthy
    Unhealthy,
    /// Terminated by a clean shutdown
    Stopped,
    /// Readiness probe exhausted or the process exited unexpectedly
    Failed,
}

impl ServiceState {
    /// Get a short string representation
    pub fn as_str(&self) -> &str {
        match self {
            ServiceState::Starting => "Starting",
            ServiceState::Running => "Running",
            ServiceState::Unhealthy => "Unhealthy",
            ServiceState::Stopped => "Stopped",
            ServiceState::Failed => "Failed",
        }
    }

    /// Check whether the underlying process is expected to be alive
    pub fn is_active(&self) -> bool {
        matches!(
            self,
            ServiceState::Starting | ServiceState::Running | ServiceState::Unhealthy
        )
    }
}

impl std::fmt::Display for ServiceState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// A managed service: its spec plus observable runtime state
#[derive(Debug)]
pub struct ManagedService {
    /// Launch spec this service was created from
    pub spec: ServiceSpec,
    /// Current lifecycle state
    pub state: ServiceState,
    /// Process ID (if running)
    pub pid: Option<u32>,
    /// When the process was last started
    pub started_at: Option<DateTime<Local>>,
    /// When the process ended
    pub ended_at: Option<DateTime<Local>>,
    /// Captured stdout/stderr of the process
    pub log_buffer: LogBuffer,
}

impl ManagedService {
    /// Create a new managed service in `Starting` state
    pub fn new(spec: ServiceSpec, log_buffer_size: usize) -> Self {
        Self {
            spec,
            state: ServiceState::Starting,
            pid: None,
            started_at: None,
            ended_at: None,
            log_buffer: LogBuffer::new(log_buffer_size),
        }
    }

    /// Record a successful spawn
    pub fn mark_started(&mut self, pid: u32) {
        self.pid = Some(pid);
        self.started_at = Some(Local::now());
        self.state = ServiceState::Starting;
    }

    /// Record process exit with the given terminal state
    pub fn mark_ended(&mut self, state: ServiceState) {
        self.ended_at = Some(Local::now());
        self.state = state;
    }

    /// Get the uptime string
    pub fn uptime(&self) -> Option<String> {
        if let Some(started) = self.started_at {
            if self.state.is_active() {
                let duration = Local::now().signed_duration_since(started);
                return Some(format_duration(duration));
            }
        }
        None
    }
}

/// Format a duration as a human-readable string
pub fn format_duration(duration: chrono::Duration) -> String {
    let total_seconds = duration.num_seconds();
    let hours = total_seconds / 3600;
    let minutes = (total_seconds % 3600) / 60;
    let seconds = total_seconds % 60;

    if hours > 0 {
        format!("{}h {}m {}s", hours, minutes, seconds)
    } else if minutes > 0 {
        format!("{}m {}s", minutes, seconds)
    } else {
        format!("{}s", seconds)
    }
}

/// Handle to a running child process
#[derive(Debug)]
pub struct ProcessHandle {
    /// Service name
    pub name: String,
    /// Process ID captured at spawn time
    pub pid: Option<u32>,
    /// Child process handle
    pub child: tokio::process::Child,
    /// Task handles for stdout/stderr readers
    pub reader_tasks: Vec<tokio::task::JoinHandle<()>>,
}

impl ProcessHandle {
    /// Create a new process handle
    pub fn new(
        name: String,
        child: tokio::process::Child,
        reader_tasks: Vec<tokio::task::JoinHandle<()>>,
    ) -> Self {
        let pid = child.id();
        Self {
            name,
            pid,
            child,
            reader_tasks,
        }
    }

    /// Abort the output reader tasks
    pub fn abort_readers(&self) {
        for task in &self.reader_tasks {
            task.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::ReadinessPreferences;

    fn spec(name: &str) -> ServiceSpec {
        ServiceSpec {
            name: name.to_string(),
            program: "true".to_string(),
            args: Vec::new(),
            working_dir: None,
            base_url: "http://127.0.0.1:9999".to_string(),
            health_path: "/health".to_string(),
            required: false,
            readiness: ReadinessPreferences::default(),
            fatal_when_unhealthy: false,
        }
    }

    #[test]
    fn test_state_is_active() {
        assert!(ServiceState::Starting.is_active());
        assert!(ServiceState::Running.is_active());
        assert!(ServiceState::Unhealthy.is_active());
        assert!(!ServiceState::Stopped.is_active());
        assert!(!ServiceState::Failed.is_active());
    }

    #[test]
    fn test_mark_started_and_ended() {
        let mut service = ManagedService::new(spec("api"), 100);
        assert_eq!(service.state, ServiceState::Starting);
        assert!(service.pid.is_none());

        service.mark_started(1234);
        assert_eq!(service.pid, Some(1234));
        assert!(service.started_at.is_some());

        service.mark_ended(ServiceState::Stopped);
        assert_eq!(service.state, ServiceState::Stopped);
        assert!(service.ended_at.is_some());
        assert!(service.uptime().is_none());
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(chrono::Duration::seconds(42)), "42s");
        assert_eq!(format_duration(chrono::Duration::seconds(125)), "2m 5s");
        assert_eq!(format_duration(chrono::Duration::seconds(3725)), "1h 2m 5s");
    }
}
