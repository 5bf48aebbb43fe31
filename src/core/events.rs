//! Events emitted by managed child processes

/// Events emitted by the process manager
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    /// Process has started
    Started { name: String, pid: u32 },
    /// Process produced an output line
    Output {
        name: String,
        line: String,
        is_stderr: bool,
    },
    /// Process has exited
    Exited { name: String, exit_code: i32 },
    /// Error occurred while managing the process
    Error { name: String, error: String },
}

impl ProcessEvent {
    /// Name of the service this event belongs to
    pub fn service(&self) -> &str {
        match self {
            ProcessEvent::Started { name, .. }
            | ProcessEvent::Output { name, .. }
            | ProcessEvent::Exited { name, .. }
            | ProcessEvent::Error { name, .. } => name,
        }
    }
}
