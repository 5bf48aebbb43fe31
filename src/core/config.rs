//! Configuration management with YAML persistence

use anyhow::Result;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Supervisor configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Services to launch, in startup order
    #[serde(default = "default_services")]
    pub services: Vec<ServiceSpec>,

    /// Health monitoring preferences
    #[serde(default)]
    pub monitor: MonitorPreferences,

    /// Demo workflow preferences
    #[serde(default)]
    pub workflow: WorkflowPreferences,

    /// Process handling preferences
    #[serde(default)]
    pub process: ProcessPreferences,
}

/// One managed service: its launch command and health endpoint
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServiceSpec {
    /// Display name
    pub name: String,
    /// Program to execute
    pub program: String,
    /// Arguments passed to the program
    #[serde(default)]
    pub args: Vec<String>,
    /// Working directory for the process
    #[serde(default)]
    pub working_dir: Option<PathBuf>,
    /// Base URL the service listens on
    pub base_url: String,
    /// Path polled to decide readiness and health
    #[serde(default = "default_health_path")]
    pub health_path: String,
    /// Whether a failed readiness probe aborts the whole launch
    #[serde(default)]
    pub required: bool,
    /// Readiness probe tuning
    #[serde(default)]
    pub readiness: ReadinessPreferences,
    /// Whether this service going unhealthy after startup stops the stack
    #[serde(default)]
    pub fatal_when_unhealthy: bool,
}

impl ServiceSpec {
    /// Full URL of the health endpoint
    pub fn health_url(&self) -> String {
        format!(
            "{}{}",
            self.base_url.trim_end_matches('/'),
            self.health_path
        )
    }
}

/// Readiness probe tuning
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessPreferences {
    /// Seconds between probe attempts
    #[serde(default = "default_probe_interval")]
    pub interval_secs: u64,

    /// Maximum number of probe attempts before giving up
    #[serde(default = "default_probe_attempts")]
    pub max_attempts: u32,
}

/// Health monitoring preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MonitorPreferences {
    /// Seconds between aggregate health checks
    #[serde(default = "default_monitor_interval")]
    pub interval_secs: u64,

    /// Per-request timeout for outbound HTTP calls, in seconds
    #[serde(default = "default_http_timeout")]
    pub http_timeout_secs: u64,
}

/// Demo workflow preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowPreferences {
    /// Name of the service that exposes the workflow endpoints
    #[serde(default = "default_workflow_service")]
    pub service: String,

    /// Seconds between workflow status polls
    #[serde(default = "default_workflow_interval")]
    pub poll_interval_secs: u64,

    /// Total number of stages the workflow runs through
    #[serde(default = "default_total_stages")]
    pub total_stages: usize,
}

/// Process handling preferences
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessPreferences {
    /// Seconds to wait for a child to exit before force-killing it
    #[serde(default = "default_grace_period")]
    pub grace_period_secs: u64,

    /// Maximum captured output lines kept per service
    #[serde(default = "default_log_buffer_size")]
    pub log_buffer_size: usize,
}

// Default value functions for serde
fn default_health_path() -> String {
    "/health".to_string()
}

fn default_probe_interval() -> u64 {
    2
}

fn default_probe_attempts() -> u32 {
    30
}

fn default_monitor_interval() -> u64 {
    60
}

fn default_http_timeout() -> u64 {
    5
}

fn default_workflow_service() -> String {
    "api".to_string()
}

fn default_workflow_interval() -> u64 {
    5
}

fn default_total_stages() -> usize {
    12
}

fn default_grace_period() -> u64 {
    5
}

fn default_log_buffer_size() -> usize {
    5000
}

/// The stock development profile: API server, frontend dev server, dashboard
fn default_services() -> Vec<ServiceSpec> {
    vec![
        ServiceSpec {
            name: "api".to_string(),
            program: "python".to_string(),
            args: vec![
                "-m".to_string(),
                "uvicorn".to_string(),
                "src.api.main_enhanced:app".to_string(),
                "--host".to_string(),
                "127.0.0.1".to_string(),
                "--port".to_string(),
                "8000".to_string(),
                "--reload".to_string(),
            ],
            working_dir: None,
            base_url: "http://127.0.0.1:8000".to_string(),
            health_path: "/health".to_string(),
            required: true,
            readiness: ReadinessPreferences::default(),
            fatal_when_unhealthy: false,
        },
        ServiceSpec {
            name: "frontend".to_string(),
            program: "npm".to_string(),
            args: vec!["run".to_string(), "dev".to_string()],
            working_dir: Some(PathBuf::from("frontend")),
            base_url: "http://127.0.0.1:3001".to_string(),
            health_path: "/".to_string(),
            required: false,
            readiness: ReadinessPreferences {
                interval_secs: 2,
                max_attempts: 15,
            },
            fatal_when_unhealthy: false,
        },
        ServiceSpec {
            name: "dashboard".to_string(),
            program: "python".to_string(),
            args: vec![
                "-m".to_string(),
                "streamlit".to_string(),
                "run".to_string(),
                "src/dashboard/main_dashboard.py".to_string(),
                "--server.port".to_string(),
                "8501".to_string(),
                "--server.headless".to_string(),
                "true".to_string(),
            ],
            working_dir: None,
            base_url: "http://127.0.0.1:8501".to_string(),
            health_path: "/".to_string(),
            required: false,
            readiness: ReadinessPreferences {
                interval_secs: 2,
                max_attempts: 15,
            },
            fatal_when_unhealthy: false,
        },
    ]
}

impl Default for Config {
    fn default() -> Self {
        Self {
            services: default_services(),
            monitor: MonitorPreferences::default(),
            workflow: WorkflowPreferences::default(),
            process: ProcessPreferences::default(),
        }
    }
}

impl Default for ReadinessPreferences {
    fn default() -> Self {
        Self {
            interval_secs: 2,
            max_attempts: 30,
        }
    }
}

impl Default for MonitorPreferences {
    fn default() -> Self {
        Self {
            interval_secs: 60,
            http_timeout_secs: 5,
        }
    }
}

impl Default for WorkflowPreferences {
    fn default() -> Self {
        Self {
            service: "api".to_string(),
            poll_interval_secs: 5,
            total_stages: 12,
        }
    }
}

impl Default for ProcessPreferences {
    fn default() -> Self {
        Self {
            grace_period_secs: 5,
            log_buffer_size: 5000,
        }
    }
}

impl Config {
    /// Get the default config file path
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("corrstack")
            .join("config.yaml")
    }

    /// Load configuration from file
    pub fn load(path: Option<PathBuf>) -> Result<Self> {
        let path = path.unwrap_or_else(Self::default_path);

        if path.exists() {
            let content = std::fs::read_to_string(&path)?;
            let config: Config = serde_yaml::from_str(&content)?;
            Ok(config)
        } else {
            Ok(Self::default())
        }
    }

    /// Save configuration to file
    pub fn save(&self, path: Option<PathBuf>) -> Result<()> {
        let path = path.unwrap_or_else(Self::default_path);

        // Create directory if it doesn't exist
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let content = serde_yaml::to_string(self)?;
        std::fs::write(&path, content)?;

        Ok(())
    }

    /// Look up a service spec by name
    pub fn service(&self, name: &str) -> Option<&ServiceSpec> {
        self.services.iter().find(|s| s.name == name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.services.len(), 3);
        assert!(config.services[0].required);
        assert!(!config.services[1].required);
        assert_eq!(config.monitor.interval_secs, 60);
        assert_eq!(config.workflow.total_stages, 12);
    }

    #[test]
    fn test_health_url() {
        let config = Config::default();
        let api = config.service("api").unwrap();
        assert_eq!(api.health_url(), "http://127.0.0.1:8000/health");

        let frontend = config.service("frontend").unwrap();
        assert_eq!(frontend.health_url(), "http://127.0.0.1:3001/");
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        let mut config = Config::default();
        config.services[0].readiness.max_attempts = 10;
        config.process.grace_period_secs = 3;

        config.save(Some(path.clone())).unwrap();

        let loaded = Config::load(Some(path)).unwrap();
        assert_eq!(loaded.services.len(), 3);
        assert_eq!(loaded.services[0].readiness.max_attempts, 10);
        assert_eq!(loaded.process.grace_period_secs, 3);
    }

    #[test]
    fn test_load_missing_file_falls_back_to_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("does-not-exist.yaml");

        let loaded = Config::load(Some(path)).unwrap();
        assert_eq!(loaded.services.len(), 3);
    }

    #[test]
    fn test_partial_file_uses_field_defaults() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        let yaml = r#"
services:
  - name: api
    program: python
    args: ["-m", "http.server"]
    base_url: "http://127.0.0.1:9000"
    required: true
"#;
        std::fs::write(&path, yaml).unwrap();

        let loaded = Config::load(Some(path)).unwrap();
        assert_eq!(loaded.services.len(), 1);
        assert_eq!(loaded.services[0].health_path, "/health");
        assert_eq!(loaded.services[0].readiness.max_attempts, 30);
        assert_eq!(loaded.monitor.interval_secs, 60);
    }
}
