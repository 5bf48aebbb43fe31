//! Supervisor orchestrating startup, monitoring, and shutdown

use anyhow::{Context, Result};
use reqwest::Client;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

use crate::core::{Config, LaunchError, ProcessEvent};
use crate::health::{self, HealthMonitor, HealthReport};
use crate::process::{ManagedService, ProcessManager, ServiceState};
use crate::shutdown::{ShutdownCoordinator, ShutdownHandle};
use crate::workflow::WorkflowTracker;

/// How often exited children are reaped in the steady-state loop
const REAP_INTERVAL: Duration = Duration::from_secs(2);

/// Captured output lines dumped when a service dies unexpectedly
const FAILURE_TAIL_LINES: usize = 10;

/// Owns the managed services and drives them through their lifecycle
pub struct Supervisor {
    config: Config,
    client: Client,
    services: Vec<ManagedService>,
    manager: ProcessManager,
    event_rx: Option<mpsc::UnboundedReceiver<ProcessEvent>>,
    coordinator: ShutdownCoordinator,
    run_demo: bool,
    fatal: Option<LaunchError>,
}

impl Supervisor {
    /// Build a supervisor from the given configuration
    pub fn new(config: Config, run_demo: bool) -> Result<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.monitor.http_timeout_secs))
            .build()
            .context("failed to build HTTP client")?;

        let (event_tx, event_rx) = mpsc::unbounded_channel();
        let manager = ProcessManager::new(event_tx);
        let coordinator =
            ShutdownCoordinator::new(Duration::from_secs(config.process.grace_period_secs));

        let services = config
            .services
            .iter()
            .cloned()
            .map(|spec| ManagedService::new(spec, config.process.log_buffer_size))
            .collect();

        Ok(Self {
            config,
            client,
            services,
            manager,
            event_rx: Some(event_rx),
            coordinator,
            run_demo,
            fatal: None,
        })
    }

    /// Handle for requesting shutdown from outside the supervisor
    pub fn shutdown_handle(&self) -> ShutdownHandle {
        self.coordinator.handle()
    }

    /// Launch the stack and supervise it until shutdown.
    ///
    /// Returns an error when a required service fails its readiness probe
    /// or a fatal-when-unhealthy service degrades; anything already started
    /// is torn down before returning.
    pub async fn run(&mut self) -> Result<()> {
        let mut event_rx = self
            .event_rx
            .take()
            .context("supervisor was already run")?;

        self.coordinator.install_signal_handlers()?;

        info!(
            "Launching {} services: {}",
            self.services.len(),
            self.services
                .iter()
                .map(|s| s.spec.name.as_str())
                .collect::<Vec<_>>()
                .join(", ")
        );

        if let Err(e) = self.start_services().await {
            self.teardown().await;
            return Err(e);
        }

        self.print_access_points();

        // One aggregate check before entering steady state
        let monitor = HealthMonitor::new(self.client.clone(), self.config.services.clone());
        let report = monitor.check_once().await;
        self.on_health_report(&report);

        let mut workflow_task = None;
        if self.run_demo {
            if report.overall {
                workflow_task = self.start_demo_workflow().await;
            } else {
                warn!("Skipping demo workflow: stack is not fully healthy");
            }
        }

        let (report_tx, mut report_rx) = mpsc::unbounded_channel();
        let monitor_interval = Duration::from_secs(self.config.monitor.interval_secs);
        let monitor_task = tokio::spawn(monitor.run(
            monitor_interval,
            self.coordinator.token(),
            report_tx,
        ));

        self.steady_state_loop(&mut event_rx, &mut report_rx).await;

        self.teardown().await;

        let _ = monitor_task.await;
        if let Some(task) = workflow_task {
            task.abort();
            let _ = task.await;
        }

        match self.fatal.take() {
            Some(err) => Err(err.into()),
            None => Ok(()),
        }
    }

    /// Start every service in order, gating on readiness probes
    async fn start_services(&mut self) -> Result<()> {
        for i in 0..self.services.len() {
            let spec = self.services[i].spec.clone();
            info!("Starting {}...", spec.name);

            if health::port_in_use(&spec.base_url).await {
                warn!(
                    "Port for {} ({}) is already in use; launch may conflict",
                    spec.name, spec.base_url
                );
            }

            match self.manager.spawn(&spec) {
                Ok(pid) => {
                    self.services[i].mark_started(pid);
                    debug!("{} spawned with pid {}", spec.name, pid);
                }
                Err(e) => {
                    if spec.required {
                        return Err(
                            e.context(format!("required service '{}' failed to start", spec.name))
                        );
                    }
                    warn!("Optional service '{}' failed to start: {:#}", spec.name, e);
                    self.services[i].mark_ended(ServiceState::Failed);
                    continue;
                }
            }

            let ready = health::wait_until_ready(
                &self.client,
                &spec.name,
                &spec.health_url(),
                Duration::from_secs(spec.readiness.interval_secs),
                spec.readiness.max_attempts,
            )
            .await;

            if ready {
                self.services[i].state = ServiceState::Running;
            } else if spec.required {
                self.services[i].mark_ended(ServiceState::Failed);
                return Err(LaunchError::StartupFailure {
                    service: spec.name.clone(),
                    attempts: spec.readiness.max_attempts,
                }
                .into());
            } else {
                warn!(
                    "{} is not ready; continuing degraded since it is optional",
                    spec.name
                );
                self.services[i].mark_ended(ServiceState::Failed);
            }
        }

        Ok(())
    }

    /// Log where the launched services can be reached
    fn print_access_points(&self) {
        info!("Access points:");
        for service in &self.services {
            if service.state.is_active() {
                info!("  {}: {}", service.spec.name, service.spec.base_url);
            }
        }
    }

    /// Trigger the demo workflow and hand its id to a tracker task
    async fn start_demo_workflow(&mut self) -> Option<tokio::task::JoinHandle<()>> {
        let Some(spec) = self.config.service(&self.config.workflow.service) else {
            warn!(
                "{}",
                LaunchError::UnknownService {
                    service: self.config.workflow.service.clone(),
                }
            );
            return None;
        };

        let tracker = WorkflowTracker::new(
            self.client.clone(),
            spec.base_url.clone(),
            self.config.workflow.total_stages,
            Duration::from_secs(self.config.workflow.poll_interval_secs),
        );

        match tracker.start().await {
            Ok(started) => {
                if !started.status_url.is_empty() {
                    info!("Status URL: {}{}", spec.base_url, started.status_url);
                }
                let token = self.coordinator.token();
                Some(tokio::spawn(async move {
                    tracker
                        .poll_until_terminal(&started.workflow_id, token)
                        .await;
                }))
            }
            Err(e) => {
                warn!("Failed to start demo workflow: {:#}", e);
                None
            }
        }
    }

    /// Drain process events and health reports until shutdown is requested
    async fn steady_state_loop(
        &mut self,
        event_rx: &mut mpsc::UnboundedReceiver<ProcessEvent>,
        report_rx: &mut mpsc::UnboundedReceiver<HealthReport>,
    ) {
        let mut token = self.coordinator.token();
        let mut reap = tokio::time::interval(REAP_INTERVAL);

        loop {
            tokio::select! {
                _ = token.cancelled() => break,
                _ = reap.tick() => self.manager.check_processes(),
                Some(event) = event_rx.recv() => self.on_process_event(event),
                Some(report) = report_rx.recv() => self.on_health_report(&report),
            }
        }
    }

    fn on_process_event(&mut self, event: ProcessEvent) {
        match event {
            ProcessEvent::Started { name, pid } => {
                debug!("{} started (pid {})", name, pid);
            }
            ProcessEvent::Output {
                name,
                line,
                is_stderr,
            } => {
                if let Some(service) = self.service_mut(&name) {
                    service.log_buffer.push_line(&line, is_stderr);
                }
            }
            ProcessEvent::Exited { name, exit_code } => {
                self.on_service_exit(&name, exit_code);
            }
            ProcessEvent::Error { name, error } => {
                warn!("{}: {}", name, error);
            }
        }
    }

    fn on_service_exit(&mut self, name: &str, exit_code: i32) {
        let shutting_down = self.coordinator.is_requested();
        let Some(service) = self.service_mut(name) else {
            return;
        };
        if !service.state.is_active() || shutting_down {
            return;
        }

        warn!("{} exited unexpectedly with code {}", name, exit_code);
        service.mark_ended(ServiceState::Failed);

        // Surface the captured tail so the cause is visible
        for line in service.log_buffer.tail(FAILURE_TAIL_LINES) {
            warn!("  [{}] {}", name, line.content);
        }
    }

    fn on_health_report(&mut self, report: &HealthReport) {
        let (healthy, total) = report.healthy_count();
        info!(
            "System health check: {} ({}/{} healthy)",
            if report.overall { "healthy" } else { "degraded" },
            healthy,
            total
        );
        for (component, ok) in &report.per_component {
            debug!("  {}: {}", component, if *ok { "healthy" } else { "unhealthy" });
        }

        let mut fatal_service = None;
        for service in &mut self.services {
            let name = service.spec.name.clone();
            let Some(healthy) = report.per_component.get(&name).copied() else {
                continue;
            };

            match (&service.state, healthy) {
                (ServiceState::Running, false) => {
                    warn!("{} is unhealthy", name);
                    service.state = ServiceState::Unhealthy;
                }
                (ServiceState::Unhealthy, true) => {
                    info!("{} recovered", name);
                    service.state = ServiceState::Running;
                }
                _ => {}
            }

            if !healthy && service.spec.fatal_when_unhealthy && service.state.is_active() {
                fatal_service = Some(name);
            }
        }

        if let Some(service) = fatal_service {
            error!(
                "Service '{}' is unhealthy and configured as fatal; stopping the stack",
                service
            );
            self.fatal = Some(LaunchError::FatalUnhealthy { service });
            self.coordinator.request();
        }
    }

    async fn teardown(&mut self) {
        self.coordinator
            .shutdown_all(&mut self.manager, &mut self.services)
            .await;
    }

    fn service_mut(&mut self, name: &str) -> Option<&mut ManagedService> {
        self.services.iter_mut().find(|s| s.spec.name == name)
    }
}
