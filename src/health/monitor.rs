//! Periodic aggregate health checks across all managed services

use chrono::{DateTime, Local};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::debug;

use crate::core::ServiceSpec;
use crate::shutdown::ShutdownToken;

/// Health payload exposed by a service at its health endpoint
#[derive(Debug, Deserialize)]
struct HealthPayload {
    #[serde(default)]
    status: String,
    #[serde(default)]
    components: BTreeMap<String, bool>,
}

/// Aggregate health snapshot, produced fresh on every check
#[derive(Debug, Clone)]
pub struct HealthReport {
    /// When the check ran
    pub timestamp: DateTime<Local>,
    /// Logical AND of every service and sub-component flag
    pub overall: bool,
    /// Per-service flags, plus `"<service>.<component>"` entries for
    /// sub-components the service reports itself
    pub per_component: BTreeMap<String, bool>,
}

impl HealthReport {
    /// Number of healthy entries out of the total
    pub fn healthy_count(&self) -> (usize, usize) {
        let healthy = self.per_component.values().filter(|v| **v).count();
        (healthy, self.per_component.len())
    }
}

/// Queries each service's health endpoint and folds the results
pub struct HealthMonitor {
    client: Client,
    services: Vec<ServiceSpec>,
}

impl HealthMonitor {
    /// Create a monitor over the given services
    pub fn new(client: Client, services: Vec<ServiceSpec>) -> Self {
        Self { client, services }
    }

    /// Run one aggregate check.
    ///
    /// Every service is queried independently; one failing never
    /// short-circuits the others.
    pub async fn check_once(&self) -> HealthReport {
        let mut per_component = BTreeMap::new();

        for service in &self.services {
            let (healthy, components) = self.check_service(service).await;
            per_component.insert(service.name.clone(), healthy);
            for (component, ok) in components {
                per_component.insert(format!("{}.{}", service.name, component), ok);
            }
        }

        let overall = per_component.values().all(|v| *v);

        HealthReport {
            timestamp: Local::now(),
            overall,
            per_component,
        }
    }

    async fn check_service(&self, service: &ServiceSpec) -> (bool, BTreeMap<String, bool>) {
        match self.client.get(service.health_url()).send().await {
            Ok(resp) if resp.status() == StatusCode::OK => {
                // The components map is optional; a non-JSON 200 body still
                // counts as healthy (the frontend serves plain HTML)
                match resp.json::<HealthPayload>().await {
                    Ok(payload) => {
                        debug!("{} reports status '{}'", service.name, payload.status);
                        (true, payload.components)
                    }
                    Err(_) => (true, BTreeMap::new()),
                }
            }
            Ok(resp) => {
                debug!("{} health check: HTTP {}", service.name, resp.status());
                (false, BTreeMap::new())
            }
            Err(e) => {
                debug!("{} health check failed: {}", service.name, e);
                (false, BTreeMap::new())
            }
        }
    }

    /// Periodic monitoring loop: one report per tick until cancelled
    pub async fn run(
        self,
        interval: Duration,
        mut shutdown: ShutdownToken,
        report_tx: mpsc::UnboundedSender<HealthReport>,
    ) {
        let mut ticker = tokio::time::interval(interval);
        // The first tick fires immediately; the startup check already covered it
        ticker.tick().await;

        loop {
            tokio::select! {
                _ = ticker.tick() => {
                    let report = self.check_once().await;
                    if report_tx.send(report).is_err() {
                        break;
                    }
                }
                _ = shutdown.cancelled() => break,
            }
        }

        debug!("Health monitor loop ended");
    }
}
