//! Demo workflow startup and progress tracking

use anyhow::{Context, Result};
use reqwest::{Client, StatusCode};
use serde::Deserialize;
use std::time::Duration;
use tracing::{debug, error, info, warn};

use crate::shutdown::ShutdownToken;

/// Response returned when a workflow is started
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowStarted {
    pub workflow_id: String,
    #[serde(default)]
    pub features: Vec<String>,
    #[serde(default)]
    pub estimated_duration: String,
    #[serde(default)]
    pub status_url: String,
}

/// Snapshot of a workflow's progress, fetched fresh on every poll
#[derive(Debug, Clone, Deserialize)]
pub struct WorkflowStatus {
    pub status: String,
    #[serde(default)]
    pub current_stage: String,
    #[serde(default)]
    pub stages_completed: Vec<String>,
    #[serde(default)]
    pub duration: Option<f64>,
    #[serde(default)]
    pub errors: Vec<String>,
}

impl WorkflowStatus {
    /// Whether polling should stop
    pub fn is_terminal(&self) -> bool {
        matches!(self.status.as_str(), "completed" | "failed")
    }
}

/// Progress ratio, clamped so a source that re-reports stages can never
/// push it past 1.0
fn progress_ratio(completed: usize, total: usize) -> f64 {
    if total == 0 {
        return 0.0;
    }
    ((completed as f64) / (total as f64)).min(1.0)
}

/// Ratio to report for this poll: never backwards from the last one
fn next_ratio(last: f64, completed: usize, total: usize) -> f64 {
    progress_ratio(completed, total).max(last)
}

/// Triggers the demo workflow and polls its status to a terminal state
pub struct WorkflowTracker {
    client: Client,
    base_url: String,
    total_stages: usize,
    poll_interval: Duration,
}

impl WorkflowTracker {
    pub fn new(
        client: Client,
        base_url: String,
        total_stages: usize,
        poll_interval: Duration,
    ) -> Self {
        Self {
            client,
            base_url,
            total_stages,
            poll_interval,
        }
    }

    /// Trigger the demo workflow and return its identity
    pub async fn start(&self) -> Result<WorkflowStarted> {
        let url = format!(
            "{}/demo/full-workflow",
            self.base_url.trim_end_matches('/')
        );

        let resp = self
            .client
            .post(&url)
            .send()
            .await
            .context("demo workflow request failed")?;

        if resp.status() != StatusCode::OK {
            anyhow::bail!("demo workflow returned HTTP {}", resp.status());
        }

        let started: WorkflowStarted =
            resp.json().await.context("invalid demo workflow response")?;

        info!("Demo workflow started: {}", started.workflow_id);
        if !started.features.is_empty() {
            info!("Features: {}", started.features.join(", "));
        }
        if !started.estimated_duration.is_empty() {
            info!("Estimated duration: {}", started.estimated_duration);
        }

        Ok(started)
    }

    /// Poll the workflow until it completes or fails.
    ///
    /// Unbounded in time, since workflow duration is not known up front.
    /// Returns `None` when cancelled by shutdown.
    pub async fn poll_until_terminal(
        &self,
        workflow_id: &str,
        mut shutdown: ShutdownToken,
    ) -> Option<WorkflowStatus> {
        let url = format!(
            "{}/workflow/{}/status",
            self.base_url.trim_end_matches('/'),
            workflow_id
        );
        let mut last_ratio: f64 = 0.0;

        loop {
            match self.fetch_status(&url).await {
                Ok(status) => {
                    let completed = status.stages_completed.len();
                    let ratio = next_ratio(last_ratio, completed, self.total_stages);
                    last_ratio = ratio;

                    info!(
                        "Workflow progress: {:.1}% ({}/{}) | status: {} | stage: {}",
                        ratio * 100.0,
                        completed,
                        self.total_stages,
                        status.status,
                        status.current_stage
                    );

                    if status.is_terminal() {
                        self.log_outcome(&status);
                        return Some(status);
                    }
                }
                Err(e) => {
                    // Transient; retried on the next scheduled poll
                    debug!("Workflow status fetch failed: {}", e);
                }
            }

            tokio::select! {
                _ = tokio::time::sleep(self.poll_interval) => {}
                _ = shutdown.cancelled() => {
                    debug!("Workflow tracking cancelled");
                    return None;
                }
            }
        }
    }

    async fn fetch_status(&self, url: &str) -> Result<WorkflowStatus> {
        let resp = self.client.get(url).send().await?;
        if resp.status() != StatusCode::OK {
            anyhow::bail!("workflow status returned HTTP {}", resp.status());
        }
        Ok(resp.json().await?)
    }

    fn log_outcome(&self, status: &WorkflowStatus) {
        if status.status == "completed" {
            info!("Workflow completed");
        } else {
            warn!("Workflow failed");
        }
        if let Some(duration) = status.duration {
            info!("Duration: {:.2}s", duration);
        }
        if !status.errors.is_empty() {
            error!("Errors: {}", status.errors.join("; "));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::shutdown::ShutdownCoordinator;
    use std::net::SocketAddr;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpListener;

    /// Stub that serves one canned JSON body per hit, repeating the last
    /// one once the sequence is exhausted
    async fn spawn_stub(bodies: Vec<&'static str>) -> (SocketAddr, Arc<AtomicUsize>) {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = hits.clone();

        tokio::spawn(async move {
            loop {
                let Ok((mut sock, _)) = listener.accept().await else {
                    break;
                };
                let n = counter.fetch_add(1, Ordering::SeqCst);
                let body = bodies[n.min(bodies.len() - 1)];
                let mut buf = [0u8; 1024];
                let _ = sock.read(&mut buf).await;
                let resp = format!(
                    "HTTP/1.1 200 OK\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{}",
                    body.len(),
                    body
                );
                let _ = sock.write_all(resp.as_bytes()).await;
            }
        });

        (addr, hits)
    }

    fn tracker(addr: SocketAddr, poll_ms: u64) -> WorkflowTracker {
        WorkflowTracker::new(
            Client::new(),
            format!("http://{}", addr),
            12,
            Duration::from_millis(poll_ms),
        )
    }

    #[test]
    fn test_progress_ratio_is_clamped() {
        assert_eq!(progress_ratio(0, 12), 0.0);
        assert_eq!(progress_ratio(6, 12), 0.5);
        assert_eq!(progress_ratio(12, 12), 1.0);
        // The source re-reported stages past the known total
        assert_eq!(progress_ratio(15, 12), 1.0);
        // Degenerate total never divides by zero
        assert_eq!(progress_ratio(3, 0), 0.0);
    }

    #[test]
    fn test_ratio_never_goes_backwards() {
        let mut last = 0.0;
        for completed in [3usize, 2, 5, 4] {
            let ratio = next_ratio(last, completed, 4);
            assert!(ratio >= last);
            last = ratio;
        }
        assert_eq!(last, 1.0);
    }

    #[test]
    fn test_terminal_states() {
        let mut status = WorkflowStatus {
            status: "running".to_string(),
            current_stage: "correlation".to_string(),
            stages_completed: Vec::new(),
            duration: None,
            errors: Vec::new(),
        };
        assert!(!status.is_terminal());

        status.status = "pending".to_string();
        assert!(!status.is_terminal());

        status.status = "completed".to_string();
        assert!(status.is_terminal());

        status.status = "failed".to_string();
        assert!(status.is_terminal());
    }

    #[test]
    fn test_deserialize_wire_shapes() {
        let started: WorkflowStarted = serde_json::from_str(
            r#"{"workflow_id": "wf-1", "features": ["correlation"], "estimated_duration": "2m", "status_url": "/workflow/wf-1/status"}"#,
        )
        .unwrap();
        assert_eq!(started.workflow_id, "wf-1");
        assert_eq!(started.features, vec!["correlation"]);

        // Optional fields may be absent entirely
        let status: WorkflowStatus =
            serde_json::from_str(r#"{"status": "running", "current_stage": "collect"}"#).unwrap();
        assert!(status.stages_completed.is_empty());
        assert!(status.duration.is_none());
        assert!(status.errors.is_empty());
    }

    #[tokio::test]
    async fn test_polls_until_completed() {
        let (addr, hits) = spawn_stub(vec![
            r#"{"status": "running", "current_stage": "collect", "stages_completed": ["init"]}"#,
            r#"{"status": "running", "current_stage": "correlate", "stages_completed": ["init", "collect"]}"#,
            r#"{"status": "completed", "current_stage": "report", "stages_completed": ["init", "collect", "correlate"], "duration": 12.3}"#,
        ])
        .await;

        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let status = tracker(addr, 10)
            .poll_until_terminal("wf-1", coordinator.token())
            .await
            .unwrap();

        assert_eq!(status.status, "completed");
        assert_eq!(status.duration, Some(12.3));
        assert!(status.errors.is_empty());
        // Polling stopped the instant the terminal state arrived
        assert_eq!(hits.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_cancelled_by_shutdown() {
        let (addr, _hits) = spawn_stub(vec![
            r#"{"status": "running", "current_stage": "collect", "stages_completed": []}"#,
        ])
        .await;

        let coordinator = ShutdownCoordinator::new(Duration::from_secs(5));
        let token = coordinator.token();
        let tracker = tracker(addr, 5000);

        let poll = tokio::spawn(async move {
            tracker.poll_until_terminal("wf-1", token).await
        });

        tokio::time::sleep(Duration::from_millis(100)).await;
        coordinator.request();

        let result = tokio::time::timeout(Duration::from_secs(2), poll)
            .await
            .unwrap()
            .unwrap();
        assert!(result.is_none());
    }

    #[tokio::test]
    async fn test_start_workflow() {
        let (addr, _hits) = spawn_stub(vec![
            r#"{"workflow_id": "wf-9", "features": ["correlation", "ml"], "estimated_duration": "3m", "status_url": "/workflow/wf-9/status"}"#,
        ])
        .await;

        let started = tracker(addr, 10).start().await.unwrap();
        assert_eq!(started.workflow_id, "wf-9");
        assert_eq!(started.status_url, "/workflow/wf-9/status");
    }
}
