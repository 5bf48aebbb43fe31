//! Bounded readiness probing of service health endpoints

use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, info};

/// Poll `url` until it answers HTTP 200, bounded by `max_attempts`.
///
/// A 200 on any attempt succeeds immediately with no further calls. Network
/// errors and non-200 responses are swallowed and retried after `interval`.
/// Returns `false` once all attempts are exhausted.
pub async fn wait_until_ready(
    client: &Client,
    name: &str,
    url: &str,
    interval: Duration,
    max_attempts: u32,
) -> bool {
    for attempt in 1..=max_attempts {
        match client.get(url).send().await {
            Ok(resp) if resp.status() == StatusCode::OK => {
                info!(
                    "Service '{}' is ready (attempt {}/{})",
                    name, attempt, max_attempts
                );
                return true;
            }
            Ok(resp) => {
                debug!(
                    "Waiting for '{}': HTTP {} ({}/{})",
                    name,
                    resp.status(),
                    attempt,
                    max_attempts
                );
            }
            Err(e) => {
                debug!(
                    "Waiting for '{}': {} ({}/{})",
                    name, e, attempt, max_attempts
                );
            }
        }

        if attempt < max_attempts {
            tokio::time::sleep(interval).await;
        }
    }

    false
}

/// Check whether something is already listening on the port of `base_url`.
///
/// Used as a pre-flight warning before spawning a service; the readiness
/// probe still decides the actual outcome.
pub async fn port_in_use(base_url: &str) -> bool {
    let Ok(url) = reqwest::Url::parse(base_url) else {
        return false;
    };
    let Some(host) = url.host_str() else {
        return false;
    };
    let Some(port) = url.port_or_known_default() else {
        return false;
    };

    matches!(
        tokio::time::timeout(
            Duration::from_millis(500),
            tokio::net::TcpStream::connect((host, port)),
        )
        .await,
        Ok(Ok(_))
    )
}
