//! Error types for the supervisor

use thiserror::Error;

/// Errors that abort a launch or force a non-zero exit
#[derive(Debug, Error)]
pub enum LaunchError {
    /// A required service never passed its readiness probe
    #[error("service '{service}' failed its readiness probe after {attempts} attempts")]
    StartupFailure { service: String, attempts: u32 },

    /// A service flagged fatal-when-unhealthy reported unhealthy
    #[error("service '{service}' became unhealthy and is configured as fatal")]
    FatalUnhealthy { service: String },

    /// A config entry referenced a service that is not defined
    #[error("unknown service '{service}' referenced in configuration")]
    UnknownService { service: String },
}
