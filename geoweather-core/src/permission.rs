//! Location permission prompting.

use async_trait::async_trait;
use std::fmt::Debug;
use std::time::Duration;

/// Identifier passed along with every fine-location permission request.
pub const FINE_LOCATION_REQUEST: u32 = 1;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionOutcome {
    Granted,
    Denied,
    /// The prompt could not be shown at all, e.g. there is no terminal.
    /// Asking again will not help.
    Unavailable,
}

/// Host permission dialog. Implementations resolve once the user answers.
#[async_trait]
pub trait PermissionPrompt: Send + Sync + Debug {
    async fn request(&self, request_id: u32) -> PermissionOutcome;
}

/// How often to ask again after the user says no.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PermissionRetry {
    /// Ask again immediately after every denial, without limit.
    Forever,
    /// Ask at most `max_attempts` times, doubling the pause after each denial.
    Bounded {
        max_attempts: u32,
        initial_backoff: Duration,
    },
}

impl Default for PermissionRetry {
    fn default() -> Self {
        PermissionRetry::Bounded {
            max_attempts: 3,
            initial_backoff: Duration::from_millis(500),
        }
    }
}

impl PermissionRetry {
    /// Pause before attempt `attempt + 1`, given that `attempt` prompts were denied.
    /// `None` means give up.
    pub fn backoff_after(&self, attempt: u32) -> Option<Duration> {
        match *self {
            PermissionRetry::Forever => Some(Duration::ZERO),
            PermissionRetry::Bounded { max_attempts, initial_backoff } => {
                if attempt >= max_attempts {
                    return None;
                }
                let factor = 2u32.saturating_pow(attempt.saturating_sub(1));
                Some(initial_backoff.saturating_mul(factor))
            }
        }
    }
}

/// Prompts until the user grants access or `policy` runs out.
pub async fn request_until_granted(
    prompt: &dyn PermissionPrompt,
    policy: PermissionRetry,
) -> PermissionOutcome {
    let mut attempt = 0u32;

    loop {
        attempt += 1;
        tracing::debug!(attempt, "requesting location permission");

        match prompt.request(FINE_LOCATION_REQUEST).await {
            PermissionOutcome::Granted => {
                tracing::info!(attempt, "location permission granted");
                return PermissionOutcome::Granted;
            }
            PermissionOutcome::Unavailable => {
                tracing::warn!(attempt, "location permission prompt unavailable, not asking again");
                return PermissionOutcome::Unavailable;
            }
            PermissionOutcome::Denied => {}
        }

        match policy.backoff_after(attempt) {
            Some(pause) => {
                tracing::warn!(attempt, ?pause, "location permission denied, asking again");
                if pause.is_zero() {
                    // Let other tasks run between back-to-back prompts.
                    tokio::task::yield_now().await;
                } else {
                    tokio::time::sleep(pause).await;
                }
            }
            None => {
                tracing::warn!(attempt, "location permission denied, giving up");
                return PermissionOutcome::Denied;
            }
        }
    }
}
