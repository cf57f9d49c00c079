use async_trait::async_trait;
use geoweather_core::{Config, PermissionOutcome, PermissionPrompt, StaticPlatform};
use inquire::{Confirm, InquireError};
use std::sync::Arc;

/// Asks for location access on the terminal and remembers a "yes".
#[derive(Debug)]
pub struct TerminalPrompt {
    platform: Arc<StaticPlatform>,
}

impl TerminalPrompt {
    pub fn new(platform: Arc<StaticPlatform>) -> Self {
        Self { platform }
    }
}

#[async_trait]
impl PermissionPrompt for TerminalPrompt {
    async fn request(&self, request_id: u32) -> PermissionOutcome {
        tracing::debug!(request_id, "asking for location access");

        let answer = tokio::task::spawn_blocking(|| {
            Confirm::new("Allow geoweather to access your location?")
                .with_default(false)
                .with_help_message("Stored provider locations are only read after you agree")
                .prompt()
        })
        .await;

        let outcome = match answer {
            Ok(answer) => outcome_of(answer),
            Err(err) => {
                tracing::warn!(error = %err, "permission prompt task failed");
                PermissionOutcome::Unavailable
            }
        };

        if outcome == PermissionOutcome::Granted {
            self.platform.grant();
            if let Err(err) = remember_grant() {
                tracing::warn!(error = %err, "could not persist location permission");
            }
        }
        outcome
    }
}

/// Esc counts as "no". Anything that means the question can't be asked
/// (no TTY, Ctrl-C, I/O failure) stops further prompting.
fn outcome_of(answer: Result<bool, InquireError>) -> PermissionOutcome {
    match answer {
        Ok(true) => PermissionOutcome::Granted,
        Ok(false) | Err(InquireError::OperationCanceled) => PermissionOutcome::Denied,
        Err(err) => {
            tracing::debug!(error = %err, "permission prompt cannot be shown");
            PermissionOutcome::Unavailable
        }
    }
}

fn remember_grant() -> anyhow::Result<()> {
    let mut config = Config::load()?;
    config.permission_granted = true;
    config.save()
}
