use log::{error, info, warn};
use std::sync::Arc;
use std::time::Duration;

use crate::email::{OutgoingEmail, SendOutcome};
use crate::error::TransportError;
use crate::transport::Transport;

pub const DEFAULT_MAX_RETRIES: u32 = 3;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    pub max_retries: u32,
}

impl RetryPolicy {
    /// At least one attempt is always made.
    pub fn new(max_retries: u32) -> Self {
        RetryPolicy {
            max_retries: max_retries.max(1),
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_RETRIES)
    }
}

/// Wait after the failed attempt `attempt_index` (0-based): 1s, 2s, 4s, ...
pub fn backoff_delay(attempt_index: u32) -> Duration {
    Duration::from_secs(1u64 << attempt_index.min(16))
}

/// Delivers one message with bounded retries.
pub struct RetryingSender {
    transport: Arc<dyn Transport>,
    policy: RetryPolicy,
}

impl RetryingSender {
    pub fn new(transport: Arc<dyn Transport>, policy: RetryPolicy) -> Self {
        RetryingSender { transport, policy }
    }

    pub async fn send(&self, email: &OutgoingEmail) -> SendOutcome {
        let recipient = email.recipient();
        let max_retries = self.policy.max_retries;
        let mut last_error = String::new();

        for attempt in 0..max_retries {
            info!(
                "Attempting to send email to {} via {} (Attempt {}/{})...",
                recipient,
                self.transport.name(),
                attempt + 1,
                max_retries
            );

            match self.transport.deliver(email).await {
                Ok(()) => {
                    info!("✅ Success: email sent to {}", recipient);
                    return SendOutcome::Sent { attempts: attempt + 1 };
                }
                Err(TransportError::Authentication(reason)) => {
                    error!(
                        "❌ Authentication failed for {}: {}. Check SENDER_EMAIL and SENDER_PASSWORD (use an App Password for Gmail).",
                        recipient, reason
                    );
                    return SendOutcome::FailedPermanent { reason };
                }
                Err(TransportError::Rejected(reason)) => {
                    error!("❌ Message to {} rejected, not retrying: {}", recipient, reason);
                    return SendOutcome::Rejected { reason };
                }
                Err(TransportError::Transient(reason)) => {
                    error!("❌ Error sending email to {}: {}", recipient, reason);
                    last_error = reason;

                    if attempt + 1 < max_retries {
                        let delay = backoff_delay(attempt);
                        warn!("Retrying in {} seconds...", delay.as_secs());
                        tokio::time::sleep(delay).await;
                    }
                }
            }
        }

        error!("Failed to send email to {} after {} attempts.", recipient, max_retries);
        SendOutcome::FailedTransientExhausted {
            attempts: max_retries,
            last_error,
        }
    }
}
