use std::sync::Arc;
use std::time::Duration;

use uuid::Uuid;

use crate::config::DeliverySettings;
use crate::database::{Claim, MessageStore};
use crate::error::Result;
use crate::models::message::MessageStatus;
use crate::services::provider::Provider;
use crate::services::rate_limiter::{RateLimit, RateLimiter};
use crate::utils::segments::count_segments;

/// Exponential backoff: `base * 2^(attempt - 1)`, capped at `max_delay`.
#[derive(Debug, Clone, Copy)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub base_delay: Duration,
    pub max_delay: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::from_settings(&DeliverySettings::default())
    }
}

impl RetryPolicy {
    pub fn from_settings(settings: &DeliverySettings) -> Self {
        Self {
            max_attempts: settings.max_attempts.max(1),
            base_delay: settings.base_delay,
            max_delay: settings.max_delay,
        }
    }

    /// Delay before the attempt following attempt number `attempt` (1-based).
    pub fn delay_for(&self, attempt: u32) -> Duration {
        let exp = attempt.saturating_sub(1).min(31);
        self.base_delay
            .checked_mul(1u32 << exp)
            .unwrap_or(self.max_delay)
            .min(self.max_delay)
    }

    pub fn has_budget(&self, attempts: u32) -> bool {
        attempts < self.max_attempts
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// Message is gone or no longer queued; nothing was sent.
    Skipped(Option<MessageStatus>),
    /// Another attempt holds a live claim.
    Busy,
    /// Outbound throttle said no; the attempt was not counted.
    Deferred { delay: Duration },
    Sent { correlation_id: String },
    Retry {
        attempt: u32,
        delay: Duration,
        error: String,
    },
    Failed { error: String },
}

impl DeliveryOutcome {
    /// When the queue should run the job again, if at all. A busy message is
    /// revisited once the competing claim would have expired.
    pub fn reschedule_after(&self, lease: Duration) -> Option<Duration> {
        match self {
            DeliveryOutcome::Deferred { delay } | DeliveryOutcome::Retry { delay, .. } => Some(*delay),
            DeliveryOutcome::Busy => Some(lease),
            _ => None,
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            DeliveryOutcome::Skipped(_) => "skipped",
            DeliveryOutcome::Busy => "busy",
            DeliveryOutcome::Deferred { .. } => "deferred",
            DeliveryOutcome::Sent { .. } => "sent",
            DeliveryOutcome::Retry { .. } => "retry",
            DeliveryOutcome::Failed { .. } => "failed",
        }
    }
}

#[derive(Clone)]
struct OutboundThrottle {
    limiter: RateLimiter,
    limit: RateLimit,
    key: String,
}

/// Turns one queued message into exactly one carrier call per claimed attempt.
#[derive(Clone)]
pub struct DeliveryWorker {
    store: Arc<dyn MessageStore>,
    provider: Provider,
    policy: RetryPolicy,
    lease: Duration,
    throttle: Option<OutboundThrottle>,
}

impl DeliveryWorker {
    pub fn new(
        store: Arc<dyn MessageStore>,
        provider: Provider,
        policy: RetryPolicy,
        lease: Duration,
    ) -> Self {
        Self {
            store,
            provider,
            policy,
            lease,
            throttle: None,
        }
    }

    /// Caps carrier calls at `per_second` across every worker sharing `limiter`.
    pub fn with_outbound_limit(mut self, limiter: RateLimiter, per_second: u32) -> Self {
        self.throttle = Some(OutboundThrottle {
            key: format!("outbound:{}", self.provider.name()),
            limiter,
            limit: RateLimit::per_second(per_second),
        });
        self
    }

    pub fn policy(&self) -> RetryPolicy {
        self.policy
    }

    pub fn lease(&self) -> Duration {
        self.lease
    }

    pub fn store(&self) -> &Arc<dyn MessageStore> {
        &self.store
    }

    pub async fn deliver(&self, message_id: Uuid) -> Result<DeliveryOutcome> {
        if let Some(throttle) = &self.throttle {
            let decision = throttle.limiter.check(&throttle.key, throttle.limit).await?;
            if !decision.allowed {
                let delay = Duration::from_millis(decision.reset_in_ms.max(50));
                tracing::debug!(%message_id, ?delay, "outbound throttle deferred delivery");
                return Ok(DeliveryOutcome::Deferred { delay });
            }
        }

        let message = match self.store.claim_for_delivery(message_id, self.lease).await? {
            Claim::Claimed(message) => message,
            Claim::Busy => {
                tracing::debug!(%message_id, "message already claimed by another attempt");
                return Ok(DeliveryOutcome::Busy);
            }
            Claim::NotQueued(status) => {
                tracing::debug!(%message_id, %status, "message no longer queued, skipping");
                return Ok(DeliveryOutcome::Skipped(Some(status)));
            }
            Claim::Missing => {
                tracing::warn!(%message_id, "message not found, skipping");
                return Ok(DeliveryOutcome::Skipped(None));
            }
        };

        let attempt = message.attempts.max(1) as u32;
        tracing::info!(
            %message_id,
            campaign_id = ?message.campaign_id,
            attempt,
            segments = count_segments(&message.body),
            provider = self.provider.name(),
            "delivering message"
        );

        let outcome = match self.provider.send(&message.phone, &message.body).await {
            Ok(receipt) => {
                if !self.store.mark_sent(message_id, &receipt.correlation_id).await? {
                    tracing::warn!(
                        %message_id,
                        correlation_id = %receipt.correlation_id,
                        "message left queued while the send was in flight"
                    );
                }
                tracing::info!(
                    %message_id,
                    correlation_id = %receipt.correlation_id,
                    attempt,
                    "message sent"
                );
                DeliveryOutcome::Sent {
                    correlation_id: receipt.correlation_id,
                }
            }
            Err(err) if err.is_retryable() && self.policy.has_budget(attempt) => {
                self.store.release_claim(message_id).await?;
                let delay = self.policy.delay_for(attempt);
                tracing::warn!(%message_id, attempt, ?delay, error = %err, "delivery failed, will retry");
                DeliveryOutcome::Retry {
                    attempt,
                    delay,
                    error: err.to_string(),
                }
            }
            Err(err) => {
                let error = err.to_string();
                self.store.mark_failed(message_id, &error).await?;
                tracing::error!(%message_id, attempt, error = %error, "delivery failed permanently");
                DeliveryOutcome::Failed { error }
            }
        };

        if let (Some(campaign_id), DeliveryOutcome::Sent { .. } | DeliveryOutcome::Failed { .. }) =
            (message.campaign_id, &outcome)
        {
            if self.store.complete_campaign_if_drained(campaign_id).await? {
                tracing::info!(%campaign_id, "campaign fully dispatched");
            }
        }

        Ok(outcome)
    }
}
