use std::sync::Arc;

use uuid::Uuid;

use crate::database::MessageStore;
use crate::dto::webhook_dto::{InboundCallback, StatusCallback};
use crate::error::Result;
use crate::models::message::{CreateMessage, Direction, MessageStatus};
use crate::utils::phone;

/// Carrier status vocabulary to ours. Anything unrecognised is kept verbatim
/// (lower-cased) as an intermediate status.
pub fn map_carrier_status(raw: &str) -> MessageStatus {
    let normalized = raw.trim().to_ascii_lowercase();
    match normalized.as_str() {
        "queued" => MessageStatus::Queued,
        "sending" | "sent" => MessageStatus::Sent,
        "delivered" => MessageStatus::Delivered,
        "undelivered" | "failed" => MessageStatus::Failed,
        _ => MessageStatus::Other(normalized),
    }
}

fn failure_detail(raw_status: &str, code: Option<&str>, message: Option<&str>) -> String {
    match (code, message) {
        (Some(code), Some(message)) => format!("{}: {}", code, message),
        (Some(code), None) => format!("carrier error {}", code),
        (None, Some(message)) => message.to_string(),
        (None, None) => format!("carrier reported {}", raw_status.trim().to_ascii_lowercase()),
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReconcileOutcome {
    UnknownMessage,
    Unchanged,
    /// Would regress the lifecycle.
    Ignored {
        current: MessageStatus,
        incoming: MessageStatus,
    },
    Applied {
        from: MessageStatus,
        to: MessageStatus,
    },
    /// The status moved between our read and the conditional write.
    Superseded,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum InboundOutcome {
    Stored(Uuid),
    Duplicate,
    NoOwner,
}

#[derive(Clone)]
pub struct WebhookService {
    store: Arc<dyn MessageStore>,
    default_owner: Option<String>,
}

impl WebhookService {
    pub fn new(store: Arc<dyn MessageStore>, default_owner: Option<String>) -> Self {
        Self {
            store,
            default_owner,
        }
    }

    /// Applies a carrier status callback. Replays and out-of-order callbacks
    /// never move a message backwards.
    pub async fn reconcile(&self, callback: &StatusCallback) -> Result<ReconcileOutcome> {
        let Some(message) = self
            .store
            .find_by_correlation_id(&callback.message_sid)
            .await?
        else {
            tracing::warn!(correlation_id = %callback.message_sid, "status callback for unknown message");
            return Ok(ReconcileOutcome::UnknownMessage);
        };

        let incoming = map_carrier_status(&callback.status);
        let current = message.status.clone();

        if current == incoming {
            return Ok(ReconcileOutcome::Unchanged);
        }
        if !current.can_transition_to(&incoming) {
            tracing::info!(
                message_id = %message.id,
                correlation_id = %callback.message_sid,
                %current,
                %incoming,
                "ignoring regressive status callback"
            );
            return Ok(ReconcileOutcome::Ignored { current, incoming });
        }

        let error = (incoming == MessageStatus::Failed).then(|| {
            failure_detail(
                &callback.status,
                callback.error_code.as_deref(),
                callback.error_message.as_deref(),
            )
        });

        let applied = self
            .store
            .transition_status(message.id, current.clone(), incoming.clone(), error)
            .await?;
        if !applied {
            tracing::info!(message_id = %message.id, "status changed concurrently, callback superseded");
            return Ok(ReconcileOutcome::Superseded);
        }

        tracing::info!(
            message_id = %message.id,
            correlation_id = %callback.message_sid,
            from = %current,
            to = %incoming,
            "message status reconciled"
        );
        Ok(ReconcileOutcome::Applied {
            from: current,
            to: incoming,
        })
    }

    /// Stores an inbound SMS against the owner who last messaged the sender.
    pub async fn record_inbound(&self, callback: &InboundCallback) -> Result<InboundOutcome> {
        let from = phone::normalize(&callback.from);
        let owner = match self.store.latest_owner_for_phone(&from).await? {
            Some(owner) => owner,
            None => match &self.default_owner {
                Some(owner) => owner.clone(),
                None => {
                    tracing::warn!(from = %from, correlation_id = %callback.message_sid, "no owner for inbound message, dropping");
                    return Ok(InboundOutcome::NoOwner);
                }
            },
        };

        let stored = self
            .store
            .insert_if_new(CreateMessage {
                campaign_id: None,
                owner_id: owner,
                phone: from,
                direction: Direction::Inbound,
                body: callback.body.clone(),
                status: MessageStatus::Delivered,
                provider_id: Some(callback.message_sid.clone()),
            })
            .await?;

        match stored {
            Some(message) => {
                tracing::info!(message_id = %message.id, correlation_id = %callback.message_sid, "inbound message stored");
                Ok(InboundOutcome::Stored(message.id))
            }
            None => Ok(InboundOutcome::Duplicate),
        }
    }
}
