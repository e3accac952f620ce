use async_trait::async_trait;
use std::time::Duration;
use uuid::Uuid;

use crate::error::Result;
use crate::models::campaign::{Campaign, CampaignProgress, CampaignStatus, CreateCampaign};
use crate::models::message::{Conversation, CreateMessage, Message, MessageStatus};

/// Outcome of trying to take the delivery lease on a message.
#[derive(Debug, Clone)]
pub enum Claim {
    /// The lease is ours; `attempts` already counts this attempt.
    Claimed(Message),
    /// Another attempt holds a live lease.
    Busy,
    /// The message has left `queued`.
    NotQueued(MessageStatus),
    Missing,
}

/// Persistence for campaigns and messages.
///
/// Every status mutation is a conditional single-row update, so concurrent
/// workers and webhook handlers never need cross-row locking.
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn ping(&self) -> Result<()>;

    /// Persists the campaign and all of its messages as one unit. Either every
    /// row exists afterwards or none does.
    async fn create_campaign_with_messages(
        &self,
        campaign: CreateCampaign,
        messages: Vec<CreateMessage>,
    ) -> Result<(Campaign, Vec<Message>)>;

    async fn set_campaign_status(&self, id: Uuid, status: CampaignStatus) -> Result<()>;

    /// Moves a `sending` campaign to `sent` once none of its messages is queued.
    async fn complete_campaign_if_drained(&self, id: Uuid) -> Result<bool>;

    async fn get_campaign(&self, owner_id: &str, id: Uuid) -> Result<Option<Campaign>>;

    async fn list_campaigns(&self, owner_id: &str) -> Result<Vec<Campaign>>;

    async fn campaign_progress(&self, id: Uuid) -> Result<CampaignProgress>;

    async fn create_message(&self, message: CreateMessage) -> Result<Message>;

    /// Inserts unless a message with the same provider id exists.
    async fn insert_if_new(&self, message: CreateMessage) -> Result<Option<Message>>;

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>>;

    async fn find_by_correlation_id(&self, correlation_id: &str) -> Result<Option<Message>>;

    async fn list_messages(&self, owner_id: &str, limit: i64) -> Result<Vec<Message>>;

    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>>;

    async fn conversation_messages(&self, owner_id: &str, phone: &str) -> Result<Vec<Message>>;

    /// Owner of the most recent outbound message to `phone`.
    async fn latest_owner_for_phone(&self, phone: &str) -> Result<Option<String>>;

    async fn queued_message_ids(&self) -> Result<Vec<Uuid>>;

    /// Takes the delivery lease if the message is queued and no live lease
    /// exists; increments `attempts`.
    async fn claim_for_delivery(&self, id: Uuid, lease: Duration) -> Result<Claim>;

    /// queued → sent. Returns false when the message was no longer queued.
    async fn mark_sent(&self, id: Uuid, correlation_id: &str) -> Result<bool>;

    /// queued → failed. Returns false when the message was no longer queued.
    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<bool>;

    /// Drops the lease and leaves the message queued for a later attempt.
    async fn release_claim(&self, id: Uuid) -> Result<()>;

    /// Sets `to` only if the current status is still `from`. An error detail
    /// is recorded for `failed` when none is stored yet.
    async fn transition_status(
        &self,
        id: Uuid,
        from: MessageStatus,
        to: MessageStatus,
        error: Option<String>,
    ) -> Result<bool>;
}
