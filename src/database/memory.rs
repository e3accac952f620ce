use async_trait::async_trait;
use chrono::Utc;
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use uuid::Uuid;

use super::store::{Claim, MessageStore};
use crate::error::{Error, Result};
use crate::models::campaign::{Campaign, CampaignProgress, CampaignStatus, CreateCampaign};
use crate::models::message::{Conversation, CreateMessage, Direction, Message, MessageStatus};

/// Process-local store with the same conditional-update semantics as the
/// Postgres store. Each operation runs under one lock, so every update is
/// atomic with respect to the others.
#[derive(Clone, Default)]
pub struct MemoryMessageStore {
    state: Arc<Mutex<MemoryState>>,
}

#[derive(Default)]
struct MemoryState {
    campaigns: HashMap<Uuid, Campaign>,
    messages: HashMap<Uuid, Message>,
    by_correlation: HashMap<String, Uuid>,
}

impl MemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> Result<MutexGuard<'_, MemoryState>> {
        self.state
            .lock()
            .map_err(|_| Error::Storage("memory store lock poisoned".into()))
    }

    /// Every message of a campaign, oldest first.
    pub fn campaign_messages(&self, campaign_id: Uuid) -> Result<Vec<Message>> {
        let state = self.lock()?;
        let mut messages: Vec<Message> = state
            .messages
            .values()
            .filter(|m| m.campaign_id == Some(campaign_id))
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }
}

impl MemoryState {
    fn insert(&mut self, new: CreateMessage) -> Result<Message> {
        if let Some(cid) = &new.provider_id {
            if self.by_correlation.contains_key(cid) {
                return Err(Error::Storage(format!("duplicate provider id {}", cid)));
            }
        }
        let now = Utc::now();
        let message = Message {
            id: Uuid::new_v4(),
            campaign_id: new.campaign_id,
            owner_id: new.owner_id,
            phone: new.phone,
            direction: new.direction,
            body: new.body,
            status: new.status,
            provider_id: new.provider_id,
            error: None,
            attempts: 0,
            claimed_at: None,
            created_at: now,
            updated_at: now,
        };
        if let Some(cid) = &message.provider_id {
            self.by_correlation.insert(cid.clone(), message.id);
        }
        self.messages.insert(message.id, message.clone());
        Ok(message)
    }

    fn queued_mut(&mut self, id: Uuid) -> Option<&mut Message> {
        self.messages
            .get_mut(&id)
            .filter(|m| m.status == MessageStatus::Queued)
    }
}

#[async_trait]
impl MessageStore for MemoryMessageStore {
    async fn ping(&self) -> Result<()> {
        self.lock().map(|_| ())
    }

    async fn create_campaign_with_messages(
        &self,
        campaign: CreateCampaign,
        messages: Vec<CreateMessage>,
    ) -> Result<(Campaign, Vec<Message>)> {
        let mut state = self.lock()?;
        let duplicate = {
            let mut seen = HashSet::new();
            messages
                .iter()
                .filter_map(|m| m.provider_id.clone())
                .find(|cid| state.by_correlation.contains_key(cid) || !seen.insert(cid.clone()))
        };
        if let Some(cid) = duplicate {
            return Err(Error::Storage(format!("duplicate provider id {}", cid)));
        }

        let now = Utc::now();
        let campaign = Campaign {
            id: Uuid::new_v4(),
            owner_id: campaign.owner_id,
            name: campaign.name,
            message_template: campaign.message_template,
            total_messages: campaign.total_messages,
            status: CampaignStatus::Draft,
            created_at: now,
            updated_at: now,
        };
        state.campaigns.insert(campaign.id, campaign.clone());

        let mut created = Vec::with_capacity(messages.len());
        for mut message in messages {
            message.campaign_id = Some(campaign.id);
            created.push(state.insert(message)?);
        }
        Ok((campaign, created))
    }

    async fn set_campaign_status(&self, id: Uuid, status: CampaignStatus) -> Result<()> {
        if let Some(campaign) = self.lock()?.campaigns.get_mut(&id) {
            campaign.status = status;
            campaign.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn complete_campaign_if_drained(&self, id: Uuid) -> Result<bool> {
        let mut state = self.lock()?;
        let drained = !state
            .messages
            .values()
            .any(|m| m.campaign_id == Some(id) && m.status == MessageStatus::Queued);
        match state.campaigns.get_mut(&id) {
            Some(campaign) if drained && campaign.status == CampaignStatus::Sending => {
                campaign.status = CampaignStatus::Sent;
                campaign.updated_at = Utc::now();
                Ok(true)
            }
            _ => Ok(false),
        }
    }

    async fn get_campaign(&self, owner_id: &str, id: Uuid) -> Result<Option<Campaign>> {
        Ok(self
            .lock()?
            .campaigns
            .get(&id)
            .filter(|c| c.owner_id == owner_id)
            .cloned())
    }

    async fn list_campaigns(&self, owner_id: &str) -> Result<Vec<Campaign>> {
        let mut campaigns: Vec<Campaign> = self
            .lock()?
            .campaigns
            .values()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect();
        campaigns.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(campaigns)
    }

    async fn campaign_progress(&self, id: Uuid) -> Result<CampaignProgress> {
        let state = self.lock()?;
        let mut progress = CampaignProgress::default();
        for message in state.messages.values().filter(|m| m.campaign_id == Some(id)) {
            match message.status {
                MessageStatus::Queued => progress.queued += 1,
                MessageStatus::Sent => progress.sent += 1,
                MessageStatus::Delivered => progress.delivered += 1,
                MessageStatus::Failed => progress.failed += 1,
                MessageStatus::Other(_) => progress.other += 1,
            }
        }
        Ok(progress)
    }

    async fn create_message(&self, message: CreateMessage) -> Result<Message> {
        self.lock()?.insert(message)
    }

    async fn insert_if_new(&self, message: CreateMessage) -> Result<Option<Message>> {
        let mut state = self.lock()?;
        if let Some(cid) = &message.provider_id {
            if state.by_correlation.contains_key(cid) {
                return Ok(None);
            }
        }
        state.insert(message).map(Some)
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        Ok(self.lock()?.messages.get(&id).cloned())
    }

    async fn find_by_correlation_id(&self, correlation_id: &str) -> Result<Option<Message>> {
        let state = self.lock()?;
        Ok(state
            .by_correlation
            .get(correlation_id)
            .and_then(|id| state.messages.get(id))
            .cloned())
    }

    async fn list_messages(&self, owner_id: &str, limit: i64) -> Result<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .lock()?
            .messages
            .values()
            .filter(|m| m.owner_id == owner_id)
            .cloned()
            .collect();
        messages.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        messages.truncate(limit.max(0) as usize);
        Ok(messages)
    }

    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>> {
        let state = self.lock()?;
        let mut latest: HashMap<&str, chrono::DateTime<Utc>> = HashMap::new();
        for message in state.messages.values().filter(|m| m.owner_id == owner_id) {
            let entry = latest.entry(message.phone.as_str()).or_insert(message.created_at);
            if message.created_at > *entry {
                *entry = message.created_at;
            }
        }
        let mut conversations: Vec<Conversation> = latest
            .into_iter()
            .map(|(phone, last_message_at)| Conversation {
                phone: phone.to_string(),
                last_message_at,
            })
            .collect();
        conversations.sort_by(|a, b| b.last_message_at.cmp(&a.last_message_at));
        Ok(conversations)
    }

    async fn conversation_messages(&self, owner_id: &str, phone: &str) -> Result<Vec<Message>> {
        let mut messages: Vec<Message> = self
            .lock()?
            .messages
            .values()
            .filter(|m| m.owner_id == owner_id && m.phone == phone)
            .cloned()
            .collect();
        messages.sort_by_key(|m| m.created_at);
        Ok(messages)
    }

    async fn latest_owner_for_phone(&self, phone: &str) -> Result<Option<String>> {
        Ok(self
            .lock()?
            .messages
            .values()
            .filter(|m| m.phone == phone && m.direction == Direction::Outbound)
            .max_by_key(|m| m.created_at)
            .map(|m| m.owner_id.clone()))
    }

    async fn queued_message_ids(&self) -> Result<Vec<Uuid>> {
        let state = self.lock()?;
        let mut queued: Vec<&Message> = state
            .messages
            .values()
            .filter(|m| m.status == MessageStatus::Queued && m.direction == Direction::Outbound)
            .collect();
        queued.sort_by_key(|m| m.created_at);
        Ok(queued.into_iter().map(|m| m.id).collect())
    }

    async fn claim_for_delivery(&self, id: Uuid, lease: Duration) -> Result<Claim> {
        let mut state = self.lock()?;
        let Some(message) = state.messages.get_mut(&id) else {
            return Ok(Claim::Missing);
        };
        if message.status != MessageStatus::Queued {
            return Ok(Claim::NotQueued(message.status.clone()));
        }

        let now = Utc::now();
        let lease = chrono::Duration::from_std(lease)
            .unwrap_or_else(|_| chrono::Duration::days(36_500));
        let lease_live = message
            .claimed_at
            .is_some_and(|claimed| now.signed_duration_since(claimed) < lease);
        if lease_live {
            return Ok(Claim::Busy);
        }

        message.attempts += 1;
        message.claimed_at = Some(now);
        message.updated_at = now;
        Ok(Claim::Claimed(message.clone()))
    }

    async fn mark_sent(&self, id: Uuid, correlation_id: &str) -> Result<bool> {
        let mut state = self.lock()?;
        if state.by_correlation.contains_key(correlation_id) {
            return Err(Error::Storage(format!(
                "duplicate provider id {}",
                correlation_id
            )));
        }
        let Some(message) = state.queued_mut(id) else {
            return Ok(false);
        };
        message.status = MessageStatus::Sent;
        message.provider_id = Some(correlation_id.to_string());
        message.claimed_at = None;
        message.updated_at = Utc::now();
        state.by_correlation.insert(correlation_id.to_string(), id);
        Ok(true)
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<bool> {
        let mut state = self.lock()?;
        let Some(message) = state.queued_mut(id) else {
            return Ok(false);
        };
        message.status = MessageStatus::Failed;
        message.error = Some(error.to_string());
        message.claimed_at = None;
        message.updated_at = Utc::now();
        Ok(true)
    }

    async fn release_claim(&self, id: Uuid) -> Result<()> {
        if let Some(message) = self.lock()?.queued_mut(id) {
            message.claimed_at = None;
            message.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: MessageStatus,
        to: MessageStatus,
        error: Option<String>,
    ) -> Result<bool> {
        let mut state = self.lock()?;
        let Some(message) = state.messages.get_mut(&id).filter(|m| m.status == from) else {
            return Ok(false);
        };
        if to == MessageStatus::Failed && message.error.is_none() {
            message.error = error;
        }
        message.status = to;
        message.updated_at = Utc::now();
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn outbound(phone: &str) -> CreateMessage {
        CreateMessage::outbound(None, "owner-1", phone.to_string(), "hello".into())
    }

    #[tokio::test]
    async fn claim_is_exclusive_until_released() {
        let store = MemoryMessageStore::new();
        let msg = store.create_message(outbound("+15550001")).await.unwrap();
        let lease = Duration::from_secs(60);

        assert!(matches!(
            store.claim_for_delivery(msg.id, lease).await.unwrap(),
            Claim::Claimed(m) if m.attempts == 1
        ));
        assert!(matches!(store.claim_for_delivery(msg.id, lease).await.unwrap(), Claim::Busy));

        store.release_claim(msg.id).await.unwrap();
        assert!(matches!(
            store.claim_for_delivery(msg.id, lease).await.unwrap(),
            Claim::Claimed(m) if m.attempts == 2
        ));
    }

    #[tokio::test]
    async fn campaign_rows_are_all_or_nothing() {
        let store = MemoryMessageStore::new();
        let campaign = || CreateCampaign {
            owner_id: "owner-1".into(),
            name: "Launch".into(),
            message_template: "hello".into(),
            total_messages: 3,
        };
        let with_sid = |phone: &str, sid: &str| CreateMessage {
            provider_id: Some(sid.to_string()),
            ..outbound(phone)
        };

        let err = store
            .create_campaign_with_messages(
                campaign(),
                vec![
                    with_sid("+15550001", "SM1"),
                    outbound("+15550002"),
                    with_sid("+15550003", "SM1"),
                ],
            )
            .await
            .unwrap_err();
        assert!(err.is_storage());
        assert!(store.list_campaigns("owner-1").await.unwrap().is_empty());
        assert!(store.list_messages("owner-1", 10).await.unwrap().is_empty());

        let (created, messages) = store
            .create_campaign_with_messages(
                campaign(),
                vec![outbound("+15550001"), outbound("+15550002"), outbound("+15550003")],
            )
            .await
            .unwrap();
        assert_eq!(created.total_messages, 3);
        assert_eq!(messages.len(), 3);
        assert!(messages.iter().all(|m| m.campaign_id == Some(created.id)));
        assert_eq!(store.campaign_messages(created.id).unwrap().len(), 3);
    }

    #[tokio::test]
    async fn expired_lease_can_be_reclaimed() {
        let store = MemoryMessageStore::new();
        let msg = store.create_message(outbound("+15550002")).await.unwrap();

        store.claim_for_delivery(msg.id, Duration::ZERO).await.unwrap();
        assert!(matches!(
            store.claim_for_delivery(msg.id, Duration::ZERO).await.unwrap(),
            Claim::Claimed(_)
        ));
    }

    #[tokio::test]
    async fn sent_messages_are_not_claimable() {
        let store = MemoryMessageStore::new();
        let msg = store.create_message(outbound("+15550003")).await.unwrap();
        assert!(store.mark_sent(msg.id, "SM1").await.unwrap());
        assert!(!store.mark_failed(msg.id, "late").await.unwrap());

        assert!(matches!(
            store.claim_for_delivery(msg.id, Duration::from_secs(60)).await.unwrap(),
            Claim::NotQueued(MessageStatus::Sent)
        ));
        let found = store.find_by_correlation_id("SM1").await.unwrap().unwrap();
        assert_eq!(found.id, msg.id);
    }

    #[tokio::test]
    async fn transition_requires_expected_status_and_keeps_first_error() {
        let store = MemoryMessageStore::new();
        let msg = store.create_message(outbound("+15550004")).await.unwrap();
        store.mark_sent(msg.id, "SM2").await.unwrap();

        assert!(!store
            .transition_status(msg.id, MessageStatus::Queued, MessageStatus::Failed, None)
            .await
            .unwrap());
        assert!(store
            .transition_status(
                msg.id,
                MessageStatus::Sent,
                MessageStatus::Failed,
                Some("30003".into())
            )
            .await
            .unwrap());

        let stored = store.get_message(msg.id).await.unwrap().unwrap();
        assert_eq!(stored.status, MessageStatus::Failed);
        assert_eq!(stored.error.as_deref(), Some("30003"));
    }

    #[tokio::test]
    async fn inbound_duplicates_are_ignored() {
        let store = MemoryMessageStore::new();
        let inbound = CreateMessage {
            campaign_id: None,
            owner_id: "owner-1".into(),
            phone: "+15550005".into(),
            direction: Direction::Inbound,
            body: "STOP".into(),
            status: MessageStatus::Delivered,
            provider_id: Some("SMin".into()),
        };
        assert!(store.insert_if_new(inbound.clone()).await.unwrap().is_some());
        assert!(store.insert_if_new(inbound).await.unwrap().is_none());
    }
}
