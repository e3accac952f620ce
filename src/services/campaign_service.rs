use std::sync::Arc;

use uuid::Uuid;
use validator::Validate;

use crate::database::MessageStore;
use crate::dto::campaign_dto::{CampaignDetail, SubmitCampaignRequest, SubmitCampaignResponse};
use crate::dto::message_dto::{MessagesQuery, SendReplyRequest};
use crate::error::{Error, Result};
use crate::models::campaign::{Campaign, CampaignStatus, CreateCampaign};
use crate::models::message::{Conversation, CreateMessage, Message};
use crate::services::queue_service::DeliveryQueue;
use crate::services::rate_limiter::{RateLimit, RateLimiter};
use crate::utils::{phone, segments::count_segments, template};

#[derive(Clone)]
pub struct CampaignService {
    store: Arc<dyn MessageStore>,
    queue: DeliveryQueue,
    limiter: RateLimiter,
    submit_limit: RateLimit,
}

impl CampaignService {
    pub fn new(
        store: Arc<dyn MessageStore>,
        queue: DeliveryQueue,
        limiter: RateLimiter,
        submit_limit: RateLimit,
    ) -> Self {
        Self {
            store,
            queue,
            limiter,
            submit_limit,
        }
    }

    pub fn submit_limit(&self) -> RateLimit {
        self.submit_limit
    }

    pub fn submit_key(owner_id: &str) -> String {
        format!("submit:{}", owner_id)
    }

    /// Creates the campaign and every message row in one unit, then hands each
    /// message to the delivery queue. Dispatch failures are counted, not fatal.
    pub async fn submit_campaign(
        &self,
        owner_id: &str,
        request: SubmitCampaignRequest,
    ) -> Result<SubmitCampaignResponse> {
        request.validate()?;
        let name = request.campaign_name.trim();
        if name.is_empty() {
            return Err(Error::BadRequest("campaignName must not be blank".into()));
        }
        if request.message_template.trim().is_empty() {
            return Err(Error::BadRequest("messageTemplate must not be blank".into()));
        }
        if let Some((idx, bad)) = request
            .recipients
            .iter()
            .enumerate()
            .find(|(_, r)| !phone::has_digits(&r.phone))
        {
            return Err(Error::BadRequest(format!(
                "recipient {} has no dialable digits: {:?}",
                idx, bad.phone
            )));
        }

        self.limiter
            .enforce(&Self::submit_key(owner_id), self.submit_limit)
            .await?;

        let total = i32::try_from(request.recipients.len())
            .map_err(|_| Error::BadRequest("too many recipients".into()))?;

        let placeholders = template::placeholders(&request.message_template);
        let mut pending = Vec::with_capacity(request.recipients.len());
        let mut estimated_segments = 0;
        for recipient in &request.recipients {
            let variables = recipient.template_variables();
            let normalized = phone::normalize(&recipient.phone);
            if !phone::is_valid_e164(&normalized) {
                tracing::warn!(owner_id, phone = %normalized, "recipient is not a plausible E.164 number");
            }
            let missing: Vec<&str> = placeholders
                .iter()
                .filter(|p| !variables.contains_key(p.as_str()))
                .map(String::as_str)
                .collect();
            if !missing.is_empty() {
                tracing::debug!(owner_id, phone = %normalized, ?missing, "placeholders left literal");
            }

            let body = template::interpolate(&request.message_template, &variables);
            estimated_segments += count_segments(&body);
            pending.push(CreateMessage::outbound(None, owner_id, normalized, body));
        }

        let (campaign, messages) = self
            .store
            .create_campaign_with_messages(
                CreateCampaign {
                    owner_id: owner_id.to_string(),
                    name: name.to_string(),
                    message_template: request.message_template.clone(),
                    total_messages: total,
                },
                pending,
            )
            .await?;
        let message_ids: Vec<Uuid> = messages.iter().map(|m| m.id).collect();

        let mut failed_to_dispatch = 0;
        for message_id in &message_ids {
            if let Err(err) = self.queue.submit(*message_id).await {
                failed_to_dispatch += 1;
                tracing::error!(
                    campaign_id = %campaign.id,
                    %message_id,
                    error = %err,
                    "failed to dispatch message"
                );
            }
        }

        self.store
            .set_campaign_status(campaign.id, CampaignStatus::Sending)
            .await?;
        let status = if self.store.complete_campaign_if_drained(campaign.id).await? {
            CampaignStatus::Sent
        } else {
            CampaignStatus::Sending
        };

        tracing::info!(
            campaign_id = %campaign.id,
            owner_id,
            messages = message_ids.len(),
            failed_to_dispatch,
            estimated_segments,
            "campaign submitted"
        );

        Ok(SubmitCampaignResponse {
            campaign_id: campaign.id,
            total_messages: campaign.total_messages,
            message_count: message_ids.len(),
            failed_to_dispatch,
            estimated_segments,
            status,
        })
    }

    /// One-off outbound message outside any campaign.
    pub async fn send_reply(&self, owner_id: &str, request: SendReplyRequest) -> Result<Message> {
        request.validate()?;
        if request.message.trim().is_empty() {
            return Err(Error::BadRequest("message must not be blank".into()));
        }
        if !phone::has_digits(&request.phone) {
            return Err(Error::BadRequest("phone has no dialable digits".into()));
        }

        self.limiter
            .enforce(&Self::submit_key(owner_id), self.submit_limit)
            .await?;

        let message = self
            .store
            .create_message(CreateMessage::outbound(
                None,
                owner_id,
                phone::normalize(&request.phone),
                request.message,
            ))
            .await?;

        if let Err(err) = self.queue.submit(message.id).await {
            tracing::error!(message_id = %message.id, error = %err, "failed to dispatch reply");
        }
        Ok(message)
    }

    pub async fn list_campaigns(&self, owner_id: &str) -> Result<Vec<Campaign>> {
        self.store.list_campaigns(owner_id).await
    }

    pub async fn get_campaign(&self, owner_id: &str, id: Uuid) -> Result<CampaignDetail> {
        let campaign = self
            .store
            .get_campaign(owner_id, id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("campaign {} not found", id)))?;
        let progress = self.store.campaign_progress(id).await?;
        Ok(CampaignDetail { campaign, progress })
    }

    pub async fn list_messages(&self, owner_id: &str, query: &MessagesQuery) -> Result<Vec<Message>> {
        self.store
            .list_messages(owner_id, query.effective_limit())
            .await
    }

    pub async fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>> {
        self.store.list_conversations(owner_id).await
    }

    pub async fn conversation(&self, owner_id: &str, phone_number: &str) -> Result<Vec<Message>> {
        if !phone::has_digits(phone_number) {
            return Err(Error::BadRequest("phone has no dialable digits".into()));
        }
        self.store
            .conversation_messages(owner_id, &phone::normalize(phone_number))
            .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::database::store::MockMessageStore;
    use crate::database::MemoryMessageStore;
    use crate::dto::campaign_dto::Recipient;
    use crate::models::message::MessageStatus;
    use std::collections::HashMap;
    use std::time::Duration;

    fn service(store: MemoryMessageStore, limit: u32) -> CampaignService {
        CampaignService::new(
            Arc::new(store),
            DeliveryQueue::in_process(2),
            RateLimiter::memory(),
            RateLimit::new(limit, Duration::from_secs(60)),
        )
    }

    fn recipient(phone: &str, name: Option<&str>) -> Recipient {
        Recipient {
            phone: phone.into(),
            name: name.map(str::to_string),
            variables: HashMap::new(),
        }
    }

    #[tokio::test]
    async fn fan_out_creates_every_message_before_dispatch() {
        let store = MemoryMessageStore::new();
        let svc = service(store.clone(), 10);

        let resp = svc
            .submit_campaign(
                "owner-1",
                SubmitCampaignRequest {
                    campaign_name: "Spring".into(),
                    message_template: "Hi {{name}}".into(),
                    recipients: vec![
                        recipient("1234567890", Some("Ann")),
                        recipient("+44 7400 123456", None),
                    ],
                },
            )
            .await
            .unwrap();

        assert_eq!(resp.total_messages, 2);
        assert_eq!(resp.message_count, 2);
        assert_eq!(resp.failed_to_dispatch, 0);
        assert_eq!(resp.estimated_segments, 2);
        assert_eq!(resp.status, CampaignStatus::Sending);

        let messages = store.campaign_messages(resp.campaign_id).unwrap();
        let mut phones: Vec<_> = messages.iter().map(|m| m.phone.as_str()).collect();
        phones.sort();
        assert_eq!(phones, vec!["+1234567890", "+447400123456"]);
        let mut bodies: Vec<_> = messages.iter().map(|m| m.body.as_str()).collect();
        bodies.sort();
        assert_eq!(bodies, vec!["Hi Ann", "Hi {{name}}"]);
        assert!(messages.iter().all(|m| m.status == MessageStatus::Queued));
    }

    #[tokio::test]
    async fn storage_failure_during_fan_out_dispatches_nothing() {
        let mut store = MockMessageStore::new();
        store
            .expect_create_campaign_with_messages()
            .withf(|campaign, messages| campaign.total_messages == 3 && messages.len() == 3)
            .times(1)
            .returning(|_, _| Err(Error::Storage("connection reset".into())));
        store.expect_set_campaign_status().never();
        store.expect_complete_campaign_if_drained().never();

        let queue = DeliveryQueue::in_process(2);
        let svc = CampaignService::new(
            Arc::new(store),
            queue.clone(),
            RateLimiter::memory(),
            RateLimit::new(10, Duration::from_secs(60)),
        );

        let err = svc
            .submit_campaign(
                "owner-1",
                SubmitCampaignRequest {
                    campaign_name: "Flaky".into(),
                    message_template: "hello".into(),
                    recipients: vec![
                        recipient("15550001", None),
                        recipient("15550002", None),
                        recipient("15550003", None),
                    ],
                },
            )
            .await
            .unwrap_err();
        assert!(err.is_storage());
        assert_eq!(queue.stats().await.unwrap().waiting, 0);
    }

    #[tokio::test]
    async fn rejects_recipient_without_digits_and_persists_nothing() {
        let store = MemoryMessageStore::new();
        let svc = service(store.clone(), 10);

        let err = svc
            .submit_campaign(
                "owner-1",
                SubmitCampaignRequest {
                    campaign_name: "Bad".into(),
                    message_template: "hello".into(),
                    recipients: vec![recipient("+1 555 0100", None), recipient("call me", None)],
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
        assert!(svc.list_campaigns("owner-1").await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn blank_template_is_rejected() {
        let svc = service(MemoryMessageStore::new(), 10);
        let err = svc
            .submit_campaign(
                "owner-1",
                SubmitCampaignRequest {
                    campaign_name: "Blank".into(),
                    message_template: "   ".into(),
                    recipients: vec![recipient("15550100", None)],
                },
            )
            .await
            .unwrap_err();
        assert!(matches!(err, Error::BadRequest(_)));
    }

    #[tokio::test]
    async fn submissions_are_rate_limited_per_owner() {
        let svc = service(MemoryMessageStore::new(), 1);
        let reply = || SendReplyRequest {
            phone: "+15550100".into(),
            message: "ping".into(),
        };

        svc.send_reply("owner-1", reply()).await.unwrap();
        let err = svc.send_reply("owner-1", reply()).await.unwrap_err();
        assert!(matches!(err, Error::RateLimited(_)));
        svc.send_reply("owner-2", reply()).await.unwrap();
    }

    #[tokio::test]
    async fn campaigns_are_owner_scoped() {
        let svc = service(MemoryMessageStore::new(), 10);
        let resp = svc
            .submit_campaign(
                "owner-1",
                SubmitCampaignRequest {
                    campaign_name: "Mine".into(),
                    message_template: "hello".into(),
                    recipients: vec![recipient("15550100", None)],
                },
            )
            .await
            .unwrap();

        let detail = svc.get_campaign("owner-1", resp.campaign_id).await.unwrap();
        assert_eq!(detail.progress.queued, 1);
        assert!(matches!(
            svc.get_campaign("owner-2", resp.campaign_id).await,
            Err(Error::NotFound(_))
        ));
    }
}
