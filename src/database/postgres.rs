use async_trait::async_trait;
use sqlx::{PgPool, Row};
use std::time::Duration;
use uuid::Uuid;

use super::store::{Claim, MessageStore};
use crate::error::Result;
use crate::models::campaign::{Campaign, CampaignProgress, CampaignStatus, CreateCampaign};
use crate::models::message::{Conversation, CreateMessage, Message, MessageStatus};

#[derive(Clone)]
pub struct PgMessageStore {
    pool: PgPool,
}

impl PgMessageStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MessageStore for PgMessageStore {
    async fn ping(&self) -> Result<()> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        Ok(())
    }

    async fn create_campaign_with_messages(
        &self,
        campaign: CreateCampaign,
        messages: Vec<CreateMessage>,
    ) -> Result<(Campaign, Vec<Message>)> {
        let mut tx = self.pool.begin().await?;

        let campaign = sqlx::query_as::<_, Campaign>(
            r#"
            INSERT INTO campaigns (owner_id, name, message_template, total_messages, status)
            VALUES ($1, $2, $3, $4, 'draft')
            RETURNING *
            "#,
        )
        .bind(&campaign.owner_id)
        .bind(&campaign.name)
        .bind(&campaign.message_template)
        .bind(campaign.total_messages)
        .fetch_one(&mut *tx)
        .await?;

        let mut created = Vec::with_capacity(messages.len());
        for message in messages {
            let message = sqlx::query_as::<_, Message>(
                r#"
                INSERT INTO messages (campaign_id, owner_id, phone, direction, body, status, provider_id)
                VALUES ($1, $2, $3, $4, $5, $6, $7)
                RETURNING *
                "#,
            )
            .bind(campaign.id)
            .bind(&message.owner_id)
            .bind(&message.phone)
            .bind(message.direction.as_str())
            .bind(&message.body)
            .bind(message.status.as_str())
            .bind(&message.provider_id)
            .fetch_one(&mut *tx)
            .await?;
            created.push(message);
        }

        tx.commit().await?;
        Ok((campaign, created))
    }

    async fn set_campaign_status(&self, id: Uuid, status: CampaignStatus) -> Result<()> {
        sqlx::query("UPDATE campaigns SET status = $2, updated_at = NOW() WHERE id = $1")
            .bind(id)
            .bind(status.as_str())
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn complete_campaign_if_drained(&self, id: Uuid) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE campaigns SET status = 'sent', updated_at = NOW()
            WHERE id = $1 AND status = 'sending'
              AND NOT EXISTS (
                SELECT 1 FROM messages WHERE campaign_id = $1 AND status = 'queued'
              )
            "#,
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn get_campaign(&self, owner_id: &str, id: Uuid) -> Result<Option<Campaign>> {
        let campaign = sqlx::query_as::<_, Campaign>(
            "SELECT * FROM campaigns WHERE id = $1 AND owner_id = $2",
        )
        .bind(id)
        .bind(owner_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(campaign)
    }

    async fn list_campaigns(&self, owner_id: &str) -> Result<Vec<Campaign>> {
        let campaigns = sqlx::query_as::<_, Campaign>(
            "SELECT * FROM campaigns WHERE owner_id = $1 ORDER BY created_at DESC",
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(campaigns)
    }

    async fn campaign_progress(&self, id: Uuid) -> Result<CampaignProgress> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) AS count FROM messages WHERE campaign_id = $1 GROUP BY status",
        )
        .bind(id)
        .fetch_all(&self.pool)
        .await?;

        let mut progress = CampaignProgress::default();
        for row in rows {
            let status: String = row.try_get("status")?;
            let count: i64 = row.try_get("count")?;
            match MessageStatus::from(status) {
                MessageStatus::Queued => progress.queued += count,
                MessageStatus::Sent => progress.sent += count,
                MessageStatus::Delivered => progress.delivered += count,
                MessageStatus::Failed => progress.failed += count,
                MessageStatus::Other(_) => progress.other += count,
            }
        }
        Ok(progress)
    }

    async fn create_message(&self, message: CreateMessage) -> Result<Message> {
        let message = sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages (campaign_id, owner_id, phone, direction, body, status, provider_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING *
            "#,
        )
        .bind(message.campaign_id)
        .bind(&message.owner_id)
        .bind(&message.phone)
        .bind(message.direction.as_str())
        .bind(&message.body)
        .bind(message.status.as_str())
        .bind(&message.provider_id)
        .fetch_one(&self.pool)
        .await?;
        Ok(message)
    }

    async fn insert_if_new(&self, message: CreateMessage) -> Result<Option<Message>> {
        let message = sqlx::query_as::<_, Message>(
            r#"
            INSERT INTO messages (campaign_id, owner_id, phone, direction, body, status, provider_id)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (provider_id) DO NOTHING
            RETURNING *
            "#,
        )
        .bind(message.campaign_id)
        .bind(&message.owner_id)
        .bind(&message.phone)
        .bind(message.direction.as_str())
        .bind(&message.body)
        .bind(message.status.as_str())
        .bind(&message.provider_id)
        .fetch_optional(&self.pool)
        .await?;
        Ok(message)
    }

    async fn get_message(&self, id: Uuid) -> Result<Option<Message>> {
        let message = sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(message)
    }

    async fn find_by_correlation_id(&self, correlation_id: &str) -> Result<Option<Message>> {
        let message = sqlx::query_as::<_, Message>("SELECT * FROM messages WHERE provider_id = $1")
            .bind(correlation_id)
            .fetch_optional(&self.pool)
            .await?;
        Ok(message)
    }

    async fn list_messages(&self, owner_id: &str, limit: i64) -> Result<Vec<Message>> {
        let messages = sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE owner_id = $1 ORDER BY created_at DESC LIMIT $2",
        )
        .bind(owner_id)
        .bind(limit)
        .fetch_all(&self.pool)
        .await?;
        Ok(messages)
    }

    async fn list_conversations(&self, owner_id: &str) -> Result<Vec<Conversation>> {
        let conversations = sqlx::query_as::<_, Conversation>(
            r#"
            SELECT phone, MAX(created_at) AS last_message_at
            FROM messages
            WHERE owner_id = $1
            GROUP BY phone
            ORDER BY last_message_at DESC
            "#,
        )
        .bind(owner_id)
        .fetch_all(&self.pool)
        .await?;
        Ok(conversations)
    }

    async fn conversation_messages(&self, owner_id: &str, phone: &str) -> Result<Vec<Message>> {
        let messages = sqlx::query_as::<_, Message>(
            "SELECT * FROM messages WHERE owner_id = $1 AND phone = $2 ORDER BY created_at ASC",
        )
        .bind(owner_id)
        .bind(phone)
        .fetch_all(&self.pool)
        .await?;
        Ok(messages)
    }

    async fn latest_owner_for_phone(&self, phone: &str) -> Result<Option<String>> {
        let row = sqlx::query(
            r#"
            SELECT owner_id FROM messages
            WHERE phone = $1 AND direction = 'outbound'
            ORDER BY created_at DESC
            LIMIT 1
            "#,
        )
        .bind(phone)
        .fetch_optional(&self.pool)
        .await?;
        Ok(match row {
            Some(row) => Some(row.try_get("owner_id")?),
            None => None,
        })
    }

    async fn queued_message_ids(&self) -> Result<Vec<Uuid>> {
        let rows = sqlx::query(
            "SELECT id FROM messages WHERE status = 'queued' AND direction = 'outbound' ORDER BY created_at ASC",
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter()
            .map(|row| row.try_get::<Uuid, _>("id").map_err(Into::into))
            .collect()
    }

    async fn claim_for_delivery(&self, id: Uuid, lease: Duration) -> Result<Claim> {
        let claimed = sqlx::query_as::<_, Message>(
            r#"
            UPDATE messages
            SET attempts = attempts + 1, claimed_at = NOW(), updated_at = NOW()
            WHERE id = $1 AND status = 'queued'
              AND (claimed_at IS NULL OR claimed_at < NOW() - make_interval(secs => $2))
            RETURNING *
            "#,
        )
        .bind(id)
        .bind(lease.as_secs_f64())
        .fetch_optional(&self.pool)
        .await?;

        if let Some(message) = claimed {
            return Ok(Claim::Claimed(message));
        }

        let row = sqlx::query("SELECT status FROM messages WHERE id = $1")
            .bind(id)
            .fetch_optional(&self.pool)
            .await?;
        let Some(row) = row else { return Ok(Claim::Missing) };
        let status = MessageStatus::from(row.try_get::<String, _>("status")?);
        Ok(match status {
            MessageStatus::Queued => Claim::Busy,
            other => Claim::NotQueued(other),
        })
    }

    async fn mark_sent(&self, id: Uuid, correlation_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET status = 'sent', provider_id = $2, claimed_at = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'queued'
            "#,
        )
        .bind(id)
        .bind(correlation_id)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn mark_failed(&self, id: Uuid, error: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET status = 'failed', error = $2, claimed_at = NULL, updated_at = NOW()
            WHERE id = $1 AND status = 'queued'
            "#,
        )
        .bind(id)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }

    async fn release_claim(&self, id: Uuid) -> Result<()> {
        sqlx::query(
            "UPDATE messages SET claimed_at = NULL, updated_at = NOW() WHERE id = $1 AND status = 'queued'",
        )
        .bind(id)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn transition_status(
        &self,
        id: Uuid,
        from: MessageStatus,
        to: MessageStatus,
        error: Option<String>,
    ) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE messages
            SET status = $3,
                error = CASE WHEN $3 = 'failed' THEN COALESCE(error, $4) ELSE error END,
                updated_at = NOW()
            WHERE id = $1 AND status = $2
            "#,
        )
        .bind(id)
        .bind(from.as_str())
        .bind(to.as_str())
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected() > 0)
    }
}
