use std::collections::HashMap;

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::Validate;

use crate::models::campaign::{Campaign, CampaignProgress, CampaignStatus};

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(rename_all = "camelCase")]
pub struct SubmitCampaignRequest {
    #[validate(length(min = 1, max = 200))]
    pub campaign_name: String,
    #[validate(length(min = 1))]
    pub message_template: String,
    #[validate(length(min = 1), nested)]
    pub recipients: Vec<Recipient>,
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct Recipient {
    #[validate(length(min = 1, max = 32))]
    pub phone: String,
    pub name: Option<String>,
    #[serde(default)]
    pub variables: HashMap<String, String>,
}

impl Recipient {
    /// Template variables for this recipient; `name` is available as
    /// `{{name}}` unless the variables already define it.
    pub fn template_variables(&self) -> HashMap<String, String> {
        let mut vars = self.variables.clone();
        if let Some(name) = &self.name {
            vars.entry("name".to_string()).or_insert_with(|| name.clone());
        }
        vars
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SubmitCampaignResponse {
    pub campaign_id: Uuid,
    pub total_messages: i32,
    pub message_count: usize,
    pub failed_to_dispatch: usize,
    pub estimated_segments: usize,
    pub status: CampaignStatus,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CampaignDetail {
    #[serde(flatten)]
    pub campaign: Campaign,
    pub progress: CampaignProgress,
}
