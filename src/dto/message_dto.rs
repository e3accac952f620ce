use serde::{Deserialize, Serialize};
use validator::Validate;

use crate::models::message::Message;

pub const DEFAULT_MESSAGE_LIMIT: i64 = 50;
pub const MAX_MESSAGE_LIMIT: i64 = 500;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct SendReplyRequest {
    #[validate(length(min = 1, max = 32))]
    pub phone: String,
    #[validate(length(min = 1))]
    pub message: String,
}

#[derive(Debug, Clone, Serialize)]
pub struct SendReplyResponse {
    pub message: Message,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct MessagesQuery {
    pub limit: Option<i64>,
}

impl MessagesQuery {
    pub fn effective_limit(&self) -> i64 {
        self.limit
            .unwrap_or(DEFAULT_MESSAGE_LIMIT)
            .clamp(1, MAX_MESSAGE_LIMIT)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn limit_defaults_and_clamps() {
        assert_eq!(MessagesQuery::default().effective_limit(), 50);
        assert_eq!(MessagesQuery { limit: Some(10_000) }.effective_limit(), 500);
        assert_eq!(MessagesQuery { limit: Some(0) }.effective_limit(), 1);
        assert_eq!(MessagesQuery { limit: Some(20) }.effective_limit(), 20);
    }
}
