pub mod campaign_dto;
pub mod message_dto;
pub mod webhook_dto;
