pub mod campaigns;
pub mod health;
pub mod messages;
pub mod provider;
pub mod queue;
pub mod webhooks;
