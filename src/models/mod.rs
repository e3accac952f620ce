pub mod campaign;
pub mod delivery_job;
pub mod message;
