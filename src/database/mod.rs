pub mod memory;
pub mod pool;
pub mod postgres;
pub mod store;

pub use memory::MemoryMessageStore;
pub use postgres::PgMessageStore;
pub use store::{Claim, MessageStore};
