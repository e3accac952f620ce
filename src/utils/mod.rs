pub mod phone;
pub mod segments;
pub mod signature;
pub mod template;
