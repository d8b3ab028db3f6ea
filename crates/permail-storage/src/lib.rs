//! PerMail Storage - Mail server configuration store
//!
//! Records for shared and personal SMTP configurations, repository traits,
//! a PostgreSQL implementation and an in-memory implementation.

pub mod db;
pub mod memory;
pub mod models;
pub mod repository;

pub use db::DatabasePool;
pub use memory::MemoryStore;
pub use models::*;
pub use repository::*;
