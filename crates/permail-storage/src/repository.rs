//! Repository layer for data access

pub mod mail_servers;
pub mod personal_configs;

// Re-export concrete repository implementations with simple names
pub use mail_servers::DbMailServerRepository;
pub use personal_configs::DbPersonalConfigRepository;

// Re-export repository traits
pub use mail_servers::MailServerRepository;
pub use personal_configs::PersonalConfigRepository;
