//! In-memory configuration store
//!
//! Implements both repository traits over a single lock. Used by tests and by
//! deployments without a database.

use crate::models::{
    CreateMailServer, CreatePersonalSmtpConfig, MailServer, PersonalConfigState,
    PersonalSmtpConfig,
};
use crate::repository::{MailServerRepository, PersonalConfigRepository};
use async_trait::async_trait;
use chrono::Utc;
use permail_common::types::{MailServerId, PersonalConfigId, UserId};
use permail_common::{Error, Result};
use tokio::sync::RwLock;
use uuid::Uuid;

#[derive(Default)]
struct Inner {
    servers: Vec<MailServer>,
    personal: Vec<PersonalSmtpConfig>,
}

/// In-memory store for shared servers and personal configurations
#[derive(Default)]
pub struct MemoryStore {
    inner: RwLock<Inner>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enable or disable a shared server
    pub async fn set_active(&self, id: MailServerId, active: bool) -> Result<()> {
        let mut inner = self.inner.write().await;
        let server = inner
            .servers
            .iter_mut()
            .find(|s| s.id == id)
            .ok_or_else(|| Error::NotFound(format!("Mail server {}", id)))?;
        server.active = active;
        server.updated_at = Utc::now();
        Ok(())
    }
}

fn new_server(input: CreateMailServer) -> MailServer {
    let now = Utc::now();
    MailServer {
        id: Uuid::now_v7(),
        name: input.name,
        sequence: input.sequence,
        active: true,
        smtp_host: input.smtp_host,
        smtp_port: i32::from(input.smtp_port),
        smtp_encryption: input.smtp_encryption.as_str().to_string(),
        smtp_user: input.smtp_user,
        smtp_pass: input.smtp_pass,
        smtp_debug: input.smtp_debug,
        from_filter: input.from_filter,
        owner_id: input.owner_id,
        created_at: now,
        updated_at: now,
    }
}

fn sorted(mut servers: Vec<MailServer>) -> Vec<MailServer> {
    servers.sort_by(|a, b| a.sequence.cmp(&b.sequence).then(a.id.cmp(&b.id)));
    servers
}

#[async_trait]
impl MailServerRepository for MemoryStore {
    async fn create(&self, input: CreateMailServer) -> Result<MailServer> {
        let mut inner = self.inner.write().await;
        if let Some(owner) = input.owner_id {
            if inner.servers.iter().any(|s| s.owner_id == Some(owner)) {
                return Err(Error::Database(format!(
                    "Mail server for owner {} already exists",
                    owner
                )));
            }
        }
        let server = new_server(input);
        inner.servers.push(server.clone());
        Ok(server)
    }

    async fn create_owned(&self, input: CreateMailServer) -> Result<Option<MailServer>> {
        let mut inner = self.inner.write().await;
        let taken = inner
            .servers
            .iter()
            .any(|s| s.owner_id.is_some() && s.owner_id == input.owner_id);
        if taken {
            return Ok(None);
        }
        let server = new_server(input);
        inner.servers.push(server.clone());
        Ok(Some(server))
    }

    async fn get(&self, id: MailServerId) -> Result<Option<MailServer>> {
        let inner = self.inner.read().await;
        Ok(inner.servers.iter().find(|s| s.id == id).cloned())
    }

    async fn list(&self) -> Result<Vec<MailServer>> {
        Ok(sorted(self.inner.read().await.servers.clone()))
    }

    async fn find_default(&self) -> Result<Option<MailServer>> {
        let servers = self.list().await?;
        Ok(servers.into_iter().find(|s| s.active))
    }

    async fn find_by_owner(&self, owner_id: UserId) -> Result<Option<MailServer>> {
        let servers = self.list().await?;
        Ok(servers.into_iter().find(|s| s.owner_id == Some(owner_id)))
    }

    async fn delete(&self, id: MailServerId) -> Result<()> {
        self.inner.write().await.servers.retain(|s| s.id != id);
        Ok(())
    }
}

#[async_trait]
impl PersonalConfigRepository for MemoryStore {
    async fn create(
        &self,
        created_by: UserId,
        input: CreatePersonalSmtpConfig,
    ) -> Result<PersonalSmtpConfig> {
        let mut inner = self.inner.write().await;
        if inner.personal.iter().any(|p| p.created_by == created_by) {
            return Err(Error::Database(format!(
                "Personal configuration for {} already exists",
                created_by
            )));
        }

        let now = Utc::now();
        let config = PersonalSmtpConfig {
            id: Uuid::now_v7(),
            name: input.name,
            active: true,
            smtp_host: input.smtp_host,
            smtp_port: i32::from(input.smtp_port),
            smtp_encryption: input.smtp_encryption.as_str().to_string(),
            smtp_user: input.smtp_user,
            smtp_pass: input.smtp_pass,
            smtp_debug: input.smtp_debug,
            owner_id: input.owner_id.unwrap_or(created_by),
            created_by,
            state: PersonalConfigState::Draft.as_str().to_string(),
            created_at: now,
            updated_at: now,
        };
        inner.personal.push(config.clone());
        Ok(config)
    }

    async fn get(&self, id: PersonalConfigId) -> Result<Option<PersonalSmtpConfig>> {
        let inner = self.inner.read().await;
        Ok(inner.personal.iter().find(|p| p.id == id).cloned())
    }

    async fn find_by_creator(&self, user_id: UserId) -> Result<Option<PersonalSmtpConfig>> {
        let inner = self.inner.read().await;
        Ok(inner.personal.iter().find(|p| p.created_by == user_id).cloned())
    }

    async fn mark_confirmed(&self, id: PersonalConfigId) -> Result<()> {
        let mut inner = self.inner.write().await;
        if let Some(config) = inner.personal.iter_mut().find(|p| p.id == id) {
            config.state = PersonalConfigState::Confirmed.as_str().to_string();
            config.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete(&self, id: PersonalConfigId) -> Result<()> {
        self.inner.write().await.personal.retain(|p| p.id != id);
        Ok(())
    }
}
