//! Personal SMTP configurations
//!
//! Each user may register one personal configuration. Confirming it
//! publishes a shared server entry owned by the user, which outbound mail
//! from that user is routed through.

use crate::context::ExecutionContext;
use permail_common::types::{PersonalConfigId, UserId};
use permail_common::{Error, Result};
use permail_storage::{
    CreatePersonalSmtpConfig, MailServer, MailServerRepository, PersonalConfigRepository,
    PersonalConfigState, PersonalSmtpConfig,
};
use std::sync::Arc;
use tracing::info;

pub struct PersonalConfigs {
    configs: Arc<dyn PersonalConfigRepository>,
    servers: Arc<dyn MailServerRepository>,
}

impl PersonalConfigs {
    pub fn new(
        configs: Arc<dyn PersonalConfigRepository>,
        servers: Arc<dyn MailServerRepository>,
    ) -> Self {
        Self { configs, servers }
    }

    /// Register the acting user's configuration
    pub async fn create(
        &self,
        input: CreatePersonalSmtpConfig,
        ctx: &ExecutionContext,
    ) -> Result<PersonalSmtpConfig> {
        let user_id = ctx.actor.user_id;
        if self.configs.find_by_creator(user_id).await?.is_some() {
            return Err(Error::Config(
                "You have already created the SMTP configuration.".to_string(),
            ));
        }
        let config = self.configs.create(user_id, input).await?;
        info!(config_id = %config.id, user_id = %user_id, "Personal SMTP configuration created");
        Ok(config)
    }

    /// Publish a configuration as the owner's shared server.
    ///
    /// Returns the owner's existing entry unchanged if one is already there.
    pub async fn confirm(&self, id: PersonalConfigId) -> Result<MailServer> {
        let config = self.get(id).await?;
        if let Some(existing) = self.servers.find_by_owner(config.owner_id).await? {
            return Ok(existing);
        }

        let Some(server) = self.servers.create_owned(config.to_mail_server()?).await? else {
            // A concurrent confirm published the entry first
            return self
                .servers
                .find_by_owner(config.owner_id)
                .await?
                .ok_or_else(|| Error::Internal(format!("Owner entry for {} vanished", id)));
        };
        self.configs.mark_confirmed(id).await?;
        info!(
            config_id = %id,
            server_id = %server.id,
            owner_id = %config.owner_id,
            "Personal SMTP configuration confirmed"
        );
        Ok(server)
    }

    /// Remove a configuration together with the owner's shared entry
    pub async fn delete(&self, id: PersonalConfigId) -> Result<()> {
        let config = self.get(id).await?;
        if let Some(server) = self.servers.find_by_owner(config.owner_id).await? {
            self.servers.delete(server.id).await?;
        }
        self.configs.delete(id).await?;
        info!(config_id = %id, "Personal SMTP configuration deleted");
        Ok(())
    }

    /// Shared entry owned by `user_id`
    pub async fn server_for_user(&self, user_id: UserId) -> Result<Option<MailServer>> {
        self.servers.find_by_owner(user_id).await
    }

    pub async fn state(&self, id: PersonalConfigId) -> Result<PersonalConfigState> {
        Ok(self.get(id).await?.state())
    }

    async fn get(&self, id: PersonalConfigId) -> Result<PersonalSmtpConfig> {
        self.configs
            .get(id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Personal configuration {}", id)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::context::Actor;
    use permail_common::types::Encryption;
    use permail_storage::{CreateMailServer, MemoryStore};
    use pretty_assertions::assert_eq;
    use uuid::Uuid;

    fn input() -> CreatePersonalSmtpConfig {
        CreatePersonalSmtpConfig {
            name: "Alice".to_string(),
            smtp_host: "smtp.example.com".to_string(),
            smtp_port: 465,
            smtp_encryption: Encryption::Ssl,
            smtp_user: "alice@example.com".to_string(),
            smtp_pass: "secret".to_string(),
            smtp_debug: false,
            owner_id: None,
        }
    }

    fn setup() -> (Arc<MemoryStore>, PersonalConfigs) {
        let store = Arc::new(MemoryStore::new());
        let configs = PersonalConfigs::new(store.clone(), store.clone());
        (store, configs)
    }

    #[tokio::test]
    async fn test_second_config_rejected() {
        let (_, configs) = setup();
        let ctx = ExecutionContext::live(Actor::new(Uuid::new_v4()));
        configs.create(input(), &ctx).await.unwrap();
        let err = configs.create(input(), &ctx).await.unwrap_err();
        assert_eq!(err.code(), "CONFIG_ERROR");
    }

    #[tokio::test]
    async fn test_confirm_publishes_owned_server() {
        let (store, configs) = setup();
        let user = Uuid::new_v4();
        let ctx = ExecutionContext::live(Actor::new(user));
        let config = configs.create(input(), &ctx).await.unwrap();

        let server = configs.confirm(config.id).await.unwrap();
        assert_eq!(server.owner_id, Some(user));
        assert_eq!(server.smtp_host, "smtp.example.com");
        assert_eq!(server.encryption().unwrap(), Encryption::Ssl);
        assert_eq!(configs.state(config.id).await.unwrap(), PersonalConfigState::Confirmed);

        let again = configs.confirm(config.id).await.unwrap();
        assert_eq!(again.id, server.id);
        assert_eq!(MailServerRepository::list(store.as_ref()).await.unwrap().len(), 1);

        let routed = configs.server_for_user(user).await.unwrap().unwrap();
        assert_eq!(routed.id, server.id);
    }

    #[tokio::test]
    async fn test_confirm_with_existing_owner_entry_is_noop() {
        let (store, configs) = setup();
        let user = Uuid::new_v4();
        let existing = MailServerRepository::create(
            store.as_ref(),
            CreateMailServer {
                name: "pre-existing".to_string(),
                sequence: 10,
                smtp_host: "other.example.com".to_string(),
                smtp_port: 587,
                smtp_encryption: Encryption::Starttls,
                smtp_user: None,
                smtp_pass: None,
                smtp_debug: false,
                from_filter: None,
                owner_id: Some(user),
            },
        )
        .await
        .unwrap();
        let config = configs
            .create(input(), &ExecutionContext::live(Actor::new(user)))
            .await
            .unwrap();

        let server = configs.confirm(config.id).await.unwrap();
        assert_eq!(server.id, existing.id);
        assert_eq!(configs.state(config.id).await.unwrap(), PersonalConfigState::Draft);
    }

    #[tokio::test]
    async fn test_concurrent_confirms_publish_one_entry() {
        let (store, configs) = setup();
        let user = Uuid::new_v4();
        let config = configs
            .create(input(), &ExecutionContext::live(Actor::new(user)))
            .await
            .unwrap();

        let (a, b) = tokio::join!(configs.confirm(config.id), configs.confirm(config.id));
        assert_eq!(a.unwrap().id, b.unwrap().id);
        assert_eq!(MailServerRepository::list(store.as_ref()).await.unwrap().len(), 1);
        assert_eq!(configs.state(config.id).await.unwrap(), PersonalConfigState::Confirmed);
    }

    #[tokio::test]
    async fn test_delete_removes_shared_entry() {
        let (store, configs) = setup();
        let user = Uuid::new_v4();
        let config = configs
            .create(input(), &ExecutionContext::live(Actor::new(user)))
            .await
            .unwrap();
        configs.confirm(config.id).await.unwrap();

        configs.delete(config.id).await.unwrap();
        assert!(configs.server_for_user(user).await.unwrap().is_none());
        assert!(MailServerRepository::list(store.as_ref()).await.unwrap().is_empty());
        assert_eq!(configs.delete(config.id).await.unwrap_err().code(), "NOT_FOUND");
    }
}
