//! Personal SMTP configuration repository

use crate::db::DatabasePool;
use crate::models::{CreatePersonalSmtpConfig, PersonalConfigState, PersonalSmtpConfig};
use async_trait::async_trait;
use permail_common::types::{PersonalConfigId, UserId};
use permail_common::{Error, Result};
use uuid::Uuid;

/// Personal configuration repository trait
#[async_trait]
pub trait PersonalConfigRepository: Send + Sync {
    async fn create(
        &self,
        created_by: UserId,
        input: CreatePersonalSmtpConfig,
    ) -> Result<PersonalSmtpConfig>;
    async fn get(&self, id: PersonalConfigId) -> Result<Option<PersonalSmtpConfig>>;
    async fn find_by_creator(&self, user_id: UserId) -> Result<Option<PersonalSmtpConfig>>;
    async fn mark_confirmed(&self, id: PersonalConfigId) -> Result<()>;
    async fn delete(&self, id: PersonalConfigId) -> Result<()>;
}

/// Database personal configuration repository
pub struct DbPersonalConfigRepository {
    pool: DatabasePool,
}

impl DbPersonalConfigRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl PersonalConfigRepository for DbPersonalConfigRepository {
    async fn create(
        &self,
        created_by: UserId,
        input: CreatePersonalSmtpConfig,
    ) -> Result<PersonalSmtpConfig> {
        let id = Uuid::now_v7();
        let now = chrono::Utc::now();

        sqlx::query(
            r#"
            INSERT INTO personal_smtp_configs (id, name, active, smtp_host, smtp_port, smtp_encryption,
                                               smtp_user, smtp_pass, smtp_debug, owner_id, created_by,
                                               state, created_at, updated_at)
            VALUES ($1, $2, true, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(id)
        .bind(&input.name)
        .bind(&input.smtp_host)
        .bind(i32::from(input.smtp_port))
        .bind(input.smtp_encryption.as_str())
        .bind(&input.smtp_user)
        .bind(&input.smtp_pass)
        .bind(input.smtp_debug)
        .bind(input.owner_id.unwrap_or(created_by))
        .bind(created_by)
        .bind(PersonalConfigState::Draft.as_str())
        .bind(now)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        self.get(id)
            .await?
            .ok_or_else(|| Error::Internal("Failed to create personal configuration".to_string()))
    }

    async fn get(&self, id: PersonalConfigId) -> Result<Option<PersonalSmtpConfig>> {
        sqlx::query_as::<_, PersonalSmtpConfig>("SELECT * FROM personal_smtp_configs WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn find_by_creator(&self, user_id: UserId) -> Result<Option<PersonalSmtpConfig>> {
        sqlx::query_as::<_, PersonalSmtpConfig>(
            "SELECT * FROM personal_smtp_configs WHERE created_by = $1 LIMIT 1",
        )
        .bind(user_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn mark_confirmed(&self, id: PersonalConfigId) -> Result<()> {
        let now = chrono::Utc::now();
        sqlx::query("UPDATE personal_smtp_configs SET state = $2, updated_at = $3 WHERE id = $1")
            .bind(id)
            .bind(PersonalConfigState::Confirmed.as_str())
            .bind(now)
            .execute(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }

    async fn delete(&self, id: PersonalConfigId) -> Result<()> {
        sqlx::query("DELETE FROM personal_smtp_configs WHERE id = $1")
            .bind(id)
            .execute(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }
}
