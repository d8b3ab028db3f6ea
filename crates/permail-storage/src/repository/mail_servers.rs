//! Shared mail server repository

use crate::db::DatabasePool;
use crate::models::{CreateMailServer, MailServer};
use async_trait::async_trait;
use permail_common::types::{MailServerId, UserId};
use permail_common::{Error, Result};
use uuid::Uuid;

/// Mail server repository trait
#[async_trait]
pub trait MailServerRepository: Send + Sync {
    async fn create(&self, input: CreateMailServer) -> Result<MailServer>;
    /// Creates the server unless its owner already has one, in which case
    /// nothing is written and `None` is returned
    async fn create_owned(&self, input: CreateMailServer) -> Result<Option<MailServer>>;
    async fn get(&self, id: MailServerId) -> Result<Option<MailServer>>;
    /// All servers, ordered by sequence then id
    async fn list(&self) -> Result<Vec<MailServer>>;
    /// Active server with the lowest sequence
    async fn find_default(&self) -> Result<Option<MailServer>>;
    async fn find_by_owner(&self, owner_id: UserId) -> Result<Option<MailServer>>;
    async fn delete(&self, id: MailServerId) -> Result<()>;
}

/// Database mail server repository
pub struct DbMailServerRepository {
    pool: DatabasePool,
}

impl DbMailServerRepository {
    pub fn new(pool: DatabasePool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl MailServerRepository for DbMailServerRepository {
    async fn create(&self, input: CreateMailServer) -> Result<MailServer> {
        let id = Uuid::now_v7();
        let now = chrono::Utc::now();

        sqlx::query(
            r#"
            INSERT INTO mail_servers (id, name, sequence, active, smtp_host, smtp_port, smtp_encryption,
                                      smtp_user, smtp_pass, smtp_debug, from_filter, owner_id, created_at, updated_at)
            VALUES ($1, $2, $3, true, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            "#,
        )
        .bind(id)
        .bind(&input.name)
        .bind(input.sequence)
        .bind(&input.smtp_host)
        .bind(i32::from(input.smtp_port))
        .bind(input.smtp_encryption.as_str())
        .bind(&input.smtp_user)
        .bind(&input.smtp_pass)
        .bind(input.smtp_debug)
        .bind(&input.from_filter)
        .bind(input.owner_id)
        .bind(now)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        self.get(id)
            .await?
            .ok_or_else(|| Error::Internal("Failed to create mail server".to_string()))
    }

    async fn create_owned(&self, input: CreateMailServer) -> Result<Option<MailServer>> {
        let id = Uuid::now_v7();
        let now = chrono::Utc::now();

        let result = sqlx::query(
            r#"
            INSERT INTO mail_servers (id, name, sequence, active, smtp_host, smtp_port, smtp_encryption,
                                      smtp_user, smtp_pass, smtp_debug, from_filter, owner_id, created_at, updated_at)
            VALUES ($1, $2, $3, true, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13)
            ON CONFLICT (owner_id) WHERE owner_id IS NOT NULL DO NOTHING
            "#,
        )
        .bind(id)
        .bind(&input.name)
        .bind(input.sequence)
        .bind(&input.smtp_host)
        .bind(i32::from(input.smtp_port))
        .bind(input.smtp_encryption.as_str())
        .bind(&input.smtp_user)
        .bind(&input.smtp_pass)
        .bind(input.smtp_debug)
        .bind(&input.from_filter)
        .bind(input.owner_id)
        .bind(now)
        .bind(now)
        .execute(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))?;

        if result.rows_affected() == 0 {
            return Ok(None);
        }
        self.get(id).await
    }

    async fn get(&self, id: MailServerId) -> Result<Option<MailServer>> {
        sqlx::query_as::<_, MailServer>("SELECT * FROM mail_servers WHERE id = $1")
            .bind(id)
            .fetch_optional(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn list(&self) -> Result<Vec<MailServer>> {
        sqlx::query_as::<_, MailServer>("SELECT * FROM mail_servers ORDER BY sequence ASC, id ASC")
            .fetch_all(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))
    }

    async fn find_default(&self) -> Result<Option<MailServer>> {
        sqlx::query_as::<_, MailServer>(
            "SELECT * FROM mail_servers WHERE active = true ORDER BY sequence ASC, id ASC LIMIT 1",
        )
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn find_by_owner(&self, owner_id: UserId) -> Result<Option<MailServer>> {
        sqlx::query_as::<_, MailServer>(
            "SELECT * FROM mail_servers WHERE owner_id = $1 ORDER BY sequence ASC, id ASC LIMIT 1",
        )
        .bind(owner_id)
        .fetch_optional(self.pool.pool())
        .await
        .map_err(|e| Error::Database(e.to_string()))
    }

    async fn delete(&self, id: MailServerId) -> Result<()> {
        sqlx::query("DELETE FROM mail_servers WHERE id = $1")
            .bind(id)
            .execute(self.pool.pool())
            .await
            .map_err(|e| Error::Database(e.to_string()))?;
        Ok(())
    }
}
