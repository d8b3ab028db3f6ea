//! Message dispatch
//!
//! Build, route through the sender's own server when they have one, send,
//! close.

use crate::context::ExecutionContext;
use crate::from::FromPolicy;
use crate::message::{MessageBuilder, MessageParams};
use crate::transport::{ConnectTarget, Reply, TransportConnector};
use permail_common::config::MailPolicyConfig;
use permail_common::types::MailServerId;
use permail_common::Result;
use permail_storage::MailServerRepository;
use std::sync::Arc;
use tracing::info;

/// Outcome of a send
#[derive(Debug, Clone)]
pub struct SendReceipt {
    pub message_id: String,
    /// Stored server used, if any
    pub server_id: Option<MailServerId>,
    pub recipients: Vec<String>,
    pub dry_run: bool,
    pub reply: Reply,
}

pub struct Dispatcher {
    builder: MessageBuilder,
    connector: Arc<TransportConnector>,
    servers: Arc<dyn MailServerRepository>,
    policy: MailPolicyConfig,
}

impl Dispatcher {
    pub fn new(
        builder: MessageBuilder,
        connector: Arc<TransportConnector>,
        servers: Arc<dyn MailServerRepository>,
        policy: MailPolicyConfig,
    ) -> Self {
        Self {
            builder,
            connector,
            servers,
            policy,
        }
    }

    pub async fn send(&self, params: MessageParams, ctx: &ExecutionContext) -> Result<SendReceipt> {
        let policy = FromPolicy::from_store(self.servers.as_ref(), &self.policy).await?;
        let message = self.builder.build(params, &policy)?;
        let message_id = message.message_id().to_string();
        let recipients: Vec<String> = message.envelope().to().iter().map(|a| a.to_string()).collect();

        let target = match self.servers.find_by_owner(ctx.actor.user_id).await? {
            Some(server) => ConnectTarget::Server(server.id),
            None => ConnectTarget::Default,
        };

        let mut connection = self.connector.connect(&target, ctx).await?;
        let server_id = connection.server_id();
        let dry_run = connection.is_dry_run();
        let result = connection.send(message).await;
        connection.close().await;
        let reply = result?;

        info!(
            message_id = %message_id,
            recipients = recipients.len(),
            dry_run,
            "Message dispatched"
        );
        Ok(SendReceipt {
            message_id,
            server_id,
            recipients,
            dry_run,
            reply,
        })
    }
}
