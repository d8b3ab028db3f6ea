//! Connection testing
//!
//! A probe walks a server through MAIL FROM, RCPT TO and DATA without ever
//! sending message content, then closes the session.

use crate::context::ExecutionContext;
use crate::transport::{ConnectTarget, Connection, Reply, TransportConnector};
use permail_common::types::MailServerId;
use permail_common::{Error, Result};
use permail_storage::MailServerRepository;
use std::sync::Arc;
use tracing::{info, warn};

/// Successful probe outcome
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProbeReport {
    pub server_id: Option<MailServerId>,
    /// Nothing was contacted because the context is not live
    pub dry_run: bool,
    pub message: String,
}

pub struct ConnectionProbe {
    connector: Arc<TransportConnector>,
    servers: Arc<dyn MailServerRepository>,
    recipient: String,
}

impl ConnectionProbe {
    pub fn new(
        connector: Arc<TransportConnector>,
        servers: Arc<dyn MailServerRepository>,
        recipient: impl Into<String>,
    ) -> Self {
        Self {
            connector,
            servers,
            recipient: recipient.into(),
        }
    }

    /// Test a stored server
    pub async fn probe(&self, server_id: MailServerId, ctx: &ExecutionContext) -> Result<ProbeReport> {
        let mut report = self.probe_target(&ConnectTarget::Server(server_id), ctx).await?;
        report.server_id = Some(server_id);
        Ok(report)
    }

    /// Test any connection target
    pub async fn probe_target(
        &self,
        target: &ConnectTarget,
        ctx: &ExecutionContext,
    ) -> Result<ProbeReport> {
        let sender = ctx
            .actor
            .email()
            .ok_or_else(|| {
                Error::Config(
                    "Please configure an email address on your user profile before testing the connection"
                        .to_string(),
                )
            })?
            .to_string();

        let mut connection = self.connector.connect(target, ctx).await.map_err(catch_all)?;
        let server_id = connection.server_id();
        if connection.is_dry_run() {
            connection.close().await;
            return Ok(ProbeReport {
                server_id,
                dry_run: true,
                message: "Connection Test Successful! (dry run)".to_string(),
            });
        }

        let outcome = self.exchange(&mut connection, &sender).await;
        connection.close().await;
        outcome.map_err(catch_all)?;

        Ok(ProbeReport {
            server_id,
            dry_run: false,
            message: "Connection Test Successful!".to_string(),
        })
    }

    async fn exchange(&self, connection: &mut Connection, sender: &str) -> Result<()> {
        expect(
            connection.mail_from(sender).await,
            &[250],
            &format!("The server refused the sender address ({})", sender),
        )?;
        expect(
            connection.rcpt_to(&self.recipient).await,
            &[250, 251],
            &format!("The server refused the test recipient ({})", self.recipient),
        )?;
        expect(
            connection.data_start().await,
            &[354],
            "The server refused the test connection",
        )
    }

    /// Test every stored server; one failure never stops the others
    pub async fn probe_all(
        &self,
        ctx: &ExecutionContext,
    ) -> Result<Vec<(MailServerId, Result<ProbeReport>)>> {
        let servers = self.servers.list().await?;
        let mut results = Vec::with_capacity(servers.len());

        for server in servers {
            let outcome = self.probe(server.id, ctx).await;
            match &outcome {
                Ok(report) => info!(server = %server.name, dry_run = report.dry_run, "Connection test passed"),
                Err(e) => warn!(server = %server.name, code = e.code(), error = %e, "Connection test failed"),
            }
            results.push((server.id, outcome));
        }

        Ok(results)
    }
}

fn expect(result: Result<Reply>, codes: &[u16], context: &str) -> Result<()> {
    match result {
        Ok(reply) if codes.contains(&reply.code) => Ok(()),
        Ok(reply) => Err(Error::Protocol {
            code: reply.code,
            reply: format!("{}: {}", context, reply.text),
        }),
        Err(Error::Protocol { code, reply }) => Err(Error::Protocol {
            code,
            reply: format!("{}: {}", context, reply),
        }),
        Err(e) => Err(e),
    }
}

fn catch_all(err: Error) -> Error {
    match err {
        Error::Other(e) => Error::Probe(e.to_string()),
        Error::Internal(e) => Error::Probe(e),
        other => other,
    }
}
