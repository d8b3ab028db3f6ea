//! An open SMTP session

use super::classify::{bounded, code_number, Phase};
use crate::message::OutboundMessage;
use lettre::transport::smtp::client::AsyncSmtpConnection;
use lettre::transport::smtp::commands::{Data, Mail, Rcpt};
use lettre::transport::smtp::response::Response;
use lettre::Address;
use permail_common::types::MailServerId;
use permail_common::{Error, Result};
use std::fmt::{self, Display};
use std::time::Duration;
use tracing::{debug, warn};

/// Server reply to a command
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub code: u16,
    pub text: String,
}

impl Reply {
    fn dry_run() -> Self {
        Self {
            code: 250,
            text: "dry run".to_string(),
        }
    }

    fn from_response(response: &Response) -> Self {
        Self {
            code: code_number(response.code()),
            text: response.message().collect::<Vec<_>>().join(" "),
        }
    }
}

/// Session returned by [`TransportConnector::connect`](super::TransportConnector::connect).
///
/// A dry-run connection holds no socket; every command on it succeeds
/// without I/O. `close` consumes the connection.
pub struct Connection {
    inner: Option<AsyncSmtpConnection>,
    host: String,
    server_id: Option<MailServerId>,
    debug: bool,
    timeout: Duration,
}

impl fmt::Debug for Connection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Connection")
            .field("host", &self.host)
            .field("server_id", &self.server_id)
            .field("dry_run", &self.is_dry_run())
            .finish_non_exhaustive()
    }
}

fn address(value: &str) -> Result<Address> {
    value
        .trim()
        .parse()
        .map_err(|e| Error::AddressFormat(format!("{}: {}", value, e)))
}

impl Connection {
    pub(crate) fn open(
        inner: AsyncSmtpConnection,
        host: String,
        server_id: Option<MailServerId>,
        debug: bool,
        timeout: Duration,
    ) -> Self {
        Self {
            inner: Some(inner),
            host,
            server_id,
            debug,
            timeout,
        }
    }

    pub fn dry_run() -> Self {
        Self {
            inner: None,
            host: String::new(),
            server_id: None,
            debug: false,
            timeout: Duration::ZERO,
        }
    }

    pub fn is_dry_run(&self) -> bool {
        self.inner.is_none()
    }

    /// Stored server the session was opened against, if any
    pub fn server_id(&self) -> Option<MailServerId> {
        self.server_id
    }

    async fn command<C: Display>(&mut self, command: C, step: &str) -> Result<Reply> {
        let Some(inner) = self.inner.as_mut() else {
            return Ok(Reply::dry_run());
        };
        if self.debug {
            debug!(target: "permail::smtp", host = %self.host, ">> {}", command.to_string().trim_end());
        }

        let result = bounded(self.timeout, step, Phase::Command, inner.command(command))
            .await
            .map(|response| Reply::from_response(&response));
        if self.debug {
            match &result {
                Ok(reply) => {
                    debug!(target: "permail::smtp", host = %self.host, "<< {} {}", reply.code, reply.text)
                }
                Err(e) => debug!(target: "permail::smtp", host = %self.host, "<< {}", e),
            }
        }
        result
    }

    pub async fn mail_from(&mut self, from: &str) -> Result<Reply> {
        let from = address(from)?;
        self.command(Mail::new(Some(from), vec![]), "MAIL FROM").await
    }

    pub async fn rcpt_to(&mut self, to: &str) -> Result<Reply> {
        let to = address(to)?;
        self.command(Rcpt::new(to, vec![]), "RCPT TO").await
    }

    /// Issues DATA without transmitting any content
    pub async fn data_start(&mut self) -> Result<Reply> {
        self.command(Data, "DATA").await
    }

    /// Transmits a complete message
    pub async fn send(&mut self, message: OutboundMessage) -> Result<Reply> {
        let message_id = message.message_id().to_string();
        let (envelope, bytes) = message.into_transmission();
        let Some(inner) = self.inner.as_mut() else {
            debug!(message_id = %message_id, "Dry run, message not transmitted");
            return Ok(Reply::dry_run());
        };
        if self.debug {
            debug!(
                target: "permail::smtp",
                host = %self.host,
                from = ?envelope.from(),
                to = ?envelope.to(),
                size = bytes.len(),
                ">> message {}",
                message_id
            );
        }

        let response = bounded(self.timeout, "send", Phase::Command, inner.send(&envelope, &bytes)).await?;
        let reply = Reply::from_response(&response);
        if self.debug {
            debug!(target: "permail::smtp", host = %self.host, "<< {} {}", reply.code, reply.text);
        }
        Ok(reply)
    }

    /// Ends the session. Failures while quitting are logged and dropped.
    pub async fn close(mut self) {
        let Some(mut inner) = self.inner.take() else {
            return;
        };
        match tokio::time::timeout(self.timeout, inner.quit()).await {
            Ok(Ok(_)) => debug!(host = %self.host, "SMTP session closed"),
            Ok(Err(e)) => warn!(host = %self.host, error = %e, "QUIT failed, dropping session"),
            Err(_) => warn!(host = %self.host, "QUIT timed out, dropping session"),
        }
    }
}
