//! SMTP transport
//!
//! Resolves which server to use, then opens an authenticated session with
//! the requested connection security. Every network step is bounded by the
//! configured timeout.

mod classify;
mod connection;

pub use connection::{Connection, Reply};

use crate::address::encode_idna_user;
use crate::context::ExecutionContext;
use classify::{bounded, code_number, Phase};
use lettre::transport::smtp::authentication::{Credentials, Mechanism};
use lettre::transport::smtp::client::{AsyncSmtpConnection, TlsParameters};
use lettre::transport::smtp::extension::ClientId;
use permail_common::config::OutboundConfig;
use permail_common::types::{Encryption, MailServerId};
use permail_common::{Error, Result, TransportErrorKind};
use permail_storage::MailServerRepository;
use std::net::IpAddr;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Explicit connection parameters
#[derive(Debug, Clone, Default)]
pub struct ConnectParams {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub encryption: Option<Encryption>,
    pub debug: bool,
}

/// Which server to connect to
#[derive(Debug, Clone)]
pub enum ConnectTarget {
    /// Lowest-sequence active server, else the configured defaults
    Default,
    /// A stored server
    Server(MailServerId),
    /// Caller-supplied parameters; without a host this behaves like `Default`
    Explicit(ConnectParams),
}

/// Fully resolved connection parameters
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub encryption: Encryption,
    pub debug: bool,
    pub server_id: Option<MailServerId>,
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}

/// Opens SMTP sessions
pub struct TransportConnector {
    servers: Arc<dyn MailServerRepository>,
    outbound: OutboundConfig,
    hello_name: String,
}

impl TransportConnector {
    pub fn new(
        servers: Arc<dyn MailServerRepository>,
        outbound: OutboundConfig,
        hello_name: impl Into<String>,
    ) -> Self {
        Self {
            servers,
            outbound,
            hello_name: hello_name.into(),
        }
    }

    /// Resolve a target into concrete parameters
    pub async fn resolve(&self, target: &ConnectTarget) -> Result<Endpoint> {
        let (params, record) = match target {
            ConnectTarget::Server(id) => {
                let server = self
                    .servers
                    .get(*id)
                    .await?
                    .ok_or_else(|| Error::Config(format!("Mail server {} does not exist", id)))?;
                (ConnectParams::default(), Some(server))
            }
            ConnectTarget::Explicit(params)
                if params.host.as_deref().is_some_and(|h| !h.trim().is_empty()) =>
            {
                (params.clone(), None)
            }
            ConnectTarget::Explicit(params) => (params.clone(), self.servers.find_default().await?),
            ConnectTarget::Default => (ConnectParams::default(), self.servers.find_default().await?),
        };

        let endpoint = match record {
            Some(server) => Endpoint {
                port: server.port()?,
                encryption: server.encryption()?,
                debug: params.debug || server.smtp_debug,
                server_id: Some(server.id),
                host: server.smtp_host,
                username: server.smtp_user,
                password: server.smtp_pass,
            },
            None => {
                let outbound = &self.outbound;
                let fallback_encryption = if outbound.smtp_ssl {
                    Encryption::Starttls
                } else {
                    Encryption::None
                };
                Endpoint {
                    host: non_blank(params.host)
                        .or_else(|| outbound.smtp_server.clone())
                        .unwrap_or_default(),
                    port: params.port.unwrap_or(outbound.smtp_port),
                    username: params.username.or_else(|| outbound.smtp_user.clone()),
                    password: params.password.or_else(|| outbound.smtp_password.clone()),
                    encryption: params.encryption.unwrap_or(fallback_encryption),
                    debug: params.debug,
                    server_id: None,
                }
            }
        };

        if endpoint.host.trim().is_empty() {
            return Err(Error::Config("Missing SMTP Server".to_string()));
        }
        Ok(endpoint)
    }

    /// Open a session for `target`; a dry-run context never touches the network
    pub async fn connect(&self, target: &ConnectTarget, ctx: &ExecutionContext) -> Result<Connection> {
        if !ctx.live_mode {
            debug!("Dry run, no SMTP connection opened");
            return Ok(Connection::dry_run());
        }
        let endpoint = self.resolve(target).await?;
        self.open(&endpoint).await
    }

    /// Open a session against resolved parameters
    pub async fn open(&self, endpoint: &Endpoint) -> Result<Connection> {
        let host = ascii_host(&endpoint.host).ok_or_else(|| {
            Error::transport(TransportErrorKind::InvalidServerName, endpoint.host.clone())
        })?;

        let timeout = Duration::from_secs(self.outbound.timeout_secs);
        let hello = ClientId::Domain(self.hello_name.clone());
        let tls = match endpoint.encryption {
            Encryption::None => None,
            Encryption::Starttls | Encryption::Ssl => Some(
                TlsParameters::builder(host.clone())
                    .dangerous_accept_invalid_certs(self.outbound.tls_accept_invalid_certs)
                    .build()
                    .map_err(|e| Error::Security(e.to_string()))?,
            ),
        };
        let (implicit_tls, upgrade_tls, phase) = match endpoint.encryption {
            Encryption::Ssl => (tls, None, Phase::ConnectTls),
            Encryption::Starttls => (None, tls, Phase::Connect),
            Encryption::None => (None, None, Phase::Connect),
        };

        debug!(
            host = %host,
            port = endpoint.port,
            encryption = %endpoint.encryption,
            "Connecting to SMTP server"
        );
        let mut inner = bounded(
            timeout,
            "connect",
            phase,
            AsyncSmtpConnection::connect_tokio1(
                (host.as_str(), endpoint.port),
                Some(timeout),
                &hello,
                implicit_tls,
                None,
            ),
        )
        .await?;
        if endpoint.debug {
            debug!(target: "permail::smtp", host = %host, "<< greeted, EHLO: {}", inner.server_info());
        }

        if let Err(e) = handshake(&mut inner, endpoint, &host, &hello, upgrade_tls, timeout).await {
            inner.abort().await;
            return Err(e);
        }

        info!(
            host = %host,
            port = endpoint.port,
            encryption = %endpoint.encryption,
            "SMTP session established"
        );
        Ok(Connection::open(
            inner,
            host,
            endpoint.server_id,
            endpoint.debug,
            timeout,
        ))
    }
}

/// ASCII form of a server name. IP literals pass through; names must be
/// letter-digit-hyphen labels once IDNA-encoded.
fn ascii_host(host: &str) -> Option<String> {
    let host = host.trim();
    if host.parse::<IpAddr>().is_ok() {
        return Some(host.to_string());
    }
    let ascii = idna::domain_to_ascii(host).ok()?;
    let valid = !ascii.is_empty()
        && ascii.split('.').all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && !label.starts_with('-')
                && !label.ends_with('-')
                && label.bytes().all(|b| b.is_ascii_alphanumeric() || b == b'-')
        });
    valid.then_some(ascii)
}

/// STARTTLS upgrade and authentication. lettre greets with EHLO on connect
/// and again after STARTTLS, so the session is greeted once this returns.
async fn handshake(
    inner: &mut AsyncSmtpConnection,
    endpoint: &Endpoint,
    host: &str,
    hello: &ClientId,
    upgrade_tls: Option<TlsParameters>,
    timeout: Duration,
) -> Result<()> {
    if let Some(params) = upgrade_tls {
        if !inner.can_starttls() {
            return Err(Error::Security(format!("{} does not offer STARTTLS", host)));
        }
        if endpoint.debug {
            debug!(target: "permail::smtp", host = %host, ">> STARTTLS");
        }
        bounded(timeout, "STARTTLS", Phase::Starttls, inner.starttls(params, hello)).await?;
        if endpoint.debug {
            debug!(target: "permail::smtp", host = %host, "<< upgraded, EHLO: {}", inner.server_info());
        }
    }

    let username = endpoint.username.as_deref().map(str::trim).filter(|u| !u.is_empty());
    if let Some(username) = username {
        let login = encode_idna_user(username)?;
        if endpoint.debug {
            debug!(target: "permail::smtp", host = %host, ">> AUTH PLAIN/LOGIN as {}", login);
        }
        let credentials = Credentials::new(login, endpoint.password.clone().unwrap_or_default());
        let result = bounded(
            timeout,
            "AUTH",
            Phase::Auth,
            inner.auth(&[Mechanism::Plain, Mechanism::Login], &credentials),
        )
        .await;
        if endpoint.debug {
            match &result {
                Ok(response) => debug!(
                    target: "permail::smtp",
                    host = %host,
                    "<< {} {}",
                    code_number(response.code()),
                    response.message().collect::<Vec<_>>().join(" ")
                ),
                Err(e) => debug!(target: "permail::smtp", host = %host, "<< {}", e),
            }
        }
        result?;
        debug!(host = %host, "Authenticated");
    }
    Ok(())
}
