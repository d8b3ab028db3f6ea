//! Mapping of SMTP client failures onto error categories

use lettre::transport::smtp::response::Code;
use lettre::transport::smtp::Error as SmtpError;
use permail_common::{Error, Result, TransportErrorKind};
use std::future::Future;
use std::io::ErrorKind;
use std::time::Duration;

/// Protocol step a failure happened in
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum Phase {
    Connect,
    /// Connect with TLS from the first byte
    ConnectTls,
    Starttls,
    Auth,
    Command,
}

pub(crate) fn code_number(code: Code) -> u16 {
    code.to_string().parse().unwrap_or(0)
}

fn reply_text(err: &SmtpError) -> String {
    std::error::Error::source(err)
        .map(|source| source.to_string())
        .unwrap_or_else(|| err.to_string())
}

fn io_source(err: &SmtpError) -> Option<&std::io::Error> {
    let mut source = std::error::Error::source(err);
    while let Some(current) = source {
        if let Some(io) = current.downcast_ref::<std::io::Error>() {
            return Some(io);
        }
        source = current.source();
    }
    None
}

pub(crate) fn classify(err: SmtpError, phase: Phase) -> Error {
    if err.is_timeout() {
        return Error::transport(TransportErrorKind::Timeout, err.to_string());
    }
    if err.is_tls() || phase == Phase::Starttls {
        return Error::Security(err.to_string());
    }
    if let Some(code) = err.status() {
        return Error::Protocol {
            code: code_number(code),
            reply: reply_text(&err),
        };
    }

    if let Some(io) = io_source(&err) {
        let kind = match io.kind() {
            ErrorKind::TimedOut => TransportErrorKind::Timeout,
            ErrorKind::InvalidData if phase == Phase::ConnectTls => {
                return Error::Security(io.to_string());
            }
            ErrorKind::UnexpectedEof
            | ErrorKind::ConnectionReset
            | ErrorKind::ConnectionAborted
            | ErrorKind::BrokenPipe
            | ErrorKind::NotConnected => TransportErrorKind::Disconnected,
            _ if matches!(phase, Phase::Connect | Phase::ConnectTls) => {
                TransportErrorKind::Unreachable
            }
            _ => TransportErrorKind::Disconnected,
        };
        return Error::transport(kind, io.to_string());
    }

    // lettre reports a peer that hung up mid-reply this way
    if err.is_response() && err.to_string().contains("incomplete") {
        return Error::transport(TransportErrorKind::Disconnected, err.to_string());
    }

    match phase {
        Phase::Connect | Phase::ConnectTls => {
            Error::transport(TransportErrorKind::Unreachable, err.to_string())
        }
        Phase::Auth => Error::Config(format!("Authentication failed: {}", err)),
        _ => Error::Other(anyhow::Error::new(err)),
    }
}

/// Runs one network step under `timeout`, classifying its failure
pub(crate) async fn bounded<T, F>(timeout: Duration, step: &str, phase: Phase, fut: F) -> Result<T>
where
    F: Future<Output = std::result::Result<T, SmtpError>>,
{
    match tokio::time::timeout(timeout, fut).await {
        Ok(result) => result.map_err(|e| classify(e, phase)),
        Err(_) => Err(Error::transport(
            TransportErrorKind::Timeout,
            format!("{} did not complete within {}s", step, timeout.as_secs()),
        )),
    }
}
