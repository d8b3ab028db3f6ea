//! PerMail Core - outbound SMTP dispatch
//!
//! Per-user sender identity: From rewriting, message assembly, server
//! selection, authenticated SMTP sessions and connection testing.

pub mod address;
pub mod context;
pub mod dispatch;
pub mod from;
pub mod message;
pub mod personal;
pub mod probe;
pub mod transport;

#[cfg(test)]
mod testing;

pub use context::{Actor, ExecutionContext};
pub use dispatch::{Dispatcher, SendReceipt};
pub use from::{resolve_from, FromPolicy, ResolvedFrom};
pub use message::{Attachment, MessageBuilder, MessageParams, ObjectRef, OutboundMessage};
pub use personal::PersonalConfigs;
pub use probe::{ConnectionProbe, ProbeReport};
pub use transport::{ConnectParams, ConnectTarget, Connection, Endpoint, Reply, TransportConnector};
