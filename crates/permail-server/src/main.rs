//! PerMail - outbound connection checker
//!
//! Tests every configured outgoing server, or the configured defaults when
//! no server is stored, and exits non-zero if any test fails.

use anyhow::{bail, Result};
use permail_common::config::{Config, LoggingConfig};
use permail_core::{Actor, ConnectTarget, ConnectionProbe, ExecutionContext, TransportConnector};
use permail_storage::{DatabasePool, DbMailServerRepository, MailServerRepository, MemoryStore};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};
use uuid::Uuid;

#[tokio::main]
async fn main() -> Result<()> {
    let config = Config::load()?;
    init_logging(&config.logging);

    info!("Starting PerMail connection check...");

    let servers: Arc<dyn MailServerRepository> = match &config.database {
        Some(database) => {
            let db_pool = DatabasePool::new(database).await?;
            db_pool.migrate().await?;
            Arc::new(DbMailServerRepository::new(db_pool))
        }
        None => {
            info!("No database configured, using in-memory store");
            Arc::new(MemoryStore::new())
        }
    };

    let connector = Arc::new(TransportConnector::new(
        servers.clone(),
        config.outbound.clone(),
        config.server.hostname.clone(),
    ));
    let probe = ConnectionProbe::new(
        connector,
        servers.clone(),
        config.outbound.probe_recipient.clone(),
    );

    let mut actor = Actor::new(Uuid::nil());
    if let Some(from) = &config.outbound.default_from {
        actor = actor.with_email(from.clone());
    }
    let ctx = ExecutionContext {
        live_mode: config.server.live_mode,
        actor,
    };

    let mut failures = 0;
    if servers.list().await?.is_empty() {
        match probe.probe_target(&ConnectTarget::Default, &ctx).await {
            Ok(report) => info!("{}", report.message),
            Err(e) => {
                error!(code = e.code(), "{}", e);
                failures += 1;
            }
        }
    } else {
        for (server_id, outcome) in probe.probe_all(&ctx).await? {
            if let Err(e) = outcome {
                error!(server_id = %server_id, code = e.code(), "{}", e);
                failures += 1;
            }
        }
    }

    if failures > 0 {
        bail!("{} connection test(s) failed", failures);
    }
    info!("All connection tests passed");
    Ok(())
}

fn init_logging(logging: &LoggingConfig) {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        EnvFilter::new(format!("{},permail_core=debug,permail::smtp=debug", logging.level))
    });

    let registry = tracing_subscriber::registry().with(filter);
    if logging.format == "json" {
        registry.with(fmt::layer().json().with_target(true)).init();
    } else {
        registry
            .with(fmt::layer().with_target(true).with_level(true))
            .init();
    }
}
