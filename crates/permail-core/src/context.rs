//! Per-call execution context

use permail_common::types::UserId;

/// User on whose behalf an operation runs
#[derive(Debug, Clone)]
pub struct Actor {
    pub user_id: UserId,
    pub email: Option<String>,
    pub name: Option<String>,
}

impl Actor {
    pub fn new(user_id: UserId) -> Self {
        Self {
            user_id,
            email: None,
            name: None,
        }
    }

    pub fn with_email(mut self, email: impl Into<String>) -> Self {
        self.email = Some(email.into());
        self
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Email address, if set and non-blank
    pub fn email(&self) -> Option<&str> {
        self.email.as_deref().map(str::trim).filter(|e| !e.is_empty())
    }
}

/// Passed explicitly into every operation that may touch the network.
///
/// With `live_mode` off, connections are never opened and sends succeed
/// without transmitting anything.
#[derive(Debug, Clone)]
pub struct ExecutionContext {
    pub live_mode: bool,
    pub actor: Actor,
}

impl ExecutionContext {
    pub fn live(actor: Actor) -> Self {
        Self {
            live_mode: true,
            actor,
        }
    }

    pub fn dry_run(actor: Actor) -> Self {
        Self {
            live_mode: false,
            actor,
        }
    }
}
