//! Tagged state of the auth client.
//!
//! Bootstrap and session progress independently. Every operation that may
//! commit a session carries the tick it began at; a commit is only accepted
//! when that tick is not behind the `min_auth_begin` watermark.

use super::{error::ClientError, timer::ScheduledTask};
use crate::{
    token::AuthPayload,
    types::AuthContext,
};
use futures_util::future::{BoxFuture, Shared};

pub(crate) type Pending<T> = Shared<BoxFuture<'static, Result<T, ClientError>>>;

/// Token and context handed to callers of `auth()`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthResponse {
    pub token: String,
    pub context: AuthContext,
}

/// Notifications raised by background refresh and expiry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthEvent {
    Refresh(AuthContext),
    Expire(AuthContext),
    Error(ClientError),
}

/// A committed session.
#[derive(Debug, Clone)]
pub(crate) struct AuthRecord {
    /// Tick of the operation that produced this record; doubles as its identity.
    pub id: u64,
    pub token: String,
    pub payload: AuthPayload,
    pub context: AuthContext,
    /// Set when the token came from a cookie the backend issued directly.
    pub backend_issued: bool,
}

impl AuthRecord {
    pub fn response(&self) -> AuthResponse {
        AuthResponse {
            token: self.token.clone(),
            context: self.context.clone(),
        }
    }
}

pub(crate) enum Bootstrap {
    Unbootstrapped,
    Initiating {
        platform: String,
        pending: Pending<()>,
    },
    Idle {
        platform: String,
    },
}

impl Bootstrap {
    pub fn platform(&self) -> Option<&str> {
        match self {
            Self::Unbootstrapped => None,
            Self::Initiating { platform, .. } | Self::Idle { platform } => Some(platform),
        }
    }
}

pub(crate) enum Session {
    SignedOut,
    Authenticating {
        begin: u64,
        pending: Pending<AuthResponse>,
    },
    Authed(AuthRecord),
}

pub(crate) struct Inner {
    pub bootstrap: Bootstrap,
    pub session: Session,
    clock: u64,
    pub min_auth_begin: u64,
    pub refresh_timer: Option<ScheduledTask>,
    pub expire_timer: Option<ScheduledTask>,
}

impl Inner {
    pub fn new() -> Self {
        Self {
            bootstrap: Bootstrap::Unbootstrapped,
            session: Session::SignedOut,
            clock: 0,
            min_auth_begin: 0,
            refresh_timer: None,
            expire_timer: None,
        }
    }

    /// Next value of the monotonic operation clock.
    pub fn tick(&mut self) -> u64 {
        self.clock += 1;
        self.clock
    }

    /// Whether an operation that began at `begin` may still commit.
    pub fn is_current(&self, begin: u64) -> bool {
        begin >= self.min_auth_begin
    }

    pub fn record(&self) -> Option<&AuthRecord> {
        match &self.session {
            Session::Authed(record) => Some(record),
            _ => None,
        }
    }

    pub fn cancel_timers(&mut self) {
        for timer in [self.refresh_timer.take(), self.expire_timer.take()]
            .into_iter()
            .flatten()
        {
            timer.cancel();
        }
    }

    /// Drop the session and invalidate every operation begun so far.
    pub fn sign_out(&mut self) -> Option<AuthRecord> {
        self.cancel_timers();
        self.min_auth_begin = self.tick();
        match std::mem::replace(&mut self.session, Session::SignedOut) {
            Session::Authed(record) => Some(record),
            _ => None,
        }
    }
}
