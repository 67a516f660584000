//! Resolves the current user for a request.
//!
//! The external authority is consulted on every call. The local session is created when
//! the authority vouches for a privileged role and destroyed (with a security event) on
//! every other outcome. Authority errors and timeouts fail closed.

use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};

use super::audit::{InvalidationReason, SecurityEvent, SecuritySink, UNKNOWN_ROLE};
use super::authority::{AuthorityError, SessionAuthority, Validation};
use super::principal::{RolePolicy, UserIdentity};
use super::session::{LocalSession, SessionStore};

pub const DEFAULT_AUTHORITY_TIMEOUT: Duration = Duration::from_secs(3);

pub trait Clock: Send + Sync {
    fn now(&self) -> DateTime<Utc>;
}

#[derive(Debug, Default, Clone, Copy)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> { Utc::now() }
}

/// What a single `resolve` call did.
#[derive(Debug, Clone, PartialEq)]
pub enum GateOutcome {
    /// Local session created or overwritten.
    Authenticated(LocalSession),
    /// A local session existed and was destroyed; the event was handed to the sink.
    Invalidated(SecurityEvent),
    /// Nothing existed and nothing was created.
    Anonymous,
}

impl GateOutcome {
    pub fn user(&self) -> Option<&UserIdentity> {
        match self {
            GateOutcome::Authenticated(s) => Some(&s.user),
            _ => None,
        }
    }

    pub fn into_user(self) -> Option<UserIdentity> {
        match self {
            GateOutcome::Authenticated(s) => Some(s.user),
            _ => None,
        }
    }
}

#[derive(Clone)]
pub struct Gatekeeper {
    authority: Arc<dyn SessionAuthority>,
    sink: Arc<dyn SecuritySink>,
    clock: Arc<dyn Clock>,
    policy: RolePolicy,
    timeout: Duration,
}

impl Gatekeeper {
    pub fn new(authority: Arc<dyn SessionAuthority>, sink: Arc<dyn SecuritySink>) -> Self {
        Self {
            authority,
            sink,
            clock: Arc::new(SystemClock),
            policy: RolePolicy::default(),
            timeout: DEFAULT_AUTHORITY_TIMEOUT,
        }
    }

    pub fn with_policy(mut self, policy: RolePolicy) -> Self { self.policy = policy; self }

    pub fn with_timeout(mut self, timeout: Duration) -> Self { self.timeout = timeout; self }

    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self { self.clock = clock; self }

    pub fn policy(&self) -> &RolePolicy { &self.policy }

    pub fn timeout(&self) -> Duration { self.timeout }

    /// Current user for the request, or `None`.
    pub async fn current_user(&self, token: Option<&str>, session: &mut dyn SessionStore) -> Option<UserIdentity> {
        self.resolve(token, session).await.into_user()
    }

    pub async fn resolve(&self, token: Option<&str>, session: &mut dyn SessionStore) -> GateOutcome {
        let Some(token) = token else {
            return self.invalidate(session, InvalidationReason::NoExternalSession, None);
        };

        let validation = self.validate(token).await;
        match validation {
            Ok(Validation::Valid(user)) if self.policy.is_privileged(&user.role) => {
                let record = LocalSession { user, login_time: self.clock.now() };
                tracing::debug!(target: "gatekeeper", role = %record.user.role, "local session established");
                session.establish(record.clone());
                GateOutcome::Authenticated(record)
            }
            Ok(Validation::Valid(user)) => {
                self.invalidate(session, InvalidationReason::InsufficientPermissions, Some(&user.role))
            }
            Ok(Validation::Invalid) => {
                self.invalidate(session, InvalidationReason::ExternalSessionInvalid, Some(UNKNOWN_ROLE))
            }
            Err(e) => {
                tracing::warn!(target: "gatekeeper", "session validation failed closed: {}", e);
                self.invalidate(session, InvalidationReason::ExternalSessionInvalid, Some(UNKNOWN_ROLE))
            }
        }
    }

    async fn validate(&self, token: &str) -> Result<Validation, AuthorityError> {
        // Empty cookie values never reach the authority.
        if token.trim().is_empty() {
            return Ok(Validation::Invalid);
        }
        match tokio::time::timeout(self.timeout, self.authority.validate(token)).await {
            Ok(r) => r,
            Err(_) => Err(AuthorityError::Timeout(self.timeout)),
        }
    }

    fn invalidate(&self, session: &mut dyn SessionStore, reason: InvalidationReason, role: Option<&str>) -> GateOutcome {
        if !session.destroy() {
            return GateOutcome::Anonymous;
        }
        let event = SecurityEvent::invalidated(reason, role, self.clock.now());
        if let Err(e) = self.sink.log_security_event(&event) {
            tracing::warn!(target: "gatekeeper", reason = reason.code(), "security event not recorded: {}", e);
        }
        GateOutcome::Invalidated(event)
    }
}

#[cfg(test)]
#[path = "gatekeeper_tests.rs"]
mod gatekeeper_tests;
