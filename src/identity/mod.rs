//! Session gatekeeping against an external session authority.
//! Keep the public surface thin and split implementation across sub-modules.

mod principal;
mod session;
mod authority;
mod audit;
mod gatekeeper;

pub use principal::{UserIdentity, RolePolicy};
pub use session::{
    LocalSession, SessionStore, SessionSlot, SessionRegistry, SessionId, new_session_id,
    sid_hint, DEFAULT_SESSION_TTL,
};
pub use authority::{
    SessionAuthority, Validation, AuthorityError, HttpSessionAuthority, DenyAllAuthority, StaticAuthority,
    parse_validate_response,
};
pub use audit::{
    SecurityEvent, InvalidationReason, SecuritySink, AuditError, TracingSink, JsonlSink, MultiSink,
    SESSION_INVALIDATED, UNKNOWN_ROLE,
};
pub use gatekeeper::{Gatekeeper, GateOutcome, Clock, SystemClock, DEFAULT_AUTHORITY_TIMEOUT};
