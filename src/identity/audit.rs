//! Security audit events emitted when a local session is invalidated.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const SESSION_INVALIDATED: &str = "session_invalidated";
pub const UNKNOWN_ROLE: &str = "unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidationReason {
    NoExternalSession,
    ExternalSessionInvalid,
    InsufficientPermissions,
}

impl InvalidationReason {
    pub fn code(&self) -> &'static str {
        match self {
            InvalidationReason::NoExternalSession => "no_external_session",
            InvalidationReason::ExternalSessionInvalid => "external_session_invalid",
            InvalidationReason::InsufficientPermissions => "insufficient_permissions",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub event: String,
    pub at: DateTime<Utc>,
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl SecurityEvent {
    /// Build a `session_invalidated` event. `role` is recorded as `user_role` when given.
    pub fn invalidated(reason: InvalidationReason, role: Option<&str>, at: DateTime<Utc>) -> Self {
        let mut metadata = serde_json::Map::new();
        metadata.insert("reason".into(), reason.code().into());
        if let Some(r) = role {
            metadata.insert("user_role".into(), r.into());
        }
        Self { event: SESSION_INVALIDATED.to_string(), at, metadata }
    }

    pub fn reason(&self) -> Option<&str> {
        self.metadata.get("reason").and_then(|v| v.as_str())
    }

    pub fn user_role(&self) -> Option<&str> {
        self.metadata.get("user_role").and_then(|v| v.as_str())
    }
}

#[derive(Debug, Error)]
pub enum AuditError {
    #[error("audit log io: {0}")]
    Io(#[from] std::io::Error),
    #[error("audit event encode: {0}")]
    Encode(#[from] serde_json::Error),
}

/// Where security events go. Callers treat failures as best-effort.
pub trait SecuritySink: Send + Sync {
    fn log_security_event(&self, event: &SecurityEvent) -> Result<(), AuditError>;
}

/// Emits each event as a structured `tracing` warning on target `security`.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl SecuritySink for TracingSink {
    fn log_security_event(&self, event: &SecurityEvent) -> Result<(), AuditError> {
        let metadata = serde_json::to_string(&event.metadata)?;
        tracing::warn!(
            target: "security",
            event = %event.event,
            reason = event.reason().unwrap_or(""),
            at = %event.at.to_rfc3339(),
            "{}", metadata
        );
        Ok(())
    }
}

/// Appends one JSON object per line to an audit file.
#[derive(Debug)]
pub struct JsonlSink {
    path: PathBuf,
    file: Mutex<File>,
}

impl JsonlSink {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, AuditError> {
        let path = path.as_ref().to_path_buf();
        if let Some(dir) = path.parent() {
            if !dir.as_os_str().is_empty() { std::fs::create_dir_all(dir)?; }
        }
        let file = OpenOptions::new().create(true).append(true).open(&path)?;
        Ok(Self { path, file: Mutex::new(file) })
    }

    pub fn path(&self) -> &Path { &self.path }
}

impl SecuritySink for JsonlSink {
    fn log_security_event(&self, event: &SecurityEvent) -> Result<(), AuditError> {
        let mut line = serde_json::to_vec(event)?;
        line.push(b'\n');
        let mut f = self.file.lock();
        f.write_all(&line)?;
        f.flush()?;
        Ok(())
    }
}

/// Fan out to several sinks. Every sink is attempted; the first error is returned.
#[derive(Default)]
pub struct MultiSink {
    sinks: Vec<Box<dyn SecuritySink>>,
}

impl MultiSink {
    pub fn new() -> Self { Self::default() }

    pub fn with(mut self, sink: impl SecuritySink + 'static) -> Self {
        self.sinks.push(Box::new(sink));
        self
    }

    pub fn len(&self) -> usize { self.sinks.len() }

    pub fn is_empty(&self) -> bool { self.sinks.is_empty() }
}

impl SecuritySink for MultiSink {
    fn log_security_event(&self, event: &SecurityEvent) -> Result<(), AuditError> {
        let mut first_err = None;
        for s in &self.sinks {
            if let Err(e) = s.log_security_event(event) {
                if first_err.is_none() { first_err = Some(e); }
            }
        }
        match first_err {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::BufRead;
    use tempfile::tempdir;

    #[test]
    fn event_metadata_shape() {
        let at = Utc::now();
        let ev = SecurityEvent::invalidated(InvalidationReason::ExternalSessionInvalid, Some(UNKNOWN_ROLE), at);
        assert_eq!(ev.event, "session_invalidated");
        assert_eq!(ev.reason(), Some("external_session_invalid"));
        assert_eq!(ev.user_role(), Some("unknown"));

        let ev = SecurityEvent::invalidated(InvalidationReason::NoExternalSession, None, at);
        assert_eq!(ev.reason(), Some("no_external_session"));
        assert!(ev.metadata.get("user_role").is_none());
    }

    #[test]
    fn reason_codes_match_serde_names() {
        for r in [
            InvalidationReason::NoExternalSession,
            InvalidationReason::ExternalSessionInvalid,
            InvalidationReason::InsufficientPermissions,
        ] {
            assert_eq!(serde_json::to_value(r).unwrap(), serde_json::Value::from(r.code()));
        }
    }

    #[test]
    fn jsonl_sink_appends_lines() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("audit").join("security.jsonl");
        let sink = JsonlSink::open(&path).unwrap();
        let at = Utc::now();
        sink.log_security_event(&SecurityEvent::invalidated(InvalidationReason::NoExternalSession, None, at)).unwrap();
        sink.log_security_event(&SecurityEvent::invalidated(InvalidationReason::InsufficientPermissions, Some("viewer"), at)).unwrap();

        let f = std::fs::File::open(sink.path()).unwrap();
        let lines: Vec<String> = std::io::BufReader::new(f).lines().map(|l| l.unwrap()).collect();
        assert_eq!(lines.len(), 2);
        let second: SecurityEvent = serde_json::from_str(&lines[1]).unwrap();
        assert_eq!(second.reason(), Some("insufficient_permissions"));
        assert_eq!(second.user_role(), Some("viewer"));
    }

    struct Broken;
    impl SecuritySink for Broken {
        fn log_security_event(&self, _event: &SecurityEvent) -> Result<(), AuditError> {
            Err(AuditError::Io(std::io::Error::other("disk full")))
        }
    }

    #[test]
    fn multi_sink_attempts_every_sink() {
        let tmp = tempdir().unwrap();
        let path = tmp.path().join("a.jsonl");
        let multi = MultiSink::new().with(Broken).with(JsonlSink::open(&path).unwrap());
        assert_eq!(multi.len(), 2);
        let ev = SecurityEvent::invalidated(InvalidationReason::NoExternalSession, None, Utc::now());
        assert!(multi.log_security_event(&ev).is_err());
        let written = std::fs::read_to_string(&path).unwrap();
        assert_eq!(written.lines().count(), 1);
    }
}
