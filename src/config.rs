//! Runtime configuration: built-in defaults, then `GATEKEEPER_*` environment variables,
//! then command-line flags.

use std::path::PathBuf;
use std::time::Duration;

use crate::error::{AppError, AppResult};
use crate::identity::RolePolicy;
use crate::report::DEFAULT_TEMPLATE_DIR;

pub const DEFAULT_HTTP_PORT: u16 = 8080;
pub const DEFAULT_AUTHORITY_TIMEOUT_MS: u64 = 3000;
pub const DEFAULT_SESSION_TTL_SECS: u64 = 3600;

#[derive(Debug, Clone, PartialEq)]
pub struct GatekeeperConfig {
    pub http_port: u16,
    /// Validation endpoint of the session authority. `None` means every token is rejected.
    pub authority_url: Option<String>,
    pub authority_timeout: Duration,
    pub privileged_roles: Vec<String>,
    /// Lifetime of a local session after its last successful validation.
    pub session_ttl: Duration,
    pub audit_log: Option<PathBuf>,
    pub template_dir: PathBuf,
}

impl Default for GatekeeperConfig {
    fn default() -> Self {
        Self {
            http_port: DEFAULT_HTTP_PORT,
            authority_url: None,
            authority_timeout: Duration::from_millis(DEFAULT_AUTHORITY_TIMEOUT_MS),
            privileged_roles: vec!["admin".to_string()],
            session_ttl: Duration::from_secs(DEFAULT_SESSION_TTL_SECS),
            audit_log: None,
            template_dir: PathBuf::from(DEFAULT_TEMPLATE_DIR),
        }
    }
}

struct Setting {
    env: &'static str,
    flag: &'static str,
}

const HTTP_PORT: Setting = Setting { env: "GATEKEEPER_HTTP_PORT", flag: "--http-port" };
const AUTHORITY_URL: Setting = Setting { env: "GATEKEEPER_AUTHORITY_URL", flag: "--authority-url" };
const AUTHORITY_TIMEOUT_MS: Setting = Setting { env: "GATEKEEPER_AUTHORITY_TIMEOUT_MS", flag: "--authority-timeout-ms" };
const PRIVILEGED_ROLES: Setting = Setting { env: "GATEKEEPER_PRIVILEGED_ROLES", flag: "--privileged-roles" };
const SESSION_TTL_SECS: Setting = Setting { env: "GATEKEEPER_SESSION_TTL_SECS", flag: "--session-ttl-secs" };
const AUDIT_LOG: Setting = Setting { env: "GATEKEEPER_AUDIT_LOG", flag: "--audit-log" };
const TEMPLATE_DIR: Setting = Setting { env: "GATEKEEPER_TEMPLATE_DIR", flag: "--template-dir" };

fn parse_flag_arg(args: &[String], flag: &str) -> Option<String> {
    let mut i = 0;
    while i < args.len() {
        if args[i] == flag && i + 1 < args.len() {
            return Some(args[i + 1].clone());
        }
        if let Some(v) = args[i].strip_prefix(flag).and_then(|rest| rest.strip_prefix('=')) {
            return Some(v.to_string());
        }
        i += 1;
    }
    None
}

fn parse_role_list(raw: &str) -> AppResult<Vec<String>> {
    let roles: Vec<String> = raw
        .split(',')
        .map(|r| r.trim())
        .filter(|r| !r.is_empty())
        .map(|r| r.to_string())
        .collect();
    if roles.is_empty() {
        return Err(AppError::user("privileged_roles", "at least one privileged role is required"));
    }
    Ok(roles)
}

impl GatekeeperConfig {
    /// Resolve from the process environment and arguments.
    pub fn from_env_and_args(args: &[String]) -> AppResult<Self> {
        Self::resolve(|k| std::env::var(k).ok(), args)
    }

    /// Resolve with an explicit environment lookup. Flags win over environment values.
    pub fn resolve<F>(env: F, args: &[String]) -> AppResult<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let lookup = |s: &Setting| -> Option<String> {
            parse_flag_arg(args, s.flag)
                .or_else(|| env(s.env))
                .map(|v| v.trim().to_string())
        };

        let mut cfg = Self::default();
        if let Some(v) = lookup(&HTTP_PORT) {
            cfg.http_port = v.parse::<u16>()
                .map_err(|_| AppError::user("http_port".to_string(), format!("invalid port '{}'", v)))?;
        }
        if let Some(v) = lookup(&AUTHORITY_URL) {
            cfg.authority_url = if v.is_empty() { None } else { Some(v) };
        }
        if let Some(v) = lookup(&AUTHORITY_TIMEOUT_MS) {
            let ms = v.parse::<u64>()
                .map_err(|_| AppError::user("authority_timeout".to_string(), format!("invalid timeout '{}'", v)))?;
            if ms == 0 {
                return Err(AppError::user("authority_timeout", "timeout must be greater than zero"));
            }
            cfg.authority_timeout = Duration::from_millis(ms);
        }
        if let Some(v) = lookup(&PRIVILEGED_ROLES) {
            cfg.privileged_roles = parse_role_list(&v)?;
        }
        if let Some(v) = lookup(&SESSION_TTL_SECS) {
            let secs = v.parse::<u64>()
                .map_err(|_| AppError::user("session_ttl".to_string(), format!("invalid session ttl '{}'", v)))?;
            if secs == 0 {
                return Err(AppError::user("session_ttl", "session ttl must be greater than zero"));
            }
            cfg.session_ttl = Duration::from_secs(secs);
        }
        if let Some(v) = lookup(&AUDIT_LOG) {
            cfg.audit_log = if v.is_empty() { None } else { Some(PathBuf::from(v)) };
        }
        if let Some(v) = lookup(&TEMPLATE_DIR) {
            if !v.is_empty() { cfg.template_dir = PathBuf::from(v); }
        }
        Ok(cfg)
    }

    pub fn role_policy(&self) -> RolePolicy {
        RolePolicy::new(self.privileged_roles.iter().cloned())
    }
}
