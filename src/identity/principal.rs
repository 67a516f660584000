use serde::{Deserialize, Serialize};

/// Identity returned by the external session authority for a valid token.
///
/// Only `role` is required. Every other attribute the authority sends is kept in
/// `attrs` so the local session mirrors the authority's view verbatim.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct UserIdentity {
    pub role: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,
    #[serde(flatten)]
    pub attrs: serde_json::Map<String, serde_json::Value>,
}

impl UserIdentity {
    pub fn new<S: Into<String>>(username: S, role: S) -> Self {
        Self { role: role.into(), username: Some(username.into()), attrs: serde_json::Map::new() }
    }
}

/// Roles that may hold a local session. Matching is exact and case-sensitive.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RolePolicy {
    privileged: Vec<String>,
}

impl Default for RolePolicy {
    fn default() -> Self { Self { privileged: vec!["admin".to_string()] } }
}

impl RolePolicy {
    pub fn new<I, S>(roles: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self { privileged: roles.into_iter().map(Into::into).collect() }
    }

    pub fn is_privileged(&self, role: &str) -> bool {
        self.privileged.iter().any(|r| r == role)
    }

    pub fn roles(&self) -> &[String] { &self.privileged }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn identity_keeps_extra_attributes() {
        let v = json!({"username": "natalya", "role": "admin", "user_id": 7, "email": "n@farm"});
        let id: UserIdentity = serde_json::from_value(v.clone()).unwrap();
        assert_eq!(id.role, "admin");
        assert_eq!(id.username.as_deref(), Some("natalya"));
        assert_eq!(id.attrs.get("user_id"), Some(&json!(7)));
        assert_eq!(serde_json::to_value(&id).unwrap(), v);
    }

    #[test]
    fn identity_requires_role() {
        let r = serde_json::from_value::<UserIdentity>(json!({"username": "x"}));
        assert!(r.is_err());
    }

    #[test]
    fn policy_is_exact_match() {
        let p = RolePolicy::default();
        assert!(p.is_privileged("admin"));
        assert!(!p.is_privileged("Admin"));
        assert!(!p.is_privileged("viewer"));
        let p = RolePolicy::new(["admin", "farm_manager"]);
        assert!(p.is_privileged("farm_manager"));
    }
}
