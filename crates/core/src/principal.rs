use std::collections::HashSet;

use serde::{Deserialize, Serialize};

/// The validated identity attached to a session. Immutable for the life of
/// the connection; produced once by the token validator at handshake time.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub user_id: String,
    pub username: String,
    pub email: Option<String>,
    pub full_name: Option<String>,
    pub roles: HashSet<String>,
}

impl Principal {
    #[must_use]
    pub fn has_role(&self, role: &str) -> bool {
        self.roles.contains(role)
    }

    #[must_use]
    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        roles.iter().any(|r| self.roles.contains(*r))
    }

    #[must_use]
    pub fn has_all_roles(&self, roles: &[&str]) -> bool {
        roles.iter().all(|r| self.roles.contains(*r))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn principal(roles: &[&str]) -> Principal {
        Principal {
            user_id: "u1".into(),
            username: "alice".into(),
            email: None,
            full_name: None,
            roles: roles.iter().map(|r| r.to_string()).collect(),
        }
    }

    #[test]
    fn role_predicates() {
        let p = principal(&["editor", "viewer"]);
        assert!(p.has_role("editor"));
        assert!(!p.has_role("admin"));
        assert!(p.has_any_role(&["admin", "viewer"]));
        assert!(!p.has_any_role(&["admin", "owner"]));
        assert!(p.has_all_roles(&["editor", "viewer"]));
        assert!(!p.has_all_roles(&["editor", "admin"]));
    }
}
