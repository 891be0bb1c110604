//! Single-account login for the chat UI.

use sha2::{Digest, Sha256};

/// Configured login.
#[derive(Clone)]
pub struct Login {
    username: String,
    password: String,
}

impl Login {
    pub fn new(username: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            password: password.into(),
        }
    }

    /// Check submitted credentials; returns the user id on success.
    pub fn authenticate(&self, username: &str, password: &str) -> Option<String> {
        let username_ok = constant_time_eq(username.as_bytes(), self.username.as_bytes());
        let password_ok = constant_time_eq(password.as_bytes(), self.password.as_bytes());
        if username_ok && password_ok {
            Some(user_id_for(username))
        } else {
            None
        }
    }
}

impl std::fmt::Debug for Login {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Login")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// Stable history key for a user name: `user_` + 16 hex chars of SHA-256.
pub fn user_id_for(username: &str) -> String {
    let digest = Sha256::digest(username.as_bytes());
    format!("user_{}", &hex::encode(digest)[..16])
}

fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    a.iter().zip(b).fold(0u8, |acc, (x, y)| acc | (x ^ y)) == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_user_id_is_stable() {
        // sha256("admin") = 8c6976e5b5410415bde908bd4dee15df...
        assert_eq!(user_id_for("admin"), "user_8c6976e5b5410415");
        assert_eq!(user_id_for("admin"), user_id_for("admin"));
        assert_ne!(user_id_for("admin"), user_id_for("Admin"));
    }

    #[test]
    fn test_authenticate() {
        let login = Login::new("alice", "s3cret");
        assert_eq!(login.authenticate("alice", "s3cret"), Some(user_id_for("alice")));
        assert!(login.authenticate("alice", "wrong").is_none());
        assert!(login.authenticate("bob", "s3cret").is_none());
        assert!(login.authenticate("alice", "s3cret ").is_none());
        assert!(!format!("{:?}", login).contains("s3cret"));
    }
}
