// SPDX-License-Identifier: Apache-2.0 OR MIT
// Copyright (c) 2025-2026 the daqcore authors

//! Hello-time authentication (§4.10: "the server's configured
//! authenticator validates username/password or an anonymous token").

use std::collections::HashMap;

use crate::error::{Error, Result};

/// Resolves a hello's credentials to a role name used by
/// [`crate::component::Permissions`]. Failure closes the connection
/// before a session is created.
pub trait Authenticator: Send + Sync {
    fn authenticate(&self, username: Option<&str>, password: Option<&str>) -> Result<Arc<str>>;
}

use std::sync::Arc;

/// Accepts every hello, anonymous or not, as the given role. Useful for
/// embedding contexts with no real access control.
pub struct AnonymousAuthenticator {
    pub role: Arc<str>,
}

impl AnonymousAuthenticator {
    pub fn new(role: impl Into<Arc<str>>) -> Self {
        Self { role: role.into() }
    }
}

impl Authenticator for AnonymousAuthenticator {
    fn authenticate(&self, _username: Option<&str>, _password: Option<&str>) -> Result<Arc<str>> {
        Ok(self.role.clone())
    }
}

/// A static username/password table mapping to roles.
pub struct UsernamePasswordAuthenticator {
    users: HashMap<String, (String, Arc<str>)>,
}

impl UsernamePasswordAuthenticator {
    pub fn new() -> Self {
        Self { users: HashMap::new() }
    }

    pub fn add_user(&mut self, username: impl Into<String>, password: impl Into<String>, role: impl Into<Arc<str>>) {
        self.users.insert(username.into(), (password.into(), role.into()));
    }
}

impl Default for UsernamePasswordAuthenticator {
    fn default() -> Self {
        Self::new()
    }
}

impl Authenticator for UsernamePasswordAuthenticator {
    fn authenticate(&self, username: Option<&str>, password: Option<&str>) -> Result<Arc<str>> {
        let username = username.ok_or_else(|| Error::AccessDenied("anonymous access not permitted".to_string()))?;
        let (expected_password, role) = self
            .users
            .get(username)
            .ok_or_else(|| Error::AccessDenied(format!("unknown user '{username}'")))?;
        if password != Some(expected_password.as_str()) {
            return Err(Error::AccessDenied("invalid credentials".to_string()));
        }
        Ok(role.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn anonymous_always_succeeds() {
        let auth = AnonymousAuthenticator::new("guest");
        assert_eq!(&*auth.authenticate(None, None).unwrap(), "guest");
    }

    #[test]
    fn wrong_password_is_denied() {
        let mut auth = UsernamePasswordAuthenticator::new();
        auth.add_user("alice", "secret", "admin");
        assert!(auth.authenticate(Some("alice"), Some("wrong")).is_err());
        assert_eq!(&*auth.authenticate(Some("alice"), Some("secret")).unwrap(), "admin");
    }
}
