use std::collections::HashSet;

use async_trait::async_trait;
use pgwire::api::auth::{AuthSource, LoginInfo, Password};
use pgwire::error::PgWireResult;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Role {
    Customer,
    Admin,
}

/// The resolved identity every engine call runs as.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Actor {
    pub id: String,
    pub name: String,
    pub role: Role,
}

impl Actor {
    /// Background tasks and recovery act as this.
    pub fn system() -> Self {
        Self {
            id: "system".into(),
            name: "system".into(),
            role: Role::Admin,
        }
    }

    pub fn is_admin(&self) -> bool {
        self.role == Role::Admin
    }
}

/// Login names that get the admin role.
#[derive(Debug, Clone, Default)]
pub struct AdminList(HashSet<String>);

impl AdminList {
    /// Comma separated, whitespace ignored.
    pub fn parse(list: &str) -> Self {
        Self(
            list.split(',')
                .map(str::trim)
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect(),
        )
    }

    /// Map a login name to an actor.
    pub fn resolve(&self, user: &str) -> Actor {
        let role = if self.0.contains(user) {
            Role::Admin
        } else {
            Role::Customer
        };
        Actor {
            id: user.to_string(),
            name: user.to_string(),
            role,
        }
    }
}

/// Cleartext password check against the one shared secret.
#[derive(Debug)]
pub struct SharedPasswordAuth {
    password: String,
}

impl SharedPasswordAuth {
    pub fn new(password: String) -> Self {
        Self { password }
    }
}

#[async_trait]
impl AuthSource for SharedPasswordAuth {
    async fn get_password(&self, _login: &LoginInfo) -> PgWireResult<Password> {
        Ok(Password::new(None, self.password.as_bytes().to_vec()))
    }
}
