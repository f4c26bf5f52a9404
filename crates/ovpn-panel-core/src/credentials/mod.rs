//! Flat-file credential store.
//!
//! Maps username to [`UserRecord`], persisted as pretty JSON with
//! owner-only permissions. Reads fail soft (an unreadable file is an empty
//! store); writes go through a temp file in the same directory and are
//! renamed into place, so a crash mid-write leaves the previous content.
//!
//! There is no locking: two concurrent writers can lose an update.

pub mod password;

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::fs_util::write_private;

/// Username of the account created on first start.
pub const BOOTSTRAP_ADMIN: &str = "admin";

/// Account role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    Admin,
    User,
}

/// A stored account.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// argon2id PHC string (salt included).
    pub password_hash: String,
    pub created: DateTime<Utc>,
    pub role: Role,
}

/// Username to record mapping, ordered for stable output.
pub type UserMap = BTreeMap<String, UserRecord>;

/// Handle to the credential file.
#[derive(Debug, Clone)]
pub struct CredentialStore {
    path: PathBuf,
}

impl CredentialStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load all records. Missing or unreadable files yield an empty map.
    pub fn load(&self) -> UserMap {
        let data = match std::fs::read_to_string(&self.path) {
            Ok(data) => data,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return UserMap::new(),
            Err(e) => {
                warn!(path = %self.path.display(), error = %e, "credential store unreadable");
                return UserMap::new();
            }
        };
        serde_json::from_str(&data).unwrap_or_else(|e| {
            warn!(path = %self.path.display(), error = %e, "credential store corrupt");
            UserMap::new()
        })
    }

    /// Persist all records, replacing the file atomically.
    pub fn save(&self, users: &UserMap) -> Result<()> {
        let json = serde_json::to_string_pretty(users)?;
        write_private(&self.path, json.as_bytes())?;
        Ok(())
    }

    /// Check `password` against the stored hash for `username`.
    pub fn verify(&self, username: &str, password: &str) -> bool {
        let users = self.load();
        let Some(record) = users.get(username) else {
            return false;
        };
        match password::verify_password(password, &record.password_hash) {
            Ok(valid) => valid,
            Err(e) => {
                warn!(username, error = %e, "stored password hash is unusable");
                false
            }
        }
    }

    pub fn role_of(&self, username: &str) -> Option<Role> {
        self.load().get(username).map(|r| r.role)
    }

    pub fn is_admin(&self, username: &str) -> bool {
        self.role_of(username) == Some(Role::Admin)
    }

    /// Create the default admin if the store is empty.
    ///
    /// Returns the generated plaintext password when an account was created.
    /// The caller is responsible for showing it once; it is never stored.
    pub fn bootstrap(&self) -> Result<Option<String>> {
        let mut users = self.load();
        if !users.is_empty() {
            return Ok(None);
        }

        let plaintext = password::generate_password();
        users.insert(
            BOOTSTRAP_ADMIN.to_string(),
            UserRecord {
                password_hash: password::hash_password(&plaintext)?,
                created: Utc::now(),
                role: Role::Admin,
            },
        );
        self.save(&users)?;
        info!(path = %self.path.display(), "created default admin account");
        Ok(Some(plaintext))
    }

    /// Change the password of `username` after checking the old one.
    pub fn change_password(
        &self,
        username: &str,
        old_password: &str,
        new_password: &str,
        confirm_password: &str,
    ) -> Result<()> {
        if old_password.is_empty() || new_password.is_empty() || confirm_password.is_empty() {
            return Err(Error::validation("All fields are required"));
        }
        if new_password != confirm_password {
            return Err(Error::validation("Passwords do not match"));
        }

        let mut users = self.load();
        let record = users
            .get_mut(username)
            .ok_or_else(|| Error::not_found(format!("User {username} not found")))?;
        if !password::verify_password(old_password, &record.password_hash).unwrap_or(false) {
            return Err(Error::validation("Old password is incorrect"));
        }

        record.password_hash = password::hash_password(new_password)?;
        self.save(&users)?;
        info!(username, "password changed");
        Ok(())
    }

    /// Add a new account. Existing accounts are never overwritten.
    pub fn add_user(&self, username: &str, password: &str, role: Role) -> Result<()> {
        let username = username.trim();
        let password = password.trim();
        if username.is_empty() || password.is_empty() {
            return Err(Error::validation("Username and password are required"));
        }

        let mut users = self.load();
        if users.contains_key(username) {
            return Err(Error::validation("User already exists"));
        }
        users.insert(
            username.to_string(),
            UserRecord {
                password_hash: password::hash_password(password)?,
                created: Utc::now(),
                role,
            },
        );
        self.save(&users)?;
        info!(username, ?role, "user added");
        Ok(())
    }
}
