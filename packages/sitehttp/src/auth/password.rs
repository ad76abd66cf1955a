//! Password lookup keyed by site and purpose

use std::fmt;

use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

use crate::model::SiteConfig;

/// What a password is used for
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PasswordType {
    /// Decrypts the site's client private key
    Key,
    /// Site user authentication
    User,
    /// Proxy user authentication
    Proxy,
}

/// Lookup key for a password: site id plus purpose
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct PasswordKey {
    site_id: String,
    password_type: PasswordType,
}

impl PasswordKey {
    /// Key for `site_id` and `password_type`
    pub fn new(site_id: impl Into<String>, password_type: PasswordType) -> Self {
        Self {
            site_id: site_id.into(),
            password_type,
        }
    }

    /// Key for a site configuration
    #[must_use]
    pub fn for_site(site: &SiteConfig, password_type: PasswordType) -> Self {
        Self::new(site.id(), password_type)
    }

    /// Site id
    #[must_use]
    pub fn site_id(&self) -> &str {
        &self.site_id
    }

    /// Purpose
    #[must_use]
    pub fn password_type(&self) -> PasswordType {
        self.password_type
    }
}

/// Source of site passwords
pub trait PasswordManager: Send + Sync + fmt::Debug {
    /// Password for `key`, if one is known
    fn lookup(&self, key: &PasswordKey) -> Option<Zeroizing<String>>;
}

/// Thread-safe in-memory password manager
#[derive(Default)]
pub struct MemoryPasswordManager {
    passwords: DashMap<PasswordKey, Zeroizing<String>>,
}

impl MemoryPasswordManager {
    /// Empty manager
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Bind a password, replacing any previous one
    pub fn bind(&self, key: PasswordKey, password: impl Into<String>) {
        self.passwords.insert(key, Zeroizing::new(password.into()));
    }

    /// Remove a password; returns whether one was bound
    pub fn unbind(&self, key: &PasswordKey) -> bool {
        self.passwords.remove(key).is_some()
    }

    /// Number of bound passwords
    #[must_use]
    pub fn len(&self) -> usize {
        self.passwords.len()
    }

    /// Whether no password is bound
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.passwords.is_empty()
    }
}

impl PasswordManager for MemoryPasswordManager {
    fn lookup(&self, key: &PasswordKey) -> Option<Zeroizing<String>> {
        self.passwords.get(key).map(|p| p.value().clone())
    }
}

impl fmt::Debug for MemoryPasswordManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MemoryPasswordManager")
            .field("bound", &self.passwords.len())
            .finish()
    }
}
