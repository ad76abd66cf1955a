//! Hooks that install credentials on clients and contexts

use std::fmt;
use std::sync::Arc;

use sitehttp_common::{LoggingTransformer, Result};
use zeroize::Zeroizing;

use crate::client::{ClientBuilder, ClientContext};
use crate::model::SiteConfig;

use super::credentials::{AuthScope, Credentials};
use super::password::{PasswordKey, PasswordManager, PasswordType};

/// Decorates clients and contexts with authentication
pub trait ClientAuthenticator: Send + Sync + fmt::Debug {
    /// Adjust a client builder before the client is built
    ///
    /// # Errors
    ///
    /// Implementation specific; the client is not created.
    fn decorate_client_builder(&self, builder: ClientBuilder) -> Result<ClientBuilder> {
        Ok(builder)
    }

    /// Install credentials for `scope` on a context created for `site`
    ///
    /// `password_type` tells site authentication ([`PasswordType::User`]) from
    /// proxy authentication ([`PasswordType::Proxy`]).
    ///
    /// # Errors
    ///
    /// Implementation specific; the context is not created.
    fn decorate_prototype_context(
        &self,
        scope: &AuthScope,
        site: &SiteConfig,
        password_type: PasswordType,
        context: ClientContext,
    ) -> Result<ClientContext>;
}

/// Preemptive HTTP Basic authentication with passwords from a [`PasswordManager`]
#[derive(Debug, Clone)]
pub struct BasicAuthenticator {
    passwords: Arc<dyn PasswordManager>,
}

impl BasicAuthenticator {
    /// Authenticator looking passwords up in `passwords`
    #[must_use]
    pub fn new(passwords: Arc<dyn PasswordManager>) -> Self {
        Self { passwords }
    }
}

impl ClientAuthenticator for BasicAuthenticator {
    fn decorate_prototype_context(
        &self,
        scope: &AuthScope,
        site: &SiteConfig,
        password_type: PasswordType,
        mut context: ClientContext,
    ) -> Result<ClientContext> {
        let user = match password_type {
            PasswordType::User => site.user(),
            PasswordType::Proxy => site.proxy_user(),
            PasswordType::Key => None,
        };
        let event = format!("{password_type:?} credentials for {scope} (site {})", site.id());
        let Some(user) = user else {
            LoggingTransformer::log_auth_event(&event, None, false);
            return Ok(context);
        };

        let password = self
            .passwords
            .lookup(&PasswordKey::for_site(site, password_type))
            .unwrap_or_else(|| {
                tracing::warn!("No {:?} password bound for site {}", password_type, site.id());
                Zeroizing::new(String::new())
            });

        context
            .credentials_mut()
            .set_credentials(scope.clone(), Credentials::new(user, password));
        context.enable_preemptive_auth(scope.clone());
        LoggingTransformer::log_auth_event(&event, Some(user), true);
        Ok(context)
    }
}
