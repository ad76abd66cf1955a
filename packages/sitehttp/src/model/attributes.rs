//! Attribute store attached to a site configuration
//!
//! Derived artifacts that are expensive to build (the TLS socket factory) or
//! must be shared across every client of a site (the cookie store) are
//! memoized here. The typed slots converge concurrent initializers on a single
//! instance, which is what lets the socket factory act as an identity key.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use arc_swap::ArcSwapOption;
use dashmap::DashMap;
use once_cell::sync::OnceCell;

use crate::client::{ClientContext, CookieStore};
use crate::tls::SslSocketFactory;

type AnyAttribute = Arc<dyn Any + Send + Sync>;

/// Memoization slots and free-form attributes for one site
#[derive(Default)]
pub struct SiteAttributes {
    ssl_factory: OnceCell<Arc<SslSocketFactory>>,
    cookie_store: OnceCell<Arc<CookieStore>>,
    context_prototype: ArcSwapOption<ClientContext>,
    values: DashMap<String, AnyAttribute>,
}

impl SiteAttributes {
    /// The memoized socket factory, if one was built
    #[must_use]
    pub fn ssl_factory(&self) -> Option<Arc<SslSocketFactory>> {
        self.ssl_factory.get().cloned()
    }

    /// Store `factory` unless another thread got there first; returns the
    /// instance every caller will observe from now on
    pub fn memoize_ssl_factory(&self, factory: Arc<SslSocketFactory>) -> Arc<SslSocketFactory> {
        self.ssl_factory.get_or_init(|| factory).clone()
    }

    /// The site cookie store, created on first use
    pub fn cookie_store(&self) -> Arc<CookieStore> {
        self.cookie_store
            .get_or_init(|| {
                tracing::debug!("Creating cookie store");
                Arc::new(CookieStore::new())
            })
            .clone()
    }

    /// Context used as the starting point for every context created for this site
    #[must_use]
    pub fn context_prototype(&self) -> Option<Arc<ClientContext>> {
        self.context_prototype.load_full()
    }

    /// Replace (or clear) the context prototype
    pub fn set_context_prototype(&self, prototype: Option<ClientContext>) {
        self.context_prototype.store(prototype.map(Arc::new));
    }

    /// Look up a free-form attribute by name and type
    #[must_use]
    pub fn get<T: Any + Send + Sync>(&self, name: &str) -> Option<Arc<T>> {
        let value = self.values.get(name)?.value().clone();
        value.downcast::<T>().ok()
    }

    /// Set a free-form attribute, returning the previous value if any
    pub fn set<T: Any + Send + Sync>(&self, name: impl Into<String>, value: T) -> Option<AnyAttribute> {
        self.values.insert(name.into(), Arc::new(value))
    }

    /// Remove a free-form attribute
    pub fn remove(&self, name: &str) -> Option<AnyAttribute> {
        self.values.remove(name).map(|(_, v)| v)
    }
}

impl fmt::Debug for SiteAttributes {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SiteAttributes")
            .field("ssl_factory", &self.ssl_factory.get().is_some())
            .field("cookie_store", &self.cookie_store.get().is_some())
            .field("context_prototype", &self.context_prototype.load().is_some())
            .field("values", &self.values.len())
            .finish()
    }
}
