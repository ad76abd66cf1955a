//! Client identity selection
//!
//! A site carries at most one client identity, loaded under a fixed alias, so
//! choosing which key to present is a constant rather than a search.

use std::collections::BTreeMap;
use std::sync::Arc;

use rustls::client::ResolvesClientCert;
use rustls::sign::CertifiedKey;
use rustls::SignatureScheme;

/// Always selects the private key stored under [`FixedAliasKeyStrategy::ALIAS`]
#[derive(Debug, Clone, Copy, Default)]
pub struct FixedAliasKeyStrategy;

impl FixedAliasKeyStrategy {
    /// Alias under which a site's client key is stored
    pub const ALIAS: &'static str = "key";

    /// Pick the alias to present; `available` is only used for tracing
    pub fn choose_alias<'a>(&self, available: impl IntoIterator<Item = &'a str>) -> &'static str {
        if tracing::enabled!(tracing::Level::TRACE) {
            let aliases: Vec<&str> = available.into_iter().collect();
            tracing::trace!(
                "Returning fixed alias '{}' for client key selection; available aliases: {:?}",
                Self::ALIAS,
                aliases
            );
        }
        Self::ALIAS
    }
}

/// rustls client certificate resolver driven by a [`FixedAliasKeyStrategy`]
#[derive(Debug)]
pub(crate) struct FixedAliasCertResolver {
    strategy: FixedAliasKeyStrategy,
    keys: BTreeMap<String, Arc<CertifiedKey>>,
}

impl FixedAliasCertResolver {
    pub(crate) fn new(strategy: FixedAliasKeyStrategy, keys: BTreeMap<String, Arc<CertifiedKey>>) -> Self {
        Self { strategy, keys }
    }
}

impl ResolvesClientCert for FixedAliasCertResolver {
    fn resolve(
        &self,
        _root_hint_subjects: &[&[u8]],
        _sigschemes: &[SignatureScheme],
    ) -> Option<Arc<CertifiedKey>> {
        let alias = self.strategy.choose_alias(self.keys.keys().map(String::as_str));
        let key = self.keys.get(alias).cloned();
        if key.is_none() {
            tracing::warn!("Server requested a client certificate but no key is stored under '{alias}'");
        }
        key
    }

    fn has_certs(&self) -> bool {
        !self.keys.is_empty()
    }
}
