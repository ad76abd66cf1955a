//! Per-site server trust policy

use serde::{Deserialize, Serialize};
use std::fmt;

/// How the server certificate chain presented by a site is trusted
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SiteTrustType {
    /// Standard chain validation against the site trust store
    #[default]
    Default,
    /// Single-certificate chains are accepted as presented; longer chains
    /// fall back to standard validation
    TrustSelfSigned,
}

impl SiteTrustType {
    /// Whether a chain consisting only of the end-entity certificate is trusted
    /// without consulting the trust store
    #[must_use]
    pub fn trusts_single_certificate_chains(self) -> bool {
        matches!(self, Self::TrustSelfSigned)
    }
}

impl fmt::Display for SiteTrustType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Default => f.write_str("DEFAULT"),
            Self::TrustSelfSigned => f.write_str("TRUST_SELF_SIGNED"),
        }
    }
}
