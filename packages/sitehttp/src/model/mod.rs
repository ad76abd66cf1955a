//! Site model consumed by the factory, the pool cache and the TLS pipeline

pub mod attributes;
pub mod site_config;
pub mod trust_type;

pub use attributes::SiteAttributes;
pub use site_config::{
    SiteConfig, SiteConfigBuilder, DEFAULT_CONNECTION_POOL_TIMEOUT_SECONDS,
    DEFAULT_MAX_CONNECTIONS, DEFAULT_REQUEST_TIMEOUT_SECONDS,
};
pub use trust_type::SiteTrustType;
