//! Client runtime: builder, pooled client and per-session context

pub mod builder;
pub mod config;
pub mod context;
pub mod pooled;

pub use builder::ClientBuilder;
pub use config::{Header, RequestConfig, RequestHead};
pub use context::{ClientContext, Cookie, CookieStore};
pub use pooled::{HttpClient, PooledHttpClient};
