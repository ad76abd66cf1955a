//! Passwords, credentials and the authenticator hooks

pub mod authenticator;
pub mod credentials;
pub mod password;

pub use authenticator::{BasicAuthenticator, ClientAuthenticator};
pub use credentials::{AuthScope, BasicCredentialsProvider, Credentials, CredentialsProvider};
pub use password::{MemoryPasswordManager, PasswordKey, PasswordManager, PasswordType};
