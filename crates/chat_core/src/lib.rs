use anyhow::Result;
use async_trait::async_trait;
use shared::domain::ChatIdentity;

pub mod bootstrap;
pub mod events;
pub mod homeserver;
pub mod session;
pub mod typing;

pub use bootstrap::{BootstrapError, IdentityBootstrapper};
pub use homeserver::{ChatApi, Homeserver, HomeserverError, HttpHomeserver, MatrixClient};
pub use session::{ChatSession, SessionOptions, VerifiedMessage};

/// Durable chat credentials keyed by blockchain account address.
#[async_trait]
pub trait CredentialStore: Send + Sync {
    async fn load_identity(&self, account: &str) -> Result<Option<ChatIdentity>>;
    /// Full replacement of whatever was stored for `account`.
    async fn save_identity(&self, account: &str, identity: &ChatIdentity) -> Result<()>;
}
