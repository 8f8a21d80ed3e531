//! Turns a blockchain account into durable chat credentials.
//!
//! The password is derived from a signature, so the same account always
//! arrives at the same credentials and can log back in after losing its
//! stored token. Usernames are tried as `<address>`, then `<address>.2`
//! through `<address>.5`.

use shared::{domain::ChatIdentity, protocol::AuthResponse};
use signer::{format_address, Signer, SignerError};
use thiserror::Error;
use tracing::{info, warn};

use crate::{
    homeserver::{ChatApi, Homeserver},
    CredentialStore,
};

pub const MAX_ATTEMPTS: u32 = 5;
pub const PASSWORD_LEN: usize = 16;
const PASSWORD_SEED: &str = "password";

#[derive(Debug, Error)]
pub enum BootstrapError {
    #[error("Could not register or login after {attempts} attempts")]
    Exhausted { attempts: u32 },
    #[error("failed to derive chat password: {0}")]
    Signer(#[from] SignerError),
    #[error("credential store failure: {0:#}")]
    Store(anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BootstrapState {
    NoCredentials,
    TryUsername { attempt: u32 },
    Bootstrapped(ChatIdentity),
    Ready(ChatIdentity),
    Failed { attempts: u32 },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AttemptResult {
    PasswordDerived,
    Authenticated(ChatIdentity),
    Rejected,
    Persisted,
}

impl BootstrapState {
    fn try_username(attempt: u32) -> Self {
        if attempt >= MAX_ATTEMPTS {
            BootstrapState::Failed { attempts: attempt }
        } else {
            BootstrapState::TryUsername { attempt }
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, BootstrapState::Ready(_) | BootstrapState::Failed { .. })
    }
}

/// Pure transition function; pairs that do not apply leave the state unchanged.
pub fn transition(state: BootstrapState, result: AttemptResult) -> BootstrapState {
    match (state, result) {
        (BootstrapState::NoCredentials, AttemptResult::PasswordDerived) => {
            BootstrapState::try_username(0)
        }
        (BootstrapState::TryUsername { .. }, AttemptResult::Authenticated(identity)) => {
            BootstrapState::Bootstrapped(identity)
        }
        (BootstrapState::TryUsername { attempt }, AttemptResult::Rejected) => {
            BootstrapState::try_username(attempt + 1)
        }
        (BootstrapState::Bootstrapped(identity), AttemptResult::Persisted) => {
            BootstrapState::Ready(identity)
        }
        (state, _) => state,
    }
}

pub fn candidate_username(address: &str, attempt: u32) -> String {
    let base = address.to_lowercase();
    if attempt == 0 {
        base
    } else {
        format!("{base}.{}", attempt + 1)
    }
}

/// Last characters of `sign("password")`; stable for a fixed account key.
pub async fn derive_password(signer: &dyn Signer) -> Result<String, SignerError> {
    let signature = signer.sign(PASSWORD_SEED).await?;
    let start = signature.len().saturating_sub(PASSWORD_LEN);
    Ok(signature[start..].to_string())
}

pub fn account_key(signer: &dyn Signer) -> String {
    format_address(&signer.address())
}

pub struct IdentityBootstrapper<'a> {
    homeserver: &'a dyn Homeserver,
    store: &'a dyn CredentialStore,
    signer: &'a dyn Signer,
}

impl<'a> IdentityBootstrapper<'a> {
    pub fn new(
        homeserver: &'a dyn Homeserver,
        store: &'a dyn CredentialStore,
        signer: &'a dyn Signer,
    ) -> Self {
        Self {
            homeserver,
            store,
            signer,
        }
    }

    /// Stored credentials win; otherwise registers or logs in and persists the result.
    pub async fn bootstrap(&self) -> Result<ChatIdentity, BootstrapError> {
        let account = account_key(self.signer);
        if let Some(identity) = self
            .store
            .load_identity(&account)
            .await
            .map_err(BootstrapError::Store)?
        {
            info!(%account, user_id = %identity.user_id, "using stored chat credentials");
            return Ok(identity);
        }

        let mut password = String::new();
        let mut state = BootstrapState::NoCredentials;
        loop {
            let result = match &state {
                BootstrapState::NoCredentials => {
                    password = derive_password(self.signer).await?;
                    AttemptResult::PasswordDerived
                }
                BootstrapState::TryUsername { attempt } => {
                    let username = candidate_username(&account, *attempt);
                    self.attempt(&username, &password).await
                }
                BootstrapState::Bootstrapped(identity) => {
                    self.store
                        .save_identity(&account, identity)
                        .await
                        .map_err(BootstrapError::Store)?;
                    AttemptResult::Persisted
                }
                BootstrapState::Ready(identity) => return Ok(identity.clone()),
                BootstrapState::Failed { attempts } => {
                    return Err(BootstrapError::Exhausted {
                        attempts: *attempts,
                    })
                }
            };
            state = transition(state, result);
        }
    }

    async fn attempt(&self, username: &str, password: &str) -> AttemptResult {
        let available = self
            .homeserver
            .username_available(username)
            .await
            .unwrap_or(false);

        let response = if available {
            info!(%username, "REGISTER");
            self.homeserver.register(username, password).await
        } else {
            info!(%username, "LOGIN");
            self.homeserver.login(username, password).await
        };

        match response {
            Ok(response) => match self.identity_from(response) {
                Some(identity) => {
                    info!(%username, user_id = %identity.user_id, "chat identity established");
                    AttemptResult::Authenticated(identity)
                }
                None => {
                    warn!(%username, "homeserver response did not include an access token");
                    AttemptResult::Rejected
                }
            },
            Err(err) => {
                warn!(%username, %err, "error trying chat username");
                AttemptResult::Rejected
            }
        }
    }

    fn identity_from(&self, response: AuthResponse) -> Option<ChatIdentity> {
        let access_token = response.access_token.filter(|t| !t.is_empty())?;
        let user_id = response.user_id?;
        Some(ChatIdentity {
            user_id,
            access_token,
            home_server: self.homeserver.base_url().to_string(),
        })
    }
}

/// Sets the profile display name to `sign(user_id)`, binding the chat identity to the account.
pub async fn attest_display_name(
    api: &dyn ChatApi,
    signer: &dyn Signer,
) -> anyhow::Result<String> {
    let attestation = signer.sign(api.user_id().as_str()).await?;
    api.set_display_name(&attestation).await?;
    Ok(attestation)
}

#[cfg(test)]
#[path = "tests/bootstrap_tests.rs"]
mod tests;
