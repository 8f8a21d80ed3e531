use super::*;
use std::{collections::HashMap, sync::Mutex};

use async_trait::async_trait;
use shared::domain::MatrixUserId;
use signer::WalletSigner;

use crate::homeserver::HomeserverError;

const TEST_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";
const BASE_URL: &str = "https://matrix.example.org";

#[derive(Debug, Clone, PartialEq, Eq)]
enum Call {
    Available(String),
    Register(String, String),
    Login(String, String),
}

#[derive(Default)]
struct FakeHomeserver {
    available: HashMap<String, bool>,
    availability_fails: bool,
    accept_login_for: Option<String>,
    omit_token: bool,
    calls: Mutex<Vec<Call>>,
}

impl FakeHomeserver {
    fn calls(&self) -> Vec<Call> {
        self.calls.lock().expect("calls").clone()
    }

    fn auth_for(&self, username: &str) -> AuthResponse {
        AuthResponse {
            user_id: Some(MatrixUserId::new(format!("@{username}:example.org"))),
            access_token: (!self.omit_token).then(|| format!("token-{username}")),
            home_server: Some("example.org".into()),
            device_id: None,
        }
    }
}

#[async_trait]
impl Homeserver for FakeHomeserver {
    fn base_url(&self) -> &str {
        BASE_URL
    }

    async fn username_available(&self, username: &str) -> Result<bool, HomeserverError> {
        self.calls
            .lock()
            .expect("calls")
            .push(Call::Available(username.into()));
        if self.availability_fails {
            return Err(HomeserverError::Transport("connection reset".into()));
        }
        Ok(self.available.get(username).copied().unwrap_or(false))
    }

    async fn register(
        &self,
        username: &str,
        password: &str,
    ) -> Result<AuthResponse, HomeserverError> {
        self.calls
            .lock()
            .expect("calls")
            .push(Call::Register(username.into(), password.into()));
        Ok(self.auth_for(username))
    }

    async fn login(&self, username: &str, password: &str) -> Result<AuthResponse, HomeserverError> {
        self.calls
            .lock()
            .expect("calls")
            .push(Call::Login(username.into(), password.into()));
        if self.accept_login_for.as_deref() == Some(username) {
            return Ok(self.auth_for(username));
        }
        Err(HomeserverError::Http {
            status: 403,
            errcode: "M_FORBIDDEN".into(),
            message: "Invalid password".into(),
        })
    }
}

#[derive(Default)]
struct MemoryStore {
    identities: Mutex<HashMap<String, ChatIdentity>>,
    loads: Mutex<u32>,
}

#[async_trait]
impl CredentialStore for MemoryStore {
    async fn load_identity(&self, account: &str) -> anyhow::Result<Option<ChatIdentity>> {
        *self.loads.lock().expect("loads") += 1;
        Ok(self.identities.lock().expect("identities").get(account).cloned())
    }

    async fn save_identity(&self, account: &str, identity: &ChatIdentity) -> anyhow::Result<()> {
        self.identities
            .lock()
            .expect("identities")
            .insert(account.to_string(), identity.clone());
        Ok(())
    }
}

fn signer() -> WalletSigner {
    WalletSigner::from_private_key(TEST_KEY).expect("wallet")
}

fn lower_address(signer: &WalletSigner) -> String {
    account_key(signer).to_lowercase()
}

#[tokio::test]
async fn derived_password_is_stable_sixteen_char_suffix() {
    let signer = signer();
    let first = derive_password(&signer).await.expect("password");
    let second = derive_password(&signer).await.expect("password");
    assert_eq!(first, second);
    assert_eq!(first.len(), PASSWORD_LEN);

    let signature = signer.sign("password").await.expect("sign");
    assert!(signature.ends_with(&first));
}

#[test]
fn candidate_usernames_skip_the_first_suffix() {
    let address = "0xAbC0000000000000000000000000000000000001";
    let names: Vec<String> = (0..MAX_ATTEMPTS)
        .map(|attempt| candidate_username(address, attempt))
        .collect();
    assert_eq!(
        names,
        vec![
            "0xabc0000000000000000000000000000000000001",
            "0xabc0000000000000000000000000000000000001.2",
            "0xabc0000000000000000000000000000000000001.3",
            "0xabc0000000000000000000000000000000000001.4",
            "0xabc0000000000000000000000000000000000001.5",
        ]
    );
}

#[test]
fn transition_walks_the_happy_path() {
    let identity = ChatIdentity {
        user_id: MatrixUserId::new("@a:example.org"),
        access_token: "t".into(),
        home_server: BASE_URL.into(),
    };

    let state = transition(BootstrapState::NoCredentials, AttemptResult::PasswordDerived);
    assert_eq!(state, BootstrapState::TryUsername { attempt: 0 });

    let state = transition(state, AttemptResult::Rejected);
    assert_eq!(state, BootstrapState::TryUsername { attempt: 1 });

    let state = transition(state, AttemptResult::Authenticated(identity.clone()));
    assert_eq!(state, BootstrapState::Bootstrapped(identity.clone()));

    let state = transition(state, AttemptResult::Persisted);
    assert_eq!(state, BootstrapState::Ready(identity));
    assert!(state.is_terminal());
}

#[test]
fn fifth_rejection_is_terminal() {
    let state = transition(
        BootstrapState::TryUsername {
            attempt: MAX_ATTEMPTS - 1,
        },
        AttemptResult::Rejected,
    );
    assert_eq!(
        state,
        BootstrapState::Failed {
            attempts: MAX_ATTEMPTS
        }
    );
    assert!(state.is_terminal());

    let unchanged = transition(state.clone(), AttemptResult::Rejected);
    assert_eq!(unchanged, state);
}

#[test]
fn unrelated_results_leave_state_alone() {
    let state = transition(BootstrapState::NoCredentials, AttemptResult::Persisted);
    assert_eq!(state, BootstrapState::NoCredentials);
    assert!(!state.is_terminal());
}

#[tokio::test]
async fn stored_identity_skips_the_homeserver() {
    let signer = signer();
    let stored = ChatIdentity {
        user_id: MatrixUserId::new("@stored:example.org"),
        access_token: "stored-token".into(),
        home_server: BASE_URL.into(),
    };
    let store = MemoryStore::default();
    store
        .save_identity(&account_key(&signer), &stored)
        .await
        .expect("seed");
    let homeserver = FakeHomeserver::default();

    let identity = IdentityBootstrapper::new(&homeserver, &store, &signer)
        .bootstrap()
        .await
        .expect("bootstrap");

    assert_eq!(identity, stored);
    assert!(homeserver.calls().is_empty());
}

#[tokio::test]
async fn available_username_is_registered_and_persisted() {
    let signer = signer();
    let username = lower_address(&signer);
    let homeserver = FakeHomeserver {
        available: HashMap::from([(username.clone(), true)]),
        ..Default::default()
    };
    let store = MemoryStore::default();

    let identity = IdentityBootstrapper::new(&homeserver, &store, &signer)
        .bootstrap()
        .await
        .expect("bootstrap");

    let password = derive_password(&signer).await.expect("password");
    assert_eq!(
        homeserver.calls(),
        vec![
            Call::Available(username.clone()),
            Call::Register(username.clone(), password),
        ]
    );
    assert_eq!(identity.user_id.as_str(), format!("@{username}:example.org"));
    assert_eq!(identity.home_server, BASE_URL);

    let saved = store
        .load_identity(&account_key(&signer))
        .await
        .expect("load");
    assert_eq!(saved, Some(identity));
}

#[tokio::test]
async fn taken_username_falls_back_to_login() {
    let signer = signer();
    let username = lower_address(&signer);
    let homeserver = FakeHomeserver {
        accept_login_for: Some(username.clone()),
        ..Default::default()
    };
    let store = MemoryStore::default();

    let identity = IdentityBootstrapper::new(&homeserver, &store, &signer)
        .bootstrap()
        .await
        .expect("bootstrap");

    assert_eq!(identity.access_token, format!("token-{username}"));
    assert!(matches!(homeserver.calls()[1], Call::Login(ref name, _) if *name == username));
}

#[tokio::test]
async fn rejected_login_moves_to_the_next_suffix() {
    let signer = signer();
    let username = lower_address(&signer);
    let third = format!("{username}.3");
    let homeserver = FakeHomeserver {
        available: HashMap::from([(third.clone(), true)]),
        ..Default::default()
    };
    let store = MemoryStore::default();

    let identity = IdentityBootstrapper::new(&homeserver, &store, &signer)
        .bootstrap()
        .await
        .expect("bootstrap");

    assert_eq!(identity.user_id.as_str(), format!("@{third}:example.org"));
    let tried: Vec<String> = homeserver
        .calls()
        .into_iter()
        .filter_map(|call| match call {
            Call::Available(name) => Some(name),
            _ => None,
        })
        .collect();
    assert_eq!(tried, vec![username.clone(), format!("{username}.2"), third]);
}

#[tokio::test]
async fn five_rejections_exhaust_without_a_sixth_try() {
    let signer = signer();
    let homeserver = FakeHomeserver::default();
    let store = MemoryStore::default();

    let err = IdentityBootstrapper::new(&homeserver, &store, &signer)
        .bootstrap()
        .await
        .expect_err("should fail");

    assert!(matches!(err, BootstrapError::Exhausted { attempts: 5 }));
    assert_eq!(
        err.to_string(),
        "Could not register or login after 5 attempts"
    );
    let logins = homeserver
        .calls()
        .iter()
        .filter(|call| matches!(call, Call::Login(..)))
        .count();
    assert_eq!(logins, 5);
    assert!(store
        .load_identity(&account_key(&signer))
        .await
        .expect("load")
        .is_none());
}

#[tokio::test]
async fn availability_error_means_login() {
    let signer = signer();
    let username = lower_address(&signer);
    let homeserver = FakeHomeserver {
        availability_fails: true,
        accept_login_for: Some(username.clone()),
        ..Default::default()
    };
    let store = MemoryStore::default();

    IdentityBootstrapper::new(&homeserver, &store, &signer)
        .bootstrap()
        .await
        .expect("bootstrap");

    assert!(!homeserver
        .calls()
        .iter()
        .any(|call| matches!(call, Call::Register(..))));
}

#[tokio::test]
async fn response_without_token_counts_as_rejected() {
    let signer = signer();
    let username = lower_address(&signer);
    let homeserver = FakeHomeserver {
        available: HashMap::from([(username, true)]),
        omit_token: true,
        ..Default::default()
    };
    let store = MemoryStore::default();

    let err = IdentityBootstrapper::new(&homeserver, &store, &signer)
        .bootstrap()
        .await
        .expect_err("should fail");
    assert!(matches!(err, BootstrapError::Exhausted { .. }));
    assert_eq!(*store.loads.lock().expect("loads"), 1);
}
