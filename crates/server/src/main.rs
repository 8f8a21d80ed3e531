use std::{io, net::SocketAddr, path::PathBuf, sync::Arc};

use anyhow::Context;
use chat_core::{
    bootstrap::attest_display_name, ChatSession, HttpHomeserver, IdentityBootstrapper,
    SessionOptions, VerifiedMessage,
};
use clap::Parser;
use shared::domain::{ChatIdentity, MatrixUserId, RoomAlias};
use signer::{format_address, EthNode, Signer};
use storage::Storage;
use tokio::sync::broadcast::{self, error::RecvError};
use tracing::{error, info, warn};
use tracing_subscriber::EnvFilter;

mod api;
mod config;
mod startup;

use crate::api::{build_router, AppState};
use crate::config::{load_settings, Settings};
use crate::startup::{resolve_password, select_account, unlock_account};

const DEFAULT_LOG_FILTER: &str = "info,hyper=warn,reqwest=warn";

#[derive(Parser, Debug)]
#[command(about = "Relays signed payloads from an Ethereum account into Matrix rooms")]
struct Cli {
    /// TOML configuration file; defaults to ./relay.toml when present.
    #[arg(long)]
    config: Option<PathBuf>,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_LOG_FILTER));
    tracing_subscriber::fmt().with_env_filter(filter).init();

    let cli = Cli::parse();
    let settings = load_settings(cli.config.as_deref())?;
    run(settings).await.map_err(|err| {
        error!("{err:#}");
        err
    })
}

async fn run(settings: Settings) -> anyhow::Result<()> {
    let node = EthNode::connect(&settings.eth.endpoint)?;
    let accounts = node
        .accounts()
        .await
        .with_context(|| format!("failed to list accounts at {}", settings.eth.endpoint))?;

    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut output = io::stdout();
    let account = select_account(
        &accounts,
        settings.eth.account.as_deref(),
        &mut input,
        &mut output,
    )?;
    drop(input);
    let password = resolve_password(&settings.eth.password_source(), |prompt| {
        rpassword::prompt_password(prompt)
    })?;
    info!(account = %format_address(&account), "using account");
    unlock_account(&node, account, password.as_deref()).await;
    let signer = Arc::new(node.signer_for(account));

    let storage = Storage::new(&settings.storage.database_url)
        .await
        .map_err(|error| {
            error!(
                database_url = %settings.storage.database_url,
                %error,
                "failed to open SQLite database; verify parent directory exists and permissions are correct"
            );
            error
        })?;
    import_seeded_identities(&storage, &settings).await?;

    let homeserver = HttpHomeserver::new(&settings.matrix.server)?;
    let identity = IdentityBootstrapper::new(&homeserver, &storage, signer.as_ref())
        .bootstrap()
        .await?;
    info!(user_id = %identity.user_id, "logged in");

    let client = homeserver.authenticated(&identity);
    if let Err(err) = attest_display_name(&client, signer.as_ref()).await {
        warn!(err = %format!("{err:#}"), "failed to publish display name");
    }

    let session = ChatSession::new(Arc::new(client), identity, SessionOptions::default());
    let rooms: Vec<RoomAlias> = settings
        .matrix
        .rooms
        .iter()
        .map(|alias| RoomAlias::new(alias.as_str()))
        .collect();
    let reporter = tokio::spawn(report_verified(session.subscribe_verified()));
    session.start(&rooms).await?;

    let state = AppState {
        signer: signer.clone(),
        session: session.clone(),
        chain: Arc::new(node),
        storage,
    };
    let app = build_router(Arc::new(state));

    let addr: SocketAddr = settings
        .server
        .bind_addr()
        .parse()
        .with_context(|| format!("invalid bind address {}", settings.server.bind_addr()))?;
    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {addr}"))?;
    info!(%addr, address = %format_address(&signer.address()), "listening");

    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal())
        .await?;

    session.shutdown().await;
    reporter.abort();
    info!("relay stopped");
    Ok(())
}

/// Copies configured credentials into the store for accounts it does not know yet.
async fn import_seeded_identities(storage: &Storage, settings: &Settings) -> anyhow::Result<()> {
    for (account, seeded) in &settings.matrix.users {
        if storage.get_identity(account).await?.is_some() {
            continue;
        }
        let identity = ChatIdentity {
            user_id: MatrixUserId::new(seeded.user_id.as_str()),
            access_token: seeded.access_token.clone(),
            home_server: settings.matrix.server.clone(),
        };
        storage.put_identity(account, &identity).await?;
        info!(%account, user_id = %identity.user_id, "imported configured chat credentials");
    }
    Ok(())
}

/// Logs every verified inbound message; returns how many once the session side closes.
async fn report_verified(mut verified: broadcast::Receiver<VerifiedMessage>) -> u64 {
    let mut reported = 0;
    loop {
        match verified.recv().await {
            Ok(message) => {
                info!(
                    room_id = %message.room_id,
                    sender = %message.sender,
                    address = %format_address(&message.recovered),
                    payload = %message.payload,
                    "VALID SIGNATURE"
                );
                reported += 1;
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(skipped, "verified message reporter fell behind");
            }
            Err(RecvError::Closed) => return reported,
        }
    }
}

async fn shutdown_signal() {
    if let Err(err) = tokio::signal::ctrl_c().await {
        warn!(%err, "failed to listen for ctrl-c");
        std::future::pending::<()>().await;
    }
    info!("shutting down");
}

#[cfg(test)]
#[path = "tests/main_tests.rs"]
mod tests;
