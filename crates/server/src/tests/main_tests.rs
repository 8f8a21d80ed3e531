use super::*;
use crate::config::SeededIdentity;
use shared::domain::RoomId;
use signer::Address;

fn settings_with_seed(account: &str, token: &str) -> Settings {
    let mut settings = Settings::default();
    settings.matrix.server = "https://matrix.example.org".into();
    settings.matrix.users.insert(
        account.to_string(),
        SeededIdentity {
            user_id: format!("@{account}:example.org"),
            access_token: token.into(),
        },
    );
    settings
}

#[tokio::test]
async fn seeded_identity_is_imported_once() {
    let storage = Storage::new("sqlite::memory:").await.expect("db");
    let account = "0xabc0000000000000000000000000000000000001";

    import_seeded_identities(&storage, &settings_with_seed(account, "first"))
        .await
        .expect("import");
    import_seeded_identities(&storage, &settings_with_seed(account, "second"))
        .await
        .expect("import");

    let stored = storage
        .get_identity(account)
        .await
        .expect("get")
        .expect("identity");
    assert_eq!(stored.access_token, "first");
    assert_eq!(stored.home_server, "https://matrix.example.org");
}

#[test]
fn cli_accepts_config_path() {
    let cli = Cli::try_parse_from(["server", "--config", "/etc/relay.toml"]).expect("cli");
    assert_eq!(cli.config, Some(PathBuf::from("/etc/relay.toml")));

    let cli = Cli::try_parse_from(["server"]).expect("cli");
    assert!(cli.config.is_none());
}

fn verified(payload: &str) -> VerifiedMessage {
    VerifiedMessage {
        room_id: RoomId::new("!a:example.org"),
        sender: MatrixUserId::new("@0x0000000000000000000000000000000000000000:example.org"),
        recovered: Address::zero(),
        payload: payload.into(),
    }
}

#[tokio::test]
async fn reporter_logs_until_the_session_closes() {
    let (tx, rx) = broadcast::channel(4);
    tx.send(verified("first")).expect("send");
    tx.send(verified("second")).expect("send");
    drop(tx);

    assert_eq!(report_verified(rx).await, 2);
}

#[tokio::test]
async fn reporter_survives_falling_behind() {
    let (tx, rx) = broadcast::channel(1);
    for payload in ["one", "two", "three"] {
        tx.send(verified(payload)).expect("send");
    }
    drop(tx);

    assert_eq!(report_verified(rx).await, 1);
}
