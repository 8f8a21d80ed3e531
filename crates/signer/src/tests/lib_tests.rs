use super::*;

const TEST_KEY: &str = "0x4c0883a69102937d6231471b5dbb6204fe5129617082792ae468d01a3f362318";

fn test_signer() -> WalletSigner {
    WalletSigner::from_private_key(TEST_KEY).expect("wallet")
}

#[tokio::test]
async fn signatures_are_prefixed_hex_of_65_bytes() {
    let signature = test_signer().sign("password").await.expect("sign");
    assert!(signature.starts_with("0x"));
    assert_eq!(signature.len(), 2 + 130);
    assert!(signature[2..].chars().all(|c| c.is_ascii_hexdigit()));
}

#[tokio::test]
async fn recovers_signing_address() {
    let signer = test_signer();
    let signature = signer.sign("hello relay").await.expect("sign");
    let recovered = recover_address("hello relay", &signature).expect("recover");
    assert_eq!(recovered, signer.address());
}

#[tokio::test]
async fn recovery_over_other_text_yields_other_address() {
    let signer = test_signer();
    let signature = signer.sign("hello relay").await.expect("sign");
    let recovered = recover_address("hello relay!", &signature).expect("recover");
    assert_ne!(recovered, signer.address());
}

#[test]
fn malformed_signature_is_an_error() {
    let err = recover_address("data", "0xnothex").expect_err("should fail");
    assert!(matches!(err, SignerError::InvalidSignature(_)));
}

#[test]
fn rejects_malformed_private_key() {
    let err = WalletSigner::from_private_key("0x1234").expect_err("should fail");
    assert!(matches!(err, SignerError::InvalidKey(_)));
}

#[test]
fn address_formatting_round_trips_through_parse() {
    let address = test_signer().address();
    let formatted = format_address(&address);
    assert!(formatted.starts_with("0x"));
    assert_eq!(parse_address(&formatted), Some(address));
    assert_eq!(parse_address(&formatted.to_lowercase()), Some(address));
    assert_eq!(parse_address("not-an-address"), None);
}
