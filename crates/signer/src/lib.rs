use std::str::FromStr;

use async_trait::async_trait;
use ethers::types::Signature;
use thiserror::Error;

pub mod codec;
mod node;
mod wallet;

pub use ethers::types::Address;
pub use node::{EthNode, NodeSigner};
pub use wallet::WalletSigner;

#[derive(Debug, Error)]
pub enum SignerError {
    #[error("signing request failed: {0}")]
    Sign(String),
    #[error("invalid signature: {0}")]
    InvalidSignature(String),
    #[error("address recovery failed: {0}")]
    Recovery(String),
    #[error("eth node request failed: {0}")]
    Node(String),
    #[error("invalid private key: {0}")]
    InvalidKey(String),
}

/// Capability to sign arbitrary text with a blockchain account.
///
/// Signatures are EIP-191 personal messages rendered as `0x`-prefixed hex, the
/// same form `eth_sign` returns from a node.
#[async_trait]
pub trait Signer: Send + Sync {
    fn address(&self) -> Address;
    async fn sign(&self, data: &str) -> Result<String, SignerError>;
}

/// Checksummed display form of an account address.
pub fn format_address(address: &Address) -> String {
    ethers::utils::to_checksum(address, None)
}

pub fn parse_address(raw: &str) -> Option<Address> {
    Address::from_str(raw.trim()).ok()
}

pub(crate) fn format_signature(signature: &Signature) -> String {
    format!("0x{signature}")
}

/// Recovers the account that produced `signature` over the personal message `data`.
pub fn recover_address(data: &str, signature: &str) -> Result<Address, SignerError> {
    let signature = Signature::from_str(signature.trim())
        .map_err(|e| SignerError::InvalidSignature(e.to_string()))?;
    signature
        .recover(data)
        .map_err(|e| SignerError::Recovery(e.to_string()))
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
