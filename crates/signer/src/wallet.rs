use async_trait::async_trait;
use ethers::signers::{LocalWallet, Signer as _};

use crate::{format_signature, Address, Signer, SignerError};

/// In-process key, used by tooling and tests in place of a node account.
#[derive(Clone, Debug)]
pub struct WalletSigner {
    wallet: LocalWallet,
}

impl WalletSigner {
    pub fn from_private_key(private_key_hex: &str) -> Result<Self, SignerError> {
        let wallet = private_key_hex
            .trim()
            .parse::<LocalWallet>()
            .map_err(|e| SignerError::InvalidKey(e.to_string()))?;
        Ok(Self { wallet })
    }
}

#[async_trait]
impl Signer for WalletSigner {
    fn address(&self) -> Address {
        self.wallet.address()
    }

    async fn sign(&self, data: &str) -> Result<String, SignerError> {
        let signature = self
            .wallet
            .sign_message(data)
            .await
            .map_err(|e| SignerError::Sign(e.to_string()))?;
        Ok(format_signature(&signature))
    }
}
