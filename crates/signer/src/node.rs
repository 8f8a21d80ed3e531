use async_trait::async_trait;
use ethers::providers::{Http, Middleware, Provider};
use tracing::debug;

use crate::{format_signature, Address, Signer, SignerError};

/// JSON-RPC handle to the Ethereum node holding the account keys.
#[derive(Clone, Debug)]
pub struct EthNode {
    provider: Provider<Http>,
}

impl EthNode {
    pub fn connect(endpoint: &str) -> Result<Self, SignerError> {
        let provider = Provider::<Http>::try_from(endpoint)
            .map_err(|e| SignerError::Node(format!("invalid endpoint {endpoint}: {e}")))?;
        Ok(Self { provider })
    }

    pub async fn accounts(&self) -> Result<Vec<Address>, SignerError> {
        self.provider
            .get_accounts()
            .await
            .map_err(|e| SignerError::Node(e.to_string()))
    }

    pub async fn unlock(&self, address: Address, password: &str) -> Result<(), SignerError> {
        let unlocked: bool = self
            .provider
            .request(
                "personal_unlockAccount",
                (address, password, Option::<u64>::None),
            )
            .await
            .map_err(|e| SignerError::Node(e.to_string()))?;
        if !unlocked {
            return Err(SignerError::Node("node refused to unlock account".into()));
        }
        Ok(())
    }

    pub async fn block_number(&self) -> Result<u64, SignerError> {
        self.provider
            .get_block_number()
            .await
            .map(|n| n.as_u64())
            .map_err(|e| SignerError::Node(e.to_string()))
    }

    pub fn signer_for(&self, address: Address) -> NodeSigner {
        NodeSigner {
            provider: self.provider.clone(),
            address,
        }
    }
}

/// Signs through `eth_sign`; a locked account makes the node ask for approval per request.
#[derive(Clone, Debug)]
pub struct NodeSigner {
    provider: Provider<Http>,
    address: Address,
}

#[async_trait]
impl Signer for NodeSigner {
    fn address(&self) -> Address {
        self.address
    }

    async fn sign(&self, data: &str) -> Result<String, SignerError> {
        debug!(address = ?self.address, bytes = data.len(), "eth_sign");
        let signature = self
            .provider
            .sign(data.as_bytes().to_vec(), &self.address)
            .await
            .map_err(|e| SignerError::Sign(e.to_string()))?;
        Ok(format_signature(&signature))
    }
}
