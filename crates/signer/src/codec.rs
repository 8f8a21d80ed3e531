//! Signed chat message format.
//!
//! A message body on the wire is `payload + "\n" + signature`, while the text
//! actually signed is `payload + "\n" + sender_chat_id`. Binding the chat id
//! into the signed text stops a body from being replayed under another sender.

use thiserror::Error;

use crate::{format_address, recover_address, Address, Signer, SignerError};

pub const SEPARATOR: char = '\n';

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SignedEnvelope {
    pub payload: String,
    pub claimed_sender_id: String,
    pub signature: String,
}

impl SignedEnvelope {
    /// Serialized message body.
    pub fn body(&self) -> String {
        format!("{}{SEPARATOR}{}", self.payload, self.signature)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ParseFailure {
    #[error("message body has no signature line")]
    MissingSeparator,
    #[error("signature could not be recovered: {0}")]
    Unrecoverable(String),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VerifyOutcome {
    Valid { recovered: Address, payload: String },
    Invalid { recovered: Address },
    ParseFailure(ParseFailure),
}

impl VerifyOutcome {
    pub fn is_valid(&self) -> bool {
        matches!(self, VerifyOutcome::Valid { .. })
    }
}

pub fn signable(payload: &str, sender_chat_id: &str) -> String {
    format!("{payload}{SEPARATOR}{sender_chat_id}")
}

pub async fn encode(
    payload: &str,
    signer_chat_id: &str,
    signer: &dyn Signer,
) -> Result<SignedEnvelope, SignerError> {
    let signature = signer.sign(&signable(payload, signer_chat_id)).await?;
    Ok(SignedEnvelope {
        payload: payload.to_string(),
        claimed_sender_id: signer_chat_id.to_string(),
        signature,
    })
}

/// Splits at the last newline, so the payload itself may span lines.
pub fn split_body(raw_body: &str) -> Option<(&str, &str)> {
    raw_body.rsplit_once(SEPARATOR)
}

pub fn verify(raw_body: &str, claimed_sender_id: &str) -> VerifyOutcome {
    let Some((payload, signature)) = split_body(raw_body) else {
        return VerifyOutcome::ParseFailure(ParseFailure::MissingSeparator);
    };
    let recovered = match recover_address(&signable(payload, claimed_sender_id), signature) {
        Ok(address) => address,
        Err(err) => return VerifyOutcome::ParseFailure(ParseFailure::Unrecoverable(err.to_string())),
    };
    if sender_contains_address(claimed_sender_id, &recovered) {
        VerifyOutcome::Valid {
            recovered,
            payload: payload.to_string(),
        }
    } else {
        VerifyOutcome::Invalid { recovered }
    }
}

/// Containment, not equality: chat ids look like `@0xabc…:server`.
pub fn sender_contains_address(claimed_sender_id: &str, address: &Address) -> bool {
    claimed_sender_id
        .to_lowercase()
        .contains(&format_address(address).to_lowercase())
}

#[cfg(test)]
#[path = "tests/codec_tests.rs"]
mod tests;
