//! Account selection and unlock against the Ethereum node.

use std::io::{self, BufRead, Write};

use signer::{format_address, Address, EthNode};
use thiserror::Error;
use tracing::{info, warn};

use crate::config::PasswordSource;

#[derive(Debug, Error)]
pub enum StartupError {
    #[error("No accounts found in eth node")]
    NoAccounts,
    #[error("Configured account not found: {0}")]
    AccountNotFound(String),
    #[error("Invalid index")]
    InvalidIndex,
    #[error("failed to read from terminal: {0}")]
    Terminal(#[from] std::io::Error),
}

/// Picks the configured account, or asks on `input` when none is configured.
pub fn select_account<R: BufRead, W: Write>(
    accounts: &[Address],
    configured: Option<&str>,
    input: &mut R,
    output: &mut W,
) -> Result<Address, StartupError> {
    if accounts.is_empty() {
        return Err(StartupError::NoAccounts);
    }

    if let Some(configured) = configured.map(str::trim).filter(|c| !c.is_empty()) {
        return accounts
            .iter()
            .copied()
            .find(|account| format_address(account).eq_ignore_ascii_case(configured))
            .ok_or_else(|| StartupError::AccountNotFound(configured.to_string()));
    }

    for (index, account) in accounts.iter().enumerate() {
        writeln!(output, "[{index}] {}", format_address(account))?;
    }
    write!(output, "Select account index: ")?;
    output.flush()?;

    let line = read_line(input)?;
    let index: usize = line.parse().map_err(|_| StartupError::InvalidIndex)?;
    accounts
        .get(index)
        .copied()
        .ok_or(StartupError::InvalidIndex)
}

pub const PASSWORD_PROMPT: &str = "Account password: ";

/// `read_secret` is handed the prompt and must read without echoing.
pub fn resolve_password<F>(
    source: &PasswordSource,
    read_secret: F,
) -> Result<Option<String>, StartupError>
where
    F: FnOnce(&str) -> io::Result<String>,
{
    match source {
        PasswordSource::None => Ok(None),
        PasswordSource::Configured(password) => Ok(Some(password.clone())),
        PasswordSource::Prompt => {
            let secret = read_secret(PASSWORD_PROMPT)?;
            Ok(Some(secret.trim_end_matches(['\r', '\n']).to_string()))
        }
    }
}

/// Unlock failures are not fatal; the node is then expected to ask for approval on each signature.
pub async fn unlock_account(node: &EthNode, account: Address, password: Option<&str>) -> bool {
    let Some(password) = password else {
        return false;
    };
    match node.unlock(account, password).await {
        Ok(()) => {
            info!(account = %format_address(&account), "account unlocked");
            true
        }
        Err(err) => {
            warn!(
                account = %format_address(&account),
                %err,
                "Could not unlock account. Per-request approval will be used"
            );
            false
        }
    }
}

fn read_line<R: BufRead>(input: &mut R) -> Result<String, StartupError> {
    let mut line = String::new();
    input.read_line(&mut line)?;
    Ok(line.trim().to_string())
}

#[cfg(test)]
#[path = "tests/startup_tests.rs"]
mod tests;
