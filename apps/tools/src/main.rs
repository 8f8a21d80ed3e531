use std::{fs, path::PathBuf};

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use signer::{codec, format_address};
use storage::Storage;

#[derive(Parser, Debug)]
struct Cli {
    #[arg(long, default_value = "sqlite://./data/relay.db")]
    database_url: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Print every stored chat identity.
    ListIdentities,
    /// Drop the stored credentials so the next start bootstraps again.
    ForgetIdentity { account: String },
    /// Check a signed message body as received from `sender`.
    Verify {
        #[arg(long)]
        sender: String,
        body_file: PathBuf,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    match cli.command {
        Command::ListIdentities => {
            let storage = Storage::new(&cli.database_url).await?;
            for stored in storage.list_identities().await? {
                println!(
                    "{}\t{}\t{}\tupdated {}",
                    stored.account,
                    stored.identity.user_id,
                    stored.identity.home_server,
                    stored.updated_at.to_rfc3339()
                );
            }
        }
        Command::ForgetIdentity { account } => {
            let storage = Storage::new(&cli.database_url).await?;
            if storage.remove_identity(&account).await? {
                println!("forgot chat identity for {account}");
            } else {
                println!("no chat identity stored for {account}");
            }
        }
        Command::Verify { sender, body_file } => {
            let body = fs::read_to_string(&body_file)
                .with_context(|| format!("failed to read {}", body_file.display()))?;
            let body = body.strip_suffix('\n').unwrap_or(&body);
            match codec::verify(body, &sender) {
                codec::VerifyOutcome::Valid { recovered, payload } => {
                    println!("valid signature from {}", format_address(&recovered));
                    println!("{payload}");
                }
                codec::VerifyOutcome::Invalid { recovered } => {
                    println!(
                        "invalid: signed by {} which {sender} does not contain",
                        format_address(&recovered)
                    );
                    std::process::exit(1);
                }
                codec::VerifyOutcome::ParseFailure(reason) => {
                    println!("not a signed message: {reason}");
                    std::process::exit(2);
                }
            }
        }
    }

    Ok(())
}
