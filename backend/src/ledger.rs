//! Ledger capability: read account bytes, send a signed transaction and
//! wait for it to confirm.
//!
//! Everything chain-facing (submission, minting, fulfillment,
//! reconciliation) goes through [`Ledger`] so tests can substitute an
//! in-memory implementation.

use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use solana_client::nonblocking::rpc_client::RpcClient;
use solana_commitment_config::CommitmentConfig;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use solana_sdk::transaction::Transaction;
use std::time::Duration;
use tracing::debug;

pub trait Ledger: Send + Sync {
    /// Raw data of the account at `address`, `None` if it does not exist.
    fn account_data<'a>(&'a self, address: &'a Pubkey) -> BoxFuture<'a, Result<Option<Vec<u8>>>>;

    /// Sign `instructions` as one transaction and wait for confirmation.
    ///
    /// `signers[0]` pays the fee. Returns the transaction signature.
    fn send<'a>(
        &'a self,
        instructions: &'a [Instruction],
        signers: &'a [&'a Keypair],
    ) -> BoxFuture<'a, Result<String>>;
}

/// [`Ledger`] over Solana JSON-RPC at `confirmed` commitment.
///
/// There is no retry loop: a failed send is reported to the caller as is.
pub struct RpcLedger {
    client: RpcClient,
}

impl RpcLedger {
    pub fn new(rpc_url: &str, timeout: Duration) -> Self {
        Self {
            client: RpcClient::new_with_timeout_and_commitment(
                rpc_url.to_string(),
                timeout,
                CommitmentConfig::confirmed(),
            ),
        }
    }
}

impl Ledger for RpcLedger {
    fn account_data<'a>(&'a self, address: &'a Pubkey) -> BoxFuture<'a, Result<Option<Vec<u8>>>> {
        Box::pin(async move {
            let response = self
                .client
                .get_account_with_commitment(address, CommitmentConfig::confirmed())
                .await
                .with_context(|| format!("failed to fetch account {address}"))?;
            Ok(response.value.map(|account| account.data))
        })
    }

    fn send<'a>(
        &'a self,
        instructions: &'a [Instruction],
        signers: &'a [&'a Keypair],
    ) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let payer = signers.first().context("transaction needs at least one signer")?;

            let blockhash = self
                .client
                .get_latest_blockhash()
                .await
                .context("failed to fetch latest blockhash")?;

            let tx = Transaction::new_signed_with_payer(
                instructions,
                Some(&payer.pubkey()),
                signers,
                blockhash,
            );

            let signature = self
                .client
                .send_and_confirm_transaction(&tx)
                .await
                .context("send_and_confirm_transaction failed")?;
            debug!(signature = %signature, "Transaction confirmed");
            Ok(signature.to_string())
        })
    }
}
