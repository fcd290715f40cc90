//! Client-side request submission: pay the fee and create the on-chain
//! request record in one `request_oracle` transaction.

use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use thiserror::Error;
use tracing::info;

use crate::instructions;
use crate::ledger::Ledger;
use crate::oracle::prompt_hash;
use crate::pda::{self, PdaError};
use crate::state::{DecodeError, OracleState, UserCounter};

#[derive(Debug, Error)]
pub enum SubmitError {
    #[error("prompt cannot be empty")]
    EmptyPrompt,
    #[error("oracle not initialized")]
    OracleNotInitialized,
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error(transparent)]
    Pda(#[from] PdaError),
    #[error(transparent)]
    Ledger(#[from] anyhow::Error),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SubmittedRequest {
    pub request_id: u64,
    pub request_address: Pubkey,
    pub prompt_hash: [u8; 32],
    pub signature: String,
    /// Fee charged, as read from the state before sending.
    pub price_lamports: u64,
}

/// Submit a paid oracle request for `prompt` on behalf of `payer`.
///
/// The request id is the payer's current counter value (0 before the first
/// request); the program increments the counter in the same instruction.
pub async fn submit_request(
    ledger: &dyn Ledger,
    program_id: &Pubkey,
    payer: &Keypair,
    prompt: &str,
) -> Result<SubmittedRequest, SubmitError> {
    if prompt.trim().is_empty() {
        return Err(SubmitError::EmptyPrompt);
    }
    let user = payer.pubkey();

    let (state_address, _) = pda::state_address(program_id)?;
    let state_data = ledger
        .account_data(&state_address)
        .await?
        .ok_or(SubmitError::OracleNotInitialized)?;
    let state = OracleState::decode(&state_data)?;

    let (counter_address, _) = pda::counter_address(program_id, &user)?;
    let request_id = match ledger.account_data(&counter_address).await? {
        Some(data) => UserCounter::decode(&data)?.next_request_id,
        None => 0,
    };

    let (request_address, _) = pda::request_address(program_id, &user, request_id)?;
    let hash = prompt_hash(prompt);
    let ix = instructions::request_oracle(program_id, &user, &state.treasury, request_id, &hash)?;
    let signature = ledger.send(&[ix], &[payer]).await?;

    info!(
        user = %user,
        request_id,
        request = %request_address,
        signature = %signature,
        price_lamports = state.price_lamports,
        "Oracle request submitted"
    );

    Ok(SubmittedRequest {
        request_id,
        request_address,
        prompt_hash: hash,
        signature,
        price_lamports: state.price_lamports,
    })
}
