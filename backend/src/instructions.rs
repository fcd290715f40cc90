//! Instruction builders for the CyberOracle program.
//!
//! The program is an Anchor program: instruction data is
//! `sha256("global:<name>")[..8]` followed by the Borsh-encoded arguments.
//! Arguments are encoded by hand; every type involved (`u64`, `[u8; 32]`,
//! `String`, `Pubkey`) has a trivial Borsh layout.

use sha2::{Digest, Sha256};
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;

use crate::pda::{self, PdaError};

pub const SYSTEM_PROGRAM_ID: Pubkey = Pubkey::from_str_const("11111111111111111111111111111111");

fn discriminator(namespace: &str, name: &str) -> [u8; 8] {
    let mut hasher = Sha256::new();
    hasher.update(format!("{namespace}:{name}"));
    let hash = hasher.finalize();
    let mut disc = [0u8; 8];
    disc.copy_from_slice(&hash[..8]);
    disc
}

/// Anchor instruction discriminator: `sha256("global:<name>")[..8]`.
pub fn instruction_discriminator(name: &str) -> [u8; 8] {
    discriminator("global", name)
}

/// Anchor account discriminator: `sha256("account:<Name>")[..8]`.
pub fn account_discriminator(name: &str) -> [u8; 8] {
    discriminator("account", name)
}

/// Append a Borsh `String` (u32 LE length prefix + UTF-8 bytes).
pub(crate) fn put_string(buf: &mut Vec<u8>, value: &str) {
    buf.extend_from_slice(&(value.len() as u32).to_le_bytes());
    buf.extend_from_slice(value.as_bytes());
}

/// `initialize(price_lamports)`: create the global state PDA.
pub fn initialize(
    program_id: &Pubkey,
    authority: &Pubkey,
    treasury: &Pubkey,
    price_lamports: u64,
) -> Result<Instruction, PdaError> {
    let (state, _) = pda::state_address(program_id)?;

    let mut data = Vec::with_capacity(8 + 8);
    data.extend_from_slice(&instruction_discriminator("initialize"));
    data.extend_from_slice(&price_lamports.to_le_bytes());

    Ok(Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(state, false),                       // state (init)
            AccountMeta::new(*authority, true),                   // authority (signer, payer)
            AccountMeta::new_readonly(*treasury, false),          // treasury
            AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false),  // system program
        ],
        data,
    })
}

/// `update_price(price_lamports)`: authority-only price change.
pub fn update_price(
    program_id: &Pubkey,
    authority: &Pubkey,
    price_lamports: u64,
) -> Result<Instruction, PdaError> {
    let (state, _) = pda::state_address(program_id)?;

    let mut data = Vec::with_capacity(8 + 8);
    data.extend_from_slice(&instruction_discriminator("update_price"));
    data.extend_from_slice(&price_lamports.to_le_bytes());

    Ok(Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new(state, false),
            AccountMeta::new_readonly(*authority, true),
        ],
        data,
    })
}

/// `request_oracle(prompt_hash)`: pay the treasury, bump the caller's
/// counter and create the request record, all in one instruction.
///
/// `request_id` must be the counter value the caller just observed; the
/// program re-derives the request PDA from the on-chain counter and rejects
/// a mismatch.
pub fn request_oracle(
    program_id: &Pubkey,
    payer: &Pubkey,
    treasury: &Pubkey,
    request_id: u64,
    prompt_hash: &[u8; 32],
) -> Result<Instruction, PdaError> {
    let (state, _) = pda::state_address(program_id)?;
    let (counter, _) = pda::counter_address(program_id, payer)?;
    let (request, _) = pda::request_address(program_id, payer, request_id)?;

    let mut data = Vec::with_capacity(8 + 32);
    data.extend_from_slice(&instruction_discriminator("request_oracle"));
    data.extend_from_slice(prompt_hash);

    Ok(Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new_readonly(state, false),             // state
            AccountMeta::new(counter, false),                    // counter (init_if_needed)
            AccountMeta::new(request, false),                    // request (init)
            AccountMeta::new(*payer, true),                      // payer (signer)
            AccountMeta::new(*treasury, false),                  // treasury (fee recipient)
            AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false), // system program
        ],
        data,
    })
}

/// `fulfill_oracle(result_uri, asset_id, collection_mint)`: record the
/// minted result against `(user, request_id)`. Must be signed by the
/// state's authority.
pub fn fulfill_oracle(
    program_id: &Pubkey,
    authority: &Pubkey,
    user: &Pubkey,
    request_id: u64,
    result_uri: &str,
    asset_id: &Pubkey,
    collection_mint: &Pubkey,
) -> Result<Instruction, PdaError> {
    let (state, _) = pda::state_address(program_id)?;
    let (request, _) = pda::request_address(program_id, user, request_id)?;

    let mut data = Vec::with_capacity(8 + 4 + result_uri.len() + 32 + 32);
    data.extend_from_slice(&instruction_discriminator("fulfill_oracle"));
    put_string(&mut data, result_uri);
    data.extend_from_slice(asset_id.as_ref());
    data.extend_from_slice(collection_mint.as_ref());

    Ok(Instruction {
        program_id: *program_id,
        accounts: vec![
            AccountMeta::new_readonly(state, false),
            AccountMeta::new(request, false),
            AccountMeta::new_readonly(*authority, true),
        ],
        data,
    })
}
