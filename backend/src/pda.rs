//! Program-derived addresses used by the CyberOracle program and by the
//! Bubblegum / Token Metadata programs it mints through.
//!
//! | Account        | Seeds                                         | Program        |
//! |----------------|-----------------------------------------------|----------------|
//! | oracle state   | `["state"]`                                   | CyberOracle    |
//! | user counter   | `["counter", user]`                           | CyberOracle    |
//! | oracle request | `["request", user, request_id_le]`            | CyberOracle    |
//! | tree config    | `[merkle_tree]`                               | Bubblegum      |
//! | leaf asset id  | `["asset", merkle_tree, leaf_index_le]`       | Bubblegum      |
//! | cpi signer     | `["collection_cpi"]`                          | Bubblegum      |
//! | metadata       | `["metadata", token_metadata_program, mint]`  | Token Metadata |
//! | edition        | `["metadata", token_metadata_program, mint, "edition"]` | Token Metadata |

use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

/// Maximum length of a single seed.
pub const MAX_SEED_LEN: usize = 32;
/// Maximum number of seeds (the bump seed is appended on top of these).
pub const MAX_SEEDS: usize = 15;

pub const STATE_SEED: &[u8] = b"state";
pub const COUNTER_SEED: &[u8] = b"counter";
pub const REQUEST_SEED: &[u8] = b"request";

/// Bubblegum (compressed NFT) program.
pub const BUBBLEGUM_PROGRAM_ID: Pubkey =
    Pubkey::from_str_const("BGUMAp9Gq7iTEuizy4pqaxsTyUCBK68MDfK752saRPUY");
/// Metaplex Token Metadata program.
pub const TOKEN_METADATA_PROGRAM_ID: Pubkey =
    Pubkey::from_str_const("metaqbxxUerdq28cj1RbAWkYQm3ybzjb6a8bt518x1s");

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PdaError {
    #[error("seed {index} is {len} bytes, max is 32")]
    MaxSeedLengthExceeded { index: usize, len: usize },
    #[error("{0} seeds supplied, max is 15")]
    TooManySeeds(usize),
    #[error("no viable bump seed found")]
    NoViableBump,
}

/// Derive a program address and its bump from `seeds`.
///
/// Oversized seeds are rejected up front instead of being truncated.
pub fn find_address(seeds: &[&[u8]], program_id: &Pubkey) -> Result<(Pubkey, u8), PdaError> {
    if seeds.len() > MAX_SEEDS {
        return Err(PdaError::TooManySeeds(seeds.len()));
    }
    if let Some((index, seed)) = seeds.iter().enumerate().find(|(_, s)| s.len() > MAX_SEED_LEN) {
        return Err(PdaError::MaxSeedLengthExceeded {
            index,
            len: seed.len(),
        });
    }
    Pubkey::try_find_program_address(seeds, program_id).ok_or(PdaError::NoViableBump)
}

/// Encode a request id as the 8-byte little-endian seed the program expects.
pub fn encode_request_id(request_id: u64) -> [u8; 8] {
    request_id.to_le_bytes()
}

/// Inverse of [`encode_request_id`]. `bytes` must be exactly 8 bytes long.
pub fn decode_request_id(bytes: &[u8]) -> Option<u64> {
    let arr: [u8; 8] = bytes.try_into().ok()?;
    Some(u64::from_le_bytes(arr))
}

/// Global oracle state: `["state"]`.
pub fn state_address(program_id: &Pubkey) -> Result<(Pubkey, u8), PdaError> {
    find_address(&[STATE_SEED], program_id)
}

/// Per-user request counter: `["counter", user]`.
pub fn counter_address(program_id: &Pubkey, user: &Pubkey) -> Result<(Pubkey, u8), PdaError> {
    find_address(&[COUNTER_SEED, user.as_ref()], program_id)
}

/// Per-request record: `["request", user, request_id_le]`.
pub fn request_address(
    program_id: &Pubkey,
    user: &Pubkey,
    request_id: u64,
) -> Result<(Pubkey, u8), PdaError> {
    find_address(
        &[REQUEST_SEED, user.as_ref(), &encode_request_id(request_id)],
        program_id,
    )
}

/// Bubblegum tree authority (`TreeConfig`) for a merkle tree.
pub fn tree_config_address(merkle_tree: &Pubkey) -> Result<Pubkey, PdaError> {
    find_address(&[merkle_tree.as_ref()], &BUBBLEGUM_PROGRAM_ID).map(|(pda, _)| pda)
}

/// Asset id of the compressed NFT stored at `leaf_index` of `merkle_tree`.
pub fn leaf_asset_id(merkle_tree: &Pubkey, leaf_index: u64) -> Result<Pubkey, PdaError> {
    find_address(
        &[b"asset", merkle_tree.as_ref(), &leaf_index.to_le_bytes()],
        &BUBBLEGUM_PROGRAM_ID,
    )
    .map(|(pda, _)| pda)
}

/// Signer Bubblegum uses when CPI-ing into Token Metadata for collections.
pub fn bubblegum_signer() -> Result<Pubkey, PdaError> {
    find_address(&[b"collection_cpi"], &BUBBLEGUM_PROGRAM_ID).map(|(pda, _)| pda)
}

/// Token Metadata `metadata` account for `mint`.
pub fn metadata_address(mint: &Pubkey) -> Result<Pubkey, PdaError> {
    find_address(
        &[b"metadata", TOKEN_METADATA_PROGRAM_ID.as_ref(), mint.as_ref()],
        &TOKEN_METADATA_PROGRAM_ID,
    )
    .map(|(pda, _)| pda)
}

/// Token Metadata master `edition` account for `mint`.
pub fn edition_address(mint: &Pubkey) -> Result<Pubkey, PdaError> {
    find_address(
        &[
            b"metadata",
            TOKEN_METADATA_PROGRAM_ID.as_ref(),
            mint.as_ref(),
            b"edition",
        ],
        &TOKEN_METADATA_PROGRAM_ID,
    )
    .map(|(pda, _)| pda)
}
