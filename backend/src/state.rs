//! Fixed-layout decoders for the accounts this service reads.
//!
//! All CyberOracle accounts are Anchor accounts: an 8-byte discriminator
//! followed by the Borsh-encoded struct. Decoders skip the discriminator
//! and never read past the end of the supplied buffer.

use solana_sdk::pubkey::Pubkey;
use thiserror::Error;

use crate::instructions::account_discriminator;

#[derive(Debug, Error, PartialEq, Eq)]
pub enum DecodeError {
    #[error("{account} account data too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        account: &'static str,
        expected: usize,
        actual: usize,
    },
    #[error("{account} account has invalid {field}")]
    InvalidField {
        account: &'static str,
        field: &'static str,
    },
}

/// Little cursor over a borrowed account buffer.
struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
    account: &'static str,
}

impl<'a> Reader<'a> {
    fn new(data: &'a [u8], account: &'static str) -> Self {
        // Discriminator is not checked here, only skipped.
        Self {
            data,
            pos: 8,
            account,
        }
    }

    fn take(&mut self, len: usize, field: &'static str) -> Result<&'a [u8], DecodeError> {
        let end = self
            .pos
            .checked_add(len)
            .filter(|end| *end <= self.data.len())
            .ok_or(DecodeError::InvalidField {
                account: self.account,
                field,
            })?;
        let out = &self.data[self.pos..end];
        self.pos = end;
        Ok(out)
    }

    fn pubkey(&mut self, field: &'static str) -> Result<Pubkey, DecodeError> {
        let bytes: [u8; 32] = self.array(field)?;
        Ok(Pubkey::new_from_array(bytes))
    }

    fn array<const N: usize>(&mut self, field: &'static str) -> Result<[u8; N], DecodeError> {
        let mut out = [0u8; N];
        out.copy_from_slice(self.take(N, field)?);
        Ok(out)
    }

    fn u64(&mut self, field: &'static str) -> Result<u64, DecodeError> {
        Ok(u64::from_le_bytes(self.array(field)?))
    }

    fn u8(&mut self, field: &'static str) -> Result<u8, DecodeError> {
        Ok(self.take(1, field)?[0])
    }

    fn string(&mut self, field: &'static str) -> Result<String, DecodeError> {
        let len = u32::from_le_bytes(self.array(field)?) as usize;
        let bytes = self.take(len, field)?;
        String::from_utf8(bytes.to_vec()).map_err(|_| DecodeError::InvalidField {
            account: self.account,
            field,
        })
    }
}

fn ensure_len(data: &[u8], account: &'static str, expected: usize) -> Result<(), DecodeError> {
    if data.len() < expected {
        return Err(DecodeError::TooShort {
            account,
            expected,
            actual: data.len(),
        });
    }
    Ok(())
}

/// Global oracle configuration, PDA `["state"]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleState {
    pub authority: Pubkey,
    pub treasury: Pubkey,
    pub price_lamports: u64,
    pub bump: u8,
}

impl OracleState {
    /// discriminator (8) + authority (32) + treasury (32) + price (8) + bump (1)
    pub const SIZE: usize = 8 + 32 + 32 + 8 + 1;

    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        ensure_len(data, "oracle state", Self::SIZE)?;
        let mut r = Reader::new(data, "oracle state");
        Ok(Self {
            authority: r.pubkey("authority")?,
            treasury: r.pubkey("treasury")?,
            price_lamports: r.u64("price_lamports")?,
            bump: r.u8("bump")?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&account_discriminator("OracleState"));
        buf.extend_from_slice(self.authority.as_ref());
        buf.extend_from_slice(self.treasury.as_ref());
        buf.extend_from_slice(&self.price_lamports.to_le_bytes());
        buf.push(self.bump);
        buf
    }
}

/// Per-user request counter, PDA `["counter", user]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UserCounter {
    pub user: Pubkey,
    pub next_request_id: u64,
    pub bump: u8,
}

impl UserCounter {
    pub const SIZE: usize = 8 + 32 + 8 + 1;

    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        ensure_len(data, "user counter", Self::SIZE)?;
        let mut r = Reader::new(data, "user counter");
        Ok(Self {
            user: r.pubkey("user")?,
            next_request_id: r.u64("next_request_id")?,
            bump: r.u8("bump")?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&account_discriminator("UserCounter"));
        buf.extend_from_slice(self.user.as_ref());
        buf.extend_from_slice(&self.next_request_id.to_le_bytes());
        buf.push(self.bump);
        buf
    }
}

/// A single paid oracle request, PDA `["request", user, request_id_le]`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OracleRequest {
    pub user: Pubkey,
    pub request_id: u64,
    pub prompt_hash: [u8; 32],
    pub result_uri: String,
    pub asset_id: Pubkey,
    pub collection_mint: Pubkey,
    pub fulfilled: bool,
    pub bump: u8,
}

impl OracleRequest {
    /// Longest `result_uri` the program accepts in `fulfill_oracle`.
    pub const MAX_RESULT_URI: usize = 200;
    /// Allocated account size (result_uri at its maximum length).
    pub const SIZE: usize = 8 + 32 + 8 + 32 + 4 + Self::MAX_RESULT_URI + 32 + 32 + 1 + 1;
    /// Smallest valid encoding (empty result_uri).
    pub const MIN_SIZE: usize = 8 + 32 + 8 + 32 + 4 + 32 + 32 + 1 + 1;

    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        ensure_len(data, "oracle request", Self::MIN_SIZE)?;
        let mut r = Reader::new(data, "oracle request");
        Ok(Self {
            user: r.pubkey("user")?,
            request_id: r.u64("request_id")?,
            prompt_hash: r.array("prompt_hash")?,
            result_uri: r.string("result_uri")?,
            asset_id: r.pubkey("asset_id")?,
            collection_mint: r.pubkey("collection_mint")?,
            fulfilled: match r.u8("fulfilled")? {
                0 => false,
                1 => true,
                _ => {
                    return Err(DecodeError::InvalidField {
                        account: "oracle request",
                        field: "fulfilled",
                    })
                }
            },
            bump: r.u8("bump")?,
        })
    }

    /// Encode at the full allocated size, zero-padding the tail like the
    /// program's fixed `space` allocation does.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::SIZE);
        buf.extend_from_slice(&account_discriminator("OracleRequest"));
        buf.extend_from_slice(self.user.as_ref());
        buf.extend_from_slice(&self.request_id.to_le_bytes());
        buf.extend_from_slice(&self.prompt_hash);
        buf.extend_from_slice(&(self.result_uri.len() as u32).to_le_bytes());
        buf.extend_from_slice(self.result_uri.as_bytes());
        buf.extend_from_slice(self.asset_id.as_ref());
        buf.extend_from_slice(self.collection_mint.as_ref());
        buf.push(self.fulfilled as u8);
        buf.push(self.bump);
        if buf.len() < Self::SIZE {
            buf.resize(Self::SIZE, 0);
        }
        buf
    }
}

/// Bubblegum `TreeConfig` header, PDA `[merkle_tree]` under Bubblegum.
///
/// Only the prefix needed to predict the next leaf index is decoded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeConfig {
    pub tree_creator: Pubkey,
    pub tree_delegate: Pubkey,
    pub total_mint_capacity: u64,
    pub num_minted: u64,
}

impl TreeConfig {
    pub const MIN_SIZE: usize = 8 + 32 + 32 + 8 + 8;

    pub fn decode(data: &[u8]) -> Result<Self, DecodeError> {
        ensure_len(data, "tree config", Self::MIN_SIZE)?;
        let mut r = Reader::new(data, "tree config");
        Ok(Self {
            tree_creator: r.pubkey("tree_creator")?,
            tree_delegate: r.pubkey("tree_delegate")?,
            total_mint_capacity: r.u64("total_mint_capacity")?,
            num_minted: r.u64("num_minted")?,
        })
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut buf = Vec::with_capacity(Self::MIN_SIZE + 2);
        buf.extend_from_slice(&account_discriminator("TreeConfig"));
        buf.extend_from_slice(self.tree_creator.as_ref());
        buf.extend_from_slice(self.tree_delegate.as_ref());
        buf.extend_from_slice(&self.total_mint_capacity.to_le_bytes());
        buf.extend_from_slice(&self.num_minted.to_le_bytes());
        // is_public + is_decompressible
        buf.extend_from_slice(&[0, 0]);
        buf
    }
}
