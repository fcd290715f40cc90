//! Compressed NFT minting through Metaplex Bubblegum `mint_to_collection_v1`.
//!
//! The instruction is built by hand. A cNFT has no mint account; its asset id
//! is the PDA `["asset", merkle_tree, leaf_index]`, and the leaf index a mint
//! lands on is the tree config's `num_minted` right before the mint.

use anyhow::{Context, Result};
use futures_util::future::BoxFuture;
use solana_sdk::instruction::{AccountMeta, Instruction};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{info, instrument};

use crate::instructions::{instruction_discriminator, put_string, SYSTEM_PROGRAM_ID};
use crate::ledger::Ledger;
use crate::pda::{self, BUBBLEGUM_PROGRAM_ID, TOKEN_METADATA_PROGRAM_ID};
use crate::state::TreeConfig;

pub const SPL_NOOP_PROGRAM_ID: Pubkey =
    Pubkey::from_str_const("noopb9bkMVfRPU8AsbpTUg8AQkHtKwMYZiFUjNRtMmV");
pub const SPL_ACCOUNT_COMPRESSION_PROGRAM_ID: Pubkey =
    Pubkey::from_str_const("cmtDvXumGCrqC1Age74AVPhSRVXJMd8PJS91L8KbNCK");

/// Royalty on every CyberOracle cNFT: 5.5%.
pub const SELLER_FEE_BASIS_POINTS: u16 = 550;

/// Bubblegum's `MetadataArgs` limits, in bytes.
pub const MAX_NAME_BYTES: usize = 32;
pub const MAX_URI_BYTES: usize = 200;

/// Longest prefix of `s` that fits in `max` bytes without splitting a char.
pub fn clip_to_bytes(s: &str, max: usize) -> &str {
    if s.len() <= max {
        return s;
    }
    let mut end = max;
    while !s.is_char_boundary(end) {
        end -= 1;
    }
    &s[..end]
}

/// What to mint and where.
#[derive(Clone)]
pub struct MintArgs {
    pub leaf_owner: Pubkey,
    pub name: String,
    pub uri: String,
    pub merkle_tree: Pubkey,
    pub collection_mint: Pubkey,
    /// Tree delegate, collection authority, creator and fee payer.
    pub operator: Arc<Keypair>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MintedAsset {
    pub asset_id: Pubkey,
    pub leaf_index: u64,
    pub signature: String,
}

pub trait CompressedMinter: Send + Sync {
    fn mint<'a>(&'a self, args: &'a MintArgs) -> BoxFuture<'a, Result<MintedAsset>>;
}

/// Metaplex `MetadataArgs` with CyberOracle's fixed choices baked in:
/// empty symbol, mutable, `NonFungible`, `Original` token program, one
/// verified creator taking the whole share.
fn encode_metadata_args(name: &str, uri: &str, collection_mint: &Pubkey, creator: &Pubkey) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + name.len() + 4 + 4 + uri.len() + 2 + 2 + 2 + 2 + 34 + 1 + 1 + 4 + 34);
    put_string(&mut buf, name);
    put_string(&mut buf, ""); // symbol
    put_string(&mut buf, uri);
    buf.extend_from_slice(&SELLER_FEE_BASIS_POINTS.to_le_bytes());
    buf.push(0); // primary_sale_happened
    buf.push(1); // is_mutable
    buf.push(0); // edition_nonce: None
    buf.extend_from_slice(&[1, 0]); // token_standard: Some(NonFungible)
    buf.push(1); // collection: Some
    buf.push(0); //   verified (Bubblegum verifies during the CPI)
    buf.extend_from_slice(collection_mint.as_ref());
    buf.push(0); // uses: None
    buf.push(0); // token_program_version: Original
    buf.extend_from_slice(&1u32.to_le_bytes()); // creators
    buf.extend_from_slice(creator.as_ref());
    buf.push(1); //   verified
    buf.push(100); //   share
    buf
}

/// Build `mint_to_collection_v1` with `authority` acting as payer, tree
/// delegate and collection authority.
pub fn build_mint_to_collection_instruction(
    authority: &Pubkey,
    leaf_owner: &Pubkey,
    merkle_tree: &Pubkey,
    collection_mint: &Pubkey,
    name: &str,
    uri: &str,
) -> Result<Instruction> {
    let tree_config = pda::tree_config_address(merkle_tree)?;
    let collection_metadata = pda::metadata_address(collection_mint)?;
    let collection_edition = pda::edition_address(collection_mint)?;
    let bubblegum_signer = pda::bubblegum_signer()?;

    let mut data = Vec::with_capacity(8 + 128);
    data.extend_from_slice(&instruction_discriminator("mint_to_collection_v1"));
    data.extend_from_slice(&encode_metadata_args(name, uri, collection_mint, authority));

    Ok(Instruction {
        program_id: BUBBLEGUM_PROGRAM_ID,
        accounts: vec![
            AccountMeta::new(tree_config, false),
            AccountMeta::new_readonly(*leaf_owner, false),
            AccountMeta::new_readonly(*leaf_owner, false), // leaf_delegate
            AccountMeta::new(*merkle_tree, false),
            AccountMeta::new(*authority, true),            // payer
            AccountMeta::new_readonly(*authority, true),   // tree_creator_or_delegate
            AccountMeta::new_readonly(*authority, true),   // collection_authority
            // Optional collection_authority_record_pda: program id means "none".
            AccountMeta::new_readonly(BUBBLEGUM_PROGRAM_ID, false),
            AccountMeta::new_readonly(*collection_mint, false),
            AccountMeta::new(collection_metadata, false),
            AccountMeta::new_readonly(collection_edition, false),
            AccountMeta::new_readonly(bubblegum_signer, false),
            AccountMeta::new_readonly(SPL_NOOP_PROGRAM_ID, false),
            AccountMeta::new_readonly(SPL_ACCOUNT_COMPRESSION_PROGRAM_ID, false),
            AccountMeta::new_readonly(TOKEN_METADATA_PROGRAM_ID, false),
            AccountMeta::new_readonly(SYSTEM_PROGRAM_ID, false),
        ],
        data,
    })
}

/// [`CompressedMinter`] that talks to Bubblegum through a [`Ledger`].
///
/// Mints are serialized: the leaf index is read from the tree config before
/// sending, so two in-flight mints from this process would otherwise
/// predict the same leaf.
pub struct BubblegumMinter {
    ledger: Arc<dyn Ledger>,
    lock: Mutex<()>,
}

impl BubblegumMinter {
    pub fn new(ledger: Arc<dyn Ledger>) -> Self {
        Self {
            ledger,
            lock: Mutex::new(()),
        }
    }

    #[instrument(skip_all, fields(owner = %args.leaf_owner, tree = %args.merkle_tree))]
    async fn mint_serialized(&self, args: &MintArgs) -> Result<MintedAsset> {
        let _guard = self.lock.lock().await;

        let tree_config_address = pda::tree_config_address(&args.merkle_tree)?;
        let data = self
            .ledger
            .account_data(&tree_config_address)
            .await?
            .with_context(|| format!("tree config {tree_config_address} not found"))?;
        let tree_config = TreeConfig::decode(&data)?;
        let leaf_index = tree_config.num_minted;
        anyhow::ensure!(
            leaf_index < tree_config.total_mint_capacity,
            "merkle tree {} is full ({} of {} minted)",
            args.merkle_tree,
            tree_config.num_minted,
            tree_config.total_mint_capacity
        );

        let operator = args.operator.as_ref();
        let ix = build_mint_to_collection_instruction(
            &operator.pubkey(),
            &args.leaf_owner,
            &args.merkle_tree,
            &args.collection_mint,
            &args.name,
            &args.uri,
        )?;
        let signature = self
            .ledger
            .send(&[ix], &[operator])
            .await
            .context("cNFT mint failed")?;

        let asset_id = pda::leaf_asset_id(&args.merkle_tree, leaf_index)?;
        info!(asset_id = %asset_id, leaf_index, signature = %signature, "Minted cNFT");

        Ok(MintedAsset {
            asset_id,
            leaf_index,
            signature,
        })
    }
}

impl CompressedMinter for BubblegumMinter {
    fn mint<'a>(&'a self, args: &'a MintArgs) -> BoxFuture<'a, Result<MintedAsset>> {
        Box::pin(self.mint_serialized(args))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mint_discriminator_matches_bubblegum() {
        assert_eq!(
            instruction_discriminator("mint_to_collection_v1"),
            [153, 18, 178, 47, 197, 158, 86, 15]
        );
    }

    #[test]
    fn clip_respects_char_boundaries() {
        assert_eq!(clip_to_bytes("short", MAX_NAME_BYTES), "short");
        assert_eq!(clip_to_bytes(&"n".repeat(40), MAX_NAME_BYTES).len(), MAX_NAME_BYTES);
        // 'é' is two bytes; 16 of them fill the limit exactly, a 17th is dropped.
        let accented = "é".repeat(17);
        assert_eq!(clip_to_bytes(&accented, MAX_NAME_BYTES), "é".repeat(16));
        // A 3-byte char straddling byte 32 is dropped whole.
        let mixed = format!("{}{}", "a".repeat(31), "語");
        assert_eq!(clip_to_bytes(&mixed, MAX_NAME_BYTES), "a".repeat(31));
    }

    #[test]
    fn metadata_args_layout() {
        let collection = Pubkey::new_unique();
        let creator = Pubkey::new_unique();
        let buf = encode_metadata_args("Oracle", "https://x/y", &collection, &creator);

        // name
        assert_eq!(buf[0..4], 6u32.to_le_bytes());
        assert_eq!(&buf[4..10], b"Oracle");
        // symbol (empty)
        assert_eq!(buf[10..14], 0u32.to_le_bytes());
        // uri
        assert_eq!(buf[14..18], 11u32.to_le_bytes());
        assert_eq!(&buf[18..29], b"https://x/y");
        // seller fee
        assert_eq!(buf[29..31], 550u16.to_le_bytes());
        // collection key follows primary_sale, is_mutable, edition_nonce,
        // token_standard (2), collection tag and verified flag.
        assert_eq!(buf[38..70], collection.to_bytes());
        // creators: one entry, verified, 100%
        let tail = &buf[buf.len() - 34..];
        assert_eq!(tail[..32], creator.to_bytes());
        assert_eq!(tail[32..], [1, 100]);
    }

    #[test]
    fn mint_instruction_signers() {
        let authority = Pubkey::new_unique();
        let ix = build_mint_to_collection_instruction(
            &authority,
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            &Pubkey::new_unique(),
            "n",
            "u",
        )
        .unwrap();
        assert_eq!(ix.program_id, BUBBLEGUM_PROGRAM_ID);
        assert_eq!(ix.accounts.len(), 16);
        let signers: Vec<_> = ix.accounts.iter().filter(|a| a.is_signer).collect();
        assert_eq!(signers.len(), 3);
        assert!(signers.iter().all(|a| a.pubkey == authority));
    }
}
