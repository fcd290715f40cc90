//! Application configuration loaded from environment variables.
//!
//! Nothing is required at startup. Keys only some code paths need
//! (`CYBERORACLE_AUTHORITY_SECRET`, `BUBBLEGUM_TREE_ADDRESS`,
//! `BUBBLEGUM_COLLECTION_MINT`, `GEMINI_API_KEY`) are checked when that path
//! runs and fail with `Missing env: <KEY>`.
//!
//! Optional: `HTTP_PORT`, `PUBLIC_BASE_URL`, `SOLANA_RPC_URL`,
//!           `CYBERORACLE_PROGRAM_ID`, `METADATA_UPLOAD_URL`, `GEMINI_MODEL`,
//!           `GEMINI_MAX_OUTPUT_TOKENS`, `GEMINI_TEMPERATURE`,
//!           `ORACLE_PROMPT_MAX_CHARS`, `CYBERORACLE_MOCK`, `ORACLE_FAKE`,
//!           `JOURNAL_PATH`, `HTTP_TIMEOUT_SECS`, `RPC_TIMEOUT_SECS`

use anyhow::{Context, Result};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Keypair;
use std::path::PathBuf;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use crate::error::OracleError;

/// Program id of the deployed CyberOracle program.
pub const DEFAULT_PROGRAM_ID: &str = "862LYnc3jZJ6bFmjyMjE9NMwehJaAe2Do5UbbEV1kbJU";
pub const DEFAULT_RPC_URL: &str = "https://api.devnet.solana.com";
pub const DEFAULT_GEMINI_MODEL: &str = "gemini-1.5-flash";

/// Settings for the live text-generation provider.
#[derive(Clone, Debug)]
pub struct GeminiSettings {
    pub api_key: Option<String>,
    pub model: String,
    pub max_output_tokens: u32,
    /// Already clamped to `[0, 2]`.
    pub temperature: f32,
}

/// Everything the mint-then-fulfill path needs, resolved at call time.
#[derive(Clone)]
pub struct MintSettings {
    pub operator: Arc<Keypair>,
    pub merkle_tree: Pubkey,
    pub collection_mint: Pubkey,
}

/// Application configuration for the CyberOracle backend.
#[derive(Clone, Debug)]
pub struct AppConfig {
    /// HTTP server port.
    pub http_port: u16,
    /// Origin used when building metadata URIs. Falls back to the origin of
    /// the incoming request.
    pub public_base_url: Option<String>,
    /// Solana JSON-RPC endpoint (HTTP).
    pub rpc_url: String,
    /// The deployed CyberOracle program id.
    pub program_id: Pubkey,
    /// Operator key material: JSON byte array or base58 secret key.
    pub authority_secret: Option<String>,
    pub tree_address: Option<String>,
    pub collection_mint: Option<String>,
    /// Remote metadata upload endpoint. Unset means the in-process store.
    pub metadata_upload_url: Option<String>,
    pub gemini: GeminiSettings,
    /// Maximum trimmed prompt length, in characters.
    pub prompt_max_chars: usize,
    /// `CYBERORACLE_MOCK=1`: placeholder text, inline metadata, no minting.
    pub mock_enabled: bool,
    /// `ORACLE_FAKE=1`: canned long-form fortune instead of the provider.
    pub fake_enabled: bool,
    /// Append-only journal for the mint/fulfill saga.
    pub journal_path: PathBuf,
    /// Timeout for outbound HTTP calls (provider, upload endpoint).
    pub http_timeout: Duration,
    /// Timeout for Solana RPC calls.
    pub rpc_timeout: Duration,
}

/// Parse `value` as `T`, falling back to `default` when unset or out of range.
fn parse_with_default<T: FromStr>(value: Option<String>, default: T) -> T {
    value.and_then(|v| v.parse().ok()).unwrap_or(default)
}

impl AppConfig {
    /// Load configuration from environment variables.
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Load configuration from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());
        let trimmed = |key: &str| get(key).map(|v| v.trim().to_string());

        let http_port = get("HTTP_PORT")
            .and_then(|v| v.parse().ok())
            .unwrap_or(8080);

        let rpc_url = get("SOLANA_RPC_URL").unwrap_or_else(|| DEFAULT_RPC_URL.into());

        let program_id_str = get("CYBERORACLE_PROGRAM_ID").unwrap_or_else(|| DEFAULT_PROGRAM_ID.into());
        let program_id = Pubkey::from_str(&program_id_str)
            .with_context(|| format!("invalid CYBERORACLE_PROGRAM_ID: {program_id_str}"))?;

        let temperature = get("GEMINI_TEMPERATURE")
            .and_then(|v| v.trim().parse::<f32>().ok())
            .filter(|t| t.is_finite())
            .unwrap_or(0.7)
            .clamp(0.0, 2.0);

        let gemini = GeminiSettings {
            api_key: get("GEMINI_API_KEY"),
            model: get("GEMINI_MODEL").unwrap_or_else(|| DEFAULT_GEMINI_MODEL.into()),
            max_output_tokens: parse_with_default(trimmed("GEMINI_MAX_OUTPUT_TOKENS"), 200u32),
            temperature,
        };

        Ok(Self {
            http_port,
            public_base_url: get("PUBLIC_BASE_URL").map(|v| v.trim_end_matches('/').to_string()),
            rpc_url,
            program_id,
            authority_secret: get("CYBERORACLE_AUTHORITY_SECRET"),
            tree_address: get("BUBBLEGUM_TREE_ADDRESS"),
            collection_mint: get("BUBBLEGUM_COLLECTION_MINT"),
            metadata_upload_url: get("METADATA_UPLOAD_URL"),
            gemini,
            prompt_max_chars: parse_with_default(trimmed("ORACLE_PROMPT_MAX_CHARS"), 600usize),
            mock_enabled: get("CYBERORACLE_MOCK").as_deref() == Some("1"),
            fake_enabled: get("ORACLE_FAKE").as_deref() == Some("1"),
            journal_path: get("JOURNAL_PATH")
                .map(PathBuf::from)
                .unwrap_or_else(|| PathBuf::from("cyberoracle-journal.jsonl")),
            http_timeout: Duration::from_secs(parse_with_default(trimmed("HTTP_TIMEOUT_SECS"), 30u64)),
            rpc_timeout: Duration::from_secs(parse_with_default(trimmed("RPC_TIMEOUT_SECS"), 30u64)),
        })
    }

    /// Resolve operator key, tree and collection for a mint.
    pub fn mint_settings(&self) -> Result<MintSettings, OracleError> {
        let secret = self
            .authority_secret
            .as_deref()
            .ok_or_else(|| OracleError::missing_env("CYBERORACLE_AUTHORITY_SECRET"))?;
        let operator = parse_keypair(secret)
            .map_err(|e| OracleError::Config(format!("invalid CYBERORACLE_AUTHORITY_SECRET: {e:#}")))?;

        Ok(MintSettings {
            operator: Arc::new(operator),
            merkle_tree: required_pubkey(self.tree_address.as_deref(), "BUBBLEGUM_TREE_ADDRESS")?,
            collection_mint: required_pubkey(
                self.collection_mint.as_deref(),
                "BUBBLEGUM_COLLECTION_MINT",
            )?,
        })
    }
}

fn required_pubkey(value: Option<&str>, key: &str) -> Result<Pubkey, OracleError> {
    let value = value.ok_or_else(|| OracleError::missing_env(key))?;
    Pubkey::from_str(value.trim()).map_err(|e| OracleError::Config(format!("invalid {key}: {e}")))
}

/// Parse a secret key given either as a JSON byte array (the
/// `solana-keygen` file format) or as a base58 string.
pub fn parse_keypair(value: &str) -> Result<Keypair> {
    let value = value.trim();
    let bytes: Vec<u8> = if value.starts_with('[') {
        serde_json::from_str(value).context("secret key is not a JSON byte array")?
    } else {
        bs58::decode(value)
            .into_vec()
            .context("secret key is not valid base58")?
    };
    Keypair::try_from(bytes.as_slice())
        .map_err(|e| anyhow::anyhow!("{e}"))
        .context("secret key must be 64 bytes")
}
