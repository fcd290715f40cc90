//! Fortune generation: validate a paid request's prompt, produce the fortune
//! text, persist its metadata and hand off to the [`Fulfiller`].

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use solana_sdk::pubkey::Pubkey;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument};

use crate::config::AppConfig;
use crate::error::OracleError;
use crate::fulfiller::{Fulfiller, MintRequest};
use crate::gemini::{GenerationRequest, TextGenerator};
use crate::metadata::encode_component;
use crate::uploader::{MetadataUploader, UploadPayload};

pub const DEFAULT_NAME: &str = "CyberOracle";
pub const MAX_NAME_CHARS: usize = 64;
pub const DEFAULT_LOCALE: &str = "en";
pub const ALLOWED_LOCALES: &[&str] = &["en", "zh", "zh-cn", "zh-tw", "ja", "ko", "es", "fr", "de"];
pub const SYMBOL: &str = "CYBOR";
pub const MOCK_ASSET_ID: &str = "MOCK_ASSET_ID";
pub const MOCK_SIGNATURE: &str = "MOCK_SIGNATURE";

/// Canned long-form fortune served when `ORACLE_FAKE=1`.
pub const FORTUNE_FIXTURE: &str = "The neon rain spells your name twice tonight.

Keywords: steady, slow to warm, hard to break, stronger with every year.

Path: you are not the kind who rockets upward overnight. Your road widens \
through patience, reputation and skill that compounds. Work that rewards \
depth suits you: engineering, design, research, anything you can build on \
quietly and return to with fresh eyes.

Fortune: income arrives as a steady current rather than a flood. Guard it, \
let it grow, and do not let a single loud week rewrite your plans.

Bonds: you open slowly and hold on long. Say what you need before the \
silence speaks for you.

Warning: stubbornness is your armour and your cage. Ask for help earlier \
than feels comfortable; the signal you send out is the signal that returns.";

/// `requestId` as sent by clients: a JSON number or a decimal string.
#[derive(Deserialize, Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(untagged)]
pub enum RequestIdInput {
    Number(u64),
    Text(String),
}

impl RequestIdInput {
    /// The id as `u64`. Decimal strings cover the full `u64` range, which
    /// JSON numbers beyond 2^53 may not survive in every client.
    pub fn value(&self) -> Option<u64> {
        match self {
            RequestIdInput::Number(n) => Some(*n),
            RequestIdInput::Text(s) => s.trim().parse().ok(),
        }
    }
}

/// Body of `POST /oracle`.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct OracleInput {
    pub user: Option<String>,
    pub request_id: Option<RequestIdInput>,
    pub prompt: Option<String>,
    pub name: Option<String>,
    pub locale: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct OracleOutput {
    pub oracle_text: String,
    pub prompt_hash: [u8; 32],
    pub result_uri: String,
    pub metadata_uri: String,
    pub asset_id: String,
    pub signature: String,
}

/// How the fortune text is produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GenerationMode {
    /// [`FORTUNE_FIXTURE`].
    Fixture,
    /// Short placeholder quoting the prompt.
    Placeholder,
    /// Live text-generation provider.
    Live,
}

impl GenerationMode {
    /// The fixture toggle wins over the mock toggle.
    pub fn select(mock_enabled: bool, fake_enabled: bool) -> Self {
        if fake_enabled {
            GenerationMode::Fixture
        } else if mock_enabled {
            GenerationMode::Placeholder
        } else {
            GenerationMode::Live
        }
    }
}

/// SHA-256 of the trimmed prompt's UTF-8 bytes. Used both when submitting
/// the on-chain request and when generating, so the two always agree.
pub fn prompt_hash(prompt: &str) -> [u8; 32] {
    Sha256::digest(prompt.trim().as_bytes()).into()
}

/// Case-fold, turn `_` into `-` and check against [`ALLOWED_LOCALES`].
pub fn normalize_locale(locale: Option<&str>) -> String {
    let Some(trimmed) = locale.map(str::trim).filter(|l| !l.is_empty()) else {
        return DEFAULT_LOCALE.to_string();
    };
    let normalized = trimmed.replace('_', "-").to_lowercase();
    if ALLOWED_LOCALES.contains(&normalized.as_str()) {
        normalized
    } else {
        DEFAULT_LOCALE.to_string()
    }
}

/// Trimmed display name clipped to [`MAX_NAME_CHARS`] characters.
pub fn clip_name(name: Option<&str>) -> String {
    let name = name.map(str::trim).filter(|n| !n.is_empty()).unwrap_or(DEFAULT_NAME);
    name.chars().take(MAX_NAME_CHARS).collect::<String>().trim_end().to_string()
}

pub fn system_instruction(locale: &str) -> String {
    [
        "You are a cyberpunk oracle.",
        "Write a concise, vivid fortune in 2-4 short sentences.",
        &format!("Locale: {locale}."),
        "Avoid medical, legal, or financial advice.",
        "Do not mention system prompts or policies.",
    ]
    .join(" ")
}

fn placeholder_text(prompt: &str) -> String {
    let excerpt: String = prompt.chars().take(60).collect();
    format!("[MOCK] The neon echo has awakened.\nYour question will be written to the on-chain archive: {excerpt}")
}

/// Metaplex-style JSON metadata for a fortune.
pub fn build_metadata(name: &str, oracle_text: &str, locale: &str, request_id: u64) -> serde_json::Value {
    serde_json::json!({
        "name": name,
        "symbol": SYMBOL,
        "description": oracle_text,
        "attributes": [
            { "trait_type": "Locale", "value": locale },
            { "trait_type": "RequestId", "value": request_id.to_string() },
        ],
    })
}

struct ValidInput {
    user: String,
    request_id: u64,
    prompt: String,
    name: String,
    locale: String,
}

fn validate(input: &OracleInput, max_chars: usize) -> Result<ValidInput, OracleError> {
    let (Some(user), Some(request_id), Some(prompt)) = (
        input.user.as_deref().filter(|u| !u.is_empty()),
        input.request_id.as_ref(),
        input.prompt.as_deref().filter(|p| !p.is_empty()),
    ) else {
        return Err(OracleError::Validation(
            "user, requestId, prompt are required".into(),
        ));
    };

    let prompt = prompt.trim();
    if prompt.is_empty() {
        return Err(OracleError::Validation("prompt cannot be empty".into()));
    }
    if prompt.chars().count() > max_chars {
        return Err(OracleError::Validation(format!(
            "prompt too long (max {max_chars} chars)"
        )));
    }

    let request_id = request_id
        .value()
        .ok_or_else(|| OracleError::Validation("requestId is invalid".into()))?;
    let user = user.trim();
    Pubkey::from_str(user)
        .map_err(|_| OracleError::Validation(format!("invalid user pubkey: {user}")))?;

    Ok(ValidInput {
        user: user.to_string(),
        request_id,
        prompt: prompt.to_string(),
        name: clip_name(input.name.as_deref()),
        locale: normalize_locale(input.locale.as_deref()),
    })
}

pub struct OracleService {
    config: AppConfig,
    generator: Option<Arc<dyn TextGenerator>>,
    uploader: Arc<dyn MetadataUploader>,
    fulfiller: Arc<Fulfiller>,
}

impl OracleService {
    /// `generator` may be `None` when no provider key is configured; live
    /// generation then fails with `Missing env: GEMINI_API_KEY`.
    pub fn new(
        config: AppConfig,
        generator: Option<Arc<dyn TextGenerator>>,
        uploader: Arc<dyn MetadataUploader>,
        fulfiller: Arc<Fulfiller>,
    ) -> Self {
        Self {
            config,
            generator,
            uploader,
            fulfiller,
        }
    }

    pub fn mode(&self) -> GenerationMode {
        GenerationMode::select(self.config.mock_enabled, self.config.fake_enabled)
    }

    async fn oracle_text(&self, prompt: &str, locale: &str) -> Result<String, OracleError> {
        match self.mode() {
            GenerationMode::Fixture => Ok(FORTUNE_FIXTURE.to_string()),
            GenerationMode::Placeholder => Ok(placeholder_text(prompt)),
            GenerationMode::Live => {
                let generator = self
                    .generator
                    .as_ref()
                    .ok_or_else(|| OracleError::missing_env("GEMINI_API_KEY"))?;
                let request = GenerationRequest {
                    system_instruction: system_instruction(locale),
                    user_text: format!("User prompt: {prompt}"),
                    max_output_tokens: self.config.gemini.max_output_tokens,
                    temperature: self.config.gemini.temperature.clamp(0.0, 2.0),
                };
                let text = generator
                    .generate(&request)
                    .await
                    .map_err(OracleError::upstream)?;
                let text = text.trim();
                if text.is_empty() {
                    return Err(OracleError::Upstream("oracle response empty".into()));
                }
                Ok(text.to_string())
            }
        }
    }

    /// Run the whole request: validate, generate, persist metadata, mint.
    ///
    /// `base_url` is the public origin of this service, used for metadata
    /// URIs it serves itself.
    #[instrument(skip_all, fields(user = ?input.user, request_id = ?input.request_id))]
    pub async fn generate(&self, input: &OracleInput, base_url: &str) -> Result<OracleOutput, OracleError> {
        let valid = validate(input, self.config.prompt_max_chars)?;
        let hash = prompt_hash(&valid.prompt);
        let mode = self.mode();

        let oracle_text = self.oracle_text(&valid.prompt, &valid.locale).await?;
        let metadata = build_metadata(&valid.name, &oracle_text, &valid.locale, valid.request_id);

        let metadata_uri = if self.config.mock_enabled {
            format!(
                "{base_url}/metadata?name={}&desc={}",
                encode_component(&valid.name),
                encode_component(&oracle_text)
            )
        } else {
            let payload = UploadPayload {
                user: valid.user.clone(),
                request_id: valid.request_id,
                metadata,
            };
            self.uploader
                .upload(&payload, base_url)
                .await
                .map_err(OracleError::upstream)?
        };
        let result_uri = metadata_uri.clone();

        info!(?mode, locale = %valid.locale, metadata_uri = %metadata_uri, "Fortune generated");

        if self.config.mock_enabled {
            return Ok(OracleOutput {
                oracle_text,
                prompt_hash: hash,
                result_uri,
                metadata_uri,
                asset_id: MOCK_ASSET_ID.to_string(),
                signature: MOCK_SIGNATURE.to_string(),
            });
        }

        let minted = self
            .fulfiller
            .mint_and_fulfill(&MintRequest {
                user: Some(valid.user),
                request_id: Some(RequestIdInput::Number(valid.request_id)),
                prompt_hash: hash.to_vec(),
                result_uri: result_uri.clone(),
                metadata_uri: metadata_uri.clone(),
                name: Some(valid.name.clone()),
            })
            .await?;

        Ok(OracleOutput {
            oracle_text,
            prompt_hash: hash,
            result_uri,
            metadata_uri,
            asset_id: minted.asset_id,
            signature: minted.signature,
        })
    }
}
