//! Minting & fulfillment: mint a cNFT for a paid request, then record it
//! on-chain with `fulfill_oracle`.
//!
//! The two steps are separate transactions. Each completed step goes to the
//! [`Journal`], which gives two guarantees a bare mint-then-fulfill would not:
//!
//! - a retried call for a request that was already minted reuses the
//!   journaled asset instead of minting a second cNFT;
//! - [`Fulfiller::reconcile`] (run at startup) finishes fulfillment for
//!   requests that were minted before a crash or a failed `fulfill_oracle`.

use serde::{Deserialize, Serialize};
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::Signer;
use std::collections::HashMap;
use std::str::FromStr;
use std::sync::{Arc, Mutex};
use tracing::{error, info, instrument, warn};

use crate::bubblegum::{self, CompressedMinter, MintArgs, MAX_NAME_BYTES, MAX_URI_BYTES};
use crate::config::{AppConfig, MintSettings};
use crate::error::OracleError;
use crate::instructions;
use crate::journal::{Journal, SagaStep};
use crate::ledger::Ledger;
use crate::oracle::{RequestIdInput, DEFAULT_NAME};
use crate::pda;
use crate::state::OracleRequest;

/// Body of `POST /mint`. Every field is optional at the JSON level so that
/// missing fields surface as validation errors rather than parse errors.
#[derive(Deserialize, Debug, Clone, Default)]
#[serde(rename_all = "camelCase", default)]
pub struct MintRequest {
    pub user: Option<String>,
    pub request_id: Option<RequestIdInput>,
    pub prompt_hash: Vec<u8>,
    pub result_uri: String,
    pub metadata_uri: String,
    pub name: Option<String>,
}

#[derive(Serialize, Debug, Clone, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct MintOutcome {
    pub asset_id: String,
    /// Signature of the mint transaction.
    pub signature: String,
}

/// Counts from one [`Fulfiller::reconcile`] pass.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ReconcileReport {
    pub fulfilled: usize,
    pub already_fulfilled: usize,
    pub failed: usize,
}

/// Validated form of [`MintRequest`].
struct ValidMint {
    user: Pubkey,
    request_id: u64,
    prompt_hash: [u8; 32],
    result_uri: String,
    metadata_uri: String,
    name: String,
}

fn validate(req: &MintRequest) -> Result<ValidMint, OracleError> {
    let user = req
        .user
        .as_deref()
        .ok_or_else(|| OracleError::Validation("user is required".into()))?;
    let user = Pubkey::from_str(user.trim())
        .map_err(|_| OracleError::Validation(format!("invalid user pubkey: {user}")))?;
    let request_id = req
        .request_id
        .as_ref()
        .and_then(RequestIdInput::value)
        .ok_or_else(|| OracleError::Validation("requestId is invalid".into()))?;
    let prompt_hash: [u8; 32] = req
        .prompt_hash
        .as_slice()
        .try_into()
        .map_err(|_| OracleError::Validation("promptHash must be 32 bytes".into()))?;
    if req.result_uri.is_empty() || req.metadata_uri.is_empty() {
        return Err(OracleError::Validation(
            "resultUri and metadataUri are required".into(),
        ));
    }
    if req.result_uri.len() > OracleRequest::MAX_RESULT_URI {
        return Err(OracleError::Validation(format!(
            "resultUri too long (max {} bytes)",
            OracleRequest::MAX_RESULT_URI
        )));
    }
    if req.metadata_uri.len() > MAX_URI_BYTES {
        return Err(OracleError::Validation(format!(
            "metadataUri too long (max {MAX_URI_BYTES} bytes)"
        )));
    }
    let name = req
        .name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty())
        .unwrap_or(DEFAULT_NAME);
    let name = bubblegum::clip_to_bytes(name, MAX_NAME_BYTES).trim_end().to_string();

    Ok(ValidMint {
        user,
        request_id,
        prompt_hash,
        result_uri: req.result_uri.clone(),
        metadata_uri: req.metadata_uri.clone(),
        name,
    })
}

/// Per-request async locks. An entry only lives while some call holds it.
type RequestLocks = Mutex<HashMap<(Pubkey, u64), Arc<tokio::sync::Mutex<()>>>>;

pub struct Fulfiller {
    config: AppConfig,
    ledger: Arc<dyn Ledger>,
    minter: Arc<dyn CompressedMinter>,
    journal: Arc<Journal>,
    in_flight: RequestLocks,
}

impl Fulfiller {
    pub fn new(
        config: AppConfig,
        ledger: Arc<dyn Ledger>,
        minter: Arc<dyn CompressedMinter>,
        journal: Arc<Journal>,
    ) -> Self {
        Self {
            config,
            ledger,
            minter,
            journal,
            in_flight: Mutex::new(HashMap::new()),
        }
    }

    /// Lock serializing every saga step for `(user, request_id)`.
    fn request_lock(&self, user: Pubkey, request_id: u64) -> Arc<tokio::sync::Mutex<()>> {
        let mut locks = self.in_flight.lock().unwrap_or_else(|e| e.into_inner());
        locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        locks.entry((user, request_id)).or_default().clone()
    }

    /// Requests minted but not yet fulfilled, per the journal.
    pub fn pending_count(&self) -> usize {
        self.journal.pending_fulfillment().len()
    }

    /// Fetch and decode the request record, `None` if it does not exist.
    async fn load_request(&self, user: &Pubkey, request_id: u64) -> Result<Option<OracleRequest>, OracleError> {
        let (address, _) = pda::request_address(&self.config.program_id, user, request_id)
            .map_err(|e| OracleError::Upstream(e.to_string()))?;
        let data = self
            .ledger
            .account_data(&address)
            .await
            .map_err(OracleError::upstream)?;
        data.map(|d| OracleRequest::decode(&d))
            .transpose()
            .map_err(|e| OracleError::Upstream(e.to_string()))
    }

    /// Mint the cNFT for `(user, requestId)` and fulfill the request.
    #[instrument(skip_all, fields(user = ?req.user, request_id = ?req.request_id))]
    pub async fn mint_and_fulfill(&self, req: &MintRequest) -> Result<MintOutcome, OracleError> {
        let mint = validate(req)?;
        let settings = self.config.mint_settings()?;
        let user_str = mint.user.to_string();

        // Held from the on-chain check through the journal write, so a
        // concurrent call for the same request waits and then sees the
        // journaled asset or the fulfilled record.
        let lock = self.request_lock(mint.user, mint.request_id);
        let _guard = lock.lock().await;

        let record = self
            .load_request(&mint.user, mint.request_id)
            .await?
            .ok_or_else(|| {
                OracleError::Upstream(format!(
                    "oracle request {} for {} not found",
                    mint.request_id, mint.user
                ))
            })?;
        if record.fulfilled {
            return Err(OracleError::Validation(format!(
                "oracle request {} already fulfilled",
                mint.request_id
            )));
        }
        if record.prompt_hash != mint.prompt_hash {
            return Err(OracleError::Validation(
                "promptHash does not match the on-chain request".into(),
            ));
        }

        let (asset_id, mint_signature) = match self.journal.latest(&user_str, mint.request_id) {
            Some(SagaStep::Minted {
                asset_id,
                signature,
                ..
            }) => {
                info!(asset_id = %asset_id, "Request already minted, reusing asset");
                let asset_id = Pubkey::from_str(&asset_id)
                    .map_err(|e| OracleError::Upstream(format!("journaled asset id invalid: {e}")))?;
                (asset_id, signature)
            }
            _ => {
                let minted = self
                    .minter
                    .mint(&MintArgs {
                        leaf_owner: mint.user,
                        name: mint.name.clone(),
                        uri: mint.metadata_uri.clone(),
                        merkle_tree: settings.merkle_tree,
                        collection_mint: settings.collection_mint,
                        operator: settings.operator.clone(),
                    })
                    .await
                    .map_err(OracleError::upstream)?;
                self.journal
                    .record(
                        &user_str,
                        mint.request_id,
                        SagaStep::Minted {
                            asset_id: minted.asset_id.to_string(),
                            signature: minted.signature.clone(),
                            result_uri: mint.result_uri.clone(),
                        },
                    )
                    .map_err(OracleError::upstream)?;
                (minted.asset_id, minted.signature)
            }
        };

        let fulfill_signature = self
            .fulfill(&settings, &mint.user, mint.request_id, &mint.result_uri, &asset_id)
            .await?;
        self.journal
            .record(
                &user_str,
                mint.request_id,
                SagaStep::Fulfilled {
                    asset_id: asset_id.to_string(),
                    signature: mint_signature.clone(),
                },
            )
            .map_err(OracleError::upstream)?;

        info!(
            asset_id = %asset_id,
            mint_signature = %mint_signature,
            fulfill_signature = %fulfill_signature,
            "Request fulfilled"
        );

        Ok(MintOutcome {
            asset_id: asset_id.to_string(),
            signature: mint_signature,
        })
    }

    /// Send `fulfill_oracle` signed by the operator.
    async fn fulfill(
        &self,
        settings: &MintSettings,
        user: &Pubkey,
        request_id: u64,
        result_uri: &str,
        asset_id: &Pubkey,
    ) -> Result<String, OracleError> {
        let operator = settings.operator.as_ref();
        let ix = instructions::fulfill_oracle(
            &self.config.program_id,
            &operator.pubkey(),
            user,
            request_id,
            result_uri,
            asset_id,
            &settings.collection_mint,
        )
        .map_err(|e| OracleError::Upstream(e.to_string()))?;

        self.ledger
            .send(&[ix], &[operator])
            .await
            .map_err(|e| OracleError::upstream(e.context("fulfill_oracle failed")))
    }

    /// Finish every journaled request that was minted but not fulfilled.
    ///
    /// Each pending request is checked on-chain first; a request the program
    /// already marks fulfilled is only journaled, never re-sent.
    pub async fn reconcile(&self) -> ReconcileReport {
        let mut report = ReconcileReport::default();
        let pending = self.journal.pending_fulfillment();
        if pending.is_empty() {
            return report;
        }
        info!(count = pending.len(), "Reconciling minted but unfulfilled requests");

        let settings = match self.config.mint_settings() {
            Ok(s) => s,
            Err(e) => {
                error!(error = %e, "Cannot reconcile without mint settings");
                report.failed = pending.len();
                return report;
            }
        };

        for entry in pending {
            let SagaStep::Minted {
                asset_id,
                signature,
                result_uri,
            } = entry.step
            else {
                continue;
            };
            let (Ok(user), Ok(asset)) = (Pubkey::from_str(&entry.user), Pubkey::from_str(&asset_id)) else {
                warn!(user = %entry.user, asset_id = %asset_id, "Malformed journal entry, skipping");
                report.failed += 1;
                continue;
            };
            let lock = self.request_lock(user, entry.request_id);
            let _guard = lock.lock().await;

            match self.load_request(&user, entry.request_id).await {
                Ok(Some(record)) if record.fulfilled => {
                    if let Err(e) = self.journal.record(
                        &entry.user,
                        entry.request_id,
                        SagaStep::Fulfilled {
                            asset_id: record.asset_id.to_string(),
                            signature,
                        },
                    ) {
                        warn!(error = %e, "Failed to journal fulfilled request");
                    }
                    report.already_fulfilled += 1;
                }
                Ok(Some(_)) => {
                    match self
                        .fulfill(&settings, &user, entry.request_id, &result_uri, &asset)
                        .await
                    {
                        Ok(sig) => {
                            info!(
                                user = %user,
                                request_id = entry.request_id,
                                signature = %sig,
                                "Reconciled fulfillment"
                            );
                            if let Err(e) = self.journal.record(
                                &entry.user,
                                entry.request_id,
                                SagaStep::Fulfilled { asset_id, signature },
                            ) {
                                warn!(error = %e, "Failed to journal reconciled request");
                            }
                            report.fulfilled += 1;
                        }
                        Err(e) => {
                            error!(user = %user, request_id = entry.request_id, error = %e, "Reconciliation failed");
                            report.failed += 1;
                        }
                    }
                }
                Ok(None) => {
                    warn!(user = %user, request_id = entry.request_id, "Journaled request not found on-chain");
                    report.failed += 1;
                }
                Err(e) => {
                    error!(user = %user, request_id = entry.request_id, error = %e, "Failed to load request");
                    report.failed += 1;
                }
            }
        }

        report
    }
}
