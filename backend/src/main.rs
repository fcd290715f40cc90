//! CyberOracle backend
//!
//! Off-chain service for the CyberOracle program. Generates fortunes for paid
//! on-chain requests, mints each one as a compressed NFT and records the
//! result with `fulfill_oracle`.
//!
//! - **Reconciliation**: at startup, finishes requests that were minted but
//!   never fulfilled.
//! - **HTTP server**: `/oracle`, `/mint`, `/upload`, `/metadata` and the
//!   `/health` / `/status` probes.

use actix_web::{web, App, HttpServer};
use anyhow::Context;
use std::sync::Arc;
use tracing::{info, warn};
use tracing_subscriber::{fmt, EnvFilter};

use cyberoracle_backend::api::{self, AppState};
use cyberoracle_backend::bubblegum::BubblegumMinter;
use cyberoracle_backend::config::AppConfig;
use cyberoracle_backend::fulfiller::{Fulfiller, ReconcileReport};
use cyberoracle_backend::gemini::{GeminiClient, TextGenerator};
use cyberoracle_backend::journal::Journal;
use cyberoracle_backend::ledger::{Ledger, RpcLedger};
use cyberoracle_backend::metadata::{InMemoryMetadataStore, MetadataStore};
use cyberoracle_backend::metrics::Metrics;
use cyberoracle_backend::oracle::OracleService;
use cyberoracle_backend::uploader::{HttpUploader, LocalUploader, MetadataUploader};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    dotenvy::dotenv().ok();

    fmt::Subscriber::builder()
        .with_env_filter(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,solana_client=warn,solana_rpc_client=warn,hyper=warn,reqwest=warn")),
        )
        .with_target(true)
        .with_ansi(true)
        .init();

    let config = AppConfig::from_env().context("invalid configuration")?;

    info!(
        program = %config.program_id,
        rpc = %config.rpc_url,
        mock = config.mock_enabled,
        fake = config.fake_enabled,
        "Starting CyberOracle backend"
    );

    let ledger: Arc<dyn Ledger> = Arc::new(RpcLedger::new(&config.rpc_url, config.rpc_timeout));
    let journal = Arc::new(Journal::open(&config.journal_path)?);
    let store: Arc<dyn MetadataStore> = Arc::new(InMemoryMetadataStore::new());

    let uploader: Arc<dyn MetadataUploader> = match &config.metadata_upload_url {
        Some(url) => {
            info!(url = %url, "Uploading metadata to remote endpoint");
            Arc::new(HttpUploader::new(url, config.http_timeout)?)
        }
        None => {
            info!("Serving metadata from the in-process store");
            Arc::new(LocalUploader::new(store.clone()))
        }
    };

    let generator: Option<Arc<dyn TextGenerator>> = match &config.gemini.api_key {
        Some(key) => Some(Arc::new(GeminiClient::new(
            key,
            &config.gemini.model,
            config.http_timeout,
        )?)),
        None => {
            if !config.mock_enabled && !config.fake_enabled {
                warn!("GEMINI_API_KEY is not set; live generation will fail");
            }
            None
        }
    };

    let minter = Arc::new(BubblegumMinter::new(ledger.clone()));
    let fulfiller = Arc::new(Fulfiller::new(
        config.clone(),
        ledger.clone(),
        minter,
        journal.clone(),
    ));
    let oracle = Arc::new(OracleService::new(
        config.clone(),
        generator,
        uploader,
        fulfiller.clone(),
    ));
    let metrics = Arc::new(Metrics::new());

    // Finish anything minted but left unfulfilled by a previous run.
    let report = fulfiller.reconcile().await;
    metrics.record_reconciled(report.fulfilled as u64);
    if report != ReconcileReport::default() {
        info!(
            fulfilled = report.fulfilled,
            already_fulfilled = report.already_fulfilled,
            failed = report.failed,
            "Reconciliation finished"
        );
    }

    let port = config.http_port;
    let state = web::Data::new(AppState {
        config,
        oracle,
        fulfiller,
        store,
        metrics,
    });

    info!(port, "Starting HTTP server");

    HttpServer::new(move || App::new().app_data(state.clone()).configure(api::configure))
        .bind(("0.0.0.0", port))?
        .run()
        .await?;
    Ok(())
}
