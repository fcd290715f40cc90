//! CyberOracle command-line client
//!
//! Administers the program and drives the user flow headlessly.
//!
//! ## Usage
//!
//! ```bash
//! cargo run --bin cyberoracle-cli -- initialize --price 10000000
//! cargo run --bin cyberoracle-cli -- request --prompt "Will the build pass?" --locale ja
//! cargo run --bin cyberoracle-cli -- show-request --id 0
//! ```
//!
//! `SOLANA_RPC_URL` and `CYBERORACLE_PROGRAM_ID` are read from the
//! environment (or `.env`) unless overridden by flags.

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use serde_json::json;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use std::path::PathBuf;
use std::str::FromStr;

use cyberoracle_backend::config::{parse_keypair, AppConfig};
use cyberoracle_backend::instructions;
use cyberoracle_backend::ledger::{Ledger, RpcLedger};
use cyberoracle_backend::pda;
use cyberoracle_backend::state::{OracleRequest, OracleState, UserCounter};
use cyberoracle_backend::submit::submit_request;

#[derive(Parser, Debug)]
#[command(name = "cyberoracle-cli")]
#[command(about = "Submit CyberOracle requests and administer the program")]
struct Cli {
    /// Solana RPC endpoint (default: SOLANA_RPC_URL or devnet)
    #[arg(long, global = true)]
    rpc_url: Option<String>,
    /// CyberOracle program id (default: CYBERORACLE_PROGRAM_ID or the deployed id)
    #[arg(long, global = true)]
    program_id: Option<String>,
    /// Signer keypair file (solana-keygen JSON)
    #[arg(long, global = true, default_value = "~/.config/solana/id.json")]
    keypair: String,
    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Create the global state with the signer as authority.
    Initialize {
        /// Request price in lamports
        #[arg(long)]
        price: u64,
        /// Fee recipient (default: the signer)
        #[arg(long)]
        treasury: Option<String>,
    },
    /// Change the request price (authority only).
    UpdatePrice {
        #[arg(long)]
        price: u64,
    },
    /// Pay for a request, then ask the backend to generate and mint it.
    Request {
        #[arg(long)]
        prompt: String,
        #[arg(long)]
        name: Option<String>,
        #[arg(long)]
        locale: Option<String>,
        /// Backend base URL
        #[arg(long, default_value = "http://127.0.0.1:8080")]
        backend: String,
        /// Only submit on-chain; do not call the backend
        #[arg(long)]
        skip_oracle: bool,
    },
    /// Print the global state.
    ShowState,
    /// Print one request record.
    ShowRequest {
        #[arg(long)]
        id: u64,
        /// Requesting wallet (default: the signer)
        #[arg(long)]
        user: Option<String>,
    },
}

fn expand_path(path: &str) -> PathBuf {
    PathBuf::from(shellexpand::tilde(path).as_ref())
}

fn load_keypair(path: &str) -> Result<Keypair> {
    let path = expand_path(path);
    let contents = std::fs::read_to_string(&path)
        .with_context(|| format!("Failed to read keypair file {}", path.display()))?;
    parse_keypair(&contents).with_context(|| format!("Invalid keypair file {}", path.display()))
}

fn parse_pubkey(value: &str, what: &str) -> Result<Pubkey> {
    Pubkey::from_str(value.trim()).with_context(|| format!("invalid {what}: {value}"))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .init();

    let config = AppConfig::from_env()?;
    let rpc_url = cli.rpc_url.unwrap_or(config.rpc_url);
    let program_id = match cli.program_id.as_deref() {
        Some(id) => parse_pubkey(id, "program id")?,
        None => config.program_id,
    };
    let ledger = RpcLedger::new(&rpc_url, config.rpc_timeout);

    match cli.command {
        Command::Initialize { price, treasury } => {
            let signer = load_keypair(&cli.keypair)?;
            let treasury = match treasury.as_deref() {
                Some(t) => parse_pubkey(t, "treasury")?,
                None => signer.pubkey(),
            };
            let ix = instructions::initialize(&program_id, &signer.pubkey(), &treasury, price)?;
            let signature = ledger.send(&[ix], &[&signer]).await?;
            println!("Initialized: price {price} lamports, treasury {treasury}");
            println!("Signature: {signature}");
        }
        Command::UpdatePrice { price } => {
            let signer = load_keypair(&cli.keypair)?;
            let ix = instructions::update_price(&program_id, &signer.pubkey(), price)?;
            let signature = ledger.send(&[ix], &[&signer]).await?;
            println!("Price updated to {price} lamports");
            println!("Signature: {signature}");
        }
        Command::Request {
            prompt,
            name,
            locale,
            backend,
            skip_oracle,
        } => {
            let signer = load_keypair(&cli.keypair)?;
            let submitted = submit_request(&ledger, &program_id, &signer, &prompt).await?;
            println!(
                "Request {} submitted ({} lamports)",
                submitted.request_id, submitted.price_lamports
            );
            println!("Request account: {}", submitted.request_address);
            println!("Signature: {}", submitted.signature);
            if skip_oracle {
                return Ok(());
            }

            let http = reqwest::Client::builder()
                .timeout(config.http_timeout)
                .build()
                .context("failed to build HTTP client")?;
            let url = format!("{}/oracle", backend.trim_end_matches('/'));
            let resp = http
                .post(&url)
                .json(&json!({
                    "user": signer.pubkey().to_string(),
                    "requestId": submitted.request_id,
                    "prompt": prompt,
                    "name": name,
                    "locale": locale,
                }))
                .send()
                .await
                .with_context(|| format!("POST {url} failed"))?;
            let status = resp.status();
            let body: serde_json::Value = resp.json().await.context("backend response is not JSON")?;
            if !status.is_success() {
                anyhow::bail!(
                    "backend returned {status}: {}",
                    body.get("error").and_then(|e| e.as_str()).unwrap_or("unknown error")
                );
            }
            println!("{}", serde_json::to_string_pretty(&body)?);
        }
        Command::ShowState => {
            let (address, _) = pda::state_address(&program_id)?;
            let data = ledger
                .account_data(&address)
                .await?
                .context("oracle not initialized")?;
            let state = OracleState::decode(&data)?;
            println!("State:     {address}");
            println!("Authority: {}", state.authority);
            println!("Treasury:  {}", state.treasury);
            println!("Price:     {} lamports", state.price_lamports);
        }
        Command::ShowRequest { id, user } => {
            let user = match user.as_deref() {
                Some(u) => parse_pubkey(u, "user")?,
                None => load_keypair(&cli.keypair)?.pubkey(),
            };
            let (address, _) = pda::request_address(&program_id, &user, id)?;
            let Some(data) = ledger.account_data(&address).await? else {
                let (counter, _) = pda::counter_address(&program_id, &user)?;
                let next = match ledger.account_data(&counter).await? {
                    Some(d) => UserCounter::decode(&d)?.next_request_id,
                    None => 0,
                };
                anyhow::bail!("request {id} for {user} not found (next request id is {next})");
            };
            let request = OracleRequest::decode(&data)?;
            println!("Request:     {address}");
            println!("User:        {}", request.user);
            println!("Id:          {}", request.request_id);
            println!("Prompt hash: {}", bs58::encode(request.prompt_hash).into_string());
            println!("Fulfilled:   {}", request.fulfilled);
            if request.fulfilled {
                println!("Result URI:  {}", request.result_uri);
                println!("Asset id:    {}", request.asset_id);
                println!("Collection:  {}", request.collection_mint);
            }
        }
    }

    Ok(())
}
