//! Shared fixtures: an in-memory chain that executes the CyberOracle and
//! Bubblegum instructions this crate sends, plus a fixed text generator.

use anyhow::{anyhow, bail, ensure, Context, Result};
use futures_util::future::BoxFuture;
use solana_sdk::instruction::Instruction;
use solana_sdk::pubkey::Pubkey;
use solana_sdk::signature::{Keypair, Signer};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use cyberoracle_backend::api::AppState;
use cyberoracle_backend::bubblegum::{BubblegumMinter, MAX_NAME_BYTES};
use cyberoracle_backend::config::AppConfig;
use cyberoracle_backend::fulfiller::Fulfiller;
use cyberoracle_backend::gemini::{GenerationRequest, TextGenerator};
use cyberoracle_backend::instructions::instruction_discriminator;
use cyberoracle_backend::journal::Journal;
use cyberoracle_backend::ledger::Ledger;
use cyberoracle_backend::metadata::{InMemoryMetadataStore, MetadataStore};
use cyberoracle_backend::metrics::Metrics;
use cyberoracle_backend::oracle::OracleService;
use cyberoracle_backend::pda::{self, BUBBLEGUM_PROGRAM_ID};
use cyberoracle_backend::state::{OracleRequest, OracleState, TreeConfig, UserCounter};
use cyberoracle_backend::uploader::LocalUploader;

pub const PRICE_LAMPORTS: u64 = 10_000_000;
pub const TREE_CAPACITY: u64 = 8;
pub const BASE_URL: &str = "http://oracle.test";

// ============================================================================
// FAKE CHAIN
// ============================================================================

/// Executes `request_oracle`, `fulfill_oracle` and `mint_to_collection_v1`
/// against an in-memory account map. A transaction either applies fully or
/// not at all.
pub struct FakeChain {
    pub program_id: Pubkey,
    accounts: Mutex<HashMap<Pubkey, Vec<u8>>>,
    /// Reject the next `fulfill_oracle` (then reset).
    pub fail_next_fulfill: AtomicBool,
    pub mints: AtomicUsize,
    pub fulfills: AtomicUsize,
    /// Names of minted cNFTs, in mint order.
    pub minted_names: Mutex<Vec<String>>,
    sends: AtomicUsize,
}

impl FakeChain {
    pub fn new(program_id: Pubkey) -> Self {
        Self {
            program_id,
            accounts: Mutex::new(HashMap::new()),
            fail_next_fulfill: AtomicBool::new(false),
            mints: AtomicUsize::new(0),
            fulfills: AtomicUsize::new(0),
            minted_names: Mutex::new(Vec::new()),
            sends: AtomicUsize::new(0),
        }
    }

    pub fn put(&self, address: Pubkey, data: Vec<u8>) {
        self.accounts.lock().unwrap().insert(address, data);
    }

    pub fn get(&self, address: &Pubkey) -> Option<Vec<u8>> {
        self.accounts.lock().unwrap().get(address).cloned()
    }

    pub fn request(&self, user: &Pubkey, request_id: u64) -> Option<OracleRequest> {
        let (address, _) = pda::request_address(&self.program_id, user, request_id).unwrap();
        self.get(&address).map(|d| OracleRequest::decode(&d).unwrap())
    }

    pub fn tree_config(&self, tree: &Pubkey) -> TreeConfig {
        let address = pda::tree_config_address(tree).unwrap();
        TreeConfig::decode(&self.get(&address).unwrap()).unwrap()
    }

    fn execute(&self, accounts: &mut HashMap<Pubkey, Vec<u8>>, ix: &Instruction, signers: &[Pubkey]) -> Result<()> {
        ensure!(ix.data.len() >= 8, "instruction data too short");
        let disc: [u8; 8] = ix.data[..8].try_into()?;

        if ix.program_id == BUBBLEGUM_PROGRAM_ID {
            ensure!(disc == instruction_discriminator("mint_to_collection_v1"), "unknown bubblegum instruction");
            let tree_config_address = ix.accounts[0].pubkey;
            let data = accounts.get(&tree_config_address).context("tree config missing")?;
            let mut config = TreeConfig::decode(data)?;
            ensure!(signers.contains(&config.tree_delegate), "tree delegate must sign");
            ensure!(config.num_minted < config.total_mint_capacity, "tree full");
            let name_len = u32::from_le_bytes(ix.data[8..12].try_into()?) as usize;
            ensure!(name_len <= MAX_NAME_BYTES, "MetadataNameTooLong");
            let name = std::str::from_utf8(&ix.data[12..12 + name_len])?.to_string();
            config.num_minted += 1;
            accounts.insert(tree_config_address, config.to_bytes());
            self.mints.fetch_add(1, Ordering::SeqCst);
            self.minted_names.lock().unwrap().push(name);
            return Ok(());
        }

        ensure!(ix.program_id == self.program_id, "unknown program {}", ix.program_id);
        let (state_address, _) = pda::state_address(&self.program_id)?;
        let state = OracleState::decode(accounts.get(&state_address).context("AccountNotInitialized: state")?)?;

        if disc == instruction_discriminator("request_oracle") {
            let counter_address = ix.accounts[1].pubkey;
            let request_address = ix.accounts[2].pubkey;
            let payer = ix.accounts[3].pubkey;
            ensure!(signers.contains(&payer), "payer must sign");
            ensure!(ix.accounts[4].pubkey == state.treasury, "wrong treasury");

            let next = match accounts.get(&counter_address) {
                Some(d) => UserCounter::decode(d)?.next_request_id,
                None => 0,
            };
            let (expected, bump) = pda::request_address(&self.program_id, &payer, next)?;
            ensure!(expected == request_address, "ConstraintSeeds: request");
            ensure!(!accounts.contains_key(&request_address), "request already exists");

            let prompt_hash: [u8; 32] = ix.data[8..40].try_into()?;
            accounts.insert(
                counter_address,
                UserCounter {
                    user: payer,
                    next_request_id: next + 1,
                    bump: 0,
                }
                .to_bytes(),
            );
            accounts.insert(
                request_address,
                OracleRequest {
                    user: payer,
                    request_id: next,
                    prompt_hash,
                    result_uri: String::new(),
                    asset_id: Pubkey::default(),
                    collection_mint: Pubkey::default(),
                    fulfilled: false,
                    bump,
                }
                .to_bytes(),
            );
            return Ok(());
        }

        if disc == instruction_discriminator("fulfill_oracle") {
            if self.fail_next_fulfill.swap(false, Ordering::SeqCst) {
                bail!("simulated fulfill_oracle failure");
            }
            let authority = ix.accounts[2].pubkey;
            ensure!(signers.contains(&authority) && authority == state.authority, "Unauthorized");

            let request_address = ix.accounts[1].pubkey;
            let mut request = OracleRequest::decode(accounts.get(&request_address).context("request missing")?)?;
            ensure!(!request.fulfilled, "AlreadyFulfilled");

            let args = &ix.data[8..];
            let len = u32::from_le_bytes(args[..4].try_into()?) as usize;
            let uri = std::str::from_utf8(&args[4..4 + len])?.to_string();
            let rest = &args[4 + len..];
            request.result_uri = uri;
            request.asset_id = Pubkey::try_from(&rest[..32]).map_err(|e| anyhow!("{e:?}"))?;
            request.collection_mint = Pubkey::try_from(&rest[32..64]).map_err(|e| anyhow!("{e:?}"))?;
            request.fulfilled = true;
            accounts.insert(request_address, request.to_bytes());
            self.fulfills.fetch_add(1, Ordering::SeqCst);
            return Ok(());
        }

        bail!("unknown instruction")
    }
}

impl Ledger for FakeChain {
    fn account_data<'a>(&'a self, address: &'a Pubkey) -> BoxFuture<'a, Result<Option<Vec<u8>>>> {
        Box::pin(async move { Ok(self.get(address)) })
    }

    fn send<'a>(&'a self, instructions: &'a [Instruction], signers: &'a [&'a Keypair]) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            let signers: Vec<Pubkey> = signers.iter().map(|k| k.pubkey()).collect();
            let mut accounts = self.accounts.lock().unwrap();
            let mut staged = accounts.clone();
            for ix in instructions {
                self.execute(&mut staged, ix, &signers)?;
            }
            *accounts = staged;
            let n = self.sends.fetch_add(1, Ordering::SeqCst);
            Ok(format!("sig-{n}"))
        })
    }
}

/// Yields to the scheduler before every chain call, so concurrent sagas on
/// a single-threaded runtime interleave at each await.
pub struct YieldingLedger(pub Arc<FakeChain>);

impl Ledger for YieldingLedger {
    fn account_data<'a>(&'a self, address: &'a Pubkey) -> BoxFuture<'a, Result<Option<Vec<u8>>>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.0.account_data(address).await
        })
    }

    fn send<'a>(&'a self, instructions: &'a [Instruction], signers: &'a [&'a Keypair]) -> BoxFuture<'a, Result<String>> {
        Box::pin(async move {
            tokio::task::yield_now().await;
            self.0.send(instructions, signers).await
        })
    }
}

// ============================================================================
// FAKE TEXT GENERATOR
// ============================================================================

pub struct FixedGenerator {
    text: String,
    pub calls: AtomicUsize,
    pub last: Mutex<Option<GenerationRequest>>,
}

impl FixedGenerator {
    pub fn new(text: &str) -> Self {
        Self {
            text: text.to_string(),
            calls: AtomicUsize::new(0),
            last: Mutex::new(None),
        }
    }
}

impl TextGenerator for FixedGenerator {
    fn generate<'a>(&'a self, request: &'a GenerationRequest) -> BoxFuture<'a, Result<String>> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        *self.last.lock().unwrap() = Some(request.clone());
        Box::pin(async move { Ok(self.text.clone()) })
    }
}

// ============================================================================
// ENVIRONMENT
// ============================================================================

/// A deployed, initialized oracle with an operator, a tree and a collection.
pub struct TestEnv {
    pub chain: Arc<FakeChain>,
    pub operator: Keypair,
    pub tree: Pubkey,
    pub collection: Pubkey,
    pub config: AppConfig,
    pub journal: Arc<Journal>,
    pub store: Arc<InMemoryMetadataStore>,
}

impl TestEnv {
    /// `extra` entries override or add to the environment.
    pub fn new(extra: &[(&str, &str)]) -> Self {
        let operator = Keypair::new();
        let tree = Pubkey::new_unique();
        let collection = Pubkey::new_unique();

        let secret = serde_json::to_string(&operator.to_bytes().to_vec()).unwrap();
        let mut env: HashMap<String, String> = HashMap::new();
        env.insert("CYBERORACLE_AUTHORITY_SECRET".into(), secret);
        env.insert("BUBBLEGUM_TREE_ADDRESS".into(), tree.to_string());
        env.insert("BUBBLEGUM_COLLECTION_MINT".into(), collection.to_string());
        env.insert("PUBLIC_BASE_URL".into(), BASE_URL.into());
        for (k, v) in extra {
            env.insert(k.to_string(), v.to_string());
        }
        let config = AppConfig::from_lookup(|k| env.get(k).cloned()).unwrap();

        let chain = Arc::new(FakeChain::new(config.program_id));
        let (state_address, bump) = pda::state_address(&config.program_id).unwrap();
        chain.put(
            state_address,
            OracleState {
                authority: operator.pubkey(),
                treasury: Pubkey::new_unique(),
                price_lamports: PRICE_LAMPORTS,
                bump,
            }
            .to_bytes(),
        );
        chain.put(
            pda::tree_config_address(&tree).unwrap(),
            TreeConfig {
                tree_creator: operator.pubkey(),
                tree_delegate: operator.pubkey(),
                total_mint_capacity: TREE_CAPACITY,
                num_minted: 0,
            }
            .to_bytes(),
        );

        Self {
            chain,
            operator,
            tree,
            collection,
            config,
            journal: Arc::new(Journal::in_memory()),
            store: Arc::new(InMemoryMetadataStore::new()),
        }
    }

    pub fn fulfiller(&self) -> Arc<Fulfiller> {
        self.fulfiller_with(self.config.clone(), self.journal.clone())
    }

    pub fn fulfiller_with(&self, config: AppConfig, journal: Arc<Journal>) -> Arc<Fulfiller> {
        self.fulfiller_on(self.chain.clone(), config, journal)
    }

    /// Fulfiller whose chain calls yield between steps.
    pub fn yielding_fulfiller(&self) -> Arc<Fulfiller> {
        let ledger = Arc::new(YieldingLedger(self.chain.clone()));
        self.fulfiller_on(ledger, self.config.clone(), self.journal.clone())
    }

    fn fulfiller_on(&self, ledger: Arc<dyn Ledger>, config: AppConfig, journal: Arc<Journal>) -> Arc<Fulfiller> {
        Arc::new(Fulfiller::new(
            config,
            ledger.clone(),
            Arc::new(BubblegumMinter::new(ledger)),
            journal,
        ))
    }

    pub fn app_state(&self, generator: Option<Arc<dyn TextGenerator>>) -> AppState {
        let fulfiller = self.fulfiller();
        let store: Arc<dyn MetadataStore> = self.store.clone();
        let oracle = Arc::new(OracleService::new(
            self.config.clone(),
            generator,
            Arc::new(LocalUploader::new(store.clone())),
            fulfiller.clone(),
        ));
        AppState {
            config: self.config.clone(),
            oracle,
            fulfiller,
            store,
            metrics: Arc::new(Metrics::new()),
        }
    }

    /// Write an unfulfilled request record directly.
    pub fn seed_request(&self, user: &Pubkey, request_id: u64, prompt_hash: [u8; 32]) {
        let (address, bump) = pda::request_address(&self.config.program_id, user, request_id).unwrap();
        self.chain.put(
            address,
            OracleRequest {
                user: *user,
                request_id,
                prompt_hash,
                result_uri: String::new(),
                asset_id: Pubkey::default(),
                collection_mint: Pubkey::default(),
                fulfilled: false,
                bump,
            }
            .to_bytes(),
        );
    }
}
