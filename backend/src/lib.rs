//! CyberOracle backend library.
//!
//! Off-chain half of the CyberOracle dApp. A user pays for a fortune with the
//! on-chain `request_oracle` instruction; this crate turns the prompt into
//! generated text, stores the resulting metadata, mints a compressed NFT for
//! it and records the result with `fulfill_oracle`.
//!
//! - [`pda`], [`state`], [`instructions`]: the program's addressing scheme,
//!   account layouts and instruction encoding.
//! - [`ledger`]: the RPC capability every chain-facing component goes through.
//! - [`submit`]: client-side request submission (used by `cyberoracle-cli`).
//! - [`oracle`], [`gemini`], [`metadata`], [`uploader`]: fortune generation.
//! - [`bubblegum`], [`fulfiller`], [`journal`]: mint-then-fulfill saga.
//! - [`api`]: actix-web handlers.

pub mod api;
pub mod bubblegum;
pub mod config;
pub mod error;
pub mod fulfiller;
pub mod gemini;
pub mod instructions;
pub mod journal;
pub mod ledger;
pub mod metadata;
pub mod metrics;
pub mod oracle;
pub mod pda;
pub mod state;
pub mod submit;
pub mod uploader;
