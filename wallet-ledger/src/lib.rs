//! Wallet Ledger
//!
//! File-backed wallet ledgers and the merge engine that folds copies of the
//! same wallet, received from untrusted peers, into one canonical log.
//!
//! # Architecture
//!
//! - **Text ledgers**: one `<id>` file per wallet, one transaction per line
//! - **Signed debits**: every debit is signed by the owning wallet's key
//! - **Proof of payment**: a credit is kept only if the payer's ledger shows the debit
//! - **Scoped locks**: other wallets are read through a per-id exclusive registry
//!
//! # Invariants
//!
//! - No two debits share an id
//! - No two credits share id, payer and sign
//! - Balance never goes negative, except for the root wallet
//! - Debits are signed, credits are not

#![forbid(unsafe_code)]
#![warn(
    missing_docs,
    rust_2018_idioms,
    missing_debug_implementations,
    clippy::all
)]

pub mod types;
pub mod storage;
pub mod wallet;
pub mod wallets;
pub mod patch;
pub mod crypto;
pub mod error;
pub mod config;
pub mod metrics;

// Re-exports
pub use error::{Error, LineError, RejectReason, Result};
pub use types::{Amount, Id, Transaction};
pub use crypto::{Key, PrivateKey};
pub use wallet::Wallet;
pub use wallets::{DirWallets, WalletGuard, WalletStore};
pub use patch::{JoinOptions, JoinReport, Patch, Rejection, SeededPatch};
pub use config::Config;
pub use metrics::Metrics;
