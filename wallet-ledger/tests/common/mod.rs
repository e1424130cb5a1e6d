//! Shared fixtures for the integration tests
#![allow(dead_code)]

use chrono::{DateTime, TimeZone, Utc};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tempfile::TempDir;
use wallet_ledger::{
    crypto,
    wallets::IdLocks,
    Amount, Id, Key, PrivateKey, Transaction, Wallet, WalletGuard, WalletStore,
};

pub const NETWORK: &str = Wallet::MAIN_NETWORK;

/// In-memory registry: id -> ledger path, one holder per id
pub struct MemWallets {
    dir: PathBuf,
    known: Mutex<HashMap<Id, PathBuf>>,
    locks: Arc<IdLocks>,
}

impl MemWallets {
    pub fn new(dir: &Path) -> Self {
        let dir = dir.join("store");
        std::fs::create_dir_all(&dir).unwrap();
        Self {
            dir,
            known: Mutex::new(HashMap::new()),
            locks: IdLocks::new(),
        }
    }

    /// Register and initialise an empty ledger for `id`
    pub fn create(&self, id: &Id, key: &Key) -> Wallet {
        let path = self.dir.join(id.as_str());
        let mut wallet = Wallet::new(&path, NETWORK);
        wallet.init(id, key, false, NETWORK).unwrap();
        self.known.lock().insert(id.clone(), path);
        wallet
    }
}

impl WalletStore for MemWallets {
    fn acquire(&self, id: &Id) -> wallet_ledger::Result<WalletGuard> {
        let path = self
            .known
            .lock()
            .get(id)
            .cloned()
            .unwrap_or_else(|| self.dir.join(format!("absent-{}", id)));
        Ok(self.locks.lock(id, Wallet::new(path, NETWORK)))
    }
}

/// Temp dir plus a registry living in it
pub struct Net {
    pub dir: TempDir,
    pub store: MemWallets,
}

impl Net {
    pub fn new() -> Self {
        let dir = TempDir::new().unwrap();
        let store = MemWallets::new(dir.path());
        Self { dir, store }
    }

    /// A standalone copy of wallet `id`, not registered in the store
    pub fn copy(&self, name: &str, id: &Id, key: &Key) -> Wallet {
        let mut wallet = Wallet::new(self.dir.path().join(name), NETWORK);
        wallet.init(id, key, false, NETWORK).unwrap();
        wallet
    }

    pub fn path(&self, name: &str) -> PathBuf {
        self.dir.path().join(name)
    }
}

pub fn id(s: &str) -> Id {
    s.parse().unwrap()
}

pub fn day(n: u32) -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2018, 3, n, 10, 0, 0).unwrap()
}

pub fn credit(txn_id: u64, zents: i64, payer: &Id, date: DateTime<Utc>) -> Transaction {
    Transaction::new(txn_id, date, Amount::from_zents(zents), payer.clone(), "-").unwrap()
}

/// Debit of `wallet_id` signed with `pvt`
pub fn signed_debit(
    pvt: &PrivateKey,
    wallet_id: &Id,
    txn_id: u64,
    zents: i64,
    payee: &Id,
    date: DateTime<Utc>,
) -> Transaction {
    let txn = Transaction::new(txn_id, date, Amount::from_zents(-zents), payee.clone(), "-").unwrap();
    let sign = crypto::sign(pvt, NETWORK, wallet_id, &txn);
    txn.with_sign(sign)
}
