//! Scoped exclusive access to wallets by id
//!
//! # Architecture
//!
//! ```text
//! ┌──────────────────────────────────────────────────────┐
//! │          Patch / callers (any thread)                │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ acquire(id)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │                IdLocks                               │
//! │  Mutex<HashSet<Id>> + Condvar                        │
//! │  one holder per id, others wait                      │
//! └─────────────────────┬────────────────────────────────┘
//!                       │ WalletGuard (releases on drop)
//!                       ▼
//! ┌──────────────────────────────────────────────────────┐
//! │         Wallet handle on <dir>/<id>                  │
//! └──────────────────────────────────────────────────────┘
//! ```
//!
//! Acquisition is not reentrant: acquiring an id already held by the same
//! thread blocks forever.

use crate::{types::Id, wallet::Wallet, Result};
use parking_lot::{Condvar, Mutex};
use std::collections::HashSet;
use std::ops::Deref;
use std::path::{Path, PathBuf};
use std::sync::Arc;

/// Registry of wallets addressable by id
pub trait WalletStore {
    /// Exclusive handle on the wallet, present or not; released on drop
    fn acquire(&self, id: &Id) -> Result<WalletGuard>;

    /// Whether the wallet's ledger is available locally
    fn exists(&self, id: &Id) -> bool {
        self.acquire(id).map(|w| w.exists()).unwrap_or(false)
    }
}

/// Set of ids currently held
#[derive(Debug, Default)]
pub struct IdLocks {
    held: Mutex<HashSet<Id>>,
    released: Condvar,
}

impl IdLocks {
    /// Create an empty lock table
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    /// Block until `id` is free, then hand out `wallet` under its lock
    pub fn lock(self: &Arc<Self>, id: &Id, wallet: Wallet) -> WalletGuard {
        let mut held = self.held.lock();
        while held.contains(id) {
            self.released.wait(&mut held);
        }
        held.insert(id.clone());
        WalletGuard {
            wallet,
            id: id.clone(),
            locks: Arc::clone(self),
        }
    }

    /// Whether `id` is currently held
    pub fn is_held(&self, id: &Id) -> bool {
        self.held.lock().contains(id)
    }

    fn release(&self, id: &Id) {
        self.held.lock().remove(id);
        self.released.notify_all();
    }
}

/// Exclusive access to one wallet
#[derive(Debug)]
pub struct WalletGuard {
    wallet: Wallet,
    id: Id,
    locks: Arc<IdLocks>,
}

impl WalletGuard {
    /// Id this guard holds
    pub fn id(&self) -> &Id {
        &self.id
    }
}

impl Deref for WalletGuard {
    type Target = Wallet;

    fn deref(&self) -> &Wallet {
        &self.wallet
    }
}

impl Drop for WalletGuard {
    fn drop(&mut self) {
        self.locks.release(&self.id);
    }
}

/// Wallets stored as `<dir>/<id>` files
#[derive(Debug, Clone)]
pub struct DirWallets {
    dir: PathBuf,
    network: String,
    locks: Arc<IdLocks>,
}

impl DirWallets {
    /// Registry over `dir`; wallets are handed out tagged with `network`
    pub fn new(dir: impl Into<PathBuf>, network: impl Into<String>) -> Self {
        Self {
            dir: dir.into(),
            network: network.into(),
            locks: IdLocks::new(),
        }
    }

    /// Directory holding the ledgers
    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Ledger path for `id`
    pub fn path_of(&self, id: &Id) -> PathBuf {
        self.dir.join(id.as_str())
    }

    /// Ids of all ledgers present in the directory
    pub fn all(&self) -> Result<Vec<Id>> {
        if !self.dir.exists() {
            return Ok(vec![]);
        }
        let mut ids = Vec::new();
        for entry in std::fs::read_dir(&self.dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_file() {
                continue;
            }
            if let Some(id) = entry.file_name().to_str().and_then(|n| n.parse().ok()) {
                ids.push(id);
            }
        }
        ids.sort();
        Ok(ids)
    }
}

impl WalletStore for DirWallets {
    fn acquire(&self, id: &Id) -> Result<WalletGuard> {
        std::fs::create_dir_all(&self.dir)?;
        let wallet = Wallet::new(self.path_of(id), self.network.clone());
        Ok(self.locks.lock(id, wallet))
    }

    fn exists(&self, id: &Id) -> bool {
        let wallet = Wallet::new(self.path_of(id), self.network.clone());
        self.locks.lock(id, wallet).exists()
    }
}
