//! File-backed wallet ledger
//!
//! Every read re-parses the file; nothing is cached. A line that fails the
//! grammar makes the whole ledger unreadable.
//!
//! # Example
//!
//! ```no_run
//! use wallet_ledger::{Amount, Id, PrivateKey, Wallet};
//!
//! fn main() -> wallet_ledger::Result<()> {
//!     let pvt = PrivateKey::generate();
//!     let mut wallet = Wallet::new("wallets/0123456789abcdef", Wallet::MAIN_NETWORK);
//!     let id: Id = "0123456789abcdef".parse()?;
//!     wallet.init(&id, &pvt.public(), false, Wallet::MAIN_NETWORK)?;
//!
//!     let target: Id = "0000000000000001".parse()?;
//!     wallet.sub(Amount::from_zld(50)?, &target, &pvt, "-")?;
//!     assert_eq!(wallet.balance()?, Amount::from_zld(-50)?);
//!     Ok(())
//! }
//! ```

use crate::{
    crypto::{self, Key, PrivateKey},
    storage::{self, HEADER_LINES},
    types::{Amount, Id, Transaction},
    Error, Result,
};
use chrono::Utc;
use std::path::{Path, PathBuf};

/// Single wallet ledger backed by a text file
#[derive(Debug, Clone)]
pub struct Wallet {
    path: PathBuf,
    network: String,
}

impl Wallet {
    /// Default network tag
    pub const MAIN_NETWORK: &'static str = "zold";

    /// Handle for the ledger at `path`; the file need not exist yet
    pub fn new(path: impl Into<PathBuf>, network: impl Into<String>) -> Self {
        Self {
            path: path.into(),
            network: network.into(),
        }
    }

    /// Backing file
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Network tag of this copy
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Whether the backing file is present
    pub fn exists(&self) -> bool {
        self.path.exists()
    }

    /// Write the identity header, discarding any transactions
    pub fn init(&mut self, id: &Id, key: &Key, overwrite: bool, network: &str) -> Result<()> {
        if self.exists() && !overwrite {
            return Err(Error::AlreadyExists(self.path.clone()));
        }
        storage::replace(&self.path, &storage::header(id, key))?;
        self.network = network.to_string();
        Ok(())
    }

    /// Wallet id from the first line
    pub fn id(&self) -> Result<Id> {
        let lines = self.header()?;
        lines[0].trim().parse().map_err(|_| self.corrupt("bad id on line #1"))
    }

    /// Public key from the second line
    pub fn key(&self) -> Result<Key> {
        let lines = self.header()?;
        Key::from_text(lines[1].trim()).map_err(|e| self.corrupt(format!("line #2: {}", e)))
    }

    /// Whether this is the root wallet
    pub fn root(&self) -> Result<bool> {
        Ok(self.id()?.is_root())
    }

    /// Sum of all transaction amounts
    pub fn balance(&self) -> Result<Amount> {
        balance_of(&self.transactions()?).map_err(|e| self.corrupt(e.to_string()))
    }

    /// All transactions, ordered by date (file order among equal dates)
    pub fn transactions(&self) -> Result<Vec<Transaction>> {
        let lines = self.header()?;
        let mut txns = lines
            .iter()
            .enumerate()
            .skip(HEADER_LINES)
            .map(|(idx, line)| storage::parse_line(line, idx + 1).map_err(|e| e.in_file(&self.path)))
            .collect::<Result<Vec<_>>>()?;
        txns.sort_by_key(|t| t.date);
        Ok(txns)
    }

    /// Create, sign and append a debit of `amount` to `target`.
    ///
    /// The returned transaction carries the requested positive amount; the
    /// stored one is negative.
    pub fn sub(
        &self,
        amount: Amount,
        target: &Id,
        key: &PrivateKey,
        details: &str,
    ) -> Result<Transaction> {
        if !amount.is_positive() {
            return Err(Error::InvalidAmount(format!("can't pay {}", amount)));
        }
        let id = self.id()?;
        let txns = self.transactions()?;
        let debit = amount
            .checked_neg()
            .ok_or_else(|| Error::InvalidAmount(format!("can't pay {}", amount)))?;
        let mut txn = Transaction::new(
            next_debit_id(&txns),
            Utc::now(),
            debit,
            target.clone(),
            details,
        )?;
        txn.sign = Some(crypto::sign(key, &self.network, &id, &txn));
        storage::append(&self.path, &storage::format_line(&txn))?;
        tracing::debug!(wallet = %id, txn = %txn, "Debit appended");
        txn.amount = amount;
        Ok(txn)
    }

    /// Append an already validated transaction as is
    pub fn add(&self, txn: &Transaction) -> Result<()> {
        self.header()?;
        storage::append(&self.path, &storage::format_line(txn))
    }

    /// Whether any transaction has this id and counterparty
    pub fn has(&self, id: u64, bnf: &Id) -> Result<bool> {
        Ok(self
            .transactions()?
            .iter()
            .any(|t| t.id == id && &t.bnf == bnf))
    }

    /// Own debit with this id, if any
    pub fn debit(&self, id: u64) -> Result<Option<Transaction>> {
        Ok(self
            .transactions()?
            .into_iter()
            .find(|t| t.is_debit() && t.id == id))
    }

    /// Credits only, in ledger order
    pub fn income(&self) -> Result<Income> {
        let credits: Vec<Transaction> = self
            .transactions()?
            .into_iter()
            .filter(|t| !t.is_debit())
            .collect();
        Ok(Income {
            inner: credits.into_iter(),
        })
    }

    /// Short description for logs: `id/balance/count`
    pub fn mnemo(&self) -> Result<String> {
        let txns = self.transactions()?;
        let balance = balance_of(&txns).map_err(|e| self.corrupt(e.to_string()))?;
        Ok(format!("{}/{}/{}t", self.id()?, balance, txns.len()))
    }

    fn header(&self) -> Result<Vec<String>> {
        let lines = storage::read_lines(&self.path)?;
        if lines.len() < HEADER_LINES {
            return Err(self.corrupt("identity header is incomplete"));
        }
        if !lines[HEADER_LINES - 1].trim().is_empty() {
            return Err(self.corrupt("line #3 must be blank"));
        }
        Ok(lines)
    }

    fn corrupt(&self, reason: impl Into<String>) -> Error {
        Error::CorruptLedger {
            path: self.path.clone(),
            reason: reason.into(),
        }
    }
}

/// Restartable traversal of a wallet's credits; clone it to start over
#[derive(Debug, Clone)]
pub struct Income {
    inner: std::vec::IntoIter<Transaction>,
}

impl Iterator for Income {
    type Item = Transaction;

    fn next(&mut self) -> Option<Transaction> {
        self.inner.next()
    }
}

/// Sum of amounts of an explicit transaction sequence
pub fn balance_of(txns: &[Transaction]) -> Result<Amount> {
    txns.iter().try_fold(Amount::ZERO, |sum, t| {
        sum.checked_add(t.amount)
            .ok_or_else(|| Error::InvalidAmount(format!("balance overflows at #{}", t.id)))
    })
}

/// `1 + max debit id`, or 0 when there are no debits yet
pub fn next_debit_id(txns: &[Transaction]) -> u64 {
    txns.iter()
        .filter(|t| t.is_debit())
        .map(|t| t.id)
        .max()
        .map_or(0, |max| max + 1)
}
