//! Merge engine: folds copies of one wallet into a single transaction log
//!
//! # Lifecycle
//!
//! ```text
//! Patch (empty) ──join/seed──▶ SeededPatch ──join──▶ SeededPatch ──save──▶ bool
//! ```
//!
//! Only a seeded patch can be saved; an empty one has no `save`.
//!
//! # Rules
//!
//! - A candidate from another network, with another key or another id is
//!   ignored as a whole.
//! - Identical transactions are skipped, so joining twice changes nothing.
//! - A debit is refused if another debit holds its id, if it would take a
//!   non-root balance below zero, or if its signature does not verify.
//! - A credit is refused if a credit with the same id and payer exists, if it
//!   is signed, if it names this wallet as payer, or if the payer's ledger
//!   has no debit with that id routed to this wallet for the same amount.
//! - Nothing is accepted that would overflow the balance.
//!
//! Refusals are reported and logged; they never abort the merge.

use crate::{
    config::MergeConfig,
    crypto::{self, Key},
    error::RejectReason,
    metrics::Metrics,
    storage,
    types::{Amount, Id, Transaction},
    wallet::{balance_of, Wallet},
    wallets::WalletStore,
    Error, Result,
};
use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;
use std::path::Path;

// chrono durations are bounded by i64 milliseconds
const MAX_WINDOW_SECS: i64 = i64::MAX / 1_000;

/// Hook asked to fetch an absent paying wallet
pub type PullHook<'a> = &'a mut dyn FnMut(&Id);

/// How a candidate is joined
#[derive(Debug, Clone)]
pub struct JoinOptions {
    /// On the first join: take the candidate's history wholesale
    pub baseline: bool,

    /// Accept only debits older than `legacy_window`
    pub legacy: bool,

    /// Freshness window for legacy mode
    pub legacy_window: Duration,
}

impl Default for JoinOptions {
    fn default() -> Self {
        Self {
            baseline: true,
            legacy: false,
            legacy_window: Duration::hours(24),
        }
    }
}

impl JoinOptions {
    /// Defaults with the legacy window taken from configuration
    pub fn from_config(config: &MergeConfig) -> Self {
        let secs = i64::try_from(config.legacy_window_secs)
            .unwrap_or(i64::MAX)
            .min(MAX_WINDOW_SECS);
        Self {
            legacy_window: Duration::seconds(secs),
            ..Self::default()
        }
    }

    /// Set baseline mode
    pub fn with_baseline(mut self, baseline: bool) -> Self {
        self.baseline = baseline;
        self
    }

    /// Set legacy mode
    pub fn with_legacy(mut self, legacy: bool) -> Self {
        self.legacy = legacy;
        self
    }
}

/// One refusal: the reason and, unless the whole wallet was refused, the transaction
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Rejection {
    /// Why
    pub reason: RejectReason,
    /// Offending transaction
    pub txn: Option<Transaction>,
}

impl fmt::Display for Rejection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.txn {
            Some(txn) => write!(f, "{}: {}", self.reason, txn),
            None => write!(f, "{}", self.reason),
        }
    }
}

/// Outcome of one join
#[derive(Debug, Clone, Default, Serialize)]
pub struct JoinReport {
    /// Transactions added to the working set
    pub merged: usize,
    /// Already present, or filtered out by legacy mode
    pub skipped: usize,
    /// Refusals, in candidate order
    pub rejections: Vec<Rejection>,
}

impl JoinReport {
    /// Whether the candidate was refused as a whole
    pub fn wallet_rejected(&self) -> bool {
        self.rejections.iter().any(|r| r.reason.is_wallet_level())
    }
}

/// A patch that has not seen any wallet yet
pub struct Patch<'s, S: WalletStore + ?Sized> {
    store: &'s S,
    metrics: Option<Metrics>,
}

impl<'s, S: WalletStore + ?Sized> Patch<'s, S> {
    /// Empty patch; payers are looked up in `store`
    pub fn new(store: &'s S) -> Self {
        Self {
            store,
            metrics: None,
        }
    }

    /// Record merge outcomes into `metrics`
    pub fn with_metrics(mut self, metrics: Metrics) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Adopt the wallet's identity; with `baseline`, also its full history
    pub fn seed(self, wallet: &Wallet, baseline: bool) -> Result<SeededPatch<'s, S>> {
        let id = wallet.id()?;
        let key = wallet.key()?;
        let (txns, balance) = if baseline {
            let txns = wallet.transactions()?;
            let balance = balance_of(&txns).map_err(|e| Error::CorruptLedger {
                path: wallet.path().to_path_buf(),
                reason: e.to_string(),
            })?;
            tracing::debug!(
                wallet = %id,
                balance = %balance,
                count = txns.len(),
                "Baseline adopted"
            );
            (txns, balance)
        } else {
            tracing::debug!(wallet = %id, "Baseline ignored");
            (vec![], Amount::ZERO)
        };
        Ok(SeededPatch {
            store: self.store,
            metrics: self.metrics,
            id,
            key,
            network: wallet.network().to_string(),
            txns,
            balance,
        })
    }

    /// Seed from `wallet` and merge it
    pub fn join(
        self,
        wallet: &Wallet,
        options: &JoinOptions,
        pull: Option<PullHook<'_>>,
    ) -> Result<(SeededPatch<'s, S>, JoinReport)> {
        let mut seeded = self.seed(wallet, options.baseline)?;
        let report = seeded.join(wallet, options, pull)?;
        Ok((seeded, report))
    }
}

impl<S: WalletStore + ?Sized> fmt::Debug for Patch<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Patch").finish_non_exhaustive()
    }
}

impl<S: WalletStore + ?Sized> fmt::Display for Patch<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "nothing")
    }
}

/// A patch with an adopted identity and a working transaction set
pub struct SeededPatch<'s, S: WalletStore + ?Sized> {
    store: &'s S,
    metrics: Option<Metrics>,
    id: Id,
    key: Key,
    network: String,
    txns: Vec<Transaction>,
    balance: Amount,
}

impl<'s, S: WalletStore + ?Sized> SeededPatch<'s, S> {
    /// Adopted wallet id
    pub fn id(&self) -> &Id {
        &self.id
    }

    /// Adopted public key
    pub fn key(&self) -> &Key {
        &self.key
    }

    /// Adopted network
    pub fn network(&self) -> &str {
        &self.network
    }

    /// Working set, in merge order
    pub fn transactions(&self) -> &[Transaction] {
        &self.txns
    }

    /// Sum of the working set
    pub fn balance(&self) -> Amount {
        self.balance
    }

    /// Merge every acceptable transaction of `wallet` into the working set.
    ///
    /// `pull` is called at most once per absent paying wallet. Payers are
    /// acquired from the store one at a time, so the caller must not hold
    /// any of them while joining. The merged wallet itself is never acquired.
    /// A payer whose ledger can't be read only costs the credits it pays.
    pub fn join(
        &mut self,
        wallet: &Wallet,
        options: &JoinOptions,
        pull: Option<PullHook<'_>>,
    ) -> Result<JoinReport> {
        let mut report = JoinReport::default();

        if wallet.network() != self.network {
            let reason = RejectReason::NetworkMismatch {
                ours: self.network.clone(),
                theirs: wallet.network().to_string(),
            };
            self.reject(&mut report, reason, None);
            return Ok(report);
        }
        if wallet.key()? != self.key {
            self.reject(&mut report, RejectReason::KeyMismatch, None);
            return Ok(report);
        }
        let theirs = wallet.id()?;
        if theirs != self.id {
            let reason = RejectReason::IdMismatch {
                ours: self.id.clone(),
                theirs,
            };
            self.reject(&mut report, reason, None);
            return Ok(report);
        }

        let mut pull = pull;
        let mut pulled = HashSet::new();
        let fresh_since = Utc::now()
            .checked_sub_signed(options.legacy_window)
            .unwrap_or(DateTime::<Utc>::MIN_UTC);
        for txn in wallet.transactions()? {
            if options.legacy && (txn.amount.is_positive() || txn.date > fresh_since) {
                report.skipped += 1;
                continue;
            }
            if self.txns.contains(&txn) {
                report.skipped += 1;
                continue;
            }
            let verdict = if txn.is_debit() {
                self.check_debit(&txn)
            } else {
                self.check_credit(&txn, &mut pull, &mut pulled)
            };
            let verdict = match verdict {
                Some(reason) => Err(reason),
                None => self
                    .balance
                    .checked_add(txn.amount)
                    .ok_or(RejectReason::BalanceOverflow),
            };
            match verdict {
                Err(reason) => self.reject(&mut report, reason, Some(txn)),
                Ok(balance) => {
                    self.balance = balance;
                    self.txns.push(txn);
                    report.merged += 1;
                    if let Some(metrics) = &self.metrics {
                        metrics.record_accepted();
                    }
                    tracing::debug!(
                        wallet = %self.id,
                        balance = %self.balance(),
                        txn = %self.txns[self.txns.len() - 1],
                        "Merged on top"
                    );
                }
            }
        }
        Ok(report)
    }

    fn check_debit(&self, txn: &Transaction) -> Option<RejectReason> {
        if self.txns.iter().any(|t| t.is_debit() && t.id == txn.id) {
            return Some(RejectReason::DuplicateId { id: txn.id });
        }
        let Some(after) = self.balance.checked_add(txn.amount) else {
            return Some(RejectReason::BalanceOverflow);
        };
        if after.is_negative() && !self.id.is_root() {
            return Some(RejectReason::NegativeBalance {
                balance: self.balance.zents(),
            });
        }
        if !crypto::verify(&self.key, &self.network, &self.id, txn) {
            return Some(RejectReason::BadSignature);
        }
        None
    }

    fn check_credit(
        &self,
        txn: &Transaction,
        pull: &mut Option<PullHook<'_>>,
        pulled: &mut HashSet<Id>,
    ) -> Option<RejectReason> {
        let duplicate = self
            .txns
            .iter()
            .any(|t| t.id == txn.id && t.bnf == txn.bnf && t.amount.is_positive());
        if duplicate {
            return Some(RejectReason::DuplicateCredit {
                id: txn.id,
                bnf: txn.bnf.clone(),
            });
        }
        if txn.is_signed() {
            return Some(RejectReason::RedundantSignature);
        }
        if txn.bnf == self.id {
            return Some(RejectReason::SelfCredit);
        }

        let missing = || RejectReason::MissingPayer {
            payer: txn.bnf.clone(),
        };
        if !self.store.exists(&txn.bnf) {
            let Some(hook) = pull.as_deref_mut() else {
                tracing::debug!(payer = %txn.bnf, "Paying wallet is absent in a shallow merge");
                return Some(missing());
            };
            if !pulled.insert(txn.bnf.clone()) {
                return Some(missing());
            }
            hook(&txn.bnf);
            if !self.store.exists(&txn.bnf) {
                tracing::debug!(payer = %txn.bnf, "Paying wallet is absent even after pull");
                return Some(missing());
            }
        }

        let debit = match self.payer_debit(&txn.bnf, txn.id) {
            Ok(debit) => debit,
            Err(e) => {
                tracing::warn!(payer = %txn.bnf, error = %e, "Paying wallet can't be read");
                return Some(RejectReason::UnreadablePayer {
                    payer: txn.bnf.clone(),
                    error: e.to_string(),
                });
            }
        };

        let proof = || RejectReason::MissingProof {
            payer: txn.bnf.clone(),
        };
        match debit {
            None => Some(proof()),
            Some(debit) if debit.bnf != self.id => Some(RejectReason::PrefixMismatch {
                routed: debit.bnf,
            }),
            Some(debit) if debit.amount.checked_neg() != Some(txn.amount) => Some(proof()),
            Some(_) => None,
        }
    }

    fn payer_debit(&self, payer: &Id, id: u64) -> Result<Option<Transaction>> {
        let wallet = self.store.acquire(payer)?;
        wallet.debit(id)
    }

    fn reject(&self, report: &mut JoinReport, reason: RejectReason, txn: Option<Transaction>) {
        let rejection = Rejection { reason, txn };
        tracing::error!(
            wallet = %self.id,
            reason = rejection.reason.label(),
            "Merge rejected: {}",
            rejection
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_rejected(&rejection.reason);
        }
        report.rejections.push(rejection);
    }

    /// Write the identity header and the working set, in date order, to `path`.
    ///
    /// Returns whether the file's content changed.
    pub fn save(self, path: &Path, overwrite: bool) -> Result<bool> {
        let before = crypto::file_digest(path)?;
        if path.exists() && !overwrite {
            return Err(Error::AlreadyExists(path.to_path_buf()));
        }

        let mut txns = self.txns;
        txns.sort_by_key(|t| t.date);
        let mut content = storage::header(&self.id, &self.key);
        for txn in &txns {
            content.push_str(&storage::format_line(txn));
        }
        storage::replace(path, &content)?;

        let after = crypto::file_digest(path)?;
        let changed = before != after;
        tracing::info!(
            wallet = %self.id,
            path = %path.display(),
            count = txns.len(),
            changed,
            "Patch saved"
        );
        if let Some(metrics) = &self.metrics {
            metrics.record_save(changed);
        }
        Ok(changed)
    }
}

impl<S: WalletStore + ?Sized> fmt::Debug for SeededPatch<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SeededPatch")
            .field("id", &self.id)
            .field("network", &self.network)
            .field("txns", &self.txns.len())
            .finish_non_exhaustive()
    }
}

impl<S: WalletStore + ?Sized> fmt::Display for SeededPatch<'_, S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.txns.is_empty() {
            write!(f, "nothing")
        } else {
            write!(f, "{} txns", self.txns.len())
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::PrivateKey;
    use crate::wallets::DirWallets;
    use chrono::TimeZone;
    use tempfile::TempDir;

    struct Fixture {
        _dir: TempDir,
        wallets: DirWallets,
        id: Id,
        pvt: PrivateKey,
        wallet: Wallet,
    }

    fn fixture() -> Fixture {
        let dir = TempDir::new().unwrap();
        let wallets = DirWallets::new(dir.path().join("wallets"), Wallet::MAIN_NETWORK);
        let id: Id = "0123456789abcdef".parse().unwrap();
        let pvt = PrivateKey::generate();
        let mut wallet = Wallet::new(dir.path().join("copy"), Wallet::MAIN_NETWORK);
        wallet
            .init(&id, &pvt.public(), false, Wallet::MAIN_NETWORK)
            .unwrap();
        Fixture {
            _dir: dir,
            wallets,
            id,
            pvt,
            wallet,
        }
    }

    fn signed_debit(fx: &Fixture, id: u64, zents: i64) -> Transaction {
        let txn = Transaction::new(
            id,
            Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap(),
            Amount::from_zents(-zents),
            "0000000000000001".parse().unwrap(),
            "-",
        )
        .unwrap();
        let sign = crypto::sign(&fx.pvt, Wallet::MAIN_NETWORK, &fx.id, &txn);
        txn.with_sign(sign)
    }

    #[test]
    fn test_display() {
        let fx = fixture();
        let patch = Patch::new(&fx.wallets);
        assert_eq!(patch.to_string(), "nothing");
        let (seeded, _) = patch
            .join(&fx.wallet, &JoinOptions::default(), None)
            .unwrap();
        assert_eq!(seeded.to_string(), "nothing");
    }

    #[test]
    fn test_root_may_go_negative() {
        let dir = TempDir::new().unwrap();
        let wallets = DirWallets::new(dir.path().join("wallets"), Wallet::MAIN_NETWORK);
        let pvt = PrivateKey::generate();
        let mut root = Wallet::new(dir.path().join("root"), Wallet::MAIN_NETWORK);
        root.init(&Id::root(), &pvt.public(), false, Wallet::MAIN_NETWORK)
            .unwrap();
        root.sub(Amount::from_zld(1).unwrap(), &Id::generate(), &pvt, "-")
            .unwrap();

        let (seeded, report) = Patch::new(&wallets)
            .join(&root, &JoinOptions::default().with_baseline(false), None)
            .unwrap();
        assert_eq!(report.merged, 1);
        assert!(seeded.balance().is_negative());
    }

    #[test]
    fn test_non_root_may_not_go_negative() {
        let fx = fixture();
        fx.wallet.add(&signed_debit(&fx, 0, 10)).unwrap();
        let (seeded, report) = Patch::new(&fx.wallets)
            .join(&fx.wallet, &JoinOptions::default().with_baseline(false), None)
            .unwrap();
        assert!(seeded.transactions().is_empty());
        assert_eq!(
            report.rejections[0].reason,
            RejectReason::NegativeBalance { balance: 0 }
        );
    }

    #[test]
    fn test_legacy_skips_credits_and_fresh_debits() {
        let fx = fixture();
        let pvt = &fx.pvt;
        let mut root = Wallet::new(fx.wallet.path().with_file_name("root"), Wallet::MAIN_NETWORK);
        root.init(&Id::root(), &pvt.public(), false, Wallet::MAIN_NETWORK)
            .unwrap();
        // old debit, then a fresh one made now
        let old = {
            let txn = Transaction::new(
                0,
                Utc::now() - Duration::days(3),
                Amount::from_zents(-5),
                Id::generate(),
                "-",
            )
            .unwrap();
            let sign = crypto::sign(pvt, Wallet::MAIN_NETWORK, &Id::root(), &txn);
            txn.with_sign(sign)
        };
        root.add(&old).unwrap();
        root.sub(Amount::from_zents(7), &Id::generate(), pvt, "-").unwrap();
        root.add(
            &Transaction::new(3, Utc::now() - Duration::days(5), Amount::from_zents(9), Id::generate(), "-")
                .unwrap(),
        )
        .unwrap();

        let options = JoinOptions::default().with_baseline(false).with_legacy(true);
        let (seeded, report) = Patch::new(&fx.wallets).join(&root, &options, None).unwrap();
        assert_eq!(seeded.transactions(), &[old][..]);
        assert_eq!(report.merged, 1);
        assert_eq!(report.skipped, 2);
    }

    #[test]
    fn test_overflowing_debit_is_refused() {
        let dir = TempDir::new().unwrap();
        let wallets = DirWallets::new(dir.path().join("wallets"), Wallet::MAIN_NETWORK);
        let pvt = PrivateKey::generate();
        let mut root = Wallet::new(dir.path().join("root"), Wallet::MAIN_NETWORK);
        root.init(&Id::root(), &pvt.public(), false, Wallet::MAIN_NETWORK)
            .unwrap();
        let debit = |id: u64, zents: i64| {
            let txn = Transaction::new(
                id,
                Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap(),
                Amount::from_zents(zents),
                "0000000000000001".parse().unwrap(),
                "-",
            )
            .unwrap();
            let sign = crypto::sign(&pvt, Wallet::MAIN_NETWORK, &Id::root(), &txn);
            txn.with_sign(sign)
        };
        root.add(&debit(0, i64::MIN)).unwrap();
        let mut seeded = Patch::new(&wallets).seed(&root, true).unwrap();
        assert_eq!(seeded.balance().zents(), i64::MIN);

        root.add(&debit(1, -1)).unwrap();
        let report = seeded.join(&root, &JoinOptions::default(), None).unwrap();
        assert_eq!(report.merged, 0);
        assert_eq!(report.rejections[0].reason, RejectReason::BalanceOverflow);
        assert_eq!(seeded.balance().zents(), i64::MIN);
    }

    #[test]
    fn test_overflowing_baseline_is_corrupt() {
        let fx = fixture();
        for id in 0..2 {
            fx.wallet
                .add(
                    &Transaction::new(
                        id,
                        Utc.with_ymd_and_hms(2018, 1, 1, 0, 0, 0).unwrap(),
                        Amount::from_zents(i64::MAX),
                        "0000000000000001".parse().unwrap(),
                        "-",
                    )
                    .unwrap(),
                )
                .unwrap();
        }
        let result = Patch::new(&fx.wallets).seed(&fx.wallet, true);
        assert!(matches!(result, Err(Error::CorruptLedger { .. })));
    }

    #[test]
    fn test_save_refuses_existing_file_without_overwrite() {
        let fx = fixture();
        let (seeded, _) = Patch::new(&fx.wallets)
            .join(&fx.wallet, &JoinOptions::default(), None)
            .unwrap();
        let result = seeded.save(fx.wallet.path(), false);
        assert!(matches!(result, Err(Error::AlreadyExists(_))));
    }

    #[test]
    fn test_metrics_follow_outcomes() {
        let fx = fixture();
        fx.wallet.add(&signed_debit(&fx, 0, 10)).unwrap();
        let metrics = Metrics::new().unwrap();
        let (seeded, _) = Patch::new(&fx.wallets)
            .with_metrics(metrics.clone())
            .join(&fx.wallet, &JoinOptions::default().with_baseline(false), None)
            .unwrap();
        let target = fx.wallet.path().with_file_name("target");
        assert!(seeded.save(&target, false).unwrap());

        assert_eq!(metrics.accepted_total.get(), 0);
        assert_eq!(
            metrics
                .rejected_total
                .with_label_values(&["negative_balance"])
                .get(),
            1
        );
        assert_eq!(metrics.saves_total.with_label_values(&["true"]).get(), 1);
    }

    #[test]
    fn test_options_from_config() {
        let config = MergeConfig {
            legacy_window_secs: 60,
            pull: true,
        };
        let options = JoinOptions::from_config(&config);
        assert_eq!(options.legacy_window, Duration::seconds(60));
        assert!(options.baseline);
        assert!(!options.legacy);
    }
}
