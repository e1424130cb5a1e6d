//! Error types for the wallet ledger

use std::path::PathBuf;
use thiserror::Error;

use crate::types::Id;

/// Result type for ledger operations
pub type Result<T> = std::result::Result<T, Error>;

/// Ledger errors
#[derive(Error, Debug)]
pub enum Error {
    /// Stored data could not be parsed, or the backing file is absent on a read path
    #[error("Corrupt ledger {}: {reason}", path.display())]
    CorruptLedger {
        /// Backing file
        path: PathBuf,
        /// What was wrong with it
        reason: String,
    },

    /// `init` without `overwrite` on an existing file
    #[error("Ledger {} already exists", .0.display())]
    AlreadyExists(PathBuf),

    /// Malformed wallet identifier
    #[error("Invalid wallet id: {0:?}")]
    InvalidId(String),

    /// Amount out of range or not representable in zents
    #[error("Invalid amount: {0}")]
    InvalidAmount(String),

    /// Memo outside the allowed charset or length
    #[error("Invalid details: {0:?}")]
    InvalidDetails(String),

    /// Key material could not be decoded
    #[error("Invalid key: {0}")]
    InvalidKey(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// A transaction line that does not match the ledger grammar
#[derive(Error, Debug, Clone, PartialEq, Eq)]
#[error("Invalid line #{line_no}: {reason}")]
pub struct LineError {
    /// 1-based line number in the ledger file
    pub line_no: usize,
    /// Which field failed and why
    pub reason: String,
}

impl LineError {
    /// Lift into a fatal ledger error for the given file
    pub fn in_file(self, path: impl Into<PathBuf>) -> Error {
        Error::CorruptLedger {
            path: path.into(),
            reason: self.to_string(),
        }
    }
}

/// Why the merge engine refused a candidate wallet or one of its transactions.
///
/// These are diagnostics, not failures: a rejection never aborts a merge.
#[derive(Error, Debug, Clone, PartialEq, Eq, serde::Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RejectReason {
    /// Candidate belongs to another network
    #[error("wallet is from network {theirs:?}, ours is {ours:?}")]
    NetworkMismatch {
        /// Adopted network
        ours: String,
        /// Candidate network
        theirs: String,
    },

    /// Candidate carries a different public key
    #[error("public key mismatch")]
    KeyMismatch,

    /// Candidate is a different wallet
    #[error("wallet id mismatch, ours is {ours}, theirs is {theirs}")]
    IdMismatch {
        /// Adopted id
        ours: Id,
        /// Candidate id
        theirs: Id,
    },

    /// A different debit already holds this id
    #[error("debit #{id} already exists")]
    DuplicateId {
        /// Debit id
        id: u64,
    },

    /// Accepting the debit would make a non-root balance negative
    #[error("balance {balance} would go negative")]
    NegativeBalance {
        /// Running balance in zents before the debit
        balance: i64,
    },

    /// Debit signature does not verify
    #[error("invalid signature")]
    BadSignature,

    /// A credit with the same id and payer already exists
    #[error("credit #{id} from {bnf} already exists")]
    DuplicateCredit {
        /// Transaction id
        id: u64,
        /// Payer
        bnf: Id,
    },

    /// Credits must not be signed
    #[error("signature is redundant on a credit")]
    RedundantSignature,

    /// The payer's debit with this id is routed to another wallet
    #[error("payment is routed to {routed}, not to us")]
    PrefixMismatch {
        /// Beneficiary named in the payer's debit
        routed: Id,
    },

    /// Paying wallet is not available locally
    #[error("paying wallet {payer} is absent")]
    MissingPayer {
        /// Payer
        payer: Id,
    },

    /// Paying wallet has no matching debit
    #[error("paying wallet {payer} doesn't have this transaction")]
    MissingProof {
        /// Payer
        payer: Id,
    },

    /// Paying wallet is present but could not be read
    #[error("paying wallet {payer} is unreadable: {error}")]
    UnreadablePayer {
        /// Payer
        payer: Id,
        /// Read failure
        error: String,
    },

    /// A credit naming the merged wallet as its own payer
    #[error("wallet can't pay itself")]
    SelfCredit,

    /// Accepting the transaction would overflow the balance
    #[error("balance would overflow")]
    BalanceOverflow,
}

impl RejectReason {
    /// Short stable label, used as a metrics dimension
    pub fn label(&self) -> &'static str {
        match self {
            RejectReason::NetworkMismatch { .. } => "network_mismatch",
            RejectReason::KeyMismatch => "key_mismatch",
            RejectReason::IdMismatch { .. } => "id_mismatch",
            RejectReason::DuplicateId { .. } => "duplicate_id",
            RejectReason::NegativeBalance { .. } => "negative_balance",
            RejectReason::BadSignature => "bad_signature",
            RejectReason::DuplicateCredit { .. } => "duplicate_credit",
            RejectReason::RedundantSignature => "redundant_signature",
            RejectReason::PrefixMismatch { .. } => "prefix_mismatch",
            RejectReason::MissingPayer { .. } => "missing_payer",
            RejectReason::MissingProof { .. } => "missing_proof",
            RejectReason::UnreadablePayer { .. } => "unreadable_payer",
            RejectReason::SelfCredit => "self_credit",
            RejectReason::BalanceOverflow => "balance_overflow",
        }
    }

    /// Whether this rejection discards the whole candidate wallet
    pub fn is_wallet_level(&self) -> bool {
        matches!(
            self,
            RejectReason::NetworkMismatch { .. }
                | RejectReason::KeyMismatch
                | RejectReason::IdMismatch { .. }
        )
    }
}
