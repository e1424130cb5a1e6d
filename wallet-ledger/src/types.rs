//! Core types for the wallet ledger
//!
//! All types are designed for:
//! - Immutability (value types, equality by content)
//! - Exact arithmetic (integer zents, no floating point)
//! - Strict validation at construction

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::{Error, Result};

/// Wallet identifier: 16 lowercase hex digits
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct Id(String);

impl Id {
    /// The network's mint wallet, exempt from the non-negative balance rule
    pub const ROOT: &'static str = "0000000000000000";

    /// Number of hex digits in an id
    pub const LENGTH: usize = 16;

    /// The root id
    pub fn root() -> Self {
        Self(Self::ROOT.to_string())
    }

    /// Random id
    pub fn generate() -> Self {
        Self(format!("{:016x}", rand::random::<u64>()))
    }

    /// Get as string
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Whether this is the root wallet
    pub fn is_root(&self) -> bool {
        self.0 == Self::ROOT
    }

    pub(crate) fn is_valid(s: &str) -> bool {
        s.len() == Self::LENGTH && s.bytes().all(|b| matches!(b, b'0'..=b'9' | b'a'..=b'f'))
    }
}

impl FromStr for Id {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        if Self::is_valid(s) {
            Ok(Self(s.to_string()))
        } else {
            Err(Error::InvalidId(s.to_string()))
        }
    }
}

impl TryFrom<String> for Id {
    type Error = Error;

    fn try_from(s: String) -> Result<Self> {
        if Self::is_valid(&s) {
            Ok(Self(s))
        } else {
            Err(Error::InvalidId(s))
        }
    }
}

impl From<Id> for String {
    fn from(id: Id) -> Self {
        id.0
    }
}

impl fmt::Display for Id {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Exact amount of currency, counted in zents
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
pub struct Amount(i64);

impl Amount {
    /// Zents in one ZLD
    pub const ZENTS_PER_ZLD: i64 = 100_000_000;

    /// Nothing
    pub const ZERO: Amount = Amount(0);

    /// From a raw zent count
    pub const fn from_zents(zents: i64) -> Self {
        Self(zents)
    }

    /// From whole ZLD
    pub fn from_zld(zld: i64) -> Result<Self> {
        zld.checked_mul(Self::ZENTS_PER_ZLD)
            .map(Self)
            .ok_or_else(|| Error::InvalidAmount(format!("{} ZLD overflows", zld)))
    }

    /// From a decimal ZLD value; must be a whole number of zents
    pub fn from_decimal(zld: Decimal) -> Result<Self> {
        let zents = zld
            .checked_mul(Decimal::from(Self::ZENTS_PER_ZLD))
            .ok_or_else(|| Error::InvalidAmount(format!("{} ZLD overflows", zld)))?;
        if !zents.fract().is_zero() {
            return Err(Error::InvalidAmount(format!("{} ZLD is not whole zents", zld)));
        }
        i64::try_from(zents)
            .map(Self)
            .map_err(|_| Error::InvalidAmount(format!("{} ZLD overflows", zld)))
    }

    /// Raw zent count
    pub const fn zents(&self) -> i64 {
        self.0
    }

    /// Exact value in ZLD
    pub fn to_zld(&self) -> Decimal {
        Decimal::new(self.0, 8).normalize()
    }

    /// Sum, or `None` on overflow
    pub fn checked_add(&self, rhs: Amount) -> Option<Amount> {
        self.0.checked_add(rhs.0).map(Self)
    }

    /// Opposite amount, or `None` for the one value with no opposite
    pub fn checked_neg(&self) -> Option<Amount> {
        self.0.checked_neg().map(Self)
    }

    /// Scalar multiplication, or `None` on overflow
    pub fn checked_mul(&self, factor: i64) -> Option<Amount> {
        self.0.checked_mul(factor).map(Self)
    }

    /// Strictly below zero
    pub fn is_negative(&self) -> bool {
        self.0 < 0
    }

    /// Strictly above zero
    pub fn is_positive(&self) -> bool {
        self.0 > 0
    }
}

impl fmt::Display for Amount {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ZLD", self.to_zld())
    }
}

/// Free-text memo: 1..=128 chars of `[A-Za-z0-9 -.]`
pub fn valid_details(details: &str) -> bool {
    (1..=128).contains(&details.len())
        && details
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || matches!(b, b' ' | b'-' | b'.'))
}

/// Single ledger entry.
///
/// A negative amount is a debit from the owning wallet to `bnf`, a positive
/// one a credit from `bnf`. Only debits carry a signature.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique among the wallet's own debits
    pub id: u64,

    /// UTC, second precision
    pub date: DateTime<Utc>,

    /// Signed amount
    pub amount: Amount,

    /// Counterparty: payee of a debit, payer of a credit
    pub bnf: Id,

    /// Memo
    pub details: String,

    /// Base64 signature, debits only
    pub sign: Option<String>,
}

impl Transaction {
    /// Unsigned transaction; the date is truncated to whole seconds
    pub fn new(
        id: u64,
        date: DateTime<Utc>,
        amount: Amount,
        bnf: Id,
        details: impl Into<String>,
    ) -> Result<Self> {
        let details = details.into();
        if !valid_details(&details) {
            return Err(Error::InvalidDetails(details));
        }
        Ok(Self {
            id,
            date: truncate_to_seconds(date),
            amount,
            bnf,
            details,
            sign: None,
        })
    }

    /// Same transaction carrying `sign`
    pub fn with_sign(mut self, sign: impl Into<String>) -> Self {
        self.sign = Some(sign.into());
        self
    }

    /// Money leaves the wallet
    pub fn is_debit(&self) -> bool {
        self.amount.is_negative()
    }

    /// Non-empty signature present
    pub fn is_signed(&self) -> bool {
        self.sign.as_deref().is_some_and(|s| !s.is_empty())
    }
}

impl fmt::Display for Transaction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "#{} {} {} {} {:?}",
            self.id,
            self.date.format(crate::storage::DATE_FORMAT),
            self.amount,
            self.bnf,
            self.details
        )
    }
}

/// Drop sub-second precision
pub fn truncate_to_seconds(date: DateTime<Utc>) -> DateTime<Utc> {
    DateTime::from_timestamp(date.timestamp(), 0).unwrap_or(date)
}
