//! Text storage for ledgers
//!
//! # File layout
//!
//! ```text
//! line 1: <16-hex-char id>
//! line 2: <public key, single line>
//! line 3: <blank>
//! line 4+: <id>;<date>;<amount>;<bnf>;<details>;<sign>
//! ```
//!
//! A transaction line that fails the grammar invalidates the whole file.

use crate::{
    crypto::Key,
    error::{Error, LineError, Result},
    types::{valid_details, Amount, Id, Transaction},
};
use chrono::NaiveDateTime;
use std::io::Write;
use std::path::Path;

/// Timestamp format of the date field
pub const DATE_FORMAT: &str = "%Y-%m-%dT%H:%M:%SZ";

/// Lines before the first transaction
pub const HEADER_LINES: usize = 3;

const FIELDS: usize = 6;

/// Identity header: id, key, blank separator
pub fn header(id: &Id, key: &Key) -> String {
    format!("{}\n{}\n\n", id, key.to_pub())
}

/// Serialize one transaction, newline-terminated
pub fn format_line(txn: &Transaction) -> String {
    format!(
        "{};{};{};{};{};{}\n",
        txn.id,
        txn.date.format(DATE_FORMAT),
        txn.amount.zents(),
        txn.bnf,
        txn.details,
        txn.sign.as_deref().unwrap_or("")
    )
}

/// Parse one transaction line; `line_no` is only used for diagnostics
pub fn parse_line(line: &str, line_no: usize) -> std::result::Result<Transaction, LineError> {
    let fail = |reason: String| LineError { line_no, reason };
    let clean = line.trim_end_matches(['\n', '\r']);
    let parts: Vec<&str> = clean.split(';').collect();
    if parts.len() != FIELDS {
        return Err(fail(format!(
            "expected {} fields, found {}: {:?}",
            FIELDS,
            parts.len(),
            clean
        )));
    }

    let id = parse_uint(parts[0]).ok_or_else(|| fail(format!("bad id {:?}", parts[0])))?;
    let date = parse_date(parts[1]).ok_or_else(|| fail(format!("bad date {:?}", parts[1])))?;
    let amount =
        parse_int(parts[2]).ok_or_else(|| fail(format!("bad amount {:?}", parts[2])))?;
    let bnf: Id = parts[3]
        .parse()
        .map_err(|_| fail(format!("bad bnf {:?}", parts[3])))?;
    if !valid_details(parts[4]) {
        return Err(fail(format!("bad details {:?}", parts[4])));
    }
    let sign = match parts[5] {
        "" => None,
        s if valid_base64(s) => Some(s.to_string()),
        s => return Err(fail(format!("bad signature {:?}", s))),
    };

    Ok(Transaction {
        id,
        date,
        amount: Amount::from_zents(amount),
        bnf,
        details: parts[4].to_string(),
        sign,
    })
}

fn parse_uint(s: &str) -> Option<u64> {
    if s.is_empty() || !s.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_int(s: &str) -> Option<i64> {
    let digits = s.strip_prefix('-').unwrap_or(s);
    if digits.is_empty() || !digits.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    s.parse().ok()
}

fn parse_date(s: &str) -> Option<chrono::DateTime<chrono::Utc>> {
    // YYYY-MM-DDTHH:MM:SSZ, exactly
    const SHAPE: &[u8; 20] = b"dddd-dd-ddTdd:dd:ddZ";
    let bytes = s.as_bytes();
    if bytes.len() != SHAPE.len() {
        return None;
    }
    let shaped = bytes.iter().zip(SHAPE.iter()).all(|(b, p)| match p {
        b'd' => b.is_ascii_digit(),
        p => b == p,
    });
    if !shaped {
        return None;
    }
    NaiveDateTime::parse_from_str(s, DATE_FORMAT)
        .ok()
        .map(|naive| naive.and_utc())
}

fn valid_base64(s: &str) -> bool {
    let body = s.trim_end_matches('=');
    let padding = s.len() - body.len();
    !body.is_empty()
        && padding <= 3
        && body
            .bytes()
            .all(|b| b.is_ascii_alphanumeric() || b == b'+' || b == b'/')
}

/// All lines of a ledger file, newline included
pub fn read_lines(path: &Path) -> Result<Vec<String>> {
    if !path.exists() {
        return Err(Error::CorruptLedger {
            path: path.to_path_buf(),
            reason: "file is absent".to_string(),
        });
    }
    let content = String::from_utf8(std::fs::read(path)?).map_err(|_| Error::CorruptLedger {
        path: path.to_path_buf(),
        reason: "not UTF-8".to_string(),
    })?;
    Ok(content.split_inclusive('\n').map(str::to_string).collect())
}

/// Append text to an existing file
pub fn append(path: &Path, text: &str) -> Result<()> {
    let mut file = std::fs::OpenOptions::new().append(true).open(path)?;
    file.write_all(text.as_bytes())?;
    file.flush()?;
    Ok(())
}

/// Replace the file's content through a temp file in the same directory
pub fn replace(path: &Path, content: &str) -> Result<()> {
    let dir = match path.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent,
        _ => Path::new("."),
    };
    let mut tmp = tempfile::NamedTempFile::new_in(dir)?;
    tmp.write_all(content.as_bytes())?;
    tmp.as_file().sync_all()?;
    tmp.persist(path).map_err(|e| Error::Io(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    const LINE: &str = "3;2018-06-01T12:00:00Z;-1000;0000000000000001;for beer;c2lnbmF0dXJl\n";

    #[test]
    fn test_parse_debit_line() {
        let txn = parse_line(LINE, 4).unwrap();
        assert_eq!(txn.id, 3);
        assert_eq!(txn.date, Utc.with_ymd_and_hms(2018, 6, 1, 12, 0, 0).unwrap());
        assert_eq!(txn.amount.zents(), -1000);
        assert_eq!(txn.bnf.as_str(), "0000000000000001");
        assert_eq!(txn.details, "for beer");
        assert_eq!(txn.sign.as_deref(), Some("c2lnbmF0dXJl"));
        assert_eq!(format_line(&txn), LINE);
    }

    #[test]
    fn test_parse_credit_line() {
        let line = "0;2018-06-01T12:00:00Z;500;0000000000000001;-;\n";
        let txn = parse_line(line, 4).unwrap();
        assert!(txn.sign.is_none());
        assert_eq!(format_line(&txn), line);
    }

    #[test]
    fn test_rejects_malformed_lines() {
        let bad = [
            "3;2018-06-01T12:00:00Z;-1000;0000000000000001;for beer",
            "x;2018-06-01T12:00:00Z;-1000;0000000000000001;-;",
            "-3;2018-06-01T12:00:00Z;-1000;0000000000000001;-;",
            "3;2018-06-01 12:00:00;-1000;0000000000000001;-;",
            "3;2018-13-01T12:00:00Z;-1000;0000000000000001;-;",
            "3;2018-06-01T12:00:00Z;1.5;0000000000000001;-;",
            "3;2018-06-01T12:00:00Z;-;0000000000000001;-;",
            "3;2018-06-01T12:00:00Z;-1000;000000000000000G;-;",
            "3;2018-06-01T12:00:00Z;-1000;0000000000000001;;",
            "3;2018-06-01T12:00:00Z;-1000;0000000000000001;a_b;",
            "3;2018-06-01T12:00:00Z;-1000;0000000000000001;-;bad!sig",
            "3;2018-06-01T12:00:00Z;-1000;0000000000000001;-;abc====",
            "3;2018-06-01T12:00:00Z;-1000;0000000000000001;-;abc;extra",
        ];
        for line in bad {
            assert!(parse_line(line, 9).is_err(), "accepted {:?}", line);
        }
    }

    #[test]
    fn test_line_error_carries_line_number() {
        let err = parse_line("garbage", 12).unwrap_err();
        assert_eq!(err.line_no, 12);
    }

    #[test]
    fn test_read_lines_on_absent_file() {
        let dir = tempfile::tempdir().unwrap();
        let result = read_lines(&dir.path().join("nope"));
        assert!(matches!(result, Err(Error::CorruptLedger { .. })));
    }

    #[test]
    fn test_read_lines_rejects_invalid_utf8() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet");
        std::fs::write(&path, b"0123456789abcdef\n\xff\xfe\n").unwrap();
        match read_lines(&path) {
            Err(Error::CorruptLedger { reason, .. }) => assert_eq!(reason, "not UTF-8"),
            other => panic!("expected corrupt ledger, got {:?}", other),
        }
    }

    #[test]
    fn test_replace_and_append() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("wallet");
        replace(&path, "a\n").unwrap();
        append(&path, "b\n").unwrap();
        assert_eq!(read_lines(&path).unwrap(), vec!["a\n", "b\n"]);
        replace(&path, "c\n").unwrap();
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "c\n");
    }
}
