//! Transaction records exchanged between the booth and the reconciler.
//!
//! Booth operations emit [`TxRecord`]s in their receipts; the reconciler
//! consumes the same shape from a finalized log.  Logs are either a JSON
//! array or newline-delimited JSON, one record per line.

use crate::address::Address;
use crate::error::{BallotError, Result};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::path::Path;

/// Operation that produced a record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TxKind {
    /// Votes deposited into an accumulator.
    Cast,
    /// Votes withdrawn from an accumulator.
    Withdraw,
}

impl TxKind {
    /// Single-letter code used in the raw-votes export (`v` / `w`).
    pub fn code(&self) -> &'static str {
        match self {
            TxKind::Cast => "v",
            TxKind::Withdraw => "w",
        }
    }
}

/// One vote movement observed on the host ledger.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TxRecord {
    /// Cast or withdraw.
    #[serde(rename = "type")]
    pub kind: TxKind,
    /// Accumulator the votes moved into or out of.
    #[serde(rename = "accumulatorId")]
    pub accumulator: Address,
    /// Card holder that signed the operation.
    pub voter: Address,
    /// Unsigned fixed-point vote amount; the direction follows from kind and side.
    #[serde(
        serialize_with = "serialize_amount",
        deserialize_with = "deserialize_amount"
    )]
    pub magnitude: u128,
    /// Opaque payload kept for audit.
    #[serde(default, rename = "rawPayload", skip_serializing_if = "Option::is_none")]
    pub raw: Option<String>,
}

fn serialize_amount<S: Serializer>(amount: &u128, serializer: S) -> std::result::Result<S::Ok, S::Error> {
    serializer.serialize_str(&amount.to_string())
}

fn deserialize_amount<'de, D: Deserializer<'de>>(deserializer: D) -> std::result::Result<u128, D::Error> {
    #[derive(Deserialize)]
    #[serde(untagged)]
    enum Amount {
        Text(String),
        Number(u64),
    }
    match Amount::deserialize(deserializer)? {
        Amount::Number(n) => Ok(n as u128),
        Amount::Text(text) => text.trim().parse::<u128>().map_err(serde::de::Error::custom),
    }
}

/// Parses a log from JSON-array or newline-delimited text.
pub fn parse_stream(contents: &str) -> Result<Vec<TxRecord>> {
    let trimmed = contents.trim_start();
    if trimmed.starts_with('[') {
        return serde_json::from_str(trimmed)
            .map_err(|err| BallotError::Decode(format!("invalid transaction array: {err}")));
    }
    contents
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty() && !line.trim_start().starts_with('#'))
        .map(|(number, line)| {
            serde_json::from_str(line).map_err(|err| {
                BallotError::Decode(format!("invalid transaction on line {}: {err}", number + 1))
            })
        })
        .collect()
}

/// Reads and parses a log file.
pub fn load_stream(path: &Path) -> Result<Vec<TxRecord>> {
    let contents = std::fs::read_to_string(path)
        .map_err(|err| BallotError::Io(format!("failed to read {}: {err}", path.display())))?;
    parse_stream(&contents)
}

#[cfg(test)]
mod tests {
    use super::*;

    const VOTER: &str = "0x1111111111111111111111111111111111111111";
    const BOX: &str = "0x2222222222222222222222222222222222222222";

    #[test]
    fn parses_array_and_lines() {
        let array = format!(
            r#"[{{"type":"cast","accumulatorId":"{BOX}","voter":"{VOTER}","magnitude":"5000000000000000000"}}]"#
        );
        let records = parse_stream(&array).unwrap();
        assert_eq!(records[0].kind, TxKind::Cast);
        assert_eq!(records[0].magnitude, 5_000_000_000_000_000_000);

        let lines = format!(
            "# exported log\n{{\"type\":\"withdraw\",\"accumulatorId\":\"{BOX}\",\"voter\":\"{VOTER}\",\"magnitude\":7,\"rawPayload\":\"0xab\"}}\n\n"
        );
        let records = parse_stream(&lines).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].kind, TxKind::Withdraw);
        assert_eq!(records[0].magnitude, 7);
        assert_eq!(records[0].raw.as_deref(), Some("0xab"));
    }

    #[test]
    fn reports_bad_line_number() {
        let err = parse_stream("{}\n").unwrap_err();
        assert!(err.to_string().contains("line 1"));
    }

    #[test]
    fn magnitudes_serialize_as_strings() {
        let record = TxRecord {
            kind: TxKind::Cast,
            accumulator: Address::from_hex(BOX).unwrap(),
            voter: Address::from_hex(VOTER).unwrap(),
            magnitude: u128::MAX,
            raw: None,
        };
        let json = serde_json::to_string(&record).unwrap();
        assert!(json.contains(&format!("\"{}\"", u128::MAX)));
        assert!(!json.contains("rawPayload"));
        assert_eq!(parse_stream(&format!("[{json}]")).unwrap()[0], record);
    }
}
