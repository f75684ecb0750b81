//! File writers for reconciliation artifacts.
//!
//! Vote amounts are written in whole-vote decimal form (`format_votes`), so a
//! net of `-2.5 * 10^18` appears as `-2.5`.

use crate::error::Result;
use crate::fixed::format_votes;
use crate::reconcile::Reconciliation;
use std::collections::BTreeMap;
use std::fs::{create_dir_all, File};
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};
use tracing::info;

/// Raw movement table, seed rows first.
pub const RAW_VOTES_FILE: &str = "raw_votes.csv";
/// Per-motion histogram of nets.
pub const DISTRIBUTION_FILE: &str = "distribution_by_vote.csv";
/// Flattened `(motion, voter, net)` table.
pub const FLAT_FILE: &str = "distr.csv";
/// Nets as nested JSON.
pub const JSON_FILE: &str = "distr.json";

/// Writes `lines` to `dir/name`, one per line, creating `dir` if needed.
pub fn write_lines(dir: impl AsRef<Path>, name: &str, lines: &[String]) -> Result<PathBuf> {
    let dir = dir.as_ref();
    create_dir_all(dir)?;
    let path = dir.join(name);
    let mut writer = BufWriter::new(File::create(&path)?);
    for line in lines {
        writer.write_all(line.as_bytes())?;
        writer.write_all(b"\n")?;
    }
    writer.flush()?;
    Ok(path)
}

/// `motion,voter,type,votes` rows.
pub fn raw_votes_lines(out: &Reconciliation) -> Vec<String> {
    out.rows
        .iter()
        .map(|row| {
            format!(
                "{},{},{},{}",
                row.motion,
                row.voter,
                row.kind.code(),
                format_votes(row.delta)
            )
        })
        .collect()
}

/// `Proposal,Votes,Count` rows, ascending by motion then net.
pub fn distribution_lines(out: &Reconciliation) -> Vec<String> {
    let mut lines = vec!["Proposal,Votes,Count".to_string()];
    for (motion, counts) in out.histogram() {
        for (net, count) in counts {
            lines.push(format!("{motion},{},{count}", format_votes(net)));
        }
    }
    lines
}

/// `motion,voter,votes` rows.
pub fn flat_lines(out: &Reconciliation) -> Vec<String> {
    out.flattened()
        .into_iter()
        .map(|(motion, voter, net)| format!("{motion},{voter},{}", format_votes(net)))
        .collect()
}

/// `{"<motion>": {"<voter>": "<votes>"}}`, pretty-printed.
pub fn distr_json(out: &Reconciliation) -> Result<String> {
    let nested: BTreeMap<String, BTreeMap<String, String>> = out
        .nets
        .iter()
        .map(|(motion, votes)| {
            let votes = votes
                .iter()
                .map(|(voter, net)| (voter.to_string(), format_votes(*net)))
                .collect();
            (motion.to_string(), votes)
        })
        .collect();
    Ok(serde_json::to_string_pretty(&nested)?)
}

/// Writes all four artifacts into `dir` and returns their paths.
pub fn write_reconciliation(out: &Reconciliation, dir: impl AsRef<Path>) -> Result<Vec<PathBuf>> {
    let dir = dir.as_ref();
    let paths = vec![
        write_lines(dir, RAW_VOTES_FILE, &raw_votes_lines(out))?,
        write_lines(dir, DISTRIBUTION_FILE, &distribution_lines(out))?,
        write_lines(dir, FLAT_FILE, &flat_lines(out))?,
        write_lines(dir, JSON_FILE, &[distr_json(out)?])?,
    ];
    info!(component = "EXPORT", evt = "WRITE", dir = %dir.display(), files = paths.len());
    Ok(paths)
}
