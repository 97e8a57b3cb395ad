//! Extracts the `key: value` stats the simulator prints after its banner.

use crate::error::{Error, Result};
use std::collections::BTreeMap;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

pub const STATS_MARKER: &str = "============= MacSim Stats =============";

pub type StatMap = BTreeMap<String, f64>;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum ParseMode {
    /// Skip anything after the marker that is not a `key: number` line.
    /// A missing log yields an empty map.
    #[default]
    Lenient,
    /// Malformed lines and missing logs are errors.
    Strict,
}

pub fn parse_log(path: &Path, mode: ParseMode) -> Result<StatMap> {
    match fs::read(path) {
        Ok(bytes) => match mode {
            // simulator diagnostics are not guaranteed to be UTF-8
            ParseMode::Lenient => parse_str(&String::from_utf8_lossy(&bytes), path, mode),
            ParseMode::Strict => {
                let text = String::from_utf8(bytes)
                    .map_err(|e| Error::io(path, std::io::Error::new(ErrorKind::InvalidData, e)))?;
                parse_str(&text, path, mode)
            }
        },
        Err(e) if e.kind() == ErrorKind::NotFound => match mode {
            ParseMode::Lenient => {
                debug!(log = %path.display(), "log missing, no stats");
                Ok(StatMap::new())
            }
            ParseMode::Strict => Err(Error::MissingLog(path.to_path_buf())),
        },
        Err(e) => Err(Error::io(path, e)),
    }
}

/// `origin` only labels diagnostics; nothing is read from it.
pub fn parse_str(text: &str, origin: &Path, mode: ParseMode) -> Result<StatMap> {
    let mut stats = StatMap::new();
    let mut in_stats = false;
    for (idx, raw) in text.lines().enumerate() {
        let line = raw.trim();
        if line.is_empty() {
            continue;
        }
        if !in_stats {
            in_stats = line.contains(STATS_MARKER);
            continue;
        }
        // subsection header, e.g. "CORE_0:"
        if line.ends_with(':') {
            continue;
        }
        match split_stat(line) {
            Some((key, value)) => {
                stats.insert(key.to_string(), value);
            }
            None => match mode {
                ParseMode::Lenient => {
                    debug!(log = %origin.display(), line_no = idx + 1, line, "skipping line");
                }
                ParseMode::Strict => {
                    return Err(Error::MalformedLine {
                        path: origin.to_path_buf(),
                        line_no: idx + 1,
                        line: line.to_string(),
                    });
                }
            },
        }
    }
    Ok(stats)
}

fn split_stat(line: &str) -> Option<(&str, f64)> {
    let (key, value) = line.split_once(':')?;
    if value.contains(':') {
        return None;
    }
    let key = key.trim();
    if key.is_empty() {
        return None;
    }
    let value: f64 = value.trim().parse().ok()?;
    value.is_finite().then_some((key, value))
}
