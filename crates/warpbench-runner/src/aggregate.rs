use crate::config::{cell_log_path, Registry};
use crate::error::{Error, Result};
use crate::ordered::OrderedMap;
use crate::parser::{parse_log, ParseMode, StatMap};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::Path;
use tracing::{debug, info};

/// config id -> benchmark id -> stats, in the order cells were inserted
/// (registry order when built by [`collect`]).
///
/// Sibling maps may hold different stat names; a stat one scheduling
/// policy reports can be absent from another's run.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Aggregate {
    cells: OrderedMap<OrderedMap<StatMap>>,
}

impl Aggregate {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, config: &str, benchmark: &str, stats: StatMap) {
        self.cells.entry_or_default(config).insert(benchmark, stats);
    }

    pub fn get(&self, config: &str, benchmark: &str) -> Option<&StatMap> {
        self.cells.get(config).and_then(|b| b.get(benchmark))
    }

    pub fn configs(&self) -> impl Iterator<Item = (&str, &OrderedMap<StatMap>)> {
        self.cells.iter()
    }

    pub fn config_ids(&self) -> impl Iterator<Item = &str> {
        self.cells.keys()
    }

    /// Every benchmark id seen under any config, in first-seen order.
    pub fn benchmark_ids(&self) -> Vec<&str> {
        let mut ids: Vec<&str> = Vec::new();
        for id in self.cells.values().flat_map(|b| b.keys()) {
            if !ids.contains(&id) {
                ids.push(id);
            }
        }
        ids
    }

    pub fn cell_count(&self) -> usize {
        self.cells.values().map(|b| b.len()).sum()
    }

    pub fn to_json(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"    ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        Ok(serde_json::from_str(raw)?)
    }

    pub fn write_json(&self, path: &Path) -> Result<()> {
        let body = self.to_json()?;
        let mut file = fs::File::create(path).map_err(|e| Error::io(path, e))?;
        file.write_all(body.as_bytes())
            .map_err(|e| Error::io(path, e))?;
        info!(path = %path.display(), "exported stats");
        Ok(())
    }

    pub fn read_json(path: &Path) -> Result<Self> {
        let raw = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
        Self::from_json(&raw)
    }
}

/// Parses every cell's log under `log_dir`. Runs nothing; re-collecting
/// after a finished run only needs the logs.
///
/// Each (config, benchmark) pair gets an entry, empty when its log had no
/// stats section or is missing.
pub fn collect(
    configs: &Registry,
    benchmarks: &Registry,
    log_dir: &Path,
    mode: ParseMode,
) -> Result<Aggregate> {
    let mut aggregate = Aggregate::new();
    for config in configs.keys() {
        for benchmark in benchmarks.keys() {
            let log = cell_log_path(log_dir, config, benchmark);
            let stats = parse_log(&log, mode)?;
            debug!(config, benchmark, stats = stats.len(), "parsed log");
            aggregate.insert(config, benchmark, stats);
        }
    }
    Ok(aggregate)
}
