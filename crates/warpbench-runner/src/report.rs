//! Renderings of an [`Aggregate`]: a fixed-width text table and the
//! per-stat series a bar chart is drawn from.

use crate::aggregate::Aggregate;
use crate::error::{Error, Result};
use crate::ordered::OrderedMap;
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::fs;
use std::path::Path;
use tracing::{info, warn};

const NAME_WIDTH: usize = 30;
const STAT_WIDTH: usize = 25;

/// One block per config: a header of `stats`, then a row per benchmark.
///
/// Every requested stat must exist in every cell; callers pick stats they
/// know are reported everywhere.
pub fn render_table<S: AsRef<str>>(aggregate: &Aggregate, stats: &[S]) -> Result<String> {
    let rule = format!(
        "{}+{}\n",
        "-".repeat(NAME_WIDTH),
        format!("{}+", "-".repeat(STAT_WIDTH)).repeat(stats.len())
    );
    let mut txt = String::new();
    for (config, benchmarks) in aggregate.configs() {
        txt.push('\n');
        txt.push_str(&rule);
        let _ = write!(txt, "{:^w$}|", config, w = NAME_WIDTH);
        for stat in stats {
            let _ = write!(txt, "{:^w$}|", stat.as_ref(), w = STAT_WIDTH);
        }
        txt.push('\n');
        txt.push_str(&rule);
        for (benchmark, cell) in benchmarks.iter() {
            let _ = write!(txt, "{:<w$}|", benchmark, w = NAME_WIDTH);
            for stat in stats {
                let stat = stat.as_ref();
                let value = cell.get(stat).ok_or_else(|| Error::MissingStat {
                    config: config.to_string(),
                    benchmark: benchmark.to_string(),
                    stat: stat.to_string(),
                })?;
                let _ = write!(txt, "{:>w$}|", format!("{:?}", value), w = STAT_WIDTH);
            }
            txt.push('\n');
        }
        txt.push_str(&rule);
    }
    Ok(txt)
}

pub fn write_table<S: AsRef<str>>(aggregate: &Aggregate, stats: &[S], path: &Path) -> Result<()> {
    let txt = render_table(aggregate, stats)?;
    fs::write(path, txt).map_err(|e| Error::io(path, e))?;
    info!(path = %path.display(), "dumped stats table");
    Ok(())
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Exclusion {
    pub benchmark: String,
    pub config: String,
}

/// Values of one stat, lined up for a grouped bar chart: `values[config][i]`
/// belongs to `benchmarks[i]`. Configs and benchmarks keep aggregate order.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotSeries {
    pub stat: String,
    pub benchmarks: Vec<String>,
    pub values: OrderedMap<Vec<f64>>,
    pub exclusions: Vec<Exclusion>,
}

/// Keeps only benchmarks for which every config reports `stat`. Each
/// (benchmark, config) pair that forced a benchmark out is listed in
/// `exclusions`.
pub fn filter_stat(aggregate: &Aggregate, stat: &str) -> PlotSeries {
    let mut series = PlotSeries {
        stat: stat.to_string(),
        benchmarks: Vec::new(),
        values: aggregate
            .config_ids()
            .map(|c| (c, Vec::<f64>::new()))
            .collect(),
        exclusions: Vec::new(),
    };

    for benchmark in aggregate.benchmark_ids() {
        let mut row = Vec::new();
        let mut skipped = false;
        for (config, benchmarks) in aggregate.configs() {
            match benchmarks.get(benchmark).and_then(|cell| cell.get(stat)) {
                Some(value) => row.push((config, *value)),
                None => {
                    warn!(
                        "... skipping {} due to missing key \"{}\" in {}:{}",
                        benchmark, stat, config, benchmark
                    );
                    series.exclusions.push(Exclusion {
                        benchmark: benchmark.to_string(),
                        config: config.to_string(),
                    });
                    skipped = true;
                }
            }
        }
        if skipped {
            continue;
        }
        series.benchmarks.push(benchmark.to_string());
        for (config, value) in row {
            if let Some(values) = series.values.get_mut(config) {
                values.push(value);
            }
        }
    }
    series
}

impl PlotSeries {
    pub fn is_excluded(&self, benchmark: &str) -> bool {
        self.exclusions.iter().any(|e| e.benchmark == benchmark)
    }
}
