//! Batch runs of a GPU simulator across scheduling-policy configs and
//! benchmarks, and collection of the stats each run prints.
//!
//! Run phase: [`ExperimentRunner`] launches one supervised simulator process
//! per (config, benchmark) cell and leaves a log per cell. Collect phase:
//! [`collect`] parses those logs into an [`Aggregate`], which [`report`]
//! renders as a table or as plot series, or which is exported as JSON.

pub mod aggregate;
pub mod config;
pub mod error;
pub mod ordered;
pub mod parser;
pub mod report;
pub mod runner;
pub mod supervisor;

pub use aggregate::{collect, Aggregate};
pub use config::{cell_log_path, load_experiment, ExperimentFile, Registry};
pub use error::{Error, Result};
pub use ordered::OrderedMap;
pub use parser::{parse_log, parse_str, ParseMode, StatMap, STATS_MARKER};
pub use report::{filter_stat, render_table, write_table, Exclusion, PlotSeries};
pub use runner::{CellOutcome, ExperimentRunner, MatrixOutcome, RUN_SUMMARY_FILE};
pub use supervisor::{RunResult, RunStatus, Supervisor, SupervisorOptions, TIMEOUT_SENTINEL};
