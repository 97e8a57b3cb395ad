//! Drives the supervisor over every (config, benchmark) cell, one at a time.

use crate::config::{cell_log_path, Registry};
use crate::error::{Error, Result};
use crate::supervisor::{RunStatus, Supervisor};
use chrono::{DateTime, Utc};
use serde_json::{json, Value};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{error, info, warn};

pub const RUN_SUMMARY_FILE: &str = "run_summary.json";

#[derive(Debug, Clone)]
pub struct CellOutcome {
    pub config: String,
    pub benchmark: String,
    pub log_path: PathBuf,
    /// `None` when the supervisor could not run the cell at all (log not
    /// writable, simulator not launchable).
    pub status: Option<RunStatus>,
    pub error: Option<String>,
    pub elapsed: Duration,
}

impl CellOutcome {
    pub fn ok(&self) -> bool {
        self.status.map(|s| s.is_success()).unwrap_or(false)
    }

    fn to_json(&self) -> Value {
        json!({
            "config": self.config,
            "benchmark": self.benchmark,
            "log_path": self.log_path.to_string_lossy(),
            "status": self.status.map(|s| s.as_str()).unwrap_or("not_run"),
            "exit_code": self.status.and_then(|s| s.exit_code()),
            "error": self.error,
            "elapsed_secs": self.elapsed.as_secs_f64(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct MatrixOutcome {
    pub cells: Vec<CellOutcome>,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
}

impl MatrixOutcome {
    pub fn overall_ok(&self) -> bool {
        self.cells.iter().all(|c| c.ok())
    }

    pub fn failed(&self) -> impl Iterator<Item = &CellOutcome> {
        self.cells.iter().filter(|c| !c.ok())
    }

    pub fn to_json(&self) -> Value {
        json!({
            "schema_version": "run_summary_v1",
            "started_at": self.started_at.to_rfc3339(),
            "finished_at": self.finished_at.to_rfc3339(),
            "overall_ok": self.overall_ok(),
            "cells": self.cells.iter().map(|c| c.to_json()).collect::<Vec<_>>(),
        })
    }
}

#[derive(Debug, Clone)]
pub struct ExperimentRunner {
    simulator: PathBuf,
    supervisor: Supervisor,
}

impl ExperimentRunner {
    pub fn new(simulator: impl Into<PathBuf>, supervisor: Supervisor) -> Self {
        Self {
            simulator: simulator.into(),
            supervisor,
        }
    }

    pub fn command_for(&self, gpu_config: &Path, kernel_config: &Path) -> Vec<String> {
        vec![
            self.simulator.to_string_lossy().to_string(),
            "-g".to_string(),
            gpu_config.to_string_lossy().to_string(),
            "-t".to_string(),
            kernel_config.to_string_lossy().to_string(),
        ]
    }

    /// Runs the whole matrix and reports whether every cell succeeded.
    pub fn run_all(
        &self,
        configs: &Registry,
        benchmarks: &Registry,
        log_dir: &Path,
        timeout: Duration,
    ) -> Result<bool> {
        Ok(self.run_matrix(configs, benchmarks, log_dir, timeout)?.overall_ok())
    }

    /// Configs outer, benchmarks inner. A failing cell never stops the
    /// loop. Writes `run_summary.json` into `log_dir` afterwards.
    pub fn run_matrix(
        &self,
        configs: &Registry,
        benchmarks: &Registry,
        log_dir: &Path,
        timeout: Duration,
    ) -> Result<MatrixOutcome> {
        fs::create_dir_all(log_dir).map_err(|e| Error::io(log_dir, e))?;
        let console = self.supervisor.options().progress;
        let started_at = Utc::now();
        let mut cells = Vec::with_capacity(configs.len() * benchmarks.len());

        for (config_id, gpu_config) in configs.iter() {
            for (bench_id, kernel_config) in benchmarks.iter() {
                let log_path = cell_log_path(log_dir, config_id, bench_id);
                let command = self.command_for(gpu_config, kernel_config);
                if console {
                    print_banner(config_id, bench_id, gpu_config, kernel_config, &log_path, &command);
                }
                info!(config = config_id, benchmark = bench_id, "starting cell");

                let outcome = match self.supervisor.run(&command, &log_path, timeout) {
                    Ok(result) => CellOutcome {
                        config: config_id.to_string(),
                        benchmark: bench_id.to_string(),
                        log_path: result.log_path,
                        status: Some(result.status),
                        error: None,
                        elapsed: result.elapsed,
                    },
                    Err(e) => {
                        error!(config = config_id, benchmark = bench_id, "{}", e);
                        CellOutcome {
                            config: config_id.to_string(),
                            benchmark: bench_id.to_string(),
                            log_path: log_path.clone(),
                            status: None,
                            error: Some(e.to_string()),
                            elapsed: Duration::ZERO,
                        }
                    }
                };
                match outcome.status {
                    Some(RunStatus::Success) => {
                        info!(config = config_id, benchmark = bench_id, "cell ok")
                    }
                    Some(RunStatus::NonZeroExit(code)) => {
                        warn!(config = config_id, benchmark = bench_id, code, "cell failed")
                    }
                    Some(RunStatus::TimedOut) => {
                        warn!(config = config_id, benchmark = bench_id, "cell timed out")
                    }
                    None => {}
                }
                if console {
                    print_status(&outcome);
                }
                cells.push(outcome);
            }
        }

        let outcome = MatrixOutcome {
            cells,
            started_at,
            finished_at: Utc::now(),
        };
        let summary = serde_json::to_vec_pretty(&outcome.to_json())?;
        atomic_write_bytes(&log_dir.join(RUN_SUMMARY_FILE), &summary)?;
        Ok(outcome)
    }
}

fn print_banner(
    config_id: &str,
    bench_id: &str,
    gpu_config: &Path,
    kernel_config: &Path,
    log_path: &Path,
    command: &[String],
) {
    let rule = "=".repeat(25);
    let title = format!("Running {} ({})", bench_id, config_id);
    println!("{}[{:^35}]{}", rule, title, rule);
    println!("GPU cfg    :  {}", gpu_config.display());
    println!("Kernel cfg :  {}", kernel_config.display());
    println!("Log file   :  {}", log_path.display());
    println!("Command    :  {}", command.join(" "));
}

fn print_status(outcome: &CellOutcome) {
    let text = match (outcome.status, &outcome.error) {
        (Some(RunStatus::Success), _) => "OK".to_string(),
        (Some(RunStatus::TimedOut), _) => "Timeout".to_string(),
        (Some(RunStatus::NonZeroExit(code)), _) => {
            format!("Error (rc:{}), check {}", code, outcome.log_path.display())
        }
        (None, Some(err)) => format!("Error ({})", err),
        (None, None) => "Error".to_string(),
    };
    println!("\nStatus     :  {}\n", text);
}

fn atomic_write_bytes(path: &Path, bytes: &[u8]) -> Result<()> {
    let name = path
        .file_name()
        .and_then(|s| s.to_str())
        .unwrap_or("tmpfile");
    let tmp = path.with_file_name(format!(
        ".{}.tmp.{}.{}",
        name,
        std::process::id(),
        Utc::now().timestamp_micros()
    ));
    let mut file = fs::File::create(&tmp).map_err(|e| Error::io(&tmp, e))?;
    file.write_all(bytes).map_err(|e| Error::io(&tmp, e))?;
    file.sync_all().map_err(|e| Error::io(&tmp, e))?;
    fs::rename(&tmp, path).map_err(|e| Error::io(path, e))?;
    Ok(())
}

#[cfg(all(test, unix))]
mod tests {
    use super::*;
    use crate::supervisor::SupervisorOptions;

    fn scratch_dir(tag: &str) -> PathBuf {
        let dir = std::env::temp_dir().join(format!(
            "warpbench_{}_{}_{}",
            tag,
            std::process::id(),
            Utc::now().timestamp_micros()
        ));
        fs::create_dir_all(&dir).expect("scratch dir");
        dir
    }

    fn quiet_supervisor() -> Supervisor {
        Supervisor::new(SupervisorOptions {
            poll_interval: Duration::from_millis(50),
            kill_grace: Duration::from_millis(500),
            progress: false,
        })
    }

    #[test]
    fn command_uses_fixed_flags() {
        let runner = ExperimentRunner::new("./macsim", quiet_supervisor());
        let cmd = runner.command_for(Path::new("xmls/rr.xml"), Path::new("/t/nn/kernel_config.txt"));
        assert_eq!(cmd, vec!["./macsim", "-g", "xmls/rr.xml", "-t", "/t/nn/kernel_config.txt"]);
    }

    #[test]
    fn nonzero_cell_clears_overall_ok_without_stopping() {
        let dir = scratch_dir("runner_rc");
        let sim = dir.join("sim.sh");
        // the gpu config file holds the exit code to use
        fs::write(&sim, "#!/bin/sh\nexit $(cat \"$2\")\n").expect("script");
        {
            use std::os::unix::fs::PermissionsExt;
            fs::set_permissions(&sim, fs::Permissions::from_mode(0o755)).expect("chmod");
        }
        fs::write(dir.join("bad.cfg"), "3").expect("cfg");
        fs::write(dir.join("good.cfg"), "0").expect("cfg");
        let configs: Registry = [("BAD", dir.join("bad.cfg")), ("GOOD", dir.join("good.cfg"))]
            .into_iter()
            .collect();
        let benchmarks: Registry = [("k", dir.join("k.txt"))].into_iter().collect();
        let log_dir = dir.join("log");

        let runner = ExperimentRunner::new(&sim, quiet_supervisor());
        let outcome = runner
            .run_matrix(&configs, &benchmarks, &log_dir, Duration::from_secs(10))
            .expect("run");
        assert!(!outcome.overall_ok());
        assert_eq!(outcome.cells.len(), 2, "later cells must still run");
        assert_eq!(outcome.cells[0].status, Some(RunStatus::NonZeroExit(3)));
        assert_eq!(outcome.cells[1].status, Some(RunStatus::Success));
        assert!(cell_log_path(&log_dir, "GOOD", "k").exists());

        let summary: Value =
            serde_json::from_slice(&fs::read(log_dir.join(RUN_SUMMARY_FILE)).expect("summary"))
                .expect("summary json");
        assert_eq!(summary["overall_ok"], json!(false));
        assert_eq!(summary["cells"][0]["exit_code"], json!(3));
        assert_eq!(summary["cells"][1]["status"], json!("ok"));

        let ok = runner
            .run_all(&configs.select(&["GOOD"]).expect("select"), &benchmarks, &log_dir, Duration::from_secs(10))
            .expect("run_all");
        assert!(ok);
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn missing_simulator_marks_every_cell_failed() {
        let dir = scratch_dir("runner_spawn");
        let configs: Registry = [("RR", "rr.xml"), ("GTO", "gto.xml")].into_iter().collect();
        let benchmarks: Registry = [("k", "k.txt")].into_iter().collect();
        let runner = ExperimentRunner::new(dir.join("missing_sim"), quiet_supervisor());
        let outcome = runner
            .run_matrix(&configs, &benchmarks, &dir, Duration::from_secs(1))
            .expect("spawn failures are per cell");
        assert_eq!(outcome.cells.len(), 2);
        assert_eq!(outcome.failed().count(), 2);
        assert!(outcome.cells.iter().all(|c| c.error.is_some()));
        let _ = fs::remove_dir_all(dir);
    }

    #[test]
    fn unwritable_log_fails_the_cell_and_the_matrix_goes_on() {
        let dir = scratch_dir("runner_log");
        let log_dir = dir.join("log");
        // a directory where the log file should be makes File::create fail
        fs::create_dir_all(cell_log_path(&log_dir, "RR", "k")).expect("blocker");
        let configs: Registry = [("RR", "rr.xml"), ("GTO", "gto.xml")].into_iter().collect();
        let benchmarks: Registry = [("k", "k.txt")].into_iter().collect();
        let runner = ExperimentRunner::new("true", quiet_supervisor());
        let outcome = runner
            .run_matrix(&configs, &benchmarks, &log_dir, Duration::from_secs(10))
            .expect("log failures are per cell");
        assert_eq!(outcome.cells.len(), 2);
        assert_eq!(outcome.cells[0].status, None);
        assert!(outcome.cells[0].error.is_some());
        assert_eq!(outcome.cells[1].status, Some(RunStatus::Success));
        assert!(!outcome.overall_ok());

        let summary: Value =
            serde_json::from_slice(&fs::read(log_dir.join(RUN_SUMMARY_FILE)).expect("summary"))
                .expect("summary json");
        assert_eq!(summary["overall_ok"], json!(false));
        assert_eq!(summary["cells"][0]["status"], json!("not_run"));
        let _ = fs::remove_dir_all(dir);
    }
}
