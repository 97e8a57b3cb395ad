//! Registries and the experiment file that names them.
//!
//! A registry is an ordered `id -> path` table. Order is kept exactly as
//! written because it drives the order cells are run and reported in.

use crate::error::{Error, Result};
use crate::ordered::OrderedMap;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

pub const DEFAULT_SIMULATOR: &str = "./macsim";
pub const DEFAULT_TIMEOUT_SECONDS: u64 = 10 * 60;

pub type Registry = OrderedMap<PathBuf>;

impl OrderedMap<PathBuf> {
    /// Narrows the registry to `ids`, in the order requested.
    ///
    /// Any id not present is a configuration error and nothing is returned,
    /// so callers can fail before launching a single run.
    pub fn select<S: AsRef<str>>(&self, ids: &[S]) -> Result<Registry> {
        let mut selected = Registry::new();
        for id in ids {
            let id = id.as_ref();
            let path = self
                .get(id)
                .ok_or_else(|| Error::UnknownConfig(id.to_string()))?;
            selected.insert(id, path);
        }
        Ok(selected)
    }

    fn expand_paths(&mut self, lookup: &dyn Fn(&str) -> Option<String>) -> Result<()> {
        for (_, path) in self.iter_mut() {
            *path = expand_path(path, lookup)?;
        }
        Ok(())
    }
}

/// Log file for one cell. Run and collect phases both derive names here.
pub fn cell_log_path(log_dir: &Path, config_id: &str, benchmark_id: &str) -> PathBuf {
    log_dir.join(format!("{}_{}_run.log", config_id, benchmark_id))
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ExperimentFile {
    #[serde(default = "default_simulator")]
    pub simulator: PathBuf,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default = "default_timeout_seconds")]
    pub timeout_seconds: u64,
    pub gpu_configs: Registry,
    pub benchmarks: Registry,
    #[serde(default)]
    pub stats: Vec<String>,
}

fn default_simulator() -> PathBuf {
    PathBuf::from(DEFAULT_SIMULATOR)
}

fn default_timeout_seconds() -> u64 {
    DEFAULT_TIMEOUT_SECONDS
}

impl ExperimentFile {
    pub fn from_yaml_str(raw: &str) -> Result<Self> {
        Self::from_yaml_with(raw, &|name| std::env::var(name).ok())
    }

    fn from_yaml_with(raw: &str, lookup: &dyn Fn(&str) -> Option<String>) -> Result<Self> {
        let mut file: ExperimentFile = serde_yaml::from_str(raw)?;
        if file.gpu_configs.is_empty() {
            return Err(Error::Registry("gpu_configs is empty".to_string()));
        }
        if file.benchmarks.is_empty() {
            return Err(Error::Registry("benchmarks is empty".to_string()));
        }
        file.simulator = expand_path(&file.simulator, lookup)?;
        if let Some(dir) = file.log_dir.take() {
            file.log_dir = Some(expand_path(&dir, lookup)?);
        }
        file.gpu_configs.expand_paths(lookup)?;
        file.benchmarks.expand_paths(lookup)?;
        Ok(file)
    }
}

pub fn load_experiment(path: &Path) -> Result<ExperimentFile> {
    let raw = fs::read_to_string(path).map_err(|e| Error::io(path, e))?;
    ExperimentFile::from_yaml_str(&raw)
}

fn expand_path(path: &Path, lookup: &dyn Fn(&str) -> Option<String>) -> Result<PathBuf> {
    let raw = path.to_string_lossy();
    if !raw.contains("${") {
        return Ok(path.to_path_buf());
    }
    Ok(PathBuf::from(expand_vars(&raw, lookup)?))
}

/// Replaces every `${NAME}` in `value`. Text without a closing brace is
/// left as is.
pub fn expand_vars(value: &str, lookup: &dyn Fn(&str) -> Option<String>) -> Result<String> {
    let mut out = String::with_capacity(value.len());
    let mut rest = value;
    while let Some(start) = rest.find("${") {
        let Some(len) = rest[start + 2..].find('}') else {
            break;
        };
        let name = &rest[start + 2..start + 2 + len];
        let resolved = lookup(name).ok_or_else(|| Error::UnsetVariable {
            var: name.to_string(),
            value: value.to_string(),
        })?;
        out.push_str(&rest[..start]);
        out.push_str(&resolved);
        rest = &rest[start + 3 + len..];
    }
    out.push_str(rest);
    Ok(out)
}
