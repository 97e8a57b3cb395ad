use std::path::PathBuf;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("invalid config {0}")]
    UnknownConfig(String),

    #[error("empty command: nothing to launch")]
    EmptyCommand,

    #[error("failed to launch {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("{}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("{}:{line_no}: malformed stats line {line:?}", .path.display())]
    MalformedLine {
        path: PathBuf,
        line_no: usize,
        line: String,
    },

    #[error("log file not found: {}", .0.display())]
    MissingLog(PathBuf),

    #[error("stat {stat} missing for {config}:{benchmark}")]
    MissingStat {
        config: String,
        benchmark: String,
        stat: String,
    },

    #[error("environment variable {var} referenced by {value:?} is not set")]
    UnsetVariable { var: String, value: String },

    #[error("invalid registry: {0}")]
    Registry(String),

    #[error(transparent)]
    Json(#[from] serde_json::Error),

    #[error(transparent)]
    Yaml(#[from] serde_yaml::Error),
}

impl Error {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        Error::Io {
            path: path.into(),
            source,
        }
    }
}
