use std::fmt;
use std::path::PathBuf;

#[derive(Debug)]
pub enum ConfigError {
    NotFound(PathBuf),
    Io { path: PathBuf, message: String },
    Parse(String),
    Invalid(String),
    /// No database path in the file, on the command line or in the environment.
    MissingDatabase,
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::NotFound(path) => write!(f, "config file not found: {}", path.display()),
            Self::Io { path, message } => write!(f, "{}: {message}", path.display()),
            Self::Parse(msg) => write!(f, "config parse error: {msg}"),
            Self::Invalid(msg) => write!(f, "invalid config: {msg}"),
            Self::MissingDatabase => write!(f, "no database path configured"),
        }
    }
}

impl std::error::Error for ConfigError {}
