use thiserror::Error;

/// Errors surfaced to the configuration/management client (§7).
///
/// Never crosses the packet datapath boundary: every per-packet failure
/// resolves to a [`crate::pipeline::Decision`] plus a stats counter instead.
#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("already exists: {0}")]
    Exist(String),

    #[error("invalid argument: {0}")]
    Invalid(String),

    #[error("not found: {0}")]
    NotFound(String),

    #[error("name too long: {0}")]
    NameTooLong(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("config parse error: {0}")]
    Parse(String),
}

pub type Result<T> = std::result::Result<T, ConfigError>;
