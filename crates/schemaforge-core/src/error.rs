use thiserror::Error;

/// Core error type shared across schemaforge crates.
///
/// Every variant is fatal to the compilation pass that raised it.
#[derive(Debug, Error)]
pub enum Error {
    /// The domain document is inconsistent or uses an unsupported option.
    #[error("configuration error: {0}")]
    Configuration(String),
    /// A table referenced by name is not defined in the domain.
    #[error("lookup error: {0}")]
    Lookup(String),
    /// A view column source has a shape the view synthesizer cannot expand.
    #[error("syntax error: {0}")]
    Syntax(String),
    /// The domain document is not valid YAML or JSON.
    #[error("parse error: {0}")]
    Parse(#[from] serde_yaml::Error),
    /// Reading a registry file failed.
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn config(message: impl Into<String>) -> Self {
        Error::Configuration(message.into())
    }

    pub(crate) fn lookup(message: impl Into<String>) -> Self {
        Error::Lookup(message.into())
    }
}

/// Convenience alias for results returned by schemaforge crates.
pub type Result<T> = std::result::Result<T, Error>;
