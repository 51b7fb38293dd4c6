//! Error types shared across the core.

use thiserror::Error;

/// Registration-time failures. Fatal to the command being registered, never
/// seen at invocation time.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RegistryError {
    #[error("Cannot add command {0}: already exists.")]
    DuplicateCommand(String),

    #[error("Cannot override non-whitelisted built-in command \"{0}\"")]
    BuiltinOverride(String),
}

/// Failures reported by the host debugger.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    #[error("No symbol \"{0}\" in current context.")]
    NoSymbol(String),

    #[error("A syntax error in expression, near `{0}'.")]
    Syntax(String),

    #[error("{0}")]
    Other(String),
}

/// Allocator-metadata failures raised from inside heap command bodies.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HeapError {
    #[error("cannot resolve the symbol `{symbol}`")]
    SymbolUnresolvable { symbol: String },

    #[error("heap symbols are only available to commands that require a resolved heap")]
    NotSelected,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConfigError {
    #[error("unknown setting `{0}`")]
    UnknownSetting(String),

    #[error("invalid value `{value}` for `{name}`: {reason}")]
    InvalidValue {
        name: String,
        value: String,
        reason: String,
    },

    #[error("failed to read config {path}: {reason}")]
    Load { path: String, reason: String },
}
