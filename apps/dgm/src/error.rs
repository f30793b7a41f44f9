//! # CLI Errors

use dgm_core::DgmError;
use thiserror::Error;

/// Errors reported by the `dgm` tool.
#[derive(Debug, Error)]
pub enum CliError {
    /// A file could not be read.
    #[error("I/O error: {0}")]
    Io(String),

    /// The settings file is malformed.
    #[error("Settings error: {0}")]
    Settings(String),

    /// The fixture file is malformed.
    #[error("Fixture error: {0}")]
    Fixture(String),

    /// The engine failed.
    #[error(transparent)]
    Engine(#[from] DgmError),

    /// Output documents differ from the expected ones.
    #[error("{0} expected document(s) did not match")]
    Mismatch(usize),
}
