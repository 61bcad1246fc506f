//! Crate-wide fatal errors.
//!
//! Every error here is fatal to the compilation: phases return the first
//! one they hit and make no attempt to recover or accumulate. The
//! `Display` rendering is the one-line message a driver is expected to
//! print to stderr before exiting non-zero.

use thiserror::Error;

#[derive(Debug, Error)]
pub enum CompileError {
    /// The same identifier was declared twice in one scope.
    #[error("duplicate declaration of '{name}' in scope '{scope}'")]
    DuplicateDeclaration { name: String, scope: String },

    /// An identifier was referenced but is not resolvable through the
    /// scope chain.
    #[error("undeclared identifier '{name}'")]
    Undeclared { name: String },

    /// The output file could not be opened or written.
    #[error("output error: {0}")]
    Io(#[from] std::io::Error),

    /// A consistency invariant between phases was violated (e.g. a float
    /// literal missing from the `.data` table at emission time).
    #[error("internal error: {0}")]
    Internal(String),
}
