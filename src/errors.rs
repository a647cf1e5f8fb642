use std::path::PathBuf;
use thiserror::Error;

/// Taxid resolution errors. Every variant is fatal to the enclosing run - a
/// misresolved taxid silently corrupts the resulting database, so the
/// pipeline refuses to proceed rather than skip the offending file.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaxforgeError {
    #[error("accession '{accession}' matches {count} rows in the assembly summary, expected exactly 1")]
    AmbiguousAccession { accession: String, count: usize },

    #[error("accession '{accession}' not found in the assembly summary")]
    UnknownAccession { accession: String },

    #[error("no taxid override supplied for extra file '{0}'")]
    ExtraFileMapping(String),

    #[error("cannot locate an assembly accession in path: {0:?}")]
    AccessionNotInPath(PathBuf),

    #[error("no valid taxonomy IDs supplied")]
    NoTaxidsSupplied,
}
