//! Invocation layer for the external collaborators.
//!
//! The pipeline core only sees the [`Toolchain`] trait; the concrete
//! implementation drives NCBI EUtils and the local bioinformatics tools.
//! Tests substitute a mock implementation.

pub mod external;
pub mod ncbi;
pub mod process;

pub use external::ExternalToolchain;

use anyhow::Result;
use std::path::Path;

/// The five external collaborators, plus the accession helpers the
/// cross-taxon query resolution needs.
///
/// All calls are blocking and synchronous; the concrete implementation
/// bounds each one with the configured timeout.
pub trait Toolchain {
    /// Retrieves raw delimited sequence text for a search expression.
    /// An empty string is a valid "no results" outcome.
    fn retrieve_sequences(&self, term: &str) -> Result<String>;

    /// Resolves a free-text taxon to a taxonomy ID (`txid...`), if any.
    fn resolve_taxon(&self, taxon: &str) -> Result<Option<String>>;

    /// Lists candidate accessions for a search expression.
    fn search_accessions(&self, term: &str, limit: usize) -> Result<Vec<String>>;

    /// Fetches the sequence text for a single accession.
    fn fetch_by_accession(&self, accession: &str) -> Result<String>;

    /// Aligns the sequence set in `input`, writing the result to `output`.
    fn align(&self, input: &Path, output: &Path) -> Result<()>;

    /// Scans one sequence record for motifs, writing the fixed-layout
    /// report to `report` and returning its text.
    fn scan_motifs(&self, fasta: &Path, report: &Path) -> Result<String>;

    /// Builds a searchable subset index from a FASTA file under `db_prefix`.
    fn build_subset_db(&self, fasta: &Path, db_prefix: &Path) -> Result<()>;

    /// Searches a query sequence against a subset index, returning the
    /// tabular comparison output.
    fn cross_blast(&self, query_fasta: &Path, db_prefix: &Path) -> Result<String>;
}
