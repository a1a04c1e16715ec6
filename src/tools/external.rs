use super::ncbi::NcbiClient;
use super::process::run_command;
use super::Toolchain;
use crate::config::Config;
use crate::error::PipelineError;
use anyhow::{Context, Result};
use log::info;
use std::fs;
use std::path::Path;

/// The production toolchain: EUtils over HTTP for retrieval, local
/// subprocesses for alignment, motif scanning, database building, and the
/// pairwise search.
pub struct ExternalToolchain {
    config: Config,
    ncbi: NcbiClient,
}

impl ExternalToolchain {
    pub fn new(config: Config) -> Self {
        let ncbi = NcbiClient::new(&config);
        ExternalToolchain { config, ncbi }
    }

    fn path_arg(path: &Path) -> Result<&str> {
        path.to_str()
            .with_context(|| format!("Path is not valid UTF-8: {}", path.display()))
    }
}

impl Toolchain for ExternalToolchain {
    fn retrieve_sequences(&self, term: &str) -> Result<String> {
        info!("searching protein database for `{}`", term);
        let ids = self.ncbi.esearch("protein", term, self.config.retrieval_limit)?;
        if ids.is_empty() {
            return Ok(String::new());
        }
        info!("fetching {} protein sequences", ids.len());
        self.ncbi.fetch_fasta(&ids)
    }

    fn resolve_taxon(&self, taxon: &str) -> Result<Option<String>> {
        self.ncbi.resolve_taxon(taxon)
    }

    fn search_accessions(&self, term: &str, limit: usize) -> Result<Vec<String>> {
        let ids = self.ncbi.esearch("protein", term, limit)?;
        self.ncbi.fetch_accessions(&ids)
    }

    fn fetch_by_accession(&self, accession: &str) -> Result<String> {
        self.ncbi.fetch_fasta(&[accession.to_string()])
    }

    fn align(&self, input: &Path, output: &Path) -> Result<()> {
        run_command(
            &self.config.clustalo,
            &[
                "-i",
                Self::path_arg(input)?,
                "--force",
                "-o",
                Self::path_arg(output)?,
            ],
            self.config.tool_timeout,
        )?;
        if !output.exists() {
            return Err(PipelineError::ExternalToolFailure {
                tool: self.config.clustalo.clone(),
                detail: format!("no aligned output written to {}", output.display()),
            }
            .into());
        }
        Ok(())
    }

    fn scan_motifs(&self, fasta: &Path, report: &Path) -> Result<String> {
        run_command(
            &self.config.patmatmotifs,
            &[
                "-sequence",
                Self::path_arg(fasta)?,
                "-outfile",
                Self::path_arg(report)?,
                "-auto",
            ],
            self.config.tool_timeout,
        )?;
        fs::read_to_string(report)
            .with_context(|| format!("Failed to read scan report {}", report.display()))
    }

    fn build_subset_db(&self, fasta: &Path, db_prefix: &Path) -> Result<()> {
        run_command(
            &self.config.makeblastdb,
            &[
                "-in",
                Self::path_arg(fasta)?,
                "-dbtype",
                "prot",
                "-out",
                Self::path_arg(db_prefix)?,
            ],
            self.config.tool_timeout,
        )?;
        Ok(())
    }

    fn cross_blast(&self, query_fasta: &Path, db_prefix: &Path) -> Result<String> {
        let output = run_command(
            &self.config.blastp,
            &[
                "-query",
                Self::path_arg(query_fasta)?,
                "-db",
                Self::path_arg(db_prefix)?,
                "-outfmt",
                "7",
            ],
            self.config.tool_timeout,
        )?;
        Ok(output.stdout)
    }
}
