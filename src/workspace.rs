use anyhow::{Context, Result};
use log::{debug, info};
use std::fs;
use std::path::{Path, PathBuf};

const BLAST_DB_DIR: &str = "blast_database";
const MANIFEST_FILE: &str = "context.json";

/// Collapses runs of filesystem-unfriendly characters to `_` so query,
/// motif, and taxon names can be used in paths.
pub fn sanitize_name(raw: &str) -> String {
    let mut out = String::with_capacity(raw.len());
    let mut last_was_underscore = false;
    for c in raw.trim().chars() {
        if c.is_alphanumeric() || c == '.' || c == '-' {
            out.push(c);
            last_was_underscore = false;
        } else if !last_was_underscore {
            out.push('_');
            last_was_underscore = true;
        }
    }
    out.trim_matches('_').to_string()
}

/// The on-disk home of one query: every artifact for a query name lives in
/// its own directory, exclusively owned by the running context.
#[derive(Debug, Clone)]
pub struct Workspace {
    query_name: String,
    root: PathBuf,
}

impl Workspace {
    /// Creates (or reuses) the workspace directory for a query name.
    pub fn create(base: &Path, query_name: &str) -> Result<Self> {
        let query_name = sanitize_name(query_name);
        if query_name.is_empty() {
            anyhow::bail!("Query name is empty after sanitization");
        }
        let root = base.join(&query_name);
        fs::create_dir_all(&root)
            .with_context(|| format!("Failed to create workspace directory {}", root.display()))?;
        fs::create_dir_all(root.join(BLAST_DB_DIR))?;
        debug!("workspace ready at {}", root.display());
        Ok(Workspace { query_name, root })
    }

    /// Opens an existing workspace; fails if the query was never started.
    pub fn open(base: &Path, query_name: &str) -> Result<Self> {
        let query_name = sanitize_name(query_name);
        let root = base.join(&query_name);
        if !root.is_dir() {
            anyhow::bail!("No workspace found for query `{}` at {}", query_name, root.display());
        }
        Ok(Workspace { query_name, root })
    }

    pub fn query_name(&self) -> &str {
        &self.query_name
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.root.join(MANIFEST_FILE)
    }

    /// Raw retrieval FASTA for the main query.
    pub fn retrieval_fasta(&self) -> PathBuf {
        self.root.join(format!("{}.pro.fa", self.query_name))
    }

    /// Aligned FASTA produced by the alignment collaborator.
    pub fn aligned_fasta(&self) -> PathBuf {
        self.root.join(format!("{}_aligned.pro.fa", self.query_name))
    }

    /// Combined per-record motif scan reports.
    pub fn motif_report_file(&self) -> PathBuf {
        self.root.join(format!("{}_motifs.txt", self.query_name))
    }

    /// Single-record FASTA handed to the motif scan tool, reused per record.
    pub fn scan_input(&self) -> PathBuf {
        self.root.join("scan_input.pro.fa")
    }

    /// Raw per-record report written by the motif scan tool, reused per record.
    pub fn scan_output(&self) -> PathBuf {
        self.root.join("scan_output.txt")
    }

    /// FASTA subset fed to the database builder for one motif.
    pub fn subset_fasta(&self, motif: &str) -> PathBuf {
        self.root
            .join(format!("{}_subset.pro.fa", sanitize_name(motif)))
    }

    /// Database prefix for one motif's subset index.
    pub fn db_prefix(&self, motif: &str) -> PathBuf {
        self.root.join(BLAST_DB_DIR).join(sanitize_name(motif))
    }

    /// True once the database builder has produced index files for the motif.
    /// Index files are `<stem>.<ext>`, so the dot is part of the match; a bare
    /// prefix would let `ZINC` claim `ZINC_FINGER`'s files.
    pub fn subset_db_exists(&self, motif: &str) -> bool {
        let stem = format!("{}.", sanitize_name(motif));
        fs::read_dir(self.root.join(BLAST_DB_DIR))
            .map(|entries| {
                entries.flatten().any(|e| {
                    e.file_name()
                        .to_string_lossy()
                        .starts_with(stem.as_str())
                })
            })
            .unwrap_or(false)
    }

    /// Resolved cross-taxon query sequence for one branch.
    pub fn cross_query_fasta(&self, taxon_query: &str) -> PathBuf {
        self.root
            .join(format!("{}.pro.fa", sanitize_name(taxon_query)))
    }

    /// Raw comparison table for one branch.
    pub fn blast_out(&self, motif: &str, taxon_query: &str) -> PathBuf {
        self.root.join(format!(
            "{}_{}_blast.out",
            sanitize_name(motif),
            sanitize_name(taxon_query)
        ))
    }

    /// Normalized CSV export for one branch.
    pub fn blast_csv(&self, motif: &str, taxon_query: &str) -> PathBuf {
        self.root.join(format!(
            "{}_{}_blast.csv",
            sanitize_name(motif),
            sanitize_name(taxon_query)
        ))
    }

    /// Removes the artifacts of a single branch; earlier branches and the
    /// shared stage artifacts stay untouched.
    pub fn remove_branch(&self, motif: &str, taxon_query: &str) -> Result<()> {
        for path in [
            self.blast_out(motif, taxon_query),
            self.blast_csv(motif, taxon_query),
            self.cross_query_fasta(taxon_query),
        ] {
            if path.exists() {
                fs::remove_file(&path)
                    .with_context(|| format!("Failed to remove {}", path.display()))?;
            }
        }
        Ok(())
    }

    /// Removes the per-record scratch files used during motif scanning.
    pub fn remove_scan_scratch(&self) {
        for path in [self.scan_input(), self.scan_output()] {
            let _ = fs::remove_file(path);
        }
    }

    /// Discards the whole workspace: every artifact for this query name.
    pub fn teardown(self) -> Result<()> {
        info!("removing workspace {}", self.root.display());
        fs::remove_dir_all(&self.root)
            .with_context(|| format!("Failed to remove workspace {}", self.root.display()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sanitize_collapses_runs_and_trims() {
        assert_eq!(sanitize_name("abc kinase/1;2"), "abc_kinase_1_2");
        assert_eq!(sanitize_name("  spaced out  "), "spaced_out");
        assert_eq!(sanitize_name("XP_001.2"), "XP_001.2");
        assert_eq!(sanitize_name("::"), "");
    }

    #[test]
    fn branch_artifact_names_are_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::create(dir.path(), "my query").unwrap();
        assert_eq!(ws.query_name(), "my_query");
        let out = ws.blast_out("ZINC_FINGER", "aves");
        assert!(out.ends_with("ZINC_FINGER_aves_blast.out"));
        assert_eq!(out, ws.blast_out("ZINC_FINGER", "aves"));
    }

    #[test]
    fn remove_branch_leaves_other_branches_alone() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::create(dir.path(), "q").unwrap();
        fs::write(ws.blast_out("m1", "aves"), "a").unwrap();
        fs::write(ws.blast_out("m1", "rodentia"), "b").unwrap();
        ws.remove_branch("m1", "aves").unwrap();
        assert!(!ws.blast_out("m1", "aves").exists());
        assert!(ws.blast_out("m1", "rodentia").exists());
    }

    #[test]
    fn subset_db_detection_does_not_match_longer_motif_names() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::create(dir.path(), "q").unwrap();
        fs::write(format!("{}.pin", ws.db_prefix("ZINC_FINGER").display()), "x").unwrap();
        assert!(ws.subset_db_exists("ZINC_FINGER"));
        assert!(!ws.subset_db_exists("ZINC"));
    }

    #[test]
    fn teardown_removes_everything() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::create(dir.path(), "gone").unwrap();
        let root = ws.root().to_path_buf();
        fs::write(ws.retrieval_fasta(), ">a\nAA\n").unwrap();
        ws.teardown().unwrap();
        assert!(!root.exists());
    }

    #[test]
    fn open_requires_existing_directory() {
        let dir = tempfile::tempdir().unwrap();
        assert!(Workspace::open(dir.path(), "never_started").is_err());
        Workspace::create(dir.path(), "started").unwrap();
        assert!(Workspace::open(dir.path(), "started").is_ok());
    }
}
