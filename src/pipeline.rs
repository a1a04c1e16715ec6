use crate::error::PipelineError;
use crate::hits::{self, FilterOutcome, HitRecord};
use crate::motif::{self, MotifAggregate, MotifReport, REPORT_SEPARATOR};
use crate::sequence::{SequenceRecord, SequenceStore};
use crate::tools::Toolchain;
use crate::workspace::Workspace;
use anyhow::{Context, Result};
use bigdecimal::BigDecimal;
use chrono::{DateTime, Utc};
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs::{self, File, OpenOptions};
use std::io::{BufReader, BufWriter, Write};

/// Forward stages of one pipeline run. The branch stages
/// (subset build, cross search, filter) are re-entrant and therefore not
/// part of the linear stage; their completion is tracked per branch key.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Stage {
    Init,
    Retrieved,
    Aligned,
    MotifScanned,
}

impl fmt::Display for Stage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Stage::Init => "Init",
            Stage::Retrieved => "Retrieved",
            Stage::Aligned => "Aligned",
            Stage::MotifScanned => "MotifScanned",
        };
        write!(f, "{}", name)
    }
}

/// Identity of one re-entrant branch: the chosen motif and the cross-taxon
/// query it is searched against.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BranchKey {
    pub motif: String,
    pub taxon_query: String,
}

impl BranchKey {
    pub fn new(motif: impl Into<String>, taxon_query: impl Into<String>) -> Self {
        BranchKey {
            motif: motif.into(),
            taxon_query: taxon_query.into(),
        }
    }
}

impl fmt::Display for BranchKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} vs {}", self.motif, self.taxon_query)
    }
}

/// A completed branch: the ranked pass-list and its best hit.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BranchResult {
    pub key: BranchKey,
    pub threshold: BigDecimal,
    pub hits: Vec<HitRecord>,
    pub best: HitRecord,
    pub completed_at: DateTime<Utc>,
}

/// All state of one pipeline run, passed explicitly to every stage
/// function. Persisted as `context.json` in the workspace so later stages
/// can be replayed against earlier artifacts.
#[derive(Debug, Serialize, Deserialize)]
pub struct PipelineContext {
    pub query_name: String,
    pub stage: Stage,
    pub sequences: SequenceStore,
    pub motif_reports: Option<Vec<MotifReport>>,
    branches: Vec<BranchResult>,
    pub started_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl PipelineContext {
    pub fn new(query_name: impl Into<String>) -> Self {
        let now = Utc::now();
        PipelineContext {
            query_name: query_name.into(),
            stage: Stage::Init,
            sequences: SequenceStore::default(),
            motif_reports: None,
            branches: Vec::new(),
            started_at: now,
            updated_at: now,
        }
    }

    /// Completed branches, in completion order.
    pub fn branches(&self) -> &[BranchResult] {
        &self.branches
    }

    pub fn branch(&self, key: &BranchKey) -> Option<&BranchResult> {
        self.branches.iter().find(|b| b.key == *key)
    }

    /// Records a completed branch; re-running the same key replaces the
    /// previous result without touching other branches.
    fn record_branch(&mut self, result: BranchResult) {
        self.branches.retain(|b| b.key != result.key);
        self.branches.push(result);
    }

    fn remove_branch(&mut self, key: &BranchKey) {
        self.branches.retain(|b| b.key != *key);
    }

    /// Saves the context to the workspace manifest.
    pub fn save(&mut self, workspace: &Workspace) -> Result<()> {
        self.updated_at = Utc::now();
        let path = workspace.manifest_path();
        let file = File::create(&path)
            .with_context(|| format!("Failed to create manifest at {}", path.display()))?;
        serde_json::to_writer_pretty(BufWriter::new(file), self)
            .with_context(|| format!("Failed to serialize manifest to {}", path.display()))?;
        Ok(())
    }

    /// Loads a previously saved context from the workspace manifest.
    pub fn load(workspace: &Workspace) -> Result<Self> {
        let path = workspace.manifest_path();
        let file = File::open(&path)
            .with_context(|| format!("Failed to open manifest at {}", path.display()))?;
        serde_json::from_reader(BufReader::new(file))
            .with_context(|| format!("Failed to deserialize manifest from {}", path.display()))
    }
}

/// Builds the retrieval search expression. The `[PROT]` qualifier is
/// dropped on the fallback pass; `NOT PARTIAL` excludes incomplete
/// sequences when partial results are unwanted.
pub fn search_expression(
    family: &str,
    taxon: &str,
    qualified: bool,
    include_partial: bool,
) -> String {
    let mut term = if qualified {
        format!("{}[PROT] AND {}[ORGN]", family, taxon)
    } else {
        format!("{} AND {}[ORGN]", family, taxon)
    };
    if !include_partial {
        term.push_str(" NOT PARTIAL");
    }
    term
}

/// Drives the stages of one run against a workspace and a toolchain.
/// Every method takes the context explicitly and checks its precondition
/// against both the stage and the prior stage's on-disk artifact.
pub struct Pipeline<'a, T: Toolchain> {
    tools: &'a T,
    workspace: &'a Workspace,
}

impl<'a, T: Toolchain> Pipeline<'a, T> {
    pub fn new(tools: &'a T, workspace: &'a Workspace) -> Self {
        Pipeline { tools, workspace }
    }

    fn require_stage(&self, ctx: &PipelineContext, required: Stage, attempted: &str) -> Result<()> {
        if ctx.stage < required {
            return Err(PipelineError::StageOrder {
                required: required.to_string(),
                attempted: attempted.to_string(),
            }
            .into());
        }
        Ok(())
    }

    /// Retrieve stage: fetch, parse, and filter the main query sequences.
    ///
    /// When the qualified search returns nothing usable, one fallback pass
    /// without the `[PROT]` qualifier is made. A store that is still empty
    /// after filtering fails the stage with `RetrievalEmpty`; the caller
    /// tears the whole context down.
    pub fn retrieve(
        &self,
        ctx: &mut PipelineContext,
        family: &str,
        taxon: &str,
        include_partial: bool,
    ) -> Result<usize> {
        if ctx.stage != Stage::Init {
            return Err(PipelineError::StageOrder {
                required: Stage::Init.to_string(),
                attempted: "Retrieve".to_string(),
            }
            .into());
        }

        let taxon_term = match self.tools.resolve_taxon(taxon)? {
            Some(txid) => {
                info!("resolved taxon `{}` to {}", taxon, txid);
                txid
            }
            None => taxon.to_string(),
        };

        let term = search_expression(family, &taxon_term, true, include_partial);
        let mut store = self.retrieve_filtered(&term)?;
        if store.is_empty() {
            let fallback = search_expression(family, &taxon_term, false, include_partial);
            info!("no results for `{}`, retrying as `{}`", term, fallback);
            store = self.retrieve_filtered(&fallback)?;
        }
        if store.is_empty() {
            return Err(PipelineError::RetrievalEmpty { query: term }.into());
        }

        store.write_fasta(&self.workspace.retrieval_fasta())?;
        info!(
            "retrieved {} sequences into {}",
            store.len(),
            self.workspace.retrieval_fasta().display()
        );
        let count = store.len();
        ctx.sequences = store;
        ctx.stage = Stage::Retrieved;
        ctx.save(self.workspace)?;
        Ok(count)
    }

    fn retrieve_filtered(&self, term: &str) -> Result<SequenceStore> {
        let raw = self.tools.retrieve_sequences(term)?;
        match SequenceStore::parse(&raw) {
            Ok(store) => Ok(store.filter_ambiguous()),
            // No delimiter at all means the service found nothing.
            Err(PipelineError::EmptyInput) => Ok(SequenceStore::default()),
            Err(e) => Err(e.into()),
        }
    }

    /// Align stage: hand the retrieval FASTA to the alignment collaborator.
    pub fn align(&self, ctx: &mut PipelineContext) -> Result<()> {
        self.require_stage(ctx, Stage::Retrieved, "Align")?;
        let input = self.workspace.retrieval_fasta();
        if !input.exists() {
            return Err(PipelineError::StageOrder {
                required: Stage::Retrieved.to_string(),
                attempted: "Align".to_string(),
            }
            .into());
        }
        let output = self.workspace.aligned_fasta();
        self.tools.align(&input, &output)?;
        let aligned_empty = fs::metadata(&output).map(|m| m.len() == 0).unwrap_or(true);
        if aligned_empty {
            return Err(PipelineError::ExternalToolFailure {
                tool: "align".to_string(),
                detail: format!("empty aligned output at {}", output.display()),
            }
            .into());
        }
        info!("aligned sequences written to {}", output.display());
        if ctx.stage < Stage::Aligned {
            ctx.stage = Stage::Aligned;
        }
        ctx.save(self.workspace)?;
        Ok(())
    }

    /// MotifScan stage: scan every record independently, one blocking
    /// collaborator call at a time, and aggregate the findings.
    ///
    /// Per-record format anomalies are skipped and excluded from
    /// aggregation; a collaborator failure aborts the stage without
    /// advancing it.
    pub fn scan_motifs(&self, ctx: &mut PipelineContext) -> Result<MotifAggregate> {
        self.require_stage(ctx, Stage::Retrieved, "MotifScan")?;

        let combined_path = self.workspace.motif_report_file();
        if combined_path.exists() {
            fs::remove_file(&combined_path)?;
        }
        let mut combined = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&combined_path)
            .with_context(|| format!("Failed to open {}", combined_path.display()))?;

        let mut records: Vec<&SequenceRecord> = ctx.sequences.records().collect();
        records.sort_by(|a, b| a.accession_id.cmp(&b.accession_id));

        let mut reports = Vec::new();
        for record in records {
            if let Err(e) = self.scan_record(record, &mut combined, &mut reports) {
                // Failed mid-scan: drop the partial combined report with the
                // scratch files so nothing half-written survives the stage.
                drop(combined);
                self.workspace.remove_scan_scratch();
                let _ = fs::remove_file(&combined_path);
                return Err(e);
            }
        }
        self.workspace.remove_scan_scratch();

        let aggregate = motif::aggregate(&reports);
        info!(
            "motif scan complete: {} reports, {} distinct motifs",
            reports.len(),
            aggregate.len()
        );
        ctx.motif_reports = Some(reports);
        ctx.stage = Stage::MotifScanned;
        ctx.save(self.workspace)?;
        Ok(aggregate)
    }

    /// Scans one record and appends its report to the combined file. A
    /// drifted report is logged and skipped; a collaborator failure is
    /// returned to the caller, which rolls the stage artifacts back.
    fn scan_record(
        &self,
        record: &SequenceRecord,
        combined: &mut File,
        reports: &mut Vec<MotifReport>,
    ) -> Result<()> {
        fs::write(self.workspace.scan_input(), record.to_fasta())?;
        let text = self
            .tools
            .scan_motifs(&self.workspace.scan_input(), &self.workspace.scan_output())?;
        combined.write_all(text.as_bytes())?;
        combined.write_all(REPORT_SEPARATOR.as_bytes())?;

        match motif::parse_one(&text) {
            Ok(Some(report)) => reports.push(report),
            Ok(None) => debug!("no scan output for `{}`", record.accession_id),
            Err(e) => warn!("skipping scan report for `{}`: {}", record.accession_id, e),
        }
        Ok(())
    }

    /// MotifSubsetBuild stage: extract the records carrying the chosen
    /// motif and hand them to the database builder.
    pub fn build_motif_subset(&self, ctx: &mut PipelineContext, motif_name: &str) -> Result<usize> {
        self.require_stage(ctx, Stage::MotifScanned, "MotifSubsetBuild")?;
        let reports = ctx.motif_reports.as_deref().ok_or_else(|| {
            PipelineError::StageOrder {
                required: Stage::MotifScanned.to_string(),
                attempted: "MotifSubsetBuild".to_string(),
            }
        })?;

        let accessions = motif::select_accessions_by_motif(reports, motif_name);
        if accessions.is_empty() {
            return Err(PipelineError::NoMatchingRecords {
                motif: motif_name.to_string(),
            }
            .into());
        }
        let subset = ctx.sequences.subset_by_accessions(&accessions);
        let subset_path = self.workspace.subset_fasta(motif_name);
        subset.write_fasta(&subset_path)?;
        let db_prefix = self.workspace.db_prefix(motif_name);
        let built = self.tools.build_subset_db(&subset_path, &db_prefix);
        // The subset FASTA is only input to the builder; drop it either way.
        let _ = fs::remove_file(&subset_path);
        built?;
        info!(
            "built subset database for `{}` from {} records",
            motif_name,
            subset.len()
        );
        Ok(subset.len())
    }

    /// Lists candidate accessions for the cross-taxon query, with the same
    /// `[PROT]` fallback as retrieval.
    pub fn candidate_accessions(
        &self,
        family: &str,
        taxon: &str,
        limit: usize,
    ) -> Result<Vec<String>> {
        let term = search_expression(family, taxon, true, true);
        let candidates = self.tools.search_accessions(&term, limit)?;
        if !candidates.is_empty() {
            return Ok(candidates);
        }
        let fallback = search_expression(family, taxon, false, true);
        self.tools.search_accessions(&fallback, limit)
    }

    /// Resolves the cross-taxon query sequence for a branch from a chosen
    /// accession. Zero-byte output fails with `NoSequenceResolved`.
    pub fn resolve_cross_query(
        &self,
        ctx: &PipelineContext,
        key: &BranchKey,
        accession: &str,
    ) -> Result<()> {
        self.require_stage(ctx, Stage::MotifScanned, "CrossBlastRun")?;
        let raw = self.tools.fetch_by_accession(accession)?;
        if raw.trim().is_empty() {
            return Err(PipelineError::NoSequenceResolved {
                query: accession.to_string(),
            }
            .into());
        }
        let path = self.workspace.cross_query_fasta(&key.taxon_query);
        fs::write(&path, raw)
            .with_context(|| format!("Failed to write cross query to {}", path.display()))?;
        info!("cross-taxon query sequence saved to {}", path.display());
        Ok(())
    }

    /// CrossBlastRun stage: search the resolved query against the subset
    /// database and persist the raw table. Returns the data-row count.
    pub fn cross_blast(&self, ctx: &PipelineContext, key: &BranchKey) -> Result<usize> {
        self.require_stage(ctx, Stage::MotifScanned, "CrossBlastRun")?;
        if !self.workspace.subset_db_exists(&key.motif) {
            return Err(PipelineError::StageOrder {
                required: "MotifSubsetBuilt".to_string(),
                attempted: "CrossBlastRun".to_string(),
            }
            .into());
        }
        let query_path = self.workspace.cross_query_fasta(&key.taxon_query);
        let query_empty = fs::metadata(&query_path)
            .map(|m| m.len() == 0)
            .unwrap_or(true);
        if query_empty {
            return Err(PipelineError::NoSequenceResolved {
                query: key.taxon_query.clone(),
            }
            .into());
        }

        let table = self
            .tools
            .cross_blast(&query_path, &self.workspace.db_prefix(&key.motif))?;
        let out_path = self.workspace.blast_out(&key.motif, &key.taxon_query);
        fs::write(&out_path, &table)
            .with_context(|| format!("Failed to write table to {}", out_path.display()))?;
        let data_rows = table
            .lines()
            .filter(|l| !l.trim().is_empty() && !l.starts_with('#'))
            .count();
        info!(
            "comparison table with {} data rows saved to {}",
            data_rows,
            out_path.display()
        );
        Ok(data_rows)
    }

    /// Filter stage: parse the branch's table, apply the threshold, and on
    /// a non-empty pass-list rank it, persist the normalized export, and
    /// record the branch result.
    ///
    /// A `NoneBelowThreshold` outcome is returned to the caller for
    /// re-prompting; nothing is recorded for the branch in that case.
    pub fn filter_branch(
        &self,
        ctx: &mut PipelineContext,
        key: &BranchKey,
        threshold: &BigDecimal,
    ) -> Result<FilterOutcome> {
        let out_path = self.workspace.blast_out(&key.motif, &key.taxon_query);
        if !out_path.exists() {
            return Err(PipelineError::StageOrder {
                required: "CrossBlastRun".to_string(),
                attempted: "Filter".to_string(),
            }
            .into());
        }
        let table = fs::read_to_string(&out_path)
            .with_context(|| format!("Failed to read table {}", out_path.display()))?;
        let records = hits::parse_table(&table)?;
        if records.is_empty() {
            return Err(PipelineError::EmptyInput.into());
        }

        let outcome = hits::filter_by_threshold(&records, threshold)?;
        if let FilterOutcome::Passed(passed) = outcome {
            let ranked = hits::rank_ascending(passed);
            let best = hits::best(&ranked)
                .cloned()
                .ok_or(PipelineError::EmptyInput)?;
            let csv_path = self.workspace.blast_csv(&key.motif, &key.taxon_query);
            hits::write_csv(&ranked, &csv_path)?;
            info!("normalized export saved to {}", csv_path.display());
            ctx.record_branch(BranchResult {
                key: key.clone(),
                threshold: threshold.clone(),
                hits: ranked.clone(),
                best,
                completed_at: Utc::now(),
            });
            ctx.save(self.workspace)?;
            return Ok(FilterOutcome::Passed(ranked));
        }
        Ok(outcome)
    }

    /// Discards one branch: its artifacts and any recorded result. Earlier
    /// branches and the shared stage artifacts stay valid.
    pub fn abandon_branch(&self, ctx: &mut PipelineContext, key: &BranchKey) -> Result<()> {
        self.workspace.remove_branch(&key.motif, &key.taxon_query)?;
        ctx.remove_branch(key);
        ctx.save(self.workspace)?;
        info!("abandoned branch {}", key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::str::FromStr;

    #[test]
    fn stage_order_is_forward() {
        assert!(Stage::Init < Stage::Retrieved);
        assert!(Stage::Retrieved < Stage::Aligned);
        assert!(Stage::Aligned < Stage::MotifScanned);
    }

    #[test]
    fn search_expression_forms() {
        assert_eq!(
            search_expression("kinase", "txid8782", true, true),
            "kinase[PROT] AND txid8782[ORGN]"
        );
        assert_eq!(
            search_expression("kinase", "txid8782", true, false),
            "kinase[PROT] AND txid8782[ORGN] NOT PARTIAL"
        );
        assert_eq!(
            search_expression("kinase", "txid8782", false, true),
            "kinase AND txid8782[ORGN]"
        );
    }

    fn dummy_hit(e_value: &str) -> HitRecord {
        HitRecord {
            query_accession: "Q1".to_string(),
            subject_accession: "S1".to_string(),
            percent_identity: 99.0,
            alignment_length: 100,
            mismatches: 1,
            gap_opens: 0,
            query_start: 1,
            query_end: 100,
            subject_start: 1,
            subject_end: 100,
            e_value: BigDecimal::from_str(e_value).unwrap(),
            bit_score: 200.0,
        }
    }

    fn dummy_branch(motif: &str, taxon: &str) -> BranchResult {
        let hit = dummy_hit("1e-10");
        BranchResult {
            key: BranchKey::new(motif, taxon),
            threshold: BigDecimal::from_str("1e-3").unwrap(),
            hits: vec![hit.clone()],
            best: hit,
            completed_at: Utc::now(),
        }
    }

    #[test]
    fn recording_a_branch_replaces_only_its_key() {
        let mut ctx = PipelineContext::new("q");
        ctx.record_branch(dummy_branch("m1", "aves"));
        ctx.record_branch(dummy_branch("m1", "rodentia"));
        assert_eq!(ctx.branches().len(), 2);

        // Re-running the same key keeps a single result for it.
        ctx.record_branch(dummy_branch("m1", "aves"));
        assert_eq!(ctx.branches().len(), 2);

        ctx.remove_branch(&BranchKey::new("m1", "aves"));
        assert_eq!(ctx.branches().len(), 1);
        assert!(ctx.branch(&BranchKey::new("m1", "rodentia")).is_some());
    }

    #[test]
    fn context_round_trips_through_manifest() {
        let dir = tempfile::tempdir().unwrap();
        let ws = Workspace::create(dir.path(), "persisted").unwrap();

        let mut ctx = PipelineContext::new("persisted");
        ctx.stage = Stage::MotifScanned;
        ctx.sequences = SequenceStore::parse(">A1 alpha\nMKV\n").unwrap();
        ctx.motif_reports = Some(vec![MotifReport {
            source_accession_id: "A1".to_string(),
            motif_name: Some("zinc_finger".to_string()),
        }]);
        ctx.record_branch(dummy_branch("zinc_finger", "aves"));
        ctx.save(&ws).unwrap();

        let reloaded = PipelineContext::load(&ws).unwrap();
        assert_eq!(reloaded.stage, Stage::MotifScanned);
        assert_eq!(reloaded.sequences.len(), 1);
        assert_eq!(reloaded.branches().len(), 1);
        let branch = reloaded
            .branch(&BranchKey::new("zinc_finger", "aves"))
            .unwrap();
        assert_eq!(branch.best.e_value, BigDecimal::from_str("1e-10").unwrap());
    }
}
