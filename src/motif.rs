use crate::error::{PipelineError, Result};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Line index of the scanned-sequence line in a motif scan report.
const SEQUENCE_LINE_INDEX: usize = 12;
/// Label opening the scanned-sequence line; the accession follows it.
const SEQUENCE_LABEL: &str = "# Sequence: ";
/// Line index of the motif line when the scan found a hit.
const MOTIF_LINE_INDEX: usize = 25;
/// Label opening the motif line; the motif name follows it.
const MOTIF_LABEL: &str = "Motif = ";

/// Separator written between per-record reports in the combined report file.
pub const REPORT_SEPARATOR: &str = "\nnew_sequence";

/// The finding of one motif scan over one sequence record.
///
/// `motif_name` is `None` when the scan ran but reported no hit; such
/// reports are excluded from aggregation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MotifReport {
    pub source_accession_id: String,
    pub motif_name: Option<String>,
}

/// Parses one fixed-layout scan report.
///
/// The scan tool writes the accession on line 12 after the `# Sequence: `
/// label and, when a motif was found, the motif name on line 25 after the
/// `Motif = ` label. Three outcomes are distinguished:
///
/// - `Ok(None)`: the report is too short to carry even the sequence line
///   (empty or truncated output) — nothing was scanned.
/// - `Ok(Some(..))` with `motif_name: None`: the preamble is intact but the
///   report ends before the motif line — the record carries no motif.
/// - `Err(FormatMismatch)`: the report is long enough but the label at a
///   checked offset is not the documented one — the upstream format drifted.
pub fn parse_one(report_text: &str) -> Result<Option<MotifReport>> {
    let lines: Vec<&str> = report_text.lines().collect();
    if lines.len() <= SEQUENCE_LINE_INDEX {
        debug!("scan report too short ({} lines), skipping", lines.len());
        return Ok(None);
    }

    let sequence_line = lines[SEQUENCE_LINE_INDEX];
    if !sequence_line.starts_with(SEQUENCE_LABEL) {
        return Err(PipelineError::FormatMismatch {
            line: SEQUENCE_LINE_INDEX,
            expected: SEQUENCE_LABEL.to_string(),
            found: preview(sequence_line),
        });
    }
    let source_accession_id = sequence_line[SEQUENCE_LABEL.len()..]
        .split_whitespace()
        .next()
        .ok_or_else(|| PipelineError::FormatMismatch {
            line: SEQUENCE_LINE_INDEX,
            expected: format!("{}<accession>", SEQUENCE_LABEL),
            found: preview(sequence_line),
        })?
        .to_string();

    if lines.len() <= MOTIF_LINE_INDEX {
        // Preamble intact, no hit section: valid absence of a motif.
        return Ok(Some(MotifReport {
            source_accession_id,
            motif_name: None,
        }));
    }

    let motif_line = lines[MOTIF_LINE_INDEX];
    if !motif_line.starts_with(MOTIF_LABEL) {
        return Err(PipelineError::FormatMismatch {
            line: MOTIF_LINE_INDEX,
            expected: MOTIF_LABEL.to_string(),
            found: preview(motif_line),
        });
    }
    let motif_name = motif_line[MOTIF_LABEL.len()..].trim().to_string();

    Ok(Some(MotifReport {
        source_accession_id,
        motif_name: Some(motif_name),
    }))
}

/// Splits a combined report file back into per-record reports.
pub fn split_combined(combined: &str) -> Vec<&str> {
    combined
        .split(REPORT_SEPARATOR)
        .filter(|chunk| !chunk.trim().is_empty())
        .collect()
}

/// Rebuilds the report list from a combined report file, with the same
/// per-record skip semantics as the scan stage itself.
pub fn parse_combined(combined: &str) -> Vec<MotifReport> {
    let mut reports = Vec::new();
    for chunk in split_combined(combined) {
        match parse_one(chunk) {
            Ok(Some(report)) => reports.push(report),
            Ok(None) => {}
            Err(e) => warn!("skipping report chunk in combined file: {}", e),
        }
    }
    reports
}

fn preview(line: &str) -> String {
    line.chars().take(40).collect()
}

/// Motif counts over a batch of reports, first-seen order preserved for
/// display only.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MotifAggregate {
    counts: Vec<(String, usize)>,
}

impl MotifAggregate {
    pub fn is_empty(&self) -> bool {
        self.counts.is_empty()
    }

    pub fn len(&self) -> usize {
        self.counts.len()
    }

    pub fn count(&self, motif_name: &str) -> usize {
        self.counts
            .iter()
            .find(|(name, _)| name == motif_name)
            .map(|(_, n)| *n)
            .unwrap_or(0)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, usize)> {
        self.counts.iter().map(|(name, n)| (name.as_str(), *n))
    }

    pub fn total(&self) -> usize {
        self.counts.iter().map(|(_, n)| n).sum()
    }
}

/// Counts reports by motif name, ignoring reports with no motif.
pub fn aggregate(reports: &[MotifReport]) -> MotifAggregate {
    let mut counts: Vec<(String, usize)> = Vec::new();
    for report in reports {
        let Some(name) = &report.motif_name else {
            continue;
        };
        match counts.iter_mut().find(|(existing, _)| existing == name) {
            Some((_, n)) => *n += 1,
            None => counts.push((name.clone(), 1)),
        }
    }
    MotifAggregate { counts }
}

/// The set of accession IDs whose report names the given motif.
pub fn select_accessions_by_motif(reports: &[MotifReport], motif_name: &str) -> HashSet<String> {
    reports
        .iter()
        .filter(|r| r.motif_name.as_deref() == Some(motif_name))
        .map(|r| r.source_accession_id.clone())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Builds a report laid out like the scan tool's output: accession on
    /// line 12, motif (when given) on line 25.
    fn sample_report(accession: &str, motif: Option<&str>) -> String {
        let mut lines: Vec<String> = Vec::new();
        lines.push("########################################".to_string());
        lines.push("# Program: patmatmotifs".to_string());
        lines.push("# Rundate: Mon  1 Jan 2024 12:00:00".to_string());
        lines.push("# Commandline: patmatmotifs".to_string());
        lines.push("#    -sequence scan_input.fa".to_string());
        lines.push("#    -outfile report.txt".to_string());
        lines.push("# Report_format: dbmotif".to_string());
        lines.push("# Report_file: report.txt".to_string());
        lines.push("########################################".to_string());
        lines.push(String::new());
        lines.push("#=======================================".to_string());
        lines.push("#".to_string());
        lines.push(format!("# Sequence: {}     from: 1   to: 360", accession));
        lines.push("# HitCount: 1".to_string());
        lines.push("#".to_string());
        lines.push("# Full: No".to_string());
        lines.push("# Prune: Yes".to_string());
        lines.push("# Data_file: PROSITE motifs".to_string());
        lines.push("#".to_string());
        lines.push("#=======================================".to_string());
        lines.push(String::new());
        if let Some(name) = motif {
            lines.push("Length = 9".to_string());
            lines.push("Start = position 42 of sequence".to_string());
            lines.push("End = position 50 of sequence".to_string());
            lines.push(String::new());
            lines.push(format!("Motif = {}", name));
            lines.push(String::new());
            lines.push("ILSGKTEWA".to_string());
        }
        lines.join("\n")
    }

    #[test]
    fn parse_extracts_accession_and_motif() {
        let report = sample_report("XP_0123.1", Some("ZINC_FINGER_C2H2_1"));
        let parsed = parse_one(&report).unwrap().unwrap();
        assert_eq!(parsed.source_accession_id, "XP_0123.1");
        assert_eq!(parsed.motif_name.as_deref(), Some("ZINC_FINGER_C2H2_1"));
    }

    #[test]
    fn short_report_is_no_scan_not_an_error() {
        assert_eq!(parse_one("").unwrap(), None);
        assert_eq!(parse_one("# Program: patmatmotifs\n").unwrap(), None);
    }

    #[test]
    fn report_without_hit_section_is_valid_absence() {
        let report = sample_report("XP_0123.1", None);
        let parsed = parse_one(&report).unwrap().unwrap();
        assert_eq!(parsed.source_accession_id, "XP_0123.1");
        assert_eq!(parsed.motif_name, None);
    }

    #[test]
    fn drifted_sequence_label_is_format_mismatch() {
        let mut report = sample_report("XP_0123.1", Some("PKC_PHOSPHO_SITE"));
        report = report.replace("# Sequence: ", "# SeqName: ");
        match parse_one(&report) {
            Err(PipelineError::FormatMismatch { line, .. }) => assert_eq!(line, 12),
            other => panic!("expected FormatMismatch, got {:?}", other),
        }
    }

    #[test]
    fn drifted_motif_label_is_format_mismatch() {
        let mut report = sample_report("XP_0123.1", Some("PKC_PHOSPHO_SITE"));
        report = report.replace("Motif = ", "Pattern: ");
        match parse_one(&report) {
            Err(PipelineError::FormatMismatch { line, .. }) => assert_eq!(line, 25),
            other => panic!("expected FormatMismatch, got {:?}", other),
        }
    }

    fn report_of(acc: &str, motif: Option<&str>) -> MotifReport {
        MotifReport {
            source_accession_id: acc.to_string(),
            motif_name: motif.map(str::to_string),
        }
    }

    #[test]
    fn aggregate_counts_only_present_motifs() {
        let reports = vec![
            report_of("A1", Some("zinc_finger")),
            report_of("A2", None),
            report_of("A3", Some("zinc_finger")),
        ];
        let agg = aggregate(&reports);
        assert_eq!(agg.count("zinc_finger"), 2);
        assert_eq!(agg.len(), 1);
    }

    #[test]
    fn aggregate_total_equals_reports_with_motif() {
        let reports = vec![
            report_of("A1", Some("m1")),
            report_of("A2", Some("m2")),
            report_of("A3", None),
            report_of("A4", Some("m1")),
        ];
        let agg = aggregate(&reports);
        let with_motif = reports.iter().filter(|r| r.motif_name.is_some()).count();
        assert_eq!(agg.total(), with_motif);
    }

    #[test]
    fn aggregate_preserves_first_seen_order() {
        let reports = vec![
            report_of("A1", Some("late_riser")),
            report_of("A2", Some("alpha")),
            report_of("A3", Some("late_riser")),
        ];
        let agg = aggregate(&reports);
        let names: Vec<&str> = agg.iter().map(|(name, _)| name).collect();
        assert_eq!(names, vec!["late_riser", "alpha"]);
    }

    #[test]
    fn select_collapses_duplicate_accessions() {
        let reports = vec![
            report_of("A1", Some("zinc_finger")),
            report_of("A2", None),
            report_of("A3", Some("zinc_finger")),
            report_of("A1", Some("zinc_finger")),
        ];
        let selected = select_accessions_by_motif(&reports, "zinc_finger");
        let expected: HashSet<String> = ["A1", "A3"].iter().map(|s| s.to_string()).collect();
        assert_eq!(selected, expected);
    }

    #[test]
    fn split_combined_recovers_individual_reports() {
        let a = sample_report("A1", Some("m1"));
        let b = sample_report("A2", None);
        let combined = format!("{}{}{}{}", a, REPORT_SEPARATOR, b, REPORT_SEPARATOR);
        let chunks = split_combined(&combined);
        assert_eq!(chunks.len(), 2);
        assert!(chunks[0].contains("A1"));
    }

    #[test]
    fn parse_combined_rebuilds_reports_and_skips_drifted_chunks() {
        let good = sample_report("A1", Some("m1"));
        let absent = sample_report("A2", None);
        let drifted = sample_report("A3", Some("m1")).replace("# Sequence: ", "# SeqName: ");
        let combined = format!(
            "{}{}{}{}{}{}",
            good, REPORT_SEPARATOR, absent, REPORT_SEPARATOR, drifted, REPORT_SEPARATOR
        );
        let reports = parse_combined(&combined);
        assert_eq!(reports.len(), 2);
        assert_eq!(reports[0].source_accession_id, "A1");
        assert_eq!(reports[1].motif_name, None);
    }
}
