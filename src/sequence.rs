use crate::error::{PipelineError, Result};
use anyhow::Context;
use bio::io::fasta;
use log::{debug, info};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::path::Path;

/// Header substrings that mark a retrieval result as ambiguously annotated.
/// Matching is case-sensitive.
const DISQUALIFYING_SUBSTRINGS: [&str; 3] = ["associated", "unknown", "unnamed"];

/// One protein sequence as returned by the retrieval service.
///
/// The accession ID is derived from the header: the first
/// whitespace-delimited token of the defline.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SequenceRecord {
    pub header: String,
    pub sequence: String,
    pub accession_id: String,
}

impl SequenceRecord {
    fn new(header: String, sequence: String) -> Self {
        let accession_id = header
            .split_whitespace()
            .next()
            .unwrap_or_default()
            .to_string();
        SequenceRecord {
            header,
            sequence,
            accession_id,
        }
    }

    /// Renders the record as a single FASTA entry, sequence on one line.
    pub fn to_fasta(&self) -> String {
        format!(">{}\n{}\n", self.header, self.sequence)
    }
}

/// A keyed set of sequence records for one retrieval batch.
///
/// Headers are unique keys within the batch; insertion order is not
/// semantically meaningful. The set is created in bulk from raw retrieval
/// text and never mutated record by record afterwards.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SequenceStore {
    records: HashMap<String, SequenceRecord>,
}

impl SequenceStore {
    /// Parses raw retrieval text into a store.
    ///
    /// The text is split on the `>` record delimiter. The segment preceding
    /// the first delimiter is always empty and is discarded; within each
    /// remaining segment the first line break separates the header from the
    /// sequence data, and internal line breaks in the data are removed.
    pub fn parse(raw_text: &str) -> Result<Self> {
        if raw_text.trim().is_empty() || !raw_text.contains('>') {
            return Err(PipelineError::EmptyInput);
        }

        let mut records = HashMap::new();
        for segment in raw_text.trim_end().split('>') {
            if segment.is_empty() {
                // Text before the first delimiter.
                continue;
            }
            let (header, body) = match segment.find('\n') {
                Some(pos) => (&segment[..pos], &segment[pos..]),
                None => (segment, ""),
            };
            let header = header.trim_end_matches('\r').to_string();
            let sequence: String = body.chars().filter(|c| *c != '\n' && *c != '\r').collect();
            records.insert(header.clone(), SequenceRecord::new(header, sequence));
        }

        if records.is_empty() {
            return Err(PipelineError::EmptyInput);
        }
        debug!("parsed {} sequence records from raw text", records.len());
        Ok(SequenceStore { records })
    }

    /// Returns a copy of the store without ambiguously annotated entries.
    ///
    /// An empty result is a valid, reportable state; the caller decides
    /// whether to abort the stage.
    pub fn filter_ambiguous(&self) -> Self {
        let records: HashMap<String, SequenceRecord> = self
            .records
            .iter()
            .filter(|(header, _)| {
                !DISQUALIFYING_SUBSTRINGS
                    .iter()
                    .any(|word| header.contains(word))
            })
            .map(|(h, r)| (h.clone(), r.clone()))
            .collect();
        let dropped = self.records.len() - records.len();
        if dropped > 0 {
            info!("filtered out {} ambiguously annotated records", dropped);
        }
        SequenceStore { records }
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, header: &str) -> Option<&SequenceRecord> {
        self.records.get(header)
    }

    pub fn records(&self) -> impl Iterator<Item = &SequenceRecord> {
        self.records.values()
    }

    /// All accession IDs present in the store.
    pub fn accession_ids(&self) -> HashSet<String> {
        self.records
            .values()
            .map(|r| r.accession_id.clone())
            .collect()
    }

    /// Extracts the records whose accession ID is in the given set.
    pub fn subset_by_accessions(&self, accessions: &HashSet<String>) -> Self {
        let records: HashMap<String, SequenceRecord> = self
            .records
            .iter()
            .filter(|(_, r)| accessions.contains(&r.accession_id))
            .map(|(h, r)| (h.clone(), r.clone()))
            .collect();
        SequenceStore { records }
    }

    /// Writes the store to a FASTA file, sorted by header so repeated runs
    /// produce identical files.
    pub fn write_fasta(&self, path: &Path) -> anyhow::Result<()> {
        let mut writer = fasta::Writer::to_file(path)
            .with_context(|| format!("Failed to create FASTA file: {}", path.display()))?;
        let mut headers: Vec<&String> = self.records.keys().collect();
        headers.sort();
        for header in headers {
            let record = &self.records[header];
            let description = header
                .strip_prefix(record.accession_id.as_str())
                .map(str::trim)
                .filter(|d| !d.is_empty());
            writer
                .write(&record.accession_id, description, record.sequence.as_bytes())
                .with_context(|| format!("Failed to write record `{}`", record.accession_id))?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parse_splits_on_delimiter_and_strips_line_breaks() {
        let raw = ">h1 kinase domain\nAAA\nBBB\n>h2 receptor\nCCC\n";
        let store = SequenceStore::parse(raw).unwrap();
        assert_eq!(store.len(), 2);
        assert_eq!(store.get("h1 kinase domain").unwrap().sequence, "AAABBB");
        assert_eq!(store.get("h2 receptor").unwrap().sequence, "CCC");
    }

    #[test]
    fn parse_derives_accession_from_header() {
        let store = SequenceStore::parse(">XP_001.2 kinase domain\nMKV\n").unwrap();
        let record = store.get("XP_001.2 kinase domain").unwrap();
        assert_eq!(record.accession_id, "XP_001.2");
    }

    #[test]
    fn parse_rejects_empty_input() {
        assert!(matches!(
            SequenceStore::parse(""),
            Err(PipelineError::EmptyInput)
        ));
        assert!(matches!(
            SequenceStore::parse("   \n"),
            Err(PipelineError::EmptyInput)
        ));
    }

    #[test]
    fn parse_rejects_text_without_delimiter() {
        assert!(matches!(
            SequenceStore::parse("no fasta here\njust text\n"),
            Err(PipelineError::EmptyInput)
        ));
    }

    #[test]
    fn filter_removes_ambiguous_headers() {
        let raw = ">h1 unknown protein\nAAA\n>h2 kinase domain\nBBB";
        let store = SequenceStore::parse(raw).unwrap().filter_ambiguous();
        assert_eq!(store.len(), 1);
        assert_eq!(store.get("h2 kinase domain").unwrap().sequence, "BBB");
        assert!(store.get("h1 unknown protein").is_none());
    }

    #[test]
    fn filter_never_keeps_disqualified_headers() {
        let raw = ">a associated factor\nAA\n>b unnamed product\nBB\n>c unknown\nCC\n>d fine\nDD\n";
        let store = SequenceStore::parse(raw).unwrap().filter_ambiguous();
        for record in store.records() {
            for word in ["associated", "unknown", "unnamed"] {
                assert!(!record.header.contains(word));
            }
        }
        assert_eq!(store.len(), 1);
    }

    #[test]
    fn filter_to_empty_store_is_not_an_error() {
        let store = SequenceStore::parse(">x unknown\nAA\n")
            .unwrap()
            .filter_ambiguous();
        assert!(store.is_empty());
    }

    #[test]
    fn subset_by_accessions_extracts_matching_records() {
        let raw = ">A1 alpha\nAA\n>A2 beta\nBB\n>A3 gamma\nCC\n";
        let store = SequenceStore::parse(raw).unwrap();
        let wanted: HashSet<String> = ["A1", "A3"].iter().map(|s| s.to_string()).collect();
        let subset = store.subset_by_accessions(&wanted);
        assert_eq!(subset.len(), 2);
        assert_eq!(subset.accession_ids(), wanted);
    }

    #[test]
    fn write_fasta_round_trips_through_bio_reader() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("subset.fa");
        let store = SequenceStore::parse(">A1 alpha protein\nMKV\n>A2 beta\nGGL\n").unwrap();
        store.write_fasta(&path).unwrap();

        let reader = fasta::Reader::from_file(&path).unwrap();
        let ids: Vec<String> = reader
            .records()
            .map(|r| r.unwrap().id().to_string())
            .collect();
        assert_eq!(ids, vec!["A1".to_string(), "A2".to_string()]);
    }
}
