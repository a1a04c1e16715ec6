use crate::error::{PipelineError, Result};
use anyhow::Context;
use bigdecimal::{BigDecimal, Zero};
use csv::{ReaderBuilder, WriterBuilder};
use log::debug;
use serde::{Deserialize, Serialize};
use std::fs::File;
use std::path::Path;
use std::str::FromStr;

/// Comment sentinel opening non-record lines in tabular search output.
const COMMENT_SENTINEL: char = '#';
/// Number of data columns in a tabular comparison row.
const COLUMN_COUNT: usize = 12;

/// One row of tabular pairwise-comparison output.
///
/// E-values are kept as arbitrary-precision decimals so comparisons stay
/// exact at extreme magnitudes (e.g. 1e-200), where floating point would
/// collapse distinct values.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HitRecord {
    pub query_accession: String,
    pub subject_accession: String,
    pub percent_identity: f64,
    pub alignment_length: u64,
    pub mismatches: u64,
    pub gap_opens: u64,
    pub query_start: u64,
    pub query_end: u64,
    pub subject_start: u64,
    pub subject_end: u64,
    pub e_value: BigDecimal,
    pub bit_score: f64,
}

/// Outcome of threshold filtering.
///
/// An empty pass-list is not an error: the caller gets the lowest e-value
/// present so a looser threshold can be chosen at the interactive boundary.
#[derive(Debug, Clone, PartialEq)]
pub enum FilterOutcome {
    Passed(Vec<HitRecord>),
    NoneBelowThreshold { lowest: BigDecimal },
}

/// Parses a full tabular comparison table.
///
/// Lines opening with the comment sentinel and blank lines are skipped.
/// Every remaining line must split into exactly twelve tab-separated fields
/// with a valid positive decimal e-value; one bad data row fails the whole
/// call, since silently dropping it would shift positional semantics
/// downstream.
pub fn parse_table(table_text: &str) -> Result<Vec<HitRecord>> {
    let mut records = Vec::new();
    for (index, line) in table_text.lines().enumerate() {
        let line_number = index + 1;
        if line.trim().is_empty() || line.starts_with(COMMENT_SENTINEL) {
            continue;
        }
        records.push(parse_row(line, line_number)?);
    }
    debug!("parsed {} hit records from comparison table", records.len());
    Ok(records)
}

fn parse_row(line: &str, line_number: usize) -> Result<HitRecord> {
    let fields: Vec<&str> = line.split('\t').collect();
    if fields.len() != COLUMN_COUNT {
        return Err(PipelineError::MalformedRow {
            line: line_number,
            reason: format!("expected {} fields, found {}", COLUMN_COUNT, fields.len()),
        });
    }

    let e_value = BigDecimal::from_str(fields[10].trim()).map_err(|e| {
        PipelineError::MalformedRow {
            line: line_number,
            reason: format!("e-value `{}` is not a decimal: {}", fields[10], e),
        }
    })?;
    if e_value <= BigDecimal::zero() {
        return Err(PipelineError::MalformedRow {
            line: line_number,
            reason: format!("e-value `{}` is not positive", fields[10]),
        });
    }

    Ok(HitRecord {
        query_accession: fields[0].to_string(),
        subject_accession: fields[1].to_string(),
        percent_identity: parse_field(fields[2], "percent identity", line_number)?,
        alignment_length: parse_field(fields[3], "alignment length", line_number)?,
        mismatches: parse_field(fields[4], "mismatches", line_number)?,
        gap_opens: parse_field(fields[5], "gap opens", line_number)?,
        query_start: parse_field(fields[6], "query start", line_number)?,
        query_end: parse_field(fields[7], "query end", line_number)?,
        subject_start: parse_field(fields[8], "subject start", line_number)?,
        subject_end: parse_field(fields[9], "subject end", line_number)?,
        e_value,
        bit_score: parse_field(fields[11], "bit score", line_number)?,
    })
}

fn parse_field<T: FromStr>(raw: &str, name: &str, line_number: usize) -> Result<T>
where
    T::Err: std::fmt::Display,
{
    raw.trim().parse().map_err(|e| PipelineError::MalformedRow {
        line: line_number,
        reason: format!("{} `{}` is invalid: {}", name, raw, e),
    })
}

/// Returns the records at or below the threshold, original order preserved.
///
/// The threshold must be strictly positive. When nothing passes, the lowest
/// e-value in the unfiltered set is reported instead.
pub fn filter_by_threshold(records: &[HitRecord], threshold: &BigDecimal) -> Result<FilterOutcome> {
    if *threshold <= BigDecimal::zero() {
        return Err(PipelineError::InvalidThreshold {
            value: threshold.to_string(),
        });
    }
    if records.is_empty() {
        return Err(PipelineError::EmptyInput);
    }

    let passed: Vec<HitRecord> = records
        .iter()
        .filter(|r| r.e_value <= *threshold)
        .cloned()
        .collect();
    if passed.is_empty() {
        let lowest = records
            .iter()
            .map(|r| r.e_value.clone())
            .min()
            .ok_or(PipelineError::EmptyInput)?;
        return Ok(FilterOutcome::NoneBelowThreshold { lowest });
    }
    Ok(FilterOutcome::Passed(passed))
}

/// Stable sort by e-value ascending; ties keep their original order.
pub fn rank_ascending(mut records: Vec<HitRecord>) -> Vec<HitRecord> {
    records.sort_by(|a, b| a.e_value.cmp(&b.e_value));
    records
}

/// The most significant hit: the first record with the minimal e-value.
pub fn best(records: &[HitRecord]) -> Option<&HitRecord> {
    let mut best: Option<&HitRecord> = None;
    for record in records {
        match best {
            Some(current) if record.e_value >= current.e_value => {}
            _ => best = Some(record),
        }
    }
    best
}

/// Writes the normalized export: twelve named columns plus a header row.
pub fn write_csv(records: &[HitRecord], path: &Path) -> anyhow::Result<()> {
    let file = File::create(path)
        .with_context(|| format!("Failed to create CSV file: {}", path.display()))?;
    let mut writer = WriterBuilder::new().from_writer(file);
    for record in records {
        writer.serialize(record)?;
    }
    writer.flush()?;
    Ok(())
}

/// Re-reads a normalized export produced by [`write_csv`].
pub fn read_csv(path: &Path) -> anyhow::Result<Vec<HitRecord>> {
    let file = File::open(path)
        .with_context(|| format!("Failed to open CSV file: {}", path.display()))?;
    let mut reader = ReaderBuilder::new().from_reader(file);
    let records: Vec<HitRecord> = reader
        .deserialize()
        .collect::<std::result::Result<_, _>>()
        .with_context(|| format!("Failed to parse CSV file: {}", path.display()))?;
    Ok(records)
}
