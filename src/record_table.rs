//! Tab-separated record tables in, group tables out
//!
//! Input columns:
//!
//! ```text
//! partition  sample  id  start  end  [length  sequence  max_dist  min_seq_id  interval_start  interval_end  info]
//! ```
//!
//! `#` lines and blank lines are skipped, and `.` marks an absent optional
//! field. Per-record thresholds not given in the table are filled in from the
//! configuration's threshold model.

use anyhow::{bail, ensure, Context, Result};
use log::{debug, warn};
use noodles::bgzf;
use std::collections::{BTreeMap, HashSet};
use std::fs::File;
use std::io::{self, BufRead, BufReader, Read, Write};
use std::path::Path;

use crate::config::MergeConfig;
use crate::scheduler::MergeOutput;
use crate::variant::{content_hash, VariantRecord};

const REQUIRED_COLUMNS: usize = 5;
const KNOWN_COLUMNS: usize = 12;

/// Open a record table, auto-detecting bgzip compression; `-` reads stdin
pub fn open_table_input<P: AsRef<Path>>(path: P) -> Result<Box<dyn BufRead>> {
    let path = path.as_ref();
    if path.as_os_str() == "-" {
        return Ok(Box::new(BufReader::new(io::stdin())));
    }
    let file = File::open(path)
        .with_context(|| format!("failed to open record table {}", path.display()))?;

    let is_compressed = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext == "gz" || ext == "bgz")
        .unwrap_or(false);

    if is_compressed {
        Ok(Box::new(BufReader::new(bgzf::io::reader::Reader::new(file))))
    } else {
        Ok(Box::new(BufReader::new(file)))
    }
}

fn optional<'a>(field: Option<&&'a str>) -> Option<&'a str> {
    field.copied().filter(|value| !value.is_empty() && *value != ".")
}

fn parse_coordinate(value: &str, column: &str, line_number: usize) -> Result<f64> {
    let parsed: f64 = value
        .parse()
        .with_context(|| format!("line {line_number}: invalid {column} '{value}'"))?;
    ensure!(
        parsed.is_finite(),
        "line {line_number}: {column} must be finite, got '{value}'"
    );
    Ok(parsed)
}

fn parse_optional(field: Option<&&str>, column: &str, line_number: usize) -> Result<Option<f64>> {
    optional(field)
        .map(|value| parse_coordinate(value, column, line_number))
        .transpose()
}

pub struct RecordTableReader<'c, R: BufRead> {
    reader: R,
    config: &'c MergeConfig,
    line_number: usize,
}

impl<'c, R: BufRead> RecordTableReader<'c, R> {
    pub fn new(reader: R, config: &'c MergeConfig) -> Self {
        RecordTableReader {
            reader,
            config,
            line_number: 0,
        }
    }

    pub fn read_record(&mut self) -> Result<Option<VariantRecord>> {
        let mut line = String::new();
        loop {
            line.clear();
            if self.reader.read_line(&mut line)? == 0 {
                return Ok(None);
            }
            self.line_number += 1;
            let trimmed = line.trim_end_matches(['\n', '\r']);
            if trimmed.trim().is_empty() || trimmed.starts_with('#') {
                continue;
            }
            return self.parse_line(trimmed).map(Some);
        }
    }

    fn parse_line(&self, line: &str) -> Result<VariantRecord> {
        let n = self.line_number;
        let fields: Vec<&str> = line.split('\t').collect();
        if fields.len() < REQUIRED_COLUMNS {
            bail!(
                "line {n}: expected at least {REQUIRED_COLUMNS} tab-separated fields, found {}",
                fields.len()
            );
        }
        if fields.len() > KNOWN_COLUMNS {
            warn!(
                "line {n}: ignoring {} fields beyond the {KNOWN_COLUMNS} known columns",
                fields.len() - KNOWN_COLUMNS
            );
        }

        let partition_key = fields[0].to_string();
        ensure!(!partition_key.is_empty(), "line {n}: empty partition key");
        let sample: usize = fields[1]
            .parse()
            .with_context(|| format!("line {n}: invalid sample index '{}'", fields[1]))?;
        let id = fields[2].to_string();
        ensure!(!id.is_empty(), "line {n}: empty variant id");
        let start = parse_coordinate(fields[3], "start", n)?;
        let end = parse_coordinate(fields[4], "end", n)?;

        let length = parse_optional(fields.get(5), "length", n)?.unwrap_or(end);
        let sequence = optional(fields.get(6)).map(str::to_string);
        let max_distance_override = parse_optional(fields.get(7), "max_dist", n)?;
        let min_identity =
            parse_optional(fields.get(8), "min_seq_id", n)?.unwrap_or(self.config.min_sequence_identity);
        let interval = match (
            parse_optional(fields.get(9), "interval_start", n)?,
            parse_optional(fields.get(10), "interval_end", n)?,
        ) {
            (Some(lo), Some(hi)) => Some((lo, hi)),
            (None, None) => None,
            _ => bail!("line {n}: interval needs both a start and an end"),
        };
        let info = optional(fields.get(11)).unwrap_or("");

        let max_distance = self
            .config
            .thresholds
            .resolve(max_distance_override, sample, length);

        let record = VariantRecord {
            sample,
            id,
            start,
            end,
            partition_key,
            sequence,
            max_distance,
            min_sequence_identity: min_identity,
            interval,
            content_hash: content_hash(info),
        };
        record
            .validate()
            .with_context(|| format!("line {n}: invalid record"))?;
        Ok(record)
    }

    pub fn read_all(&mut self) -> Result<Vec<VariantRecord>> {
        let mut records = Vec::new();
        while let Some(record) = self.read_record()? {
            records.push(record);
        }
        Ok(records)
    }
}

/// Read every record of a table file
pub fn read_record_table<P: AsRef<Path>>(path: P, config: &MergeConfig) -> Result<Vec<VariantRecord>> {
    let path = path.as_ref();
    let input = open_table_input(path)?;
    let records = RecordTableReader::new(input, config)
        .read_all()
        .with_context(|| format!("failed to read record table {}", path.display()))?;
    debug!("Read {} records from {}", records.len(), path.display());
    Ok(records)
}

/// Read every record from any reader
pub fn read_records<R: Read>(reader: R, config: &MergeConfig) -> Result<Vec<VariantRecord>> {
    RecordTableReader::new(BufReader::new(reader), config).read_all()
}

/// Fail on the first id that appears twice
pub fn reject_duplicate_ids(records: &[VariantRecord]) -> Result<()> {
    let mut seen: HashSet<&str> = HashSet::with_capacity(records.len());
    for record in records {
        ensure!(
            seen.insert(record.id.as_str()),
            "variant id '{}' appears more than once",
            record.id
        );
    }
    Ok(())
}

/// Bucket records by partition key
pub fn partition_records(records: Vec<VariantRecord>) -> Result<BTreeMap<String, Vec<VariantRecord>>> {
    reject_duplicate_ids(&records)?;
    let mut partitions: BTreeMap<String, Vec<VariantRecord>> = BTreeMap::new();
    for record in records {
        partitions
            .entry(record.partition_key.clone())
            .or_default()
            .push(record);
    }
    Ok(partitions)
}

/// Write one line per group: partition, group index, size, support, comma-separated member ids
///
/// Groups drawing on fewer than `min_support` distinct samples are left out;
/// the group index still counts them, so indices match `PartitionOutcome::groups`.
/// Returns the number of groups written.
pub fn write_groups<W: Write>(output: &mut W, merged: &MergeOutput, min_support: usize) -> Result<usize> {
    writeln!(output, "#partition\tgroup\tsize\tsupport\tmembers")?;
    let mut written = 0;
    for partition in &merged.partitions {
        for (index, (group, ids)) in partition
            .groups
            .iter()
            .zip(partition.group_ids())
            .enumerate()
        {
            let support = partition.support(group);
            if support < min_support {
                continue;
            }
            writeln!(
                output,
                "{}\t{}\t{}\t{}\t{}",
                partition.key,
                index,
                ids.len(),
                support,
                ids.join(",")
            )?;
            written += 1;
        }
    }
    output.flush()?;
    debug!(
        "Wrote {written} of {} groups with support >= {min_support}",
        merged.total_groups()
    );
    Ok(written)
}
