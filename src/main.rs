use anyhow::{Context, Result};
use clap::Parser;
use log::info;
use std::fs::File;
use std::io::{self, BufWriter, Write};
use std::time::Instant;

use svmerge::config::{MergeConfig, SimilarityAlgorithm, ThresholdModel, DEFAULT_KMER_SIZE};
use svmerge::record_table::{partition_records, read_record_table, write_groups};
use svmerge::scheduler::PartitionScheduler;

/// Parse a distance that may have a metric suffix (k/K=1000, m/M=1e6, g/G=1e9)
fn parse_distance(s: &str) -> Result<f64, String> {
    let Some(last_char) = s.chars().last() else {
        return Err("Empty string".to_string());
    };

    let (num_part, suffix) = if last_char.is_ascii_alphabetic() {
        (&s[..s.len() - last_char.len_utf8()], Some(last_char))
    } else {
        (s, None)
    };

    let base: f64 = num_part
        .parse()
        .map_err(|e| format!("Invalid number: {e}"))?;

    let multiplier = match suffix {
        Some('k') | Some('K') => 1000.0,
        Some('m') | Some('M') => 1_000_000.0,
        Some('g') | Some('G') => 1_000_000_000.0,
        Some(c) => {
            return Err(format!(
                "Unknown suffix '{c}'. Use k/K (1000), m/M (1e6), or g/G (1e9)"
            ))
        }
        None => 1.0,
    };

    let result = base * multiplier;
    if !result.is_finite() || result < 0.0 {
        return Err(format!("Distance must be a non-negative number, got {s}"));
    }
    Ok(result)
}

/// svmerge - Merge structural variant calls across samples
///
/// Reads a table of variant records, merges nearby calls within each
/// partition and writes one line per merged group
#[derive(Parser, Debug)]
#[clap(author, version, about, long_about = None)]
struct Args {
    /// Input record table (plain or bgzip-compressed, '-' for stdin)
    #[clap(short = 'i', long = "input")]
    input: String,

    /// Output group table (stdout if not specified)
    #[clap(short = 'o', long = "output")]
    output: Option<String>,

    /// Maximum distance between merged variants [default: 1000]
    #[clap(long = "max-dist", value_parser = parse_distance)]
    max_dist: Option<f64>,

    /// Make the threshold this proportion of each variant's length; --max-dist then acts as a ceiling
    #[clap(long = "max-dist-linear", default_value = "0")]
    max_dist_linear: f64,

    /// Lower bound on thresholds derived from --max-dist-linear
    #[clap(long = "min-dist", value_parser = parse_distance)]
    min_dist: Option<f64>,

    /// Comma-separated per-sample thresholds, in sample order (overrides --max-dist and --max-dist-linear)
    #[clap(long = "per-sample-dist", value_parser = parse_distance, value_delimiter = ',')]
    per_sample_dist: Vec<f64>,

    /// Minkowski exponent of the distance norm
    #[clap(long = "norm", default_value = "2")]
    norm: f64,

    /// Minimum identity between inserted sequences (0 disables the check)
    #[clap(long = "min-seq-id", default_value = "0")]
    min_seq_id: f64,

    /// Compare sequences by edit distance instead of k-mer Jaccard similarity
    #[clap(long = "use-edit-dist")]
    use_edit_dist: bool,

    /// K-mer size for Jaccard similarity
    #[clap(long = "k-jaccard", default_value_t = DEFAULT_KMER_SIZE)]
    k_jaccard: usize,

    /// Allow variants from the same sample to be merged
    #[clap(long = "allow-intrasample")]
    allow_intrasample: bool,

    /// Require every pair in a group to be within threshold
    #[clap(long = "clique", conflicts_with = "centroid")]
    clique: bool,

    /// Require every member to be within its threshold of the group centroid
    #[clap(long = "centroid")]
    centroid: bool,

    /// Minimum reciprocal overlap for variants with intervals (0 disables the check)
    #[clap(long = "overlap", default_value = "0")]
    overlap: f64,

    /// Minimum number of distinct samples a group needs to be written
    #[clap(long = "min-support", default_value = "1")]
    min_support: usize,

    /// Number of threads for parallel processing
    #[clap(short = 't', long = "threads", default_value = "1")]
    threads: usize,

    /// Verbosity (-v info, -vv debug)
    #[clap(short = 'v', long = "verbose", action = clap::ArgAction::Count)]
    verbose: u8,
}

impl Args {
    fn merge_config(&self) -> Result<MergeConfig> {
        let mut thresholds = ThresholdModel {
            linear_factor: self.max_dist_linear,
            min_distance: self.min_dist,
            per_sample: self.per_sample_dist.clone(),
            ..Default::default()
        };
        if let Some(max_dist) = self.max_dist {
            thresholds.max_distance = max_dist;
            if self.max_dist_linear > 0.0 {
                thresholds.ceiling = Some(max_dist);
            }
        }

        let similarity = if self.use_edit_dist {
            SimilarityAlgorithm::EditDistance
        } else {
            SimilarityAlgorithm::KmerJaccard { k: self.k_jaccard }
        };

        let config = MergeConfig {
            thresholds,
            min_sequence_identity: self.min_seq_id,
            norm: self.norm,
            similarity,
            allow_intrasample: self.allow_intrasample,
            mode: MergeConfig::mode_from_flags(self.clique, self.centroid)?,
            overlap_fraction: self.overlap,
            threads: self.threads,
            min_support: self.min_support,
        };
        config.validate()?;
        Ok(config)
    }
}

fn init_logging(verbose: u8) {
    let level = match verbose {
        0 => log::LevelFilter::Error,
        1 => log::LevelFilter::Info,
        _ => log::LevelFilter::Debug,
    };
    env_logger::Builder::new()
        .filter_level(level)
        .format_timestamp(None)
        .format_target(false)
        .init();
}

fn main() -> Result<()> {
    let args = Args::parse();
    init_logging(args.verbose);

    let config = args.merge_config()?;
    info!(
        "Mode {} with norm {} over {} threads",
        config.mode, config.norm, config.threads
    );

    let start = Instant::now();
    let records = read_record_table(&args.input, &config)?;
    info!("Read {} records in {:.2?}", records.len(), start.elapsed());

    let partitions = partition_records(records)?;
    let scheduler = PartitionScheduler::new(&config)?;
    let merged = scheduler.run(partitions)?;

    let mut output: Box<dyn Write> = match &args.output {
        Some(path) => Box::new(BufWriter::new(
            File::create(path).with_context(|| format!("failed to create output file {path}"))?,
        )),
        None => Box::new(BufWriter::new(io::stdout().lock())),
    };
    let written = write_groups(&mut output, &merged, config.min_support)?;

    info!(
        "Finished in {:.2?}: {} groups ({} written), {} merged ({} unions, {} KNN queries)",
        start.elapsed(),
        merged.total_groups(),
        written,
        merged.merged_groups,
        merged.stats.unions,
        merged.stats.knn_queries
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_distance() {
        assert_eq!(parse_distance("500"), Ok(500.0));
        assert_eq!(parse_distance("1.5k"), Ok(1500.0));
        assert_eq!(parse_distance("2M"), Ok(2_000_000.0));
        assert!(parse_distance("").is_err());
        assert!(parse_distance("10x").is_err());
        assert!(parse_distance("-5").is_err());
    }

    #[test]
    fn test_per_sample_distances() {
        let args = Args::parse_from(["svmerge", "-i", "in.tsv", "--per-sample-dist", "10,1k,20"]);
        assert_eq!(args.per_sample_dist, vec![10.0, 1000.0, 20.0]);
        let config = args.merge_config().unwrap();
        assert_eq!(config.thresholds.resolve(None, 1, 50.0), 1000.0);
        assert_eq!(config.thresholds.resolve(None, 3, 50.0), 1000.0);
    }

    #[test]
    fn test_linear_threshold_uses_max_dist_as_ceiling() {
        let args = Args::parse_from([
            "svmerge", "-i", "in.tsv", "--max-dist", "500", "--max-dist-linear", "0.5",
        ]);
        let config = args.merge_config().unwrap();
        assert_eq!(config.thresholds.ceiling, Some(500.0));
        assert_eq!(config.thresholds.resolve(None, 0, 4000.0), 500.0);
        assert_eq!(config.thresholds.resolve(None, 0, 400.0), 200.0);
    }

    #[test]
    fn test_min_support_option() {
        let args = Args::parse_from(["svmerge", "-i", "in.tsv", "--min-support", "3"]);
        assert_eq!(args.merge_config().unwrap().min_support, 3);
        let args = Args::parse_from(["svmerge", "-i", "in.tsv", "--min-support", "0"]);
        assert!(args.merge_config().is_err());
    }

    #[test]
    fn test_clique_and_centroid_conflict() {
        let parsed = Args::try_parse_from(["svmerge", "-i", "in.tsv", "--clique", "--centroid"]);
        assert!(parsed.is_err());
    }
}
