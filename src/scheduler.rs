//! Parallel merging of independent partitions
//!
//! Every partition ("graph") is merged on its own, so the work queue of
//! partition indices is the only shared mutable state. Each worker pulls the
//! next index, runs a fresh [`ClusterEngine`](crate::merger::ClusterEngine)
//! over that partition and stores the groups in the slot reserved for it.
//! The first failing partition stops the remaining workers and fails the
//! whole batch; no partial output is returned.

use anyhow::{anyhow, Context, Result};
use log::{debug, info};
use std::collections::{BTreeMap, VecDeque};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, OnceLock, PoisonError};

use crate::config::MergeConfig;
use crate::merger::{merge_partition, MergeGroup, MergeStats, PartitionMerge};
use crate::variant::{merge_order, VariantRecord};

/// Merge result of one partition
#[derive(Debug, Clone, PartialEq)]
pub struct PartitionOutcome {
    pub key: String,
    /// The partition's records in the order they were merged; group members index into this
    pub records: Vec<VariantRecord>,
    pub groups: Vec<MergeGroup>,
    pub stats: MergeStats,
}

impl PartitionOutcome {
    pub fn merged_groups(&self) -> usize {
        self.groups.iter().filter(|group| group.is_merged()).count()
    }

    /// Number of distinct samples among the members of `group`
    pub fn support(&self, group: &MergeGroup) -> usize {
        let mut samples: Vec<usize> = group.members.iter().map(|&i| self.records[i].sample).collect();
        samples.sort_unstable();
        samples.dedup();
        samples.len()
    }

    /// Member ids of every group
    pub fn group_ids(&self) -> Vec<Vec<&str>> {
        self.groups
            .iter()
            .map(|group| {
                group
                    .members
                    .iter()
                    .map(|&i| self.records[i].id.as_str())
                    .collect()
            })
            .collect()
    }
}

/// Merge result of a whole batch, partitions in key order
#[derive(Debug, Clone, PartialEq)]
pub struct MergeOutput {
    pub partitions: Vec<PartitionOutcome>,
    /// Groups with more than one member, across all partitions
    pub merged_groups: usize,
    pub stats: MergeStats,
}

impl MergeOutput {
    pub fn total_groups(&self) -> usize {
        self.partitions.iter().map(|p| p.groups.len()).sum()
    }

    pub fn total_records(&self) -> usize {
        self.partitions.iter().map(|p| p.records.len()).sum()
    }

    pub fn partition(&self, key: &str) -> Option<&PartitionOutcome> {
        self.partitions.iter().find(|p| p.key == key)
    }
}

/// Runs partitions on a fixed pool of worker threads
pub struct PartitionScheduler<'c> {
    config: &'c MergeConfig,
}

impl<'c> PartitionScheduler<'c> {
    pub fn new(config: &'c MergeConfig) -> Result<Self> {
        config.validate()?;
        Ok(PartitionScheduler { config })
    }

    pub fn threads(&self) -> usize {
        self.config.threads
    }

    /// Merge every partition and collect the groups
    pub fn run(&self, partitions: BTreeMap<String, Vec<VariantRecord>>) -> Result<MergeOutput> {
        let mut partitions: Vec<(String, Vec<VariantRecord>)> = partitions.into_iter().collect();
        for (_, records) in partitions.iter_mut() {
            records.sort_by(merge_order);
        }

        let threads = self.config.threads.max(1);
        info!(
            "Merging {} partitions ({} records) with {} threads",
            partitions.len(),
            partitions.iter().map(|(_, r)| r.len()).sum::<usize>(),
            threads
        );

        let todo: Mutex<VecDeque<usize>> = Mutex::new((0..partitions.len()).collect());
        let slots: Vec<OnceLock<PartitionMerge>> =
            (0..partitions.len()).map(|_| OnceLock::new()).collect();
        let merged_groups = AtomicUsize::new(0);
        let abort = AtomicBool::new(false);
        let failure: Mutex<Option<anyhow::Error>> = Mutex::new(None);

        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(threads)
            .thread_name(|i| format!("svmerge-worker-{i}"))
            .build()
            .context("failed to start merge worker pool")?;

        let config = self.config;
        let partitions_ref = &partitions;
        pool.scope(|scope| {
            for _ in 0..threads.min(partitions_ref.len()) {
                scope.spawn(|_| {
                    while !abort.load(Ordering::Acquire) {
                        let Some(slot) = todo
                            .lock()
                            .unwrap_or_else(PoisonError::into_inner)
                            .pop_front()
                        else {
                            break;
                        };

                        let (key, records) = &partitions_ref[slot];
                        debug!("Merging partition {key} ({} records)", records.len());
                        match merge_partition(records, config)
                            .with_context(|| format!("failed to merge partition '{key}'"))
                        {
                            Ok(result) => {
                                let merged = result.merged_groups();
                                debug!(
                                    "Partition {key}: {} groups, {merged} merged",
                                    result.groups.len()
                                );
                                merged_groups.fetch_add(merged, Ordering::Relaxed);
                                let stored = slots[slot].set(result).is_ok();
                                assert!(stored, "partition '{key}' was merged twice");
                            }
                            Err(err) => {
                                abort.store(true, Ordering::Release);
                                failure
                                    .lock()
                                    .unwrap_or_else(PoisonError::into_inner)
                                    .get_or_insert(err);
                            }
                        }
                    }
                });
            }
        });

        if let Some(err) = failure
            .into_inner()
            .unwrap_or_else(PoisonError::into_inner)
        {
            return Err(err);
        }

        let mut stats = MergeStats::default();
        let mut outcomes = Vec::with_capacity(partitions.len());
        for ((key, records), slot) in partitions.into_iter().zip(slots) {
            let merge = slot
                .into_inner()
                .ok_or_else(|| anyhow!("partition '{key}' was never merged"))?;
            stats.absorb(&merge.stats);
            outcomes.push(PartitionOutcome {
                key,
                records,
                groups: merge.groups,
                stats: merge.stats,
            });
        }

        let output = MergeOutput {
            partitions: outcomes,
            merged_groups: merged_groups.into_inner(),
            stats,
        };
        info!(
            "Merged {} records into {} groups ({} with more than one member)",
            output.total_records(),
            output.total_groups(),
            output.merged_groups
        );
        Ok(output)
    }
}
