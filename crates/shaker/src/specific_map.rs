use crate::fdr::{TargetDecoyMap, ThresholdResult};
use crate::Error;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;

/// Key of a target-decoy map inside a [`SpecificMap`]
#[derive(Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum Partition {
    /// PSMs of a precursor charge
    Charge(u8),
    /// Peptides sharing a variable modification profile, empty if unmodified
    Modifications(String),
    /// First hits of a search engine
    Engine(String),
    /// Proteins are never partitioned
    Protein,
    /// Sparse partitions merged together
    Pooled,
}

impl Display for Partition {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Partition::Charge(z) => write!(f, "{}+", z),
            Partition::Modifications(m) if m.is_empty() => f.write_str("unmodified"),
            Partition::Modifications(m) => f.write_str(m),
            Partition::Engine(e) => f.write_str(e),
            Partition::Protein => f.write_str("proteins"),
            Partition::Pooled => f.write_str("pooled"),
        }
    }
}

/// Reporting view of one partition
#[derive(Clone, Debug, Serialize)]
pub struct MapSummary {
    pub partition: Partition,
    pub n_target: usize,
    pub n_decoy: usize,
    pub suspicious: bool,
    /// Partitions merged into this one by [`SpecificMap::cure`]
    pub merged: Vec<Partition>,
    pub threshold: ThresholdResult,
}

/// A set of target-decoy maps, one per [`Partition`]
#[derive(Clone, Debug, Default)]
pub struct SpecificMap {
    maps: BTreeMap<Partition, TargetDecoyMap>,
    grouping: BTreeMap<Partition, Partition>,
    min_decoys: usize,
}

impl SpecificMap {
    /// Partitions holding less than `min_decoys` decoys are pooled by `cure`
    pub fn new(min_decoys: usize) -> Self {
        Self {
            maps: BTreeMap::new(),
            grouping: BTreeMap::new(),
            min_decoys,
        }
    }

    pub fn clean(&mut self) {
        self.maps.clear();
        self.grouping.clear();
    }

    pub fn add_point(&mut self, partition: Partition, score: f64, decoy: bool) {
        self.maps.entry(partition).or_default().add_point(score, decoy);
    }

    pub fn remove_point(&mut self, partition: &Partition, score: f64, decoy: bool) -> bool {
        let partition = self.corrected_partition(partition);
        self.maps
            .get_mut(&partition)
            .map(|map| map.remove_point(score, decoy))
            .unwrap_or(false)
    }

    pub fn is_empty(&self) -> bool {
        self.maps.values().all(TargetDecoyMap::is_empty)
    }

    /// Merge every suspicious partition into [`Partition::Pooled`]. Nothing
    /// happens when a single partition exists.
    pub fn cure(&mut self) {
        if self.maps.len() <= 1 {
            return;
        }
        let sparse = self
            .maps
            .iter()
            .filter(|(partition, map)| {
                **partition != Partition::Pooled && map.is_suspicious(self.min_decoys)
            })
            .map(|(partition, _)| partition.clone())
            .collect::<Vec<_>>();

        for partition in sparse {
            if let Some(map) = self.maps.remove(&partition) {
                log::debug!(
                    "- pooling sparse partition {} ({} targets, {} decoys)",
                    partition,
                    map.n_target(),
                    map.n_decoy()
                );
                self.maps.entry(Partition::Pooled).or_default().merge(&map);
                self.grouping.insert(partition, Partition::Pooled);
            }
        }
    }

    /// Partition actually holding the points of `partition` after `cure`
    pub fn corrected_partition(&self, partition: &Partition) -> Partition {
        self.grouping
            .get(partition)
            .unwrap_or(partition)
            .clone()
    }

    /// Estimate every partition. Partitions without decoys fall back to a
    /// neutral probability and are returned, labelled, for reporting.
    pub fn estimate_probabilities(&mut self) -> Vec<Error> {
        let mut unsupported = Vec::new();
        for (partition, map) in self.maps.iter_mut() {
            if let Err(e) = map.estimate_probabilities(&partition.to_string()) {
                log::warn!("{}: falling back to a probability of 1", e);
                unsupported.push(e);
            }
        }
        unsupported
    }

    pub fn map(&self, partition: &Partition) -> Option<&TargetDecoyMap> {
        self.maps.get(&self.corrected_partition(partition))
    }

    pub fn partitions(&self) -> impl Iterator<Item = &Partition> {
        self.maps.keys()
    }

    pub fn probability(&self, partition: &Partition, score: f64) -> f64 {
        self.map(partition)
            .map(|map| map.probability(score))
            .unwrap_or(1.0)
    }

    pub fn fdr_results(&self, partition: &Partition, fdr: f64) -> Option<ThresholdResult> {
        self.map(partition).map(|map| map.fdr_results(fdr))
    }

    /// Thresholds of every partition, keyed by the partition holding the points
    pub fn thresholds(&self, fdr: f64) -> BTreeMap<Partition, ThresholdResult> {
        self.maps
            .iter()
            .map(|(partition, map)| (partition.clone(), map.fdr_results(fdr)))
            .collect()
    }

    pub fn summaries(&self, fdr: f64) -> Vec<MapSummary> {
        self.maps
            .iter()
            .map(|(partition, map)| MapSummary {
                partition: partition.clone(),
                n_target: map.n_target(),
                n_decoy: map.n_decoy(),
                suspicious: map.is_suspicious(self.min_decoys),
                merged: self
                    .grouping
                    .iter()
                    .filter(|(_, to)| *to == partition)
                    .map(|(from, _)| from.clone())
                    .collect(),
                threshold: map.fdr_results(fdr),
            })
            .collect()
    }

    /// Partitions still too sparse after `cure`
    pub fn suspicious_partitions(&self) -> Vec<Partition> {
        self.maps
            .iter()
            .filter(|(_, map)| map.is_suspicious(self.min_decoys))
            .map(|(partition, _)| partition.clone())
            .collect()
    }
}
