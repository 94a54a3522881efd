//! Localization of variable modifications
//!
//! Sites are scored per PSM ([`scoring`]), thresholded into a
//! [`SiteConfidence`] tier and completed by inference from homologous
//! peptides ([`localization`]), then summarized for peptides and proteins
//! ([`aggregation`]).

use crate::modification::MassKey;
use crate::specific_map::{MapSummary, Partition, SpecificMap};
use crate::Error;
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

pub mod aggregation;
pub mod localization;
pub mod scoring;

/// Ordered from no evidence to certainty
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum SiteConfidence {
    #[default]
    NotFound,
    Random,
    Doubtful,
    Confident,
    VeryConfident,
}

/// Scores of the candidate sites of one modification, keyed by 1-based site
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PtmScoring {
    pub delta: BTreeMap<usize, f64>,
    pub probabilistic: BTreeMap<usize, f64>,
    pub confidence: BTreeMap<usize, SiteConfidence>,
}

impl PtmScoring {
    pub fn site_confidence(&self, site: usize) -> SiteConfidence {
        self.confidence.get(&site).copied().unwrap_or_default()
    }

    /// Probabilistic score when available, delta score otherwise
    pub fn best_score(&self, site: usize) -> f64 {
        self.probabilistic
            .get(&site)
            .or_else(|| self.delta.get(&site))
            .copied()
            .unwrap_or(0.0)
    }

    /// Sites localized at [`SiteConfidence::Confident`] or better
    pub fn confident_sites(&self) -> Vec<usize> {
        self.confidence
            .iter()
            .filter(|(_, c)| **c >= SiteConfidence::Confident)
            .map(|(site, _)| *site)
            .collect()
    }

    /// Sites scored but not confidently localized
    pub fn secondary_sites(&self) -> Vec<usize> {
        self.confidence
            .iter()
            .filter(|(_, c)| matches!(c, SiteConfidence::Random | SiteConfidence::Doubtful))
            .map(|(site, _)| *site)
            .collect()
    }

    /// Keep the best score and confidence of both scorings at every site
    pub fn merge(&mut self, other: &PtmScoring) {
        for (site, score) in &other.delta {
            let entry = self.delta.entry(*site).or_insert(*score);
            *entry = entry.max(*score);
        }
        for (site, score) in &other.probabilistic {
            let entry = self.probabilistic.entry(*site).or_insert(*score);
            *entry = entry.max(*score);
        }
        for (site, confidence) in &other.confidence {
            let entry = self.confidence.entry(*site).or_insert(*confidence);
            *entry = (*entry).max(*confidence);
        }
    }
}

/// Localization results of a PSM or peptide
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct PtmScores {
    /// Keyed by modification name
    pub scorings: BTreeMap<String, PtmScoring>,
    pub main_sites: BTreeMap<String, BTreeSet<usize>>,
    pub secondary_sites: BTreeMap<String, BTreeSet<usize>>,
}

impl PtmScores {
    pub fn scoring(&self, name: &str) -> Option<&PtmScoring> {
        self.scorings.get(name)
    }

    pub fn scoring_mut(&mut self, name: &str) -> &mut PtmScoring {
        self.scorings.entry(name.to_string()).or_default()
    }

    pub fn is_empty(&self) -> bool {
        self.scorings.is_empty()
    }

    pub fn clear(&mut self) {
        self.scorings.clear();
        self.main_sites.clear();
        self.secondary_sites.clear();
    }
}

/// Modification sites on the main accession of a protein group, 1-based
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProteinPtmSites {
    pub main: BTreeMap<usize, BTreeSet<String>>,
    pub secondary: BTreeMap<usize, BTreeSet<String>>,
}

impl ProteinPtmSites {
    pub fn add_main(&mut self, site: usize, name: &str) {
        self.main.entry(site).or_default().insert(name.into());
    }

    pub fn add_secondary(&mut self, site: usize, name: &str) {
        self.secondary.entry(site).or_default().insert(name.into());
    }

    pub fn is_empty(&self) -> bool {
        self.main.is_empty() && self.secondary.is_empty()
    }
}

/// False localization rate estimation, one [`SpecificMap`] partitioned by
/// charge per modification mass.
///
/// Points are negated probabilistic scores, decoys being the sites where the
/// probabilistic and delta scores disagree.
#[derive(Clone, Debug, Default)]
pub struct FlrMap {
    maps: BTreeMap<MassKey, SpecificMap>,
    min_decoys: usize,
}

impl FlrMap {
    pub fn new(min_decoys: usize) -> Self {
        Self {
            maps: BTreeMap::new(),
            min_decoys,
        }
    }

    pub fn clean(&mut self) {
        self.maps.clear();
    }

    pub fn add_point(&mut self, mass: MassKey, charge: u8, score: f64, decoy: bool) {
        let min_decoys = self.min_decoys;
        self.maps
            .entry(mass)
            .or_insert_with(|| SpecificMap::new(min_decoys))
            .add_point(Partition::Charge(charge), score, decoy);
    }

    pub fn is_empty(&self) -> bool {
        self.maps.values().all(SpecificMap::is_empty)
    }

    /// Cure and estimate every map
    pub fn estimate_probabilities(&mut self) -> Vec<Error> {
        self.maps
            .values_mut()
            .flat_map(|map| {
                map.cure();
                map.estimate_probabilities()
            })
            .collect()
    }

    /// Minimal probabilistic score of a localization at the requested FLR,
    /// `None` when the partition validates nothing
    pub fn threshold(&self, mass: MassKey, charge: u8, flr: f64) -> Option<f64> {
        self.maps
            .get(&mass)?
            .fdr_results(&Partition::Charge(charge), flr)
            .filter(|result| !result.no_validated)
            .map(|result| -result.score_limit)
    }

    pub fn summaries(&self, flr: f64) -> Vec<(MassKey, MapSummary)> {
        self.maps
            .iter()
            .flat_map(|(mass, map)| {
                map.summaries(flr)
                    .into_iter()
                    .map(move |summary| (*mass, summary))
            })
            .collect()
    }
}

/// 0-based start of every occurrence of `needle` in `haystack`, overlapping
/// occurrences included
pub fn occurrences(haystack: &str, needle: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    if needle.is_empty() {
        return starts;
    }
    let mut from = 0;
    while let Some(ix) = haystack[from..].find(needle) {
        starts.push(from + ix);
        from += ix + 1;
        if from >= haystack.len() {
            break;
        }
    }
    starts
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn merge_keeps_best() {
        let mut a = PtmScoring::default();
        a.delta.insert(3, 10.0);
        a.confidence.insert(3, SiteConfidence::Doubtful);
        let mut b = PtmScoring::default();
        b.delta.insert(3, 50.0);
        b.delta.insert(5, 1.0);
        b.probabilistic.insert(5, 99.0);
        b.confidence.insert(3, SiteConfidence::Random);
        b.confidence.insert(5, SiteConfidence::VeryConfident);
        a.merge(&b);
        assert_eq!(a.delta[&3], 50.0);
        assert_eq!(a.site_confidence(3), SiteConfidence::Doubtful);
        assert_eq!(a.confident_sites(), vec![5]);
        assert_eq!(a.secondary_sites(), vec![3]);
        assert_eq!(a.best_score(5), 99.0);
        assert_eq!(a.best_score(3), 50.0);
    }

    #[test]
    fn overlapping_occurrences() {
        assert_eq!(occurrences("AAAA", "AA"), vec![0, 1, 2]);
        assert_eq!(occurrences("MKPEPTIDEK", "PEP"), vec![2]);
        assert!(occurrences("MKPEPTIDEK", "XX").is_empty());
    }

    #[test]
    fn flr_thresholds() {
        let mass = MassKey::new(79.966331);
        let mut map = FlrMap::new(1);
        for i in 0..100 {
            map.add_point(mass, 2, -100.0 + i as f64 * 0.01, false);
        }
        for i in 0..5 {
            map.add_point(mass, 2, -50.0 + i as f64, true);
        }
        for i in 0..50 {
            map.add_point(mass, 2, -40.0 + i as f64 * 0.1, false);
        }
        assert!(map.estimate_probabilities().is_empty());
        // the first decoy brings the FLR to exactly 2%, which still passes
        assert_eq!(map.threshold(mass, 2, 2.0), Some(50.0));
        let threshold = map.threshold(mass, 2, 1.5).unwrap();
        assert!((threshold - 99.01).abs() < 1e-9);
        assert!(map.threshold(mass, 3, 2.0).is_none());
        assert_eq!(map.summaries(2.0).len(), 1);
    }
}
