//! Empirical target-decoy statistics for one scoring partition
//!
//! Scores fed to a [`TargetDecoyMap`] are probabilities: lower is better.
//! Observations sharing a score are grouped in a bin, and posterior error
//! probabilities (PEP) are estimated on a sliding window of bins holding at
//! least `n_max` targets, `n_max` being the largest number of targets found
//! between two consecutive decoys.
//!
//! Käll, 2008 [https://pubmed.ncbi.nlm.nih.gov/18052118/]

use crate::Error;
use serde::Serialize;

#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct Bin {
    pub score: f64,
    pub n_target: usize,
    pub n_decoy: usize,
    /// Posterior error probability, monotonized
    pub pep: f64,
}

impl Bin {
    pub fn confidence(&self) -> f64 {
        100.0 * (1.0 - self.pep)
    }
}

/// Thresholds found for a requested false discovery rate
#[derive(Copy, Clone, Debug, PartialEq, Serialize)]
pub struct ThresholdResult {
    /// Most permissive score passing the FDR; matches with a score <= this
    /// limit are validated
    pub score_limit: f64,
    /// Confidence of the bin at `score_limit`
    pub confidence_limit: f64,
    /// Estimation failed: either no decoys, or no score passes the FDR
    pub no_validated: bool,
    pub n_target_only: usize,
    pub n_max: usize,
    /// Number of targets at or below `score_limit`
    pub n_validated: usize,
    /// Number of decoys at or below `score_limit`
    pub n_false_positives: usize,
    pub resolution: f64,
}

impl ThresholdResult {
    /// Confidence a validated match needs to be labelled confident
    pub fn confidence_threshold(&self) -> f64 {
        (self.confidence_limit + self.resolution).min(100.0)
    }

    /// Enough target hits were found before the first decoy to support the
    /// estimate
    pub fn enough_hits(&self, min_target_only: usize) -> bool {
        self.n_target_only > min_target_only && self.n_target_only > self.n_max
    }
}

#[derive(Clone, Debug, Default)]
pub struct TargetDecoyMap {
    observations: Vec<(f64, bool)>,
    bins: Vec<Bin>,
    n_max: usize,
    n_target_only: usize,
    window: usize,
}

impl TargetDecoyMap {
    pub fn add_point(&mut self, score: f64, decoy: bool) {
        self.observations.push((score, decoy));
    }

    /// Remove one observation previously added with the same score and label
    pub fn remove_point(&mut self, score: f64, decoy: bool) -> bool {
        match self
            .observations
            .iter()
            .position(|&(s, d)| s == score && d == decoy)
        {
            Some(ix) => {
                self.observations.swap_remove(ix);
                true
            }
            None => false,
        }
    }

    /// Append all observations of `other` to this map
    pub fn merge(&mut self, other: &TargetDecoyMap) {
        self.observations.extend_from_slice(&other.observations);
    }

    pub fn len(&self) -> usize {
        self.observations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.observations.is_empty()
    }

    pub fn n_target(&self) -> usize {
        self.observations.iter().filter(|(_, d)| !d).count()
    }

    pub fn n_decoy(&self) -> usize {
        self.observations.iter().filter(|(_, d)| *d).count()
    }

    pub fn n_max(&self) -> usize {
        self.n_max
    }

    pub fn n_target_only(&self) -> usize {
        self.n_target_only
    }

    pub fn bins(&self) -> &[Bin] {
        &self.bins
    }

    /// Confidence granularity achievable with the current window
    pub fn resolution(&self) -> f64 {
        100.0 / self.window.max(1) as f64
    }

    /// Too few decoys to support a stable estimate
    pub fn is_suspicious(&self, min_decoys: usize) -> bool {
        self.n_decoy() < min_decoys
    }

    fn build_bins(&mut self) {
        self.observations.sort_by(|a, b| a.0.total_cmp(&b.0));
        self.bins.clear();
        for &(score, decoy) in &self.observations {
            match self.bins.last_mut() {
                Some(bin) if bin.score == score => match decoy {
                    true => bin.n_decoy += 1,
                    false => bin.n_target += 1,
                },
                _ => self.bins.push(Bin {
                    score,
                    n_target: !decoy as usize,
                    n_decoy: decoy as usize,
                    pep: 1.0,
                }),
            }
        }
    }

    fn count_targets_between_decoys(&mut self) {
        let mut run = 0;
        let mut seen_decoy = false;
        self.n_max = 0;
        self.n_target_only = 0;
        for bin in &self.bins {
            if !seen_decoy {
                // targets tied with the first decoy still count as target only
                self.n_target_only += bin.n_target;
                seen_decoy = bin.n_decoy > 0;
                continue;
            }
            run += bin.n_target;
            if bin.n_decoy > 0 {
                self.n_max = self.n_max.max(run);
                run = 0;
            }
        }
    }

    /// Estimate the posterior error probability of every bin.
    ///
    /// A map without decoys cannot be estimated: every bin receives a PEP of
    /// 1 and [`Error::EstimationUnsupported`] is returned, labelled with
    /// `partition`.
    pub fn estimate_probabilities(&mut self, partition: &str) -> Result<(), Error> {
        self.build_bins();
        self.count_targets_between_decoys();
        self.window = self.n_max.max(1);

        if self.bins.iter().all(|bin| bin.n_decoy == 0) {
            self.bins.iter_mut().for_each(|bin| bin.pep = 1.0);
            return Err(Error::EstimationUnsupported {
                partition: partition.into(),
            });
        }

        let n = self.bins.len();
        let peps = (0..n)
            .map(|ix| {
                let (mut lo, mut hi) = (ix, ix);
                let mut targets = self.bins[ix].n_target;
                let mut decoys = self.bins[ix].n_decoy;
                // Grow the window symmetrically until it holds enough targets
                while targets < self.window && (lo > 0 || hi + 1 < n) {
                    if lo > 0 {
                        lo -= 1;
                        targets += self.bins[lo].n_target;
                        decoys += self.bins[lo].n_decoy;
                    }
                    if targets < self.window && hi + 1 < n {
                        hi += 1;
                        targets += self.bins[hi].n_target;
                        decoys += self.bins[hi].n_decoy;
                    }
                }
                match targets {
                    0 => 1.0,
                    _ => (decoys as f64 / targets as f64).min(1.0),
                }
            })
            .collect::<Vec<_>>();

        // Make PEP monotonically increasing as scores get worse
        let mut acc = 0.0f64;
        for (bin, pep) in self.bins.iter_mut().zip(peps) {
            acc = acc.max(pep);
            bin.pep = acc;
        }
        Ok(())
    }

    /// Posterior error probability at `score`: the bin holding the score, or
    /// the closest worse bin
    pub fn probability(&self, score: f64) -> f64 {
        if self.bins.is_empty() {
            return 1.0;
        }
        let ix = self.bins.partition_point(|bin| bin.score < score);
        match self.bins.get(ix) {
            Some(bin) => bin.pep,
            None => self.bins[self.bins.len() - 1].pep,
        }
    }

    pub fn confidence(&self, score: f64) -> f64 {
        100.0 * (1.0 - self.probability(score))
    }

    /// Find the most permissive score whose empirical FDR, in percent, does
    /// not exceed `fdr`. A bin landing exactly on `fdr` passes.
    ///
    /// # Invariants
    /// * [`TargetDecoyMap::estimate_probabilities`] must have been called
    pub fn fdr_results(&self, fdr: f64) -> ThresholdResult {
        let mut targets = 0;
        let mut decoys = 0;
        let mut passing = None;
        for (ix, bin) in self.bins.iter().enumerate() {
            targets += bin.n_target;
            decoys += bin.n_decoy;
            if targets == 0 {
                continue;
            }
            let estimate = 100.0 * (decoys + 1) as f64 / targets as f64;
            if estimate <= fdr {
                passing = Some((ix, targets, decoys));
            }
        }

        let base = ThresholdResult {
            score_limit: self.bins.last().map(|bin| bin.score).unwrap_or(1.0),
            confidence_limit: 0.0,
            no_validated: true,
            n_target_only: self.n_target_only,
            n_max: self.n_max,
            n_validated: 0,
            n_false_positives: 0,
            resolution: self.resolution(),
        };

        match passing {
            Some((ix, n_validated, n_false_positives)) if decoys > 0 => ThresholdResult {
                score_limit: self.bins[ix].score,
                confidence_limit: self.bins[ix].confidence(),
                no_validated: false,
                n_validated,
                n_false_positives,
                ..base
            },
            _ => base,
        }
    }
}
