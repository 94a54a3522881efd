//! Site confidence and inference of non-confident sites
//!
//! A modification site is confident when its score clears the configured
//! threshold, or when the modification can only sit at the observed sites.
//! Sites that are not confident can then be moved onto sites confidently
//! localized on the same or an overlapping peptide sequence.

use super::{occurrences, FlrMap, SiteConfidence};
use crate::enzyme::Enzyme;
use crate::model::{MatchLevel, SpectrumMatch};
use crate::modification::ModificationCatalog;
use crate::parameters::Parameters;
use crate::progress::ProgressSink;
use crate::store::MatchStore;
use crate::validation::Stage;
use crate::{Error, Result};
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet};

/// Confidently localized sites of a modification, per peptide sequence:
/// the number of occurrences on the peptide and the localized sites
type Donors = BTreeMap<String, Vec<(usize, Vec<usize>)>>;

pub struct SiteLocalizer<'a> {
    pub modifications: &'a dyn ModificationCatalog,
    pub enzyme: &'a Enzyme,
    pub parameters: &'a Parameters,
}

impl<'a> SiteLocalizer<'a> {
    pub fn new(
        modifications: &'a dyn ModificationCatalog,
        enzyme: &'a Enzyme,
        parameters: &'a Parameters,
    ) -> Self {
        Self {
            modifications,
            enzyme,
            parameters,
        }
    }

    /// Minimal probabilistic score of a confident site
    fn probabilistic_threshold(&self, flr: &FlrMap, name: &str, charge: u8) -> f64 {
        let user = self.parameters.probabilistic_threshold;
        if !self.parameters.estimate_flr {
            return user;
        }
        self.modifications
            .resolve(name)
            .and_then(|m| flr.threshold(m.mass_key(), charge, self.parameters.flr))
            .unwrap_or(user)
    }

    /// Grade every variable site of the best assumption of `psm` and flag the
    /// modification matches accordingly. Scores must have been computed.
    pub fn assign_site_confidence(&self, psm: &mut SpectrumMatch, flr: &FlrMap) -> Result<()> {
        let SpectrumMatch { key, best, ptm, .. } = psm;
        let best = match best {
            Some(best) => best,
            None => return Ok(()),
        };
        let charge = best.charge;
        let sequence = best.peptide.sequence.clone();

        let mut by_name: BTreeMap<String, Vec<usize>> = BTreeMap::new();
        for (ix, m) in best.peptide.modifications.iter_mut().enumerate() {
            if !m.variable {
                continue;
            }
            m.confident = false;
            m.inferred = false;
            let modification = self.modifications.resolve(&m.name).ok_or_else(|| {
                Error::invariant(key.as_str(), format!("Modification {} not found", m.name))
            })?;
            if modification.is_site_specific() {
                by_name.entry(m.name.clone()).or_default().push(ix);
            }
        }

        for (name, indices) in by_name {
            let scoring = ptm.scorings.get_mut(&name).ok_or_else(|| {
                Error::invariant(key.as_str(), format!("No PTM scoring found for {}", name))
            })?;
            scoring.confidence.clear();

            let possible = self
                .modifications
                .same_mass(&name)
                .into_iter()
                .flat_map(|m| m.possible_sites(&sequence))
                .collect::<BTreeSet<_>>();
            if possible.len() < indices.len() {
                return Err(Error::invariant(
                    key.as_str(),
                    format!(
                        "The occurrence of {} ({}) is higher than the number of possible sites on sequence {}",
                        name,
                        indices.len(),
                        sequence
                    ),
                ));
            }

            let probabilistic = self.parameters.probabilistic_score.is_some()
                && !scoring.probabilistic.is_empty();
            let threshold = self.probabilistic_threshold(flr, &name, charge);

            for ix in indices.iter().copied() {
                let m = &mut best.peptide.modifications[ix];
                let (confidence, confident) = if possible.len() == indices.len() {
                    (SiteConfidence::VeryConfident, true)
                } else if probabilistic {
                    match scoring.probabilistic.get(&m.site).copied().unwrap_or(0.0) {
                        score if score == 0.0 => (SiteConfidence::Random, false),
                        score if score >= threshold => (SiteConfidence::VeryConfident, true),
                        _ => (SiteConfidence::Doubtful, true),
                    }
                } else {
                    match scoring.delta.get(&m.site).copied().unwrap_or(0.0) {
                        delta if delta == 0.0 => (SiteConfidence::Random, false),
                        delta if delta >= self.parameters.delta_threshold => {
                            (SiteConfidence::Confident, true)
                        }
                        _ => (SiteConfidence::Doubtful, true),
                    }
                };
                scoring.confidence.insert(m.site, confidence);
                m.confident = confident;
            }
        }
        Ok(())
    }

    fn donors<S: MatchStore + ?Sized>(
        &self,
        store: &S,
        keys: &[String],
    ) -> BTreeMap<String, Donors> {
        let mut donors: BTreeMap<String, Donors> = BTreeMap::new();
        for best in keys
            .iter()
            .filter_map(|key| store.spectrum_match(key))
            .filter_map(|psm| psm.best.as_ref())
        {
            let peptide = &best.peptide;
            let names = peptide
                .variable_modifications()
                .filter(|m| m.confident)
                .map(|m| m.name.as_str())
                .collect::<BTreeSet<_>>();
            for name in names {
                let sites = peptide
                    .variable_modifications()
                    .filter(|m| m.name == name && m.confident)
                    .map(|m| m.site)
                    .sorted()
                    .collect();
                donors
                    .entry(name.to_string())
                    .or_default()
                    .entry(peptide.sequence.clone())
                    .or_default()
                    .push((peptide.n_modifications(name), sites));
            }
        }
        donors
    }

    /// Candidate sites for `n_mod` occurrences of a modification on
    /// `sequence`, excluding the sites already localized
    fn candidate_sites(
        &self,
        donors: &Donors,
        sequence: &str,
        n_mod: usize,
        localized: &[usize],
    ) -> Vec<usize> {
        let mut candidates = Vec::new();
        let push = |candidates: &mut Vec<usize>, site: usize| {
            if !localized.contains(&site) && !candidates.contains(&site) {
                candidates.push(site);
            }
        };

        if let Some(same) = donors.get(sequence) {
            for (_, sites) in same.iter().filter(|(n, _)| *n == n_mod) {
                sites.iter().for_each(|s| push(&mut candidates, *s));
            }
            if localized.len() + candidates.len() < n_mod {
                for (_, sites) in same {
                    sites.iter().for_each(|s| push(&mut candidates, *s));
                }
            }
        }

        if localized.len() + candidates.len() < n_mod {
            let missed = self.enzyme.missed_cleavages(sequence);
            for (other, entries) in donors.iter().filter(|(other, _)| *other != sequence) {
                if !self.enzyme.semi_specific && self.enzyme.missed_cleavages(other) != missed {
                    continue;
                }
                if sequence.contains(other.as_str()) {
                    for offset in occurrences(sequence, other) {
                        for (_, sites) in entries {
                            sites.iter().for_each(|s| push(&mut candidates, offset + s));
                        }
                    }
                } else if other.contains(sequence) {
                    for offset in occurrences(other, sequence) {
                        for (_, sites) in entries {
                            sites
                                .iter()
                                .filter(|s| **s > offset && **s - offset <= sequence.len())
                                .for_each(|s| push(&mut candidates, s - offset));
                        }
                    }
                }
            }
        }
        candidates
    }

    /// Move non-confident sites onto the closest sites confidently localized
    /// on PSMs of the same or overlapping sequences. Returns the number of
    /// modification matches relocated.
    pub fn infer_sites<S: MatchStore + ?Sized>(
        &self,
        store: &mut S,
        progress: &dyn ProgressSink,
    ) -> Result<usize> {
        if !self.parameters.align_non_confident {
            return Ok(0);
        }
        let keys = store.keys(MatchLevel::Spectrum);
        let donors = self.donors(store, &keys);
        let mut inferred = 0;

        for key in &keys {
            if progress.is_canceled() {
                return Err(Error::Canceled {
                    stage: Stage::PsmPtms,
                });
            }
            let mut psm = match store.spectrum_match(key) {
                Some(psm) if psm.best.is_some() => psm.clone(),
                _ => continue,
            };
            let mut changed = false;
            if let Some(best) = psm.best.as_mut() {
                let sequence = best.peptide.sequence.clone();
                let names = best
                    .peptide
                    .variable_modifications()
                    .filter(|m| !m.confident)
                    .map(|m| m.name.clone())
                    .collect::<BTreeSet<_>>();

                for name in names {
                    let name_donors = match donors.get(&name) {
                        Some(d) => d,
                        None => continue,
                    };
                    let modification = match self.modifications.resolve(&name) {
                        Some(m) if m.is_site_specific() => m,
                        _ => continue,
                    };
                    let n_mod = best.peptide.n_modifications(&name);
                    let localized = best
                        .peptide
                        .variable_modifications()
                        .filter(|m| m.name == name && m.confident)
                        .map(|m| m.site)
                        .collect::<Vec<_>>();
                    let candidates =
                        self.candidate_sites(name_donors, &sequence, n_mod, &localized);
                    if candidates.is_empty() {
                        continue;
                    }

                    let possible = modification.possible_sites(&sequence);
                    if let Some(site) = candidates.iter().find(|s| !possible.contains(*s)) {
                        return Err(Error::invariant(
                            key.as_str(),
                            format!(
                                "Wrong PTM site inference: {} at position {} on {}",
                                name, site, sequence
                            ),
                        ));
                    }

                    let pending = best
                        .peptide
                        .modifications
                        .iter()
                        .enumerate()
                        .filter(|(_, m)| m.variable && m.name == name && !m.confident)
                        .map(|(ix, m)| (ix, m.site))
                        .collect::<Vec<_>>();
                    for (ix, site) in align(&pending, &candidates) {
                        let m = &mut best.peptide.modifications[ix];
                        m.site = site;
                        m.inferred = true;
                        inferred += 1;
                        changed = true;
                    }
                }
            }
            if changed && !store.update_spectrum_match(psm) {
                return Err(Error::missing(MatchLevel::Spectrum, key.as_str()));
            }
            progress.increment();
        }
        log::debug!("- {} modification sites inferred", inferred);
        Ok(inferred)
    }
}

/// Greedy bipartite assignment of the `(index, site)` pairs to candidate
/// sites, closest pairs first, then lowest sites
fn align(pending: &[(usize, usize)], candidates: &[usize]) -> Vec<(usize, usize)> {
    let pairs = pending
        .iter()
        .flat_map(|(ix, site)| {
            candidates
                .iter()
                .map(move |candidate| (site.abs_diff(*candidate), *site, *candidate, *ix))
        })
        .sorted();
    let mut used_matches = BTreeSet::new();
    let mut used_sites = BTreeSet::new();
    let mut assignment = Vec::new();
    for (_, _, candidate, ix) in pairs {
        if used_matches.contains(&ix) || used_sites.contains(&candidate) {
            continue;
        }
        used_matches.insert(ix);
        used_sites.insert(candidate);
        assignment.push((ix, candidate));
    }
    assignment
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::PeptideAssumption;
    use crate::ptm::scoring::test::{assumption, catalog};
    use crate::ptm::scoring::PtmScorer;
    use crate::progress::LogProgress;
    use crate::store::MemoryStore;

    fn psm(key: &str, assumption: PeptideAssumption) -> SpectrumMatch {
        let mut psm = SpectrumMatch::new(key, "run1");
        psm.best = Some(assumption.clone());
        psm.assumptions = vec![assumption];
        psm
    }

    fn localize(psm: &mut SpectrumMatch, parameters: &Parameters) {
        let catalog = catalog();
        let enzyme = Enzyme::trypsin().unwrap();
        PtmScorer::new(&catalog, None, None).score(psm).unwrap();
        SiteLocalizer::new(&catalog, &enzyme, parameters)
            .assign_site_confidence(psm, &FlrMap::default())
            .unwrap();
    }

    #[test]
    fn every_possible_site_occupied() {
        let parameters = Parameters::default();
        let mut psm = psm("a", assumption("PEPTSIDEK", &[4, 5], 0.5));
        localize(&mut psm, &parameters);
        let scoring = psm.ptm.scoring("Phospho").unwrap();
        assert_eq!(scoring.site_confidence(4), SiteConfidence::VeryConfident);
        assert_eq!(scoring.site_confidence(5), SiteConfidence::VeryConfident);
        assert!(psm.best.unwrap().peptide.modifications.iter().all(|m| m.confident));
    }

    #[test]
    fn more_occurrences_than_sites() {
        let catalog = catalog();
        let enzyme = Enzyme::trypsin().unwrap();
        let parameters = Parameters::default();
        let mut psm = psm("a", assumption("PEPTIDEK", &[4, 4], 0.5));
        PtmScorer::new(&catalog, None, None).score(&mut psm).unwrap();
        let err = SiteLocalizer::new(&catalog, &enzyme, &parameters)
            .assign_site_confidence(&mut psm, &FlrMap::default())
            .unwrap_err();
        assert!(err
            .to_string()
            .starts_with("The occurrence of Phospho (2) is higher than the number of possible sites"));
    }

    #[test]
    fn delta_thresholds() {
        let parameters = Parameters {
            probabilistic_score: None,
            ..Default::default()
        };
        let mut a = psm("a", assumption("PEPTSIDEK", &[4], 0.0));
        a.assumptions.push(assumption("PEPTSIDEK", &[5], 0.96));
        localize(&mut a, &parameters);
        assert_eq!(
            a.ptm.scoring("Phospho").unwrap().site_confidence(4),
            SiteConfidence::Confident
        );

        let mut b = psm("b", assumption("PEPTSIDEK", &[4], 0.1));
        b.assumptions.push(assumption("PEPTSIDEK", &[5], 0.5));
        localize(&mut b, &parameters);
        assert_eq!(
            b.ptm.scoring("Phospho").unwrap().site_confidence(4),
            SiteConfidence::Doubtful
        );
        assert!(b.best.as_ref().unwrap().peptide.modifications[0].confident);

        let mut c = psm("c", assumption("PEPTSIDEK", &[4], 1.0));
        localize(&mut c, &parameters);
        assert_eq!(
            c.ptm.scoring("Phospho").unwrap().site_confidence(4),
            SiteConfidence::Random
        );
        assert!(!c.best.as_ref().unwrap().peptide.modifications[0].confident);
    }

    #[test]
    fn probabilistic_thresholds() {
        let catalog = catalog();
        let enzyme = Enzyme::trypsin().unwrap();
        let parameters = Parameters::default();
        let mut psm = psm("a", assumption("PEPTSTDEK", &[4, 6], 0.1));
        PtmScorer::new(&catalog, None, None).score(&mut psm).unwrap();
        let scoring = psm.ptm.scoring_mut("Phospho");
        scoring.probabilistic.insert(4, 99.0);
        scoring.probabilistic.insert(5, 1.0);
        SiteLocalizer::new(&catalog, &enzyme, &parameters)
            .assign_site_confidence(&mut psm, &FlrMap::default())
            .unwrap();
        let scoring = psm.ptm.scoring("Phospho").unwrap();
        assert_eq!(scoring.site_confidence(4), SiteConfidence::VeryConfident);
        assert_eq!(scoring.site_confidence(6), SiteConfidence::Random);
    }

    #[test]
    fn closest_pairs_first() {
        assert_eq!(align(&[(0, 5), (1, 9)], &[8, 4]), vec![(0, 4), (1, 8)]);
        assert_eq!(align(&[(0, 5)], &[4, 6]), vec![(0, 4)]);
        assert_eq!(align(&[(0, 5), (1, 6)], &[7]), vec![(1, 7)]);
    }

    fn store(psms: Vec<SpectrumMatch>) -> MemoryStore {
        let parameters = Parameters {
            probabilistic_score: None,
            ..Default::default()
        };
        psms.into_iter()
            .map(|mut psm| {
                localize(&mut psm, &parameters);
                psm
            })
            .collect()
    }

    #[test]
    fn inference_from_same_sequence() {
        // confident donor localizing at T4, recipient with a random site at S5
        let mut donor = psm("donor", assumption("PEPTSIDEK", &[4], 0.0));
        donor.assumptions.push(assumption("PEPTSIDEK", &[5], 1.0));
        let recipient = psm("recipient", assumption("PEPTSIDEK", &[5], 1.0));
        let mut store = store(vec![donor, recipient]);

        let catalog = catalog();
        let enzyme = Enzyme::trypsin().unwrap();
        let parameters = Parameters::default();
        let n = SiteLocalizer::new(&catalog, &enzyme, &parameters)
            .infer_sites(&mut store, &LogProgress::default())
            .unwrap();
        assert_eq!(n, 1);
        let m = &store
            .spectrum_match("recipient")
            .unwrap()
            .best
            .as_ref()
            .unwrap()
            .peptide
            .modifications[0];
        assert_eq!(m.site, 4);
        assert!(m.inferred);
        assert!(!m.confident);
    }

    #[test]
    fn inference_from_related_sequences() {
        // donor EPTSIDEK is PEPTSIDEK shifted by one residue
        let mut donor = psm("donor", assumption("EPTSIDEK", &[3], 0.0));
        donor.assumptions.push(assumption("EPTSIDEK", &[4], 1.0));
        let recipient = psm("recipient", assumption("PEPTSIDEK", &[5], 1.0));
        let mut store = store(vec![donor, recipient]);

        let catalog = catalog();
        let enzyme = Enzyme::trypsin().unwrap();
        let parameters = Parameters::default();
        SiteLocalizer::new(&catalog, &enzyme, &parameters)
            .infer_sites(&mut store, &LogProgress::default())
            .unwrap();
        let best = store.spectrum_match("recipient").unwrap().best.clone().unwrap();
        assert_eq!(best.peptide.localized_sites("Phospho"), vec![4]);
    }

    #[test]
    fn inference_can_be_disabled() {
        let mut donor = psm("donor", assumption("PEPTSIDEK", &[4], 0.0));
        donor.assumptions.push(assumption("PEPTSIDEK", &[5], 1.0));
        let recipient = psm("recipient", assumption("PEPTSIDEK", &[5], 1.0));
        let mut store = store(vec![donor, recipient]);

        let catalog = catalog();
        let enzyme = Enzyme::trypsin().unwrap();
        let parameters = Parameters {
            align_non_confident: false,
            ..Default::default()
        };
        let n = SiteLocalizer::new(&catalog, &enzyme, &parameters)
            .infer_sites(&mut store, &LogProgress::default())
            .unwrap();
        assert_eq!(n, 0);
    }
}
