use crate::model::{PeptideAssumption, SpectrumMatch};
use crate::modification::{MassKey, Modification, ModificationCatalog};
use crate::parameters::ProbabilisticScore;
use crate::provider::SiteProbabilityProvider;
use crate::{Error, Result};
use itertools::Itertools;
use std::collections::{BTreeMap, BTreeSet};

/// One observation of the false localization rate map
#[derive(Copy, Clone, Debug, PartialEq)]
pub struct FlrPoint {
    pub mass: MassKey,
    pub charge: u8,
    /// Negated probabilistic score, lower is better
    pub score: f64,
    /// The probabilistic and delta scores disagree on this site
    pub decoy: bool,
}

/// Variable, site-specific modifications of an assumption grouped by mass,
/// with the number of matches at each mass
struct MassGroup<'a> {
    candidates: Vec<&'a Modification>,
    names: BTreeSet<String>,
    occurrences: usize,
}

pub struct PtmScorer<'a> {
    pub modifications: &'a dyn ModificationCatalog,
    pub sites: Option<&'a dyn SiteProbabilityProvider>,
    pub method: Option<ProbabilisticScore>,
}

impl<'a> PtmScorer<'a> {
    pub fn new(
        modifications: &'a dyn ModificationCatalog,
        sites: Option<&'a dyn SiteProbabilityProvider>,
        method: Option<ProbabilisticScore>,
    ) -> Self {
        Self {
            modifications,
            sites,
            method,
        }
    }

    fn resolve(&self, key: &str, name: &str) -> Result<&'a Modification> {
        self.modifications
            .resolve(name)
            .ok_or_else(|| Error::invariant(key, format!("Modification {} not found", name)))
    }

    fn mass_groups(
        &self,
        key: &str,
        best: &PeptideAssumption,
    ) -> Result<BTreeMap<MassKey, MassGroup<'a>>> {
        let mut groups: BTreeMap<MassKey, MassGroup<'a>> = BTreeMap::new();
        for m in best.peptide.variable_modifications() {
            let modification = self.resolve(key, &m.name)?;
            if !modification.is_site_specific() {
                continue;
            }
            let group = groups
                .entry(modification.mass_key())
                .or_insert_with(|| MassGroup {
                    candidates: self.modifications.same_mass(&m.name),
                    names: BTreeSet::new(),
                    occurrences: 0,
                });
            group.names.insert(m.name.clone());
            group.occurrences += 1;
        }
        Ok(groups)
    }

    /// Replace the delta and probabilistic scores of `psm`. Site
    /// confidences are left empty.
    pub fn score(&self, psm: &mut SpectrumMatch) -> Result<()> {
        psm.ptm.clear();
        let best = match &psm.best {
            Some(best) => best,
            None => return Ok(()),
        };
        let groups = self.mass_groups(&psm.key, best)?;
        if groups.is_empty() {
            return Ok(());
        }

        for m in best.peptide.variable_modifications() {
            let mass = self.resolve(&psm.key, &m.name)?;
            if !mass.is_site_specific() {
                continue;
            }
            let delta = self.delta_score(psm, best, mass.mass_key(), m.site);
            psm.ptm.scoring_mut(&m.name).delta.insert(m.site, delta);
        }

        let (method, provider) = match (self.method, self.sites) {
            (Some(method), Some(provider)) => (method, provider),
            _ => return Ok(()),
        };
        let sequence = best.peptide.sequence.as_str();
        for (mass, group) in &groups {
            if method == ProbabilisticScore::AScore && group.occurrences > 1 {
                continue;
            }
            let scores = match provider.site_scores(
                method,
                &psm.key,
                best,
                &group.candidates,
                group.occurrences,
            ) {
                Some(scores) => scores,
                None => continue,
            };
            for (site, score) in scores {
                let target = group
                    .candidates
                    .iter()
                    .find(|candidate| candidate.possible_sites(sequence).contains(&site))
                    .ok_or_else(|| {
                        Error::invariant(
                            &psm.key,
                            format!(
                                "Could not map the PTM of mass {} at site {} in peptide {}",
                                mass, site, sequence
                            ),
                        )
                    })?;
                psm.ptm
                    .scoring_mut(&target.name)
                    .probabilistic
                    .insert(site, score);
            }
        }
        Ok(())
    }

    /// Difference, in percent, between the search engine probability of the
    /// best candidate placing a modification of `mass` elsewhere and the best
    /// candidate placing it at `site`
    fn delta_score(
        &self,
        psm: &SpectrumMatch,
        best: &PeptideAssumption,
        mass: MassKey,
        site: usize,
    ) -> f64 {
        let mut reference = 1.0f64;
        let mut secondary = 1.0f64;
        for assumption in psm
            .assumptions
            .iter()
            .filter(|a| a.peptide.sequence == best.peptide.sequence)
        {
            let sites = assumption
                .peptide
                .variable_modifications()
                .filter(|m| {
                    self.modifications
                        .resolve(&m.name)
                        .map(|r| r.mass_key() == mass)
                        .unwrap_or(false)
                })
                .map(|m| m.site)
                .collect::<Vec<_>>();
            if sites.contains(&site) {
                reference = reference.min(assumption.probability);
            } else if !sites.is_empty() {
                secondary = secondary.min(assumption.probability);
            }
        }
        100.0 * (secondary.max(reference) - reference)
    }

    /// Points for the false localization rate map: for every modification
    /// mass, the best probabilistic sites are decoys unless the delta score
    /// picked them too
    pub fn flr_points(&self, psm: &SpectrumMatch) -> Result<Vec<FlrPoint>> {
        let (best, charge) = match (&psm.best, psm.charge()) {
            (Some(best), Some(charge)) => (best, charge),
            _ => return Ok(Vec::new()),
        };
        let mut points = Vec::new();
        for (mass, group) in self.mass_groups(&psm.key, best)? {
            let names = group
                .candidates
                .iter()
                .map(|c| c.name.as_str())
                .chain(group.names.iter().map(String::as_str))
                .collect::<BTreeSet<_>>();

            let mut d_scores = Vec::new();
            let mut p_scores: BTreeMap<usize, f64> = BTreeMap::new();
            for scoring in names.iter().filter_map(|name| psm.ptm.scoring(name)) {
                d_scores.extend(scoring.delta.iter().map(|(site, score)| (*site, *score)));
                for (site, score) in &scoring.probabilistic {
                    if p_scores.insert(*site, *score).is_some() {
                        return Err(Error::invariant(
                            &psm.key,
                            format!(
                                "Duplicate PTM score found at site {} for mass {}",
                                site, mass
                            ),
                        ));
                    }
                }
            }
            if p_scores.is_empty() {
                continue;
            }

            let d_sites = top_sites(d_scores, group.occurrences);
            if d_sites.len() < group.occurrences {
                return Err(Error::invariant(
                    &psm.key,
                    format!(
                        "found less D-scores than PTMs of mass {} ({} for {})",
                        mass,
                        d_sites.len(),
                        group.occurrences
                    ),
                ));
            }
            let p_sites = top_sites(p_scores.clone(), group.occurrences);
            points.extend(p_sites.into_iter().map(|site| FlrPoint {
                mass,
                charge,
                score: -p_scores.get(&site).copied().unwrap_or(0.0),
                decoy: !d_sites.contains(&site),
            }));
        }
        Ok(points)
    }
}

/// The `n` best scoring sites, lower sites first among ties
fn top_sites<I: IntoIterator<Item = (usize, f64)>>(scores: I, n: usize) -> Vec<usize> {
    scores
        .into_iter()
        .sorted_by(|a, b| b.1.total_cmp(&a.1).then(a.0.cmp(&b.0)))
        .map(|(site, _)| site)
        .dedup()
        .take(n)
        .collect()
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::model::{ModificationMatch, Peptide};
    use crate::modification::{ModificationSet, ModificationSpecificity};

    pub fn catalog() -> ModificationSet {
        let mut set = ModificationSet::default();
        set.add_variable(Modification {
            name: "Phospho".into(),
            mass: 79.966331,
            specificity: vec![
                ModificationSpecificity::Residue(b'S'),
                ModificationSpecificity::Residue(b'T'),
            ],
        });
        set.add_variable(Modification {
            name: "Phospho Y".into(),
            mass: 79.966331,
            specificity: vec![ModificationSpecificity::Residue(b'Y')],
        });
        set.add_variable(Modification {
            name: "Acetyl".into(),
            mass: 42.010565,
            specificity: vec![ModificationSpecificity::PeptideN(None)],
        });
        set
    }

    pub fn assumption(sequence: &str, sites: &[usize], probability: f64) -> PeptideAssumption {
        let mut peptide = Peptide::new(sequence);
        peptide.modifications = sites
            .iter()
            .map(|site| ModificationMatch::new("Phospho", *site))
            .collect();
        PeptideAssumption {
            peptide,
            charge: 2,
            engine: "comet".into(),
            rank: 1,
            score: probability,
            probability,
            fragment_coverage: None,
            precursor_error: None,
        }
    }

    struct FixedSites(BTreeMap<usize, f64>);

    impl SiteProbabilityProvider for FixedSites {
        fn site_scores(
            &self,
            _: ProbabilisticScore,
            _: &str,
            _: &PeptideAssumption,
            candidates: &[&Modification],
            _: usize,
        ) -> Option<BTreeMap<usize, f64>> {
            assert_eq!(candidates.len(), 2);
            Some(self.0.clone())
        }
    }

    fn psm(assumptions: Vec<PeptideAssumption>) -> SpectrumMatch {
        let mut psm = SpectrumMatch::new("run1_1", "run1");
        psm.best = assumptions.first().cloned();
        psm.assumptions = assumptions;
        psm
    }

    #[test]
    fn delta_scores() {
        let catalog = catalog();
        let scorer = PtmScorer::new(&catalog, None, None);
        let mut psm = psm(vec![
            assumption("PEPTSIDEK", &[4], 0.001),
            assumption("PEPTSIDEK", &[5], 0.011),
            assumption("PEPTSIDEK", &[5], 0.5),
            assumption("PEPTIDEK", &[4], 0.0001),
        ]);
        scorer.score(&mut psm).unwrap();
        let scoring = psm.ptm.scoring("Phospho").unwrap();
        assert!((scoring.delta[&4] - 1.0).abs() < 1e-9);
        assert!(scoring.probabilistic.is_empty());

        // without a competing localization, the reference is compared to 1
        let mut psm = psm_single();
        scorer.score(&mut psm).unwrap();
        assert!((psm.ptm.scoring("Phospho").unwrap().delta[&4] - 0.0).abs() < 1e-9);
    }

    fn psm_single() -> SpectrumMatch {
        psm(vec![assumption("PEPTSIDEK", &[4], 1.0)])
    }

    #[test]
    fn probabilistic_scores_are_remapped() {
        let catalog = catalog();
        let provider = FixedSites([(4, 80.0), (5, 20.0)].into_iter().collect());
        let scorer = PtmScorer::new(&catalog, Some(&provider), Some(ProbabilisticScore::PhosphoRs));
        let mut psm = psm(vec![assumption("PEPTSIDYK", &[4], 0.01)]);
        scorer.score(&mut psm).unwrap();
        assert_eq!(psm.ptm.scoring("Phospho").unwrap().probabilistic.len(), 2);
        assert_eq!(psm.ptm.scoring("Phospho").unwrap().probabilistic[&4], 80.0);
        assert!(psm.ptm.scoring("Phospho Y").is_none());

        let provider = FixedSites([(8, 100.0)].into_iter().collect());
        let scorer = PtmScorer::new(&catalog, Some(&provider), Some(ProbabilisticScore::PhosphoRs));
        scorer.score(&mut psm).unwrap();
        assert_eq!(psm.ptm.scoring("Phospho Y").unwrap().probabilistic[&8], 100.0);
    }

    #[test]
    fn unmappable_sites_are_fatal() {
        let catalog = catalog();
        let provider = FixedSites([(1, 100.0)].into_iter().collect());
        let scorer = PtmScorer::new(&catalog, Some(&provider), Some(ProbabilisticScore::PhosphoRs));
        let mut psm = psm(vec![assumption("PEPTSIDEK", &[4], 0.01)]);
        match scorer.score(&mut psm) {
            Err(Error::InvariantViolation { key, reason }) => {
                assert_eq!(key, "run1_1");
                assert!(reason.starts_with("Could not map the PTM of mass 79.9663 at site 1"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn ascore_skips_multiple_occurrences() {
        let catalog = catalog();
        let provider = FixedSites([(4, 80.0)].into_iter().collect());
        let scorer = PtmScorer::new(&catalog, Some(&provider), Some(ProbabilisticScore::AScore));
        let mut psm = psm(vec![assumption("PEPTSIDEK", &[4, 5], 0.01)]);
        scorer.score(&mut psm).unwrap();
        assert!(psm.ptm.scoring("Phospho").unwrap().probabilistic.is_empty());
    }

    #[test]
    fn flr_decoys_disagree_with_delta() {
        let catalog = catalog();
        let provider = FixedSites([(4, 30.0), (5, 70.0)].into_iter().collect());
        let scorer = PtmScorer::new(&catalog, Some(&provider), Some(ProbabilisticScore::PhosphoRs));
        let mut psm = psm(vec![
            assumption("PEPTSIDEK", &[4], 0.001),
            assumption("PEPTSIDEK", &[5], 0.1),
        ]);
        scorer.score(&mut psm).unwrap();
        let points = scorer.flr_points(&psm).unwrap();
        assert_eq!(points.len(), 1);
        assert_eq!(points[0].score, -70.0);
        assert_eq!(points[0].charge, 2);
        assert!(points[0].decoy);

        let provider = FixedSites([(4, 70.0), (5, 30.0)].into_iter().collect());
        let scorer = PtmScorer::new(&catalog, Some(&provider), Some(ProbabilisticScore::PhosphoRs));
        scorer.score(&mut psm).unwrap();
        let points = scorer.flr_points(&psm).unwrap();
        assert!(!points[0].decoy);
    }

    #[test]
    fn ties_go_to_the_lower_site() {
        assert_eq!(top_sites(vec![(9, 1.0), (3, 1.0), (5, 2.0)], 2), vec![5, 3]);
    }
}
