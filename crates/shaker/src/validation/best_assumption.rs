use super::Stage;
use crate::model::{MatchLevel, PeptideAssumption, SpectrumMatch};
use crate::parameters::ImportFilter;
use crate::provider::{Context, SpectrumProvider};
use crate::store::MatchStore;
use crate::{Error, Result};
use fnv::FnvHashMap;
use std::cmp::Ordering;
use std::collections::BTreeSet;

/// A distinct peptide proposed for a spectrum, with the evidence of every
/// engine reporting it
#[derive(Clone, Debug)]
struct Candidate<'a> {
    assumption: &'a PeptideAssumption,
    probability: f64,
    protein_frequency: usize,
    n_engines: usize,
    coverage: f64,
    precursor_error: f64,
}

impl<'a> Candidate<'a> {
    fn rank(&self, other: &Self) -> Ordering {
        self.probability
            .total_cmp(&other.probability)
            .then(other.protein_frequency.cmp(&self.protein_frequency))
            .then(other.n_engines.cmp(&self.n_engines))
            .then(other.coverage.total_cmp(&self.coverage))
            .then(self.precursor_error.abs().total_cmp(&other.precursor_error.abs()))
    }
}

/// Number of spectra whose candidates map to each protein
fn protein_frequencies<S: MatchStore + ?Sized>(
    store: &S,
    keys: &[String],
) -> FnvHashMap<String, usize> {
    let mut frequencies = FnvHashMap::default();
    for psm in keys.iter().filter_map(|key| store.spectrum_match(key)) {
        let accessions = psm
            .assumptions
            .iter()
            .flat_map(|a| a.peptide.proteins.iter())
            .collect::<BTreeSet<_>>();
        for accession in accessions {
            *frequencies.entry(accession.clone()).or_insert(0) += 1;
        }
    }
    frequencies
}

fn candidates<'a>(
    psm: &'a SpectrumMatch,
    multiple_engines: bool,
    frequencies: &FnvHashMap<String, usize>,
    spectra: &dyn SpectrumProvider,
) -> Vec<Candidate<'a>> {
    let mut best_scores: FnvHashMap<&str, f64> = FnvHashMap::default();
    for a in &psm.assumptions {
        let score = best_scores.entry(a.engine.as_str()).or_insert(a.score);
        *score = score.min(a.score);
    }
    let (seeds, others): (Vec<_>, Vec<_>) = psm
        .assumptions
        .iter()
        .partition(|a| best_scores.get(a.engine.as_str()) == Some(&a.score));

    // only the top hits of an engine open a group, lower ranks only support it
    let mut groups: Vec<Vec<&'a PeptideAssumption>> = Vec::new();
    for assumption in seeds {
        match groups
            .iter_mut()
            .find(|group| group[0].peptide.same_identification(&assumption.peptide))
        {
            Some(group) => group.push(assumption),
            None => groups.push(vec![assumption]),
        }
    }
    for assumption in others {
        if let Some(group) = groups
            .iter_mut()
            .find(|group| group[0].peptide.same_identification(&assumption.peptide))
        {
            group.push(assumption);
        }
    }

    groups
        .into_iter()
        .filter_map(|group| {
            let mut engines: FnvHashMap<&str, f64> = FnvHashMap::default();
            for a in &group {
                let p = engines.entry(a.engine.as_str()).or_insert(a.probability);
                *p = p.min(a.probability);
            }
            let assumption = group
                .iter()
                .copied()
                .min_by(|a, b| a.probability.total_cmp(&b.probability))?;
            let probability = match multiple_engines {
                true => engines.values().product::<f64>(),
                false => group
                    .iter()
                    .map(|a| a.score)
                    .fold(f64::INFINITY, f64::min),
            };
            Some(Candidate {
                assumption,
                probability,
                protein_frequency: assumption
                    .peptide
                    .proteins
                    .iter()
                    .filter_map(|acc| frequencies.get(acc))
                    .copied()
                    .max()
                    .unwrap_or(0),
                n_engines: engines.len(),
                coverage: spectra.fragment_coverage(&psm.key, assumption),
                precursor_error: spectra.precursor_error(&psm.key, assumption),
            })
        })
        .collect()
}

/// Pick the best assumption of every spectrum and store its combined
/// probability as the PSM score. Returns the number of spectra with a best
/// assumption.
pub fn select_best_assumptions<S: MatchStore + ?Sized>(
    store: &mut S,
    filter: &ImportFilter,
    context: &Context,
) -> Result<usize> {
    let keys = store.keys(MatchLevel::Spectrum);
    store.load_matches(MatchLevel::Spectrum, &keys)?;
    context.progress.set_max(keys.len());

    let frequencies = protein_frequencies(store, &keys);
    let engines = keys
        .iter()
        .filter_map(|key| store.spectrum_match(key))
        .flat_map(|psm| psm.assumptions.iter().map(|a| a.engine.as_str()))
        .collect::<BTreeSet<_>>();
    let multiple_engines = engines.len() > 1;

    let mut selected = Vec::with_capacity(keys.len());
    for key in &keys {
        if context.progress.is_canceled() {
            return Err(Error::Canceled {
                stage: Stage::BestAssumption,
            });
        }
        let psm = store
            .spectrum_match(key)
            .ok_or_else(|| Error::missing(MatchLevel::Spectrum, key.as_str()))?;
        if psm.assumptions.is_empty() {
            selected.push(None);
            continue;
        }
        let mut candidates = candidates(psm, multiple_engines, &frequencies, context.spectra);
        candidates.sort_by(Candidate::rank);
        let best = candidates
            .into_iter()
            .find(|c| filter.accepts(c.assumption.charge, c.precursor_error))
            .ok_or_else(|| {
                Error::invariant(
                    key.as_str(),
                    format!("No best assumption found for spectrum {}", key),
                )
            })?;
        selected.push(Some((best.assumption.clone(), best.probability)));
        context.progress.increment();
    }

    let mut found = 0;
    for (key, best) in keys.iter().zip(selected) {
        if let Some(psm) = store.spectrum_match_mut(key) {
            psm.validation.reset_scores();
            psm.ptm.clear();
            match best {
                Some((assumption, probability)) => {
                    psm.validation.score = probability;
                    psm.best = Some(assumption);
                    found += 1;
                }
                None => psm.best = None,
            }
        }
    }
    Ok(found)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::Peptide;
    use crate::store::MemoryStore;
    use crate::validation::test::{context, Fixture};

    fn assumption(sequence: &str, engine: &str, probability: f64) -> PeptideAssumption {
        let mut peptide = Peptide::new(sequence);
        peptide.proteins.push("P1".into());
        PeptideAssumption {
            peptide,
            charge: 2,
            engine: engine.into(),
            rank: 1,
            score: probability * 10.0,
            probability,
            fragment_coverage: Some(0.5),
            precursor_error: Some(1.0),
        }
    }

    #[test]
    fn agreeing_engines_win() {
        let mut psm = SpectrumMatch::new("s1", "run1");
        psm.assumptions = vec![
            assumption("QEPTIDEK", "msgf", 0.001),
            assumption("PEPTIDEK", "comet", 0.01),
            assumption("PEPTIDEK", "msgf", 0.02),
        ];
        let mut store = [psm].into_iter().collect::<MemoryStore>();
        let fixture = Fixture::default();
        let n = select_best_assumptions(&mut store, &ImportFilter::default(), &context(&fixture))
            .unwrap();
        assert_eq!(n, 1);
        let psm = store.spectrum_match("s1").unwrap();
        assert_eq!(psm.best.as_ref().unwrap().peptide.sequence, "PEPTIDEK");
        assert!((psm.validation.score - 0.0002).abs() < 1e-12);
    }

    #[test]
    fn single_engine_uses_raw_scores() {
        let mut psm = SpectrumMatch::new("s1", "run1");
        let mut worse = assumption("QEPTIDEK", "comet", 0.01);
        worse.score = 5.0;
        psm.assumptions = vec![worse, assumption("PEPTIDEK", "comet", 0.01)];
        let mut store = [psm].into_iter().collect::<MemoryStore>();
        let fixture = Fixture::default();
        select_best_assumptions(&mut store, &ImportFilter::default(), &context(&fixture)).unwrap();
        let psm = store.spectrum_match("s1").unwrap();
        assert_eq!(psm.best.as_ref().unwrap().peptide.sequence, "PEPTIDEK");
        assert!((psm.validation.score - 0.1).abs() < 1e-12);
    }

    #[test]
    fn lower_ranks_cannot_open_candidates() {
        let mut psm = SpectrumMatch::new("s1", "run1");
        let mut comet = assumption("PEPTIDEK", "comet", 0.02);
        comet.rank = 2;
        let mut msgf = assumption("PEPTIDEK", "msgf", 0.02);
        msgf.rank = 2;
        psm.assumptions = vec![
            assumption("LEPTIDEK", "comet", 0.01),
            comet,
            assumption("QEPTIDEK", "msgf", 0.01),
            msgf,
        ];
        let mut store = [psm].into_iter().collect::<MemoryStore>();
        let fixture = Fixture::default();
        select_best_assumptions(&mut store, &ImportFilter::default(), &context(&fixture)).unwrap();
        let psm = store.spectrum_match("s1").unwrap();
        assert_eq!(psm.best.as_ref().unwrap().peptide.sequence, "LEPTIDEK");
        assert!((psm.validation.score - 0.01).abs() < 1e-12);
    }

    #[test]
    fn import_filter_rejects_candidates() {
        let mut psm = SpectrumMatch::new("s1", "run1");
        let mut off = assumption("PEPTIDEK", "comet", 0.001);
        off.precursor_error = Some(50.0);
        psm.assumptions = vec![off, assumption("QEPTIDEK", "msgf", 0.01)];
        let mut store = [psm].into_iter().collect::<MemoryStore>();
        let fixture = Fixture::default();
        select_best_assumptions(&mut store, &ImportFilter::default(), &context(&fixture)).unwrap();
        let best = store.spectrum_match("s1").unwrap().best.clone().unwrap();
        assert_eq!(best.peptide.sequence, "QEPTIDEK");

        let mut psm = SpectrumMatch::new("s2", "run1");
        let mut off = assumption("PEPTIDEK", "comet", 0.001);
        off.charge = 12;
        psm.assumptions = vec![off];
        let mut store = [psm].into_iter().collect::<MemoryStore>();
        let err = select_best_assumptions(&mut store, &ImportFilter::default(), &context(&fixture))
            .unwrap_err();
        assert_eq!(
            err.to_string(),
            "No best assumption found for spectrum s2 (s2)"
        );
    }
}
