use super::Stage;
use crate::model::MatchLevel;
use crate::provider::Context;
use crate::specific_map::{Partition, SpecificMap};
use crate::store::MatchStore;
use crate::{Error, Result};
use std::collections::BTreeMap;

/// Turn raw search engine scores into probabilities.
///
/// The first hits of every engine feed one partition of `input_map`. Once
/// estimated, every assumption receives the PEP of its raw score, made
/// monotone along increasing raw scores within a spectrum and engine.
/// Without decoy sequences the raw score stands in for the probability.
pub fn search_engine_probabilities<S: MatchStore + ?Sized>(
    store: &mut S,
    input_map: &mut SpecificMap,
    context: &Context,
) -> Result<()> {
    let keys = store.keys(MatchLevel::Spectrum);
    store.load_matches(MatchLevel::Spectrum, &keys)?;
    context.progress.set_max(2 * keys.len());
    input_map.clean();
    let target_decoy = context.sequences.is_target_decoy();

    if target_decoy {
        for key in &keys {
            if context.progress.is_canceled() {
                return Err(Error::Canceled {
                    stage: Stage::InputMap,
                });
            }
            let psm = store
                .spectrum_match(key)
                .ok_or_else(|| Error::missing(MatchLevel::Spectrum, key.as_str()))?;
            for assumption in psm.assumptions.iter().filter(|a| a.rank == 1) {
                input_map.add_point(
                    Partition::Engine(assumption.engine.clone()),
                    assumption.score,
                    assumption.peptide.is_decoy(context.sequences),
                );
            }
            context.progress.increment();
        }
        // partitions without decoys keep a probability of 1
        input_map.estimate_probabilities();
    }

    for key in &keys {
        if context.progress.is_canceled() {
            return Err(Error::Canceled {
                stage: Stage::InputMap,
            });
        }
        let psm = store
            .spectrum_match_mut(key)
            .ok_or_else(|| Error::missing(MatchLevel::Spectrum, key.as_str()))?;

        let mut by_engine: BTreeMap<&str, Vec<usize>> = BTreeMap::new();
        for (ix, assumption) in psm.assumptions.iter().enumerate() {
            by_engine
                .entry(assumption.engine.as_str())
                .or_default()
                .push(ix);
        }
        let mut probabilities = vec![1.0; psm.assumptions.len()];
        for (engine, mut indices) in by_engine {
            indices.sort_by(|a, b| {
                psm.assumptions[*a]
                    .score
                    .total_cmp(&psm.assumptions[*b].score)
            });
            let partition = Partition::Engine(engine.to_string());
            let mut floor = 0.0f64;
            for ix in indices {
                let score = psm.assumptions[ix].score;
                let p = match target_decoy {
                    true => input_map.probability(&partition, score),
                    false => score.clamp(0.0, 1.0),
                };
                floor = floor.max(p);
                probabilities[ix] = floor;
            }
        }
        for (assumption, p) in psm.assumptions.iter_mut().zip(probabilities) {
            assumption.probability = p;
        }
        context.progress.increment();
    }
    Ok(())
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{Peptide, PeptideAssumption, SpectrumMatch};
    use crate::store::MemoryStore;
    use crate::validation::test::{context, Fixture};

    fn assumption(engine: &str, accession: &str, rank: usize, score: f64) -> PeptideAssumption {
        let mut peptide = Peptide::new("PEPTIDEK");
        peptide.proteins.push(accession.into());
        PeptideAssumption {
            peptide,
            charge: 2,
            engine: engine.into(),
            rank,
            score,
            probability: 1.0,
            fragment_coverage: None,
            precursor_error: None,
        }
    }

    #[test]
    fn probabilities_are_monotone_per_engine() {
        let mut psms = Vec::new();
        for i in 0..50 {
            let mut psm = SpectrumMatch::new(format!("t{}", i), "run1");
            psm.assumptions.push(assumption("comet", "P1", 1, i as f64 * 1e-3));
            psms.push(psm);
        }
        for i in 0..50 {
            let mut psm = SpectrumMatch::new(format!("d{}", i), "run1");
            psm.assumptions.push(assumption("comet", "rev_P1", 1, 0.5 + i as f64 * 1e-3));
            psms.push(psm);
        }
        let mut ranked = SpectrumMatch::new("ranked", "run1");
        ranked.assumptions.push(assumption("comet", "P1", 1, 0.9));
        // a lower ranked hit cannot beat the first hit of its engine
        ranked.assumptions.push(assumption("comet", "P1", 2, 0.95));
        ranked.assumptions.push(assumption("comet", "P1", 3, 0.0));
        psms.push(ranked);

        let mut store = psms.into_iter().collect::<MemoryStore>();
        let fixture = Fixture::default();
        let mut map = SpecificMap::new(1);
        search_engine_probabilities(&mut store, &mut map, &context(&fixture)).unwrap();

        assert_eq!(store.spectrum_match("t0").unwrap().assumptions[0].probability, 0.0);
        let ranked = &store.spectrum_match("ranked").unwrap().assumptions;
        assert!(ranked[0].probability > 0.5);
        assert!(ranked[1].probability >= ranked[0].probability);
        assert_eq!(ranked[2].probability, 0.0);
    }
}
