//! Peptide and protein matches, and the maps scoring every level
//!
//! PSM scores come from [`super::best_assumption`]. A peptide is scored by
//! the product of the PEPs of its PSMs, a protein group by the product of
//! the PEPs of its peptides. Per-fraction scores follow the same rule using
//! the PEPs of the fraction.

use super::Stage;
use crate::model::{MatchLevel, PeptideMatch, ProteinMatch, ValidationParameter};
use crate::progress::ProgressSink;
use crate::provider::Context;
use crate::specific_map::{Partition, SpecificMap};
use crate::store::MatchStore;
use crate::{Error, Result};
use std::collections::BTreeMap;

fn check(progress: &dyn ProgressSink, stage: Stage) -> Result<()> {
    match progress.is_canceled() {
        true => Err(Error::Canceled { stage }),
        false => {
            progress.increment();
            Ok(())
        }
    }
}

/// Keep the operator's decision on a rebuilt match
fn restore_manual(validation: &mut ValidationParameter, manual: Option<&ValidationParameter>) {
    if let Some(manual) = manual {
        validation.manual_validation = true;
        validation.level = manual.level;
        validation.doubtful_reason = manual.doubtful_reason.clone();
    }
}

pub fn fill_psm_map<S: MatchStore + ?Sized>(
    store: &mut S,
    map: &mut SpecificMap,
    context: &Context,
) -> Result<()> {
    let keys = store.keys(MatchLevel::Spectrum);
    store.load_matches(MatchLevel::Spectrum, &keys)?;
    context.progress.set_max(keys.len());
    map.clean();
    for psm in keys.iter().filter_map(|key| store.spectrum_match(key)) {
        check(context.progress, Stage::PsmMap)?;
        if let Some(best) = &psm.best {
            map.add_point(
                Partition::Charge(best.charge),
                psm.validation.score,
                best.peptide.is_decoy(context.sequences),
            );
        }
    }
    map.cure();
    map.estimate_probabilities();
    Ok(())
}

pub fn attach_psm_probabilities<S: MatchStore + ?Sized>(
    store: &mut S,
    map: &SpecificMap,
    progress: &dyn ProgressSink,
) -> Result<()> {
    let keys = store.keys(MatchLevel::Spectrum);
    progress.set_max(keys.len());
    for key in &keys {
        check(progress, Stage::Matches)?;
        let psm = match store.spectrum_match_mut(key) {
            Some(psm) => psm,
            None => continue,
        };
        let partition = match psm.charge() {
            Some(charge) => Partition::Charge(charge),
            None => continue,
        };
        let validation = &mut psm.validation;
        validation.probability = map.probability(&partition, validation.score);
        validation.partition = Some(map.corrected_partition(&partition));
        validation.fraction_scores =
            BTreeMap::from([(psm.fraction.clone(), validation.score)]);
        validation.fraction_probabilities =
            BTreeMap::from([(psm.fraction.clone(), validation.probability)]);
    }
    Ok(())
}

/// Rebuild the peptide and protein matches from the PSMs. Manually
/// validated matches keep their validation level.
pub fn build_matches<S: MatchStore + ?Sized>(store: &mut S, context: &Context) -> Result<()> {
    let peptides = manual_validations(store, MatchLevel::Peptide);
    let proteins = manual_validations(store, MatchLevel::Protein);
    store.clear_inferred_matches();
    build_peptides(store, context, &peptides)?;
    build_proteins(store, context, &proteins)
}

/// Group the PSMs by peptide identification
fn build_peptides<S: MatchStore + ?Sized>(
    store: &mut S,
    context: &Context,
    manual: &BTreeMap<String, ValidationParameter>,
) -> Result<()> {
    let keys = store.keys(MatchLevel::Spectrum);
    context.progress.set_max(keys.len());
    let mut peptides: BTreeMap<String, PeptideMatch> = BTreeMap::new();
    for psm in keys.iter().filter_map(|key| store.spectrum_match(key)) {
        check(context.progress, Stage::Matches)?;
        let best = match &psm.best {
            Some(best) => best,
            None => continue,
        };
        if best.peptide.proteins.is_empty() {
            return Err(Error::invariant(
                psm.key.as_str(),
                format!(
                    "No protein was found for peptide of sequence {}",
                    best.peptide.sequence
                ),
            ));
        }
        let peptide = peptides.entry(best.peptide.key()).or_insert_with(|| {
            PeptideMatch::new(
                best.peptide.clone(),
                best.peptide.is_decoy(context.sequences),
            )
        });
        peptide.spectra.push(psm.key.clone());
        let validation = &mut peptide.validation;
        validation.score *= psm.validation.probability;
        *validation
            .fraction_scores
            .entry(psm.fraction.clone())
            .or_insert(1.0) *= psm.validation.probability;
    }

    for (key, mut peptide) in peptides {
        restore_manual(&mut peptide.validation, manual.get(&key));
        store.insert_peptide_match(peptide);
    }
    Ok(())
}

fn manual_validations<S: MatchStore + ?Sized>(
    store: &S,
    level: MatchLevel,
) -> BTreeMap<String, ValidationParameter> {
    store
        .keys(level)
        .into_iter()
        .filter_map(|key| {
            let validation = store.validation(level, &key)?;
            match validation.manual_validation {
                true => Some((key, validation.clone())),
                false => None,
            }
        })
        .collect()
}

/// Group the peptides by set of parent proteins
fn build_proteins<S: MatchStore + ?Sized>(
    store: &mut S,
    context: &Context,
    manual: &BTreeMap<String, ValidationParameter>,
) -> Result<()> {
    let keys = store.keys(MatchLevel::Peptide);
    context.progress.set_max(keys.len());
    let mut proteins: BTreeMap<String, ProteinMatch> = BTreeMap::new();
    for peptide in keys.iter().filter_map(|key| store.peptide_match(key)) {
        check(context.progress, Stage::Matches)?;
        let accessions = &peptide.peptide.proteins;
        let protein = proteins
            .entry(ProteinMatch::group_key(accessions))
            .or_insert_with(|| {
                let decoy = accessions
                    .iter()
                    .any(|acc| context.sequences.is_decoy(acc));
                ProteinMatch::new(accessions, decoy)
            });
        protein.peptides.push(peptide.key.clone());
    }

    for (key, mut protein) in proteins {
        restore_manual(&mut protein.validation, manual.get(&key));
        store.insert_protein_match(protein);
    }
    Ok(())
}

pub fn fill_peptide_map<S: MatchStore + ?Sized>(
    store: &mut S,
    map: &mut SpecificMap,
    progress: &dyn ProgressSink,
) -> Result<()> {
    let keys = store.keys(MatchLevel::Peptide);
    store.load_matches(MatchLevel::Peptide, &keys)?;
    progress.set_max(keys.len());
    map.clean();
    for peptide in keys.iter().filter_map(|key| store.peptide_match(key)) {
        check(progress, Stage::PeptideMap)?;
        map.add_point(
            Partition::Modifications(peptide.peptide.modification_profile()),
            peptide.validation.score,
            peptide.decoy,
        );
    }
    map.cure();
    map.estimate_probabilities();
    Ok(())
}

pub fn attach_peptide_probabilities<S: MatchStore + ?Sized>(
    store: &mut S,
    map: &SpecificMap,
    progress: &dyn ProgressSink,
) -> Result<()> {
    let keys = store.keys(MatchLevel::Peptide);
    progress.set_max(keys.len());
    for key in &keys {
        check(progress, Stage::PeptideMap)?;
        if let Some(peptide) = store.peptide_match_mut(key) {
            let partition = Partition::Modifications(peptide.peptide.modification_profile());
            attach(&mut peptide.validation, map, partition);
        }
    }
    Ok(())
}

fn attach(validation: &mut ValidationParameter, map: &SpecificMap, partition: Partition) {
    validation.probability = map.probability(&partition, validation.score);
    validation.fraction_probabilities = validation
        .fraction_scores
        .iter()
        .map(|(fraction, score)| (fraction.clone(), map.probability(&partition, *score)))
        .collect();
    validation.partition = Some(map.corrected_partition(&partition));
}

/// Score every protein group from the PEPs of its peptides
pub fn score_proteins<S: MatchStore + ?Sized>(
    store: &mut S,
    progress: &dyn ProgressSink,
) -> Result<()> {
    let keys = store.keys(MatchLevel::Protein);
    store.load_matches(MatchLevel::Protein, &keys)?;
    progress.set_max(keys.len());
    for key in &keys {
        check(progress, Stage::ProteinMap)?;
        let (score, fraction_scores) = {
            let protein = store
                .protein_match(key)
                .ok_or_else(|| Error::missing(MatchLevel::Protein, key.as_str()))?;
            let mut score = 1.0;
            let mut fraction_scores: BTreeMap<String, f64> = BTreeMap::new();
            for peptide in protein
                .peptides
                .iter()
                .filter_map(|peptide| store.peptide_match(peptide))
            {
                score *= peptide.validation.probability;
                for (fraction, p) in &peptide.validation.fraction_probabilities {
                    *fraction_scores.entry(fraction.clone()).or_insert(1.0) *= p;
                }
            }
            (score, fraction_scores)
        };
        if let Some(protein) = store.protein_match_mut(key) {
            protein.validation.reset_scores();
            protein.validation.score = score;
            protein.validation.fraction_scores = fraction_scores;
        }
    }
    Ok(())
}

pub fn fill_protein_map<S: MatchStore + ?Sized>(
    store: &mut S,
    map: &mut SpecificMap,
    progress: &dyn ProgressSink,
) -> Result<()> {
    let keys = store.keys(MatchLevel::Protein);
    progress.set_max(keys.len());
    map.clean();
    for protein in keys.iter().filter_map(|key| store.protein_match(key)) {
        check(progress, Stage::ProteinMap)?;
        map.add_point(Partition::Protein, protein.validation.score, protein.decoy);
    }
    map.estimate_probabilities();
    Ok(())
}

pub fn attach_protein_probabilities<S: MatchStore + ?Sized>(
    store: &mut S,
    map: &SpecificMap,
    progress: &dyn ProgressSink,
) -> Result<()> {
    let keys = store.keys(MatchLevel::Protein);
    progress.set_max(keys.len());
    for key in &keys {
        check(progress, Stage::ProteinMap)?;
        if let Some(protein) = store.protein_match_mut(key) {
            attach(&mut protein.validation, map, Partition::Protein);
        }
    }
    Ok(())
}
