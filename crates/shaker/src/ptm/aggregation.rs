use super::{occurrences, ProteinPtmSites, PtmScores, PtmScoring, SiteConfidence};
use crate::model::{MatchLevel, PeptideMatch, SpectrumMatch};
use crate::modification::ModificationCatalog;
use crate::progress::ProgressSink;
use crate::provider::SequenceProvider;
use crate::store::MatchStore;
use crate::validation::Stage;
use crate::{Error, Result};
use itertools::Itertools;
use std::collections::BTreeSet;

/// PSMs speaking for a peptide: all PSMs at the best validation level when it
/// is validated, the most confident PSMs otherwise
fn representative_psms<'s>(psms: &[&'s SpectrumMatch]) -> Vec<&'s SpectrumMatch> {
    let level = match psms.iter().map(|psm| psm.validation.level).max() {
        Some(level) => level,
        None => return Vec::new(),
    };
    if level.is_validated() {
        return psms
            .iter()
            .filter(|psm| psm.validation.level == level)
            .copied()
            .collect();
    }
    let confidence = psms
        .iter()
        .map(|psm| psm.validation.confidence())
        .fold(f64::MIN, f64::max);
    psms.iter()
        .filter(|psm| psm.validation.confidence() >= confidence)
        .copied()
        .collect()
}

/// Summarize the localization of the modifications of a peptide from its PSMs
pub fn peptide_scores(
    peptide: &PeptideMatch,
    psms: &[&SpectrumMatch],
    modifications: &dyn ModificationCatalog,
) -> PtmScores {
    let mut scores = PtmScores::default();
    let names = peptide
        .peptide
        .variable_modifications()
        .filter(|m| {
            modifications
                .resolve(&m.name)
                .map(|r| r.is_site_specific())
                .unwrap_or(false)
        })
        .map(|m| m.name.as_str())
        .collect::<BTreeSet<_>>();
    if names.is_empty() {
        return scores;
    }

    let representatives = representative_psms(psms);
    for name in names {
        let mut scoring = PtmScoring::default();
        for psm in &representatives {
            if let Some(other) = psm.ptm.scoring(name) {
                scoring.merge(other);
            }
        }

        let inferred = peptide
            .peptide
            .variable_modifications()
            .filter(|m| m.name == name && m.inferred)
            .map(|m| m.site);
        let main = scoring
            .confident_sites()
            .into_iter()
            .chain(inferred)
            .unique()
            .sorted_by(|a, b| {
                scoring
                    .best_score(*b)
                    .total_cmp(&scoring.best_score(*a))
                    .then(a.cmp(b))
            })
            .take(peptide.peptide.n_modifications(name))
            .collect::<BTreeSet<_>>();
        let secondary = scoring
            .delta
            .keys()
            .chain(scoring.probabilistic.keys())
            .chain(
                scoring
                    .confidence
                    .iter()
                    .filter(|(_, c)| **c > SiteConfidence::NotFound)
                    .map(|(site, _)| site),
            )
            .copied()
            .filter(|site| !main.contains(site))
            .collect::<BTreeSet<_>>();

        if !main.is_empty() {
            scores.main_sites.insert(name.to_string(), main);
        }
        if !secondary.is_empty() {
            scores.secondary_sites.insert(name.to_string(), secondary);
        }
        scores.scorings.insert(name.to_string(), scoring);
    }
    scores
}

/// Attach the localization summary of every peptide match
pub fn peptide_ptms<S: MatchStore + ?Sized>(
    store: &mut S,
    modifications: &dyn ModificationCatalog,
    progress: &dyn ProgressSink,
) -> Result<()> {
    let keys = store.keys(MatchLevel::Peptide);
    progress.set_max(keys.len());
    for key in keys {
        if progress.is_canceled() {
            return Err(Error::Canceled {
                stage: Stage::PtmAggregation,
            });
        }
        let scores = {
            let peptide = store
                .peptide_match(&key)
                .ok_or_else(|| Error::missing(MatchLevel::Peptide, key.as_str()))?;
            let psms = peptide
                .spectra
                .iter()
                .filter_map(|spectrum| store.spectrum_match(spectrum))
                .collect::<Vec<_>>();
            peptide_scores(peptide, &psms, modifications)
        };
        if let Some(peptide) = store.peptide_match_mut(&key) {
            peptide.ptm = scores;
        }
        progress.increment();
    }
    Ok(())
}

/// Project the sites of the validated modified peptides of every protein
/// group onto its main accession
pub fn protein_ptms<S: MatchStore + ?Sized>(
    store: &mut S,
    sequences: &dyn SequenceProvider,
    progress: &dyn ProgressSink,
) -> Result<()> {
    let keys = store.keys(MatchLevel::Protein);
    progress.set_max(keys.len());
    for key in keys {
        if progress.is_canceled() {
            return Err(Error::Canceled {
                stage: Stage::PtmAggregation,
            });
        }
        let mut sites = ProteinPtmSites::default();
        {
            let protein = store
                .protein_match(&key)
                .ok_or_else(|| Error::missing(MatchLevel::Protein, key.as_str()))?;
            if let Some(sequence) = sequences.sequence(&protein.main_accession) {
                for peptide in protein
                    .peptides
                    .iter()
                    .filter_map(|peptide| store.peptide_match(peptide))
                    .filter(|peptide| {
                        peptide.validation.level.is_validated() && peptide.peptide.is_modified()
                    })
                {
                    for start in occurrences(&sequence, &peptide.peptide.sequence) {
                        for (name, positions) in &peptide.ptm.main_sites {
                            positions
                                .iter()
                                .for_each(|site| sites.add_main(start + site, name));
                        }
                        for (name, positions) in &peptide.ptm.secondary_sites {
                            positions
                                .iter()
                                .for_each(|site| sites.add_secondary(start + site, name));
                        }
                    }
                }
            } else {
                log::debug!("- no sequence for {}", protein.main_accession);
            }
        }
        if let Some(protein) = store.protein_match_mut(&key) {
            protein.ptm = sites;
        }
        progress.increment();
    }
    Ok(())
}
