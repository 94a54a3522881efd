//! # Protein Group Resolution
//!
//! Peptides shared between several proteins produce protein groups listing
//! more than one accession. This module simplifies these groups and picks a
//! representative protein for each of them.
//!
//! ## Main Features
//! - [`GroupResolver::remove_irrelevant_groups`] collapses a shared group onto
//!   one of the smaller groups it contains, when a single one dominates the
//!   others (enzymatic peptides, protein evidence, characterized description).
//! - [`GroupResolver::retain_best_scoring_groups`] drops shared groups scoring
//!   no better than a group they contain, selects the main accession of every
//!   surviving group and labels groups and peptides with a
//!   [`ProteinInferenceClass`].
//!
//! ## Ordering
//! Shared groups are processed by increasing number of accessions. A group is
//! only ever compared against strict subsets of itself, so every nested
//! shared group is settled before any group containing it, without recursion.
//! A resolution pass is repeated until nothing changes: resolving twice in a
//! row is a no-op.

use crate::enzyme::Enzyme;
use crate::model::{MatchLevel, ProteinInferenceClass, ProteinMatch};
use crate::progress::ProgressSink;
use crate::provider::SequenceProvider;
use crate::store::MatchStore;
use crate::validation::Stage;
use crate::{Error, Result};
use fnv::{FnvHashMap, FnvHashSet};
use itertools::Itertools;
use log::info;
use serde::Serialize;
use std::collections::BTreeSet;
use std::time::Instant;

const UNCHARACTERIZED: [&str; 2] = ["Uncharacterized", "putative"];

/// Why an accession is preferred over another one
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub enum Preference {
    /// No preference
    None,
    /// Only the preferred accession explains a peptide enzymatically
    Enzymatic,
    /// Better protein existence level
    Evidence,
    /// The other accession is uncharacterized or putative
    Uncharacterized,
}

impl Preference {
    pub fn is_preferred(self) -> bool {
        self != Preference::None
    }
}

/// Tallies of [`GroupResolver::remove_irrelevant_groups`]
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, Serialize)]
pub struct ResolutionSummary {
    /// Shared groups inspected
    pub processed: usize,
    /// Shared groups merged into a smaller group
    pub merged: usize,
    /// Groups removed from the store
    pub deleted: usize,
    pub enzymatic: usize,
    pub evidence: usize,
    pub uncharacterized: usize,
}

impl ResolutionSummary {
    fn tally(&mut self, preference: Preference) {
        match preference {
            Preference::Enzymatic => self.enzymatic += 1,
            Preference::Evidence => self.evidence += 1,
            Preference::Uncharacterized => self.uncharacterized += 1,
            Preference::None => {}
        }
    }

    fn absorb(&mut self, pass: ResolutionSummary) {
        self.processed = self.processed.max(pass.processed);
        self.merged += pass.merged;
        self.deleted += pass.deleted;
        self.enzymatic += pass.enzymatic;
        self.evidence += pass.evidence;
        self.uncharacterized += pass.uncharacterized;
    }
}

/// Outcome of [`GroupResolver::retain_best_scoring_groups`]
#[derive(Clone, Debug, Default, Serialize)]
pub struct GroupOrdering {
    /// Target protein groups sorted by score, then decreasing number of
    /// peptides and spectra
    pub protein_keys: Vec<String>,
    pub max_peptides: usize,
    pub max_spectra: usize,
    pub max_mw: f64,
    pub max_protein_key_length: usize,
    pub n_solved: usize,
    pub n_groups: usize,
    /// Groups of unrelated proteins
    pub n_left: usize,
}

impl GroupOrdering {
    pub fn report(&self) -> String {
        format!(
            "{} conflicts resolved. {} protein groups remaining ({} suspicious).",
            self.n_solved, self.n_groups, self.n_left
        )
    }
}

pub struct GroupResolver<'a> {
    sequences: &'a dyn SequenceProvider,
    enzyme: &'a Enzyme,
}

impl<'a> GroupResolver<'a> {
    pub fn new(sequences: &'a dyn SequenceProvider, enzyme: &'a Enzyme) -> Self {
        Self { sequences, enzyme }
    }

    /// Does any peptide of `protein` result from a specific digestion of
    /// `accession`?
    fn has_enzymatic_peptide<S: MatchStore + ?Sized>(
        &self,
        store: &S,
        protein: &ProteinMatch,
        accession: &str,
    ) -> bool {
        let sequence = match self.sequences.sequence(accession) {
            Some(sequence) => sequence,
            None => return false,
        };
        protein
            .peptides
            .iter()
            .filter_map(|key| store.peptide_match(key))
            .any(|peptide| self.enzyme.is_enzymatic(&peptide.peptide.sequence, &sequence))
    }

    /// Is `new` a better main accession than `old` for `protein`?
    pub fn compare_main_protein<S: MatchStore + ?Sized>(
        &self,
        store: &S,
        protein: &ProteinMatch,
        old: &str,
        new: &str,
    ) -> Preference {
        if !self.enzyme.semi_specific {
            let new_enzymatic = self.has_enzymatic_peptide(store, protein, new);
            let old_enzymatic = self.has_enzymatic_peptide(store, protein, old);
            match (old_enzymatic, new_enzymatic) {
                (false, true) => return Preference::Enzymatic,
                (true, false) => return Preference::None,
                _ => {}
            }
        }

        let old_header = self.sequences.header(old).unwrap_or_default();
        let new_header = self.sequences.header(new).unwrap_or_default();

        if let (Some(old_level), Some(new_level)) =
            (old_header.evidence_level, new_header.evidence_level)
        {
            if new_level < old_level {
                return Preference::Evidence;
            } else if old_level < new_level {
                return Preference::None;
            }
        }

        let old_description = match &old_header.description {
            Some(description) => description.to_lowercase(),
            None => return Preference::None,
        };
        let new_description = new_header
            .description
            .as_deref()
            .unwrap_or_default()
            .to_lowercase();

        // Descriptions are lowercased: only "putative" can ever match
        let old_uncharacterized = UNCHARACTERIZED
            .iter()
            .any(|keyword| old_description.contains(keyword));
        let new_uncharacterized = UNCHARACTERIZED
            .iter()
            .any(|keyword| new_description.contains(keyword));

        match old_uncharacterized && !new_uncharacterized {
            true => Preference::Uncharacterized,
            false => Preference::None,
        }
    }

    /// Do two proteins likely come from the same gene family? Gene names are
    /// compared first, then the words of the descriptions.
    pub fn similarity(&self, primary: &str, secondary: &str) -> bool {
        let primary = self.sequences.header(primary).unwrap_or_default();
        let secondary = self.sequences.header(secondary).unwrap_or_default();

        if let (Some(a), Some(b)) = (&primary.gene_name, &secondary.gene_name) {
            if a.eq_ignore_ascii_case(b) || a.contains(b.as_str()) || b.contains(a.as_str()) {
                return true;
            }
            // CPNE3 and CPNE2, then CPNE11 and CPNE12
            for trim in [2, 3] {
                if contains_truncated(a, b, trim) || contains_truncated(b, a, trim) {
                    return true;
                }
            }
        }

        let words = |description: &Option<String>| {
            description
                .as_deref()
                .unwrap_or_default()
                .split(' ')
                .filter(|word| word.chars().count() > 3)
                .map(str::to_string)
                .collect::<Vec<_>>()
        };
        let primary = words(&primary.description);
        let secondary = words(&secondary.description);
        let (larger, smaller) = match primary.len() > secondary.len() {
            true => (&primary, &secondary),
            false => (&secondary, &primary),
        };
        let n_match = smaller.iter().filter(|word| larger.contains(word)).count();
        n_match >= smaller.len() / 2
    }

    /// Merge shared protein groups into the smaller group that dominates the
    /// other candidates, deleting the losers and the merged group.
    pub fn remove_irrelevant_groups<S: MatchStore + ?Sized>(
        &self,
        store: &mut S,
        progress: &dyn ProgressSink,
    ) -> Result<ResolutionSummary> {
        let start = Instant::now();
        let mut summary = ResolutionSummary::default();
        loop {
            let pass = self.resolution_pass(store, progress)?;
            summary.absorb(pass);
            if pass.merged == 0 {
                break;
            }
        }

        let issues = summary.enzymatic + summary.evidence + summary.uncharacterized;
        if issues > 0 {
            let enzymatic = 100 * summary.enzymatic / issues;
            let evidence = 100 * summary.evidence / issues;
            progress.report(&format!(
                "{} unlikely mappings found. ({}% non-enzymatic accessions, {}% lower evidence accessions, {}% not characterized accessions)",
                summary.deleted,
                enzymatic,
                evidence,
                100 - enzymatic - evidence
            ));
        }
        info!(
            "- simplified protein groups: {} merged, {} deleted in {:?}ms",
            summary.merged,
            summary.deleted,
            start.elapsed().as_millis()
        );
        Ok(summary)
    }

    fn resolution_pass<S: MatchStore + ?Sized>(
        &self,
        store: &mut S,
        progress: &dyn ProgressSink,
    ) -> Result<ResolutionSummary> {
        let mut summary = ResolutionSummary::default();
        let shared = store
            .keys(MatchLevel::Protein)
            .into_iter()
            .filter_map(|key| {
                store
                    .protein_match(&key)
                    .filter(|group| group.is_shared())
                    .map(|group| (group.accessions.len(), key))
            })
            .sorted()
            .map(|(_, key)| key)
            .collect::<Vec<_>>();
        store.load_matches(MatchLevel::Protein, &shared)?;
        progress.set_max(shared.len());

        let mut deleted = BTreeSet::<String>::new();
        let mut resolved: FnvHashMap<String, Option<String>> = FnvHashMap::default();

        for key in shared {
            if progress.is_canceled() {
                // Groups merged so far must not linger next to their winner
                for key in &deleted {
                    store.remove_protein_match(key);
                }
                return Err(Error::Canceled {
                    stage: Stage::GroupResolution,
                });
            }
            progress.increment();
            if deleted.contains(&key) {
                continue;
            }
            summary.processed += 1;

            let group = store
                .protein_match(&key)
                .ok_or_else(|| Error::missing(MatchLevel::Protein, &key))?
                .clone();
            let candidates = self.candidate_subgroups(store, &group, &resolved, &deleted);
            if candidates.len() < 2 {
                resolved.insert(key, None);
                continue;
            }

            match self.dominant_candidate(store, &group, &candidates)? {
                Some((winner, reasons)) => {
                    for loser in candidates.iter().filter(|c| **c != winner) {
                        deleted.insert(loser.clone());
                        reasons.iter().for_each(|reason| summary.tally(*reason));
                    }
                    let target = store
                        .protein_match_mut(&winner)
                        .ok_or_else(|| Error::missing(MatchLevel::Protein, &winner))?;
                    for peptide in &group.peptides {
                        if !target.peptides.contains(peptide) {
                            target.peptides.push(peptide.clone());
                        }
                    }
                    log::trace!("- {} merged into {}", key, winner);
                    deleted.insert(key.clone());
                    resolved.insert(key, Some(winner));
                    summary.merged += 1;
                }
                None => {
                    resolved.insert(key, None);
                }
            }
        }

        for key in &deleted {
            if store.remove_protein_match(key).is_some() {
                summary.deleted += 1;
            }
        }
        Ok(summary)
    }

    /// Groups strictly contained in `group` and still alive. A merged shared
    /// group stands for the group it was merged into.
    fn candidate_subgroups<S: MatchStore + ?Sized>(
        &self,
        store: &S,
        group: &ProteinMatch,
        resolved: &FnvHashMap<String, Option<String>>,
        deleted: &BTreeSet<String>,
    ) -> Vec<String> {
        let mut candidates = Vec::new();
        for accession in &group.accessions {
            for key in store.protein_keys_for_accession(accession) {
                let contained = store
                    .protein_match(&key)
                    .map(|candidate| group.contains(candidate))
                    .unwrap_or(false);
                if !contained {
                    continue;
                }
                let key = match resolved.get(&key) {
                    Some(Some(winner)) => winner.clone(),
                    _ => key,
                };
                if !deleted.contains(&key) && !candidates.contains(&key) {
                    candidates.push(key);
                }
            }
        }
        candidates
    }

    /// The candidate whose accession is preferred over every accession of
    /// the competing candidates and of the rest of `group`, with the reasons
    /// of the preference
    fn dominant_candidate<S: MatchStore + ?Sized>(
        &self,
        store: &S,
        group: &ProteinMatch,
        candidates: &[String],
    ) -> Result<Option<(String, Vec<Preference>)>> {
        let fetch = |key: &str| {
            store
                .protein_match(key)
                .ok_or_else(|| Error::missing(MatchLevel::Protein, key))
        };

        for k1 in candidates {
            let m1 = fetch(k1)?;
            for a1 in &m1.accessions {
                let mut reasons: FnvHashMap<&str, Preference> = FnvHashMap::default();
                let mut record = |accession, preference: Preference| {
                    let entry = reasons.entry(accession).or_insert(preference);
                    *entry = (*entry).min(preference);
                };
                let mut best = true;

                'competitors: for k2 in candidates.iter().filter(|k2| *k2 != k1) {
                    let m2 = fetch(k2)?;
                    if m1.contains(m2) {
                        continue;
                    }
                    if m2.accessions.iter().any(|a| m1.has_accession(a)) {
                        best = false;
                        break;
                    }
                    for a2 in &m2.accessions {
                        let preference = self.compare_main_protein(store, group, a2, a1);
                        if !preference.is_preferred() {
                            best = false;
                            break 'competitors;
                        }
                        record(a2.as_str(), preference);
                    }
                }

                if best {
                    for a2 in group.accessions.iter().filter(|a| !m1.has_accession(a)) {
                        let preference = self.compare_main_protein(store, group, a2, a1);
                        if !preference.is_preferred() {
                            best = false;
                            break;
                        }
                        record(a2.as_str(), preference);
                    }
                }

                if best {
                    return Ok(Some((k1.clone(), reasons.into_values().collect())));
                }
            }
        }
        Ok(None)
    }

    /// Main accession of a shared group and its inference class
    fn classify<S: MatchStore + ?Sized>(
        &self,
        store: &S,
        group: &ProteinMatch,
    ) -> (String, ProteinInferenceClass) {
        let accessions = &group.accessions;
        let mut main = accessions[0].as_str();
        for accession in accessions {
            if self
                .compare_main_protein(store, group, main, accession)
                .is_preferred()
            {
                main = accession.as_str();
            }
        }

        let similar_pair = (0..accessions.len())
            .tuple_combinations()
            .find(|&(i, j)| self.similarity(&accessions[i], &accessions[j]));

        let class = match similar_pair {
            None => ProteinInferenceClass::Unrelated,
            Some((i, j)) => {
                if self
                    .compare_main_protein(store, group, main, &accessions[j])
                    .is_preferred()
                {
                    main = accessions[i].as_str();
                }
                let all_similar = accessions
                    .iter()
                    .filter(|a| a.as_str() != main)
                    .all(|a| self.similarity(main, a));
                match all_similar {
                    true => ProteinInferenceClass::Related,
                    false => ProteinInferenceClass::RelatedAndUnrelated,
                }
            }
        };
        (main.to_string(), class)
    }

    /// Drop shared groups scoring no better than a group they contain, then
    /// select main accessions, label inference classes and order the
    /// remaining target groups.
    ///
    /// # Invariants
    /// * protein scores must have been stored in the validation parameters
    pub fn retain_best_scoring_groups<S: MatchStore + ?Sized>(
        &self,
        store: &mut S,
        progress: &dyn ProgressSink,
    ) -> Result<GroupOrdering> {
        let start = Instant::now();
        let keys = store.keys(MatchLevel::Protein);
        store.load_matches(MatchLevel::Protein, &keys)?;
        progress.set_max(2 * keys.len());

        let mut to_remove = Vec::new();
        for key in &keys {
            if progress.is_canceled() {
                return Err(Error::Canceled {
                    stage: Stage::ProteinMap,
                });
            }
            progress.increment();
            let shared = match store.protein_match(key) {
                Some(group) if group.is_shared() => group.clone(),
                _ => continue,
            };
            let contained = shared
                .accessions
                .iter()
                .flat_map(|accession| store.protein_keys_for_accession(accession))
                .unique()
                .filter(|other| {
                    store
                        .protein_match(other)
                        .map(|other| shared.contains(other))
                        .unwrap_or(false)
                })
                .collect::<Vec<_>>();

            let mut better = false;
            for other in contained {
                if let Some(group) = store.protein_match_mut(&other) {
                    for peptide in &shared.peptides {
                        if !group.peptides.contains(peptide) {
                            group.peptides.push(peptide.clone());
                        }
                    }
                    better |= group.validation.score <= shared.validation.score;
                }
            }
            if better {
                to_remove.push(key.clone());
            }
        }
        for key in &to_remove {
            store.remove_protein_match(key);
        }

        let mut ordering = GroupOrdering {
            n_solved: to_remove.len(),
            ..Default::default()
        };
        let mut entries = Vec::new();

        for key in store.keys(MatchLevel::Protein) {
            if progress.is_canceled() {
                return Err(Error::Canceled {
                    stage: Stage::ProteinMap,
                });
            }
            progress.increment();
            let group = store
                .protein_match(&key)
                .ok_or_else(|| Error::missing(MatchLevel::Protein, &key))?
                .clone();

            let main = match group.is_shared() {
                true => {
                    let (main, class) = self.classify(store, &group);
                    ordering.n_groups += 1;
                    match class {
                        ProteinInferenceClass::Unrelated => ordering.n_left += 1,
                        _ => ordering.n_solved += 1,
                    }
                    self.label_shared_peptides(store, &group, &main, class);
                    if let Some(group) = store.protein_match_mut(&key) {
                        group.validation.inference_class = class;
                        group.main_accession = main.clone();
                    }
                    main
                }
                false => {
                    self.label_unique_peptides(store, &group);
                    group.main_accession.clone()
                }
            };

            if !group.decoy {
                let n_spectra = group
                    .peptides
                    .iter()
                    .filter_map(|peptide| store.peptide_match(peptide))
                    .map(|peptide| peptide.spectra.len())
                    .sum::<usize>();
                if let Some(mw) = self.sequences.molecular_weight(&main) {
                    ordering.max_mw = ordering.max_mw.max(mw);
                }
                ordering.max_peptides = ordering.max_peptides.max(group.peptides.len());
                ordering.max_spectra = ordering.max_spectra.max(n_spectra);
                ordering.max_protein_key_length = ordering.max_protein_key_length.max(main.len());
                entries.push((group.validation.score, group.peptides.len(), n_spectra, key));
            }
        }

        entries.sort_by(|a, b| {
            a.0.total_cmp(&b.0)
                .then_with(|| b.1.cmp(&a.1))
                .then_with(|| b.2.cmp(&a.2))
                .then_with(|| a.3.cmp(&b.3))
        });
        ordering.protein_keys = entries.into_iter().map(|entry| entry.3).collect();

        progress.report(&ordering.report());
        info!(
            "- retained {} protein groups in {:?}ms",
            ordering.protein_keys.len(),
            start.elapsed().as_millis()
        );
        Ok(ordering)
    }

    fn label_shared_peptides<S: MatchStore + ?Sized>(
        &self,
        store: &mut S,
        group: &ProteinMatch,
        main: &str,
        class: ProteinInferenceClass,
    ) {
        for key in &group.peptides {
            let peptide_class = match class {
                ProteinInferenceClass::Related => {
                    let unrelated = store
                        .peptide_match(key)
                        .map(|peptide| {
                            peptide
                                .peptide
                                .proteins
                                .iter()
                                .filter(|acc| !group.has_accession(acc))
                                .any(|acc| !self.similarity(main, acc))
                        })
                        .unwrap_or(false);
                    match unrelated {
                        true => ProteinInferenceClass::RelatedAndUnrelated,
                        false => ProteinInferenceClass::Related,
                    }
                }
                other => other,
            };
            if let Some(peptide) = store.peptide_match_mut(key) {
                peptide.validation.inference_class = peptide_class;
            }
        }
    }

    fn label_unique_peptides<S: MatchStore + ?Sized>(&self, store: &mut S, group: &ProteinMatch) {
        let main = group.main_accession.as_str();
        for key in &group.peptides {
            let others = match store.peptide_match(key) {
                Some(peptide) => peptide
                    .peptide
                    .proteins
                    .iter()
                    .filter(|acc| !group.has_accession(acc))
                    .cloned()
                    .collect::<FnvHashSet<_>>(),
                None => continue,
            };
            if others.is_empty() {
                continue;
            }
            let class = match others.iter().any(|acc| !self.similarity(main, acc)) {
                true => ProteinInferenceClass::Unrelated,
                false => ProteinInferenceClass::Related,
            };
            if let Some(peptide) = store.peptide_match_mut(key) {
                peptide.validation.inference_class = class;
            }
        }
    }
}

/// `haystack` contains `needle` without its last `trim` characters
fn contains_truncated(haystack: &str, needle: &str, trim: usize) -> bool {
    let n = needle.chars().count();
    if n <= trim {
        return false;
    }
    let prefix = needle.chars().take(n - trim).collect::<String>();
    haystack.contains(&prefix)
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::model::{Peptide, PeptideMatch};
    use crate::progress::LogProgress;
    use crate::provider::ProteinHeader;
    use crate::store::MemoryStore;
    use std::collections::BTreeMap;
    use std::sync::Arc;

    #[derive(Default)]
    struct Proteins {
        sequences: BTreeMap<String, (String, ProteinHeader)>,
    }

    impl Proteins {
        fn add(&mut self, accession: &str, sequence: &str, header: ProteinHeader) {
            self.sequences
                .insert(accession.into(), (sequence.into(), header));
        }
    }

    impl SequenceProvider for Proteins {
        fn sequence(&self, accession: &str) -> Option<Arc<str>> {
            self.sequences.get(accession).map(|(s, _)| s.as_str().into())
        }

        fn header(&self, accession: &str) -> Option<ProteinHeader> {
            self.sequences.get(accession).map(|(_, h)| h.clone())
        }

        fn molecular_weight(&self, accession: &str) -> Option<f64> {
            self.sequences
                .get(accession)
                .map(|(s, _)| s.len() as f64 * 110.0)
        }

        fn is_decoy(&self, accession: &str) -> bool {
            accession.starts_with("rev_")
        }

        fn parent_proteins(&self, peptide: &str) -> Vec<String> {
            self.sequences
                .iter()
                .filter(|(_, (s, _))| s.contains(peptide))
                .map(|(acc, _)| acc.clone())
                .collect()
        }

        fn n_target_sequences(&self) -> usize {
            self.sequences.len()
        }
    }

    fn header(evidence: u8, description: &str, gene: &str) -> ProteinHeader {
        ProteinHeader {
            evidence_level: Some(evidence),
            description: Some(description.into()),
            gene_name: Some(gene.into()),
        }
    }

    fn peptide(store: &mut MemoryStore, sequence: &str, proteins: &[&str]) -> String {
        let mut peptide = Peptide::new(sequence);
        peptide.proteins = proteins.iter().map(|s| s.to_string()).collect();
        let mut peptide_match = PeptideMatch::new(peptide, false);
        peptide_match.spectra.push(format!("{}_scan", sequence));
        let key = peptide_match.key.clone();
        store.insert_peptide_match(peptide_match);
        key
    }

    fn group(store: &mut MemoryStore, accessions: &[&str], peptides: &[&str], score: f64) {
        let mut group = ProteinMatch::new(accessions, false);
        group.peptides = peptides.iter().map(|s| s.to_string()).collect();
        group.validation.score = score;
        store.insert_protein_match(group);
    }

    #[test]
    fn similar_gene_names() {
        let mut proteins = Proteins::default();
        proteins.add("P1", "", header(1, "Copine family member three", "CPNE3"));
        proteins.add("P2", "", header(1, "Copine-2", "CPNE2"));
        proteins.add("P3", "", header(1, "Elongation factor", "EEF1A1"));
        proteins.add("P4", "", header(1, "Elongation factor like", "EEF1A1P5"));
        proteins.add(
            "P5",
            "",
            header(1, "Keratin type cytoskeletal", "KRT10"),
        );
        let enzyme = Enzyme::trypsin().unwrap();
        let resolver = GroupResolver::new(&proteins, &enzyme);
        assert!(resolver.similarity("P1", "P2"));
        assert!(resolver.similarity("P3", "P4"));
        assert!(!resolver.similarity("P1", "P5"));
    }

    #[test]
    fn uncharacterized_keyword_is_lowercased() {
        let mut proteins = Proteins::default();
        proteins.add("OLD", "MKPEPTIDEK", header(1, "Uncharacterized protein", "A"));
        proteins.add("NEW", "MKPEPTIDEK", header(1, "Actin", "B"));
        proteins.add("PUT", "MKPEPTIDEK", header(1, "Putative actin", "C"));
        let enzyme = Enzyme::trypsin().unwrap();
        let resolver = GroupResolver::new(&proteins, &enzyme);
        let store = MemoryStore::default();
        let protein = ProteinMatch::new(&["NEW", "OLD", "PUT"], false);

        assert_eq!(
            resolver.compare_main_protein(&store, &protein, "OLD", "NEW"),
            Preference::None
        );
        assert_eq!(
            resolver.compare_main_protein(&store, &protein, "PUT", "NEW"),
            Preference::Uncharacterized
        );
    }

    #[test]
    fn evidence_and_enzymatic_preferences() {
        let mut proteins = Proteins::default();
        proteins.add("A", "MKLEPTIDEKAAA", header(1, "Actin", "ACT"));
        proteins.add("B", "MKALEPTIDEKAA", header(1, "Actin", "ACT"));
        proteins.add("C", "MKLEPTIDEKAAA", header(3, "Actin", "ACT"));
        let enzyme = Enzyme::trypsin().unwrap();
        let resolver = GroupResolver::new(&proteins, &enzyme);

        let mut store = MemoryStore::default();
        let key = peptide(&mut store, "LEPTIDEK", &["A", "B", "C"]);
        let mut protein = ProteinMatch::new(&["A", "B", "C"], false);
        protein.peptides.push(key);

        assert_eq!(
            resolver.compare_main_protein(&store, &protein, "B", "A"),
            Preference::Enzymatic
        );
        assert_eq!(
            resolver.compare_main_protein(&store, &protein, "A", "B"),
            Preference::None
        );
        assert_eq!(
            resolver.compare_main_protein(&store, &protein, "C", "A"),
            Preference::Evidence
        );
    }

    #[test]
    fn merge_dominated_groups() {
        let mut proteins = Proteins::default();
        proteins.add("A", "MKPEPTIDEKAAA", header(1, "Actin", "ACT"));
        proteins.add("B", "MKPEPTIDEKAAA", header(4, "Putative actin", "ACT2"));
        let enzyme = Enzyme::trypsin().unwrap();
        let resolver = GroupResolver::new(&proteins, &enzyme);

        let mut store = MemoryStore::default();
        let shared = peptide(&mut store, "PEPTIDEK", &["A", "B"]);
        let only_a = peptide(&mut store, "AAAK", &["A"]);
        let only_b = peptide(&mut store, "BBBK", &["B"]);
        group(&mut store, &["A", "B"], &[&shared], 0.1);
        group(&mut store, &["A"], &[&only_a], 0.1);
        group(&mut store, &["B"], &[&only_b], 0.1);

        let progress = LogProgress::default();
        let summary = resolver
            .remove_irrelevant_groups(&mut store, &progress)
            .unwrap();
        assert_eq!(summary.merged, 1);
        assert_eq!(summary.deleted, 2);
        assert_eq!(summary.evidence, 1);
        assert_eq!(store.keys(MatchLevel::Protein), vec!["A"]);
        let a = store.protein_match("A").unwrap();
        assert!(a.peptides.contains(&shared));

        let again = resolver
            .remove_irrelevant_groups(&mut store, &progress)
            .unwrap();
        assert_eq!(again.merged, 0);
        assert_eq!(again.deleted, 0);
        assert_eq!(store.keys(MatchLevel::Protein), vec!["A"]);
    }

    #[test]
    fn undecided_groups_are_kept() {
        let mut proteins = Proteins::default();
        proteins.add("A", "MKPEPTIDEKAAA", header(1, "Actin", "ACT"));
        proteins.add("B", "MKPEPTIDEKAAA", header(1, "Actin", "ACT"));
        let enzyme = Enzyme::trypsin().unwrap();
        let resolver = GroupResolver::new(&proteins, &enzyme);

        let mut store = MemoryStore::default();
        group(&mut store, &["A", "B"], &[], 0.1);
        group(&mut store, &["A"], &[], 0.1);
        group(&mut store, &["B"], &[], 0.1);
        let summary = resolver
            .remove_irrelevant_groups(&mut store, &LogProgress::default())
            .unwrap();
        assert_eq!(summary.merged, 0);
        assert_eq!(store.keys(MatchLevel::Protein).len(), 3);
    }

    #[test]
    fn better_scoring_subgroup_absorbs_shared_group() {
        let mut proteins = Proteins::default();
        proteins.add("A", "MKPEPTIDEKAAA", header(1, "Actin cytoplasmic", "ACT"));
        proteins.add("B", "MKPEPTIDEKAAA", header(1, "Myosin heavy chain", "MYH9"));
        let enzyme = Enzyme::trypsin().unwrap();
        let resolver = GroupResolver::new(&proteins, &enzyme);

        let mut store = MemoryStore::default();
        let shared = peptide(&mut store, "PEPTIDEK", &["A", "B"]);
        let only_a = peptide(&mut store, "AAAK", &["A"]);
        group(&mut store, &["A", "B"], &[&shared], 0.01);
        group(&mut store, &["A"], &[&only_a], 0.01);

        let ordering = resolver
            .retain_best_scoring_groups(&mut store, &LogProgress::default())
            .unwrap();
        assert_eq!(ordering.protein_keys, vec!["A"]);
        assert_eq!(ordering.n_solved, 1);
        assert_eq!(ordering.max_peptides, 2);
        assert_eq!(ordering.max_spectra, 2);
        assert_eq!(ordering.report(), "1 conflicts resolved. 0 protein groups remaining (0 suspicious).");
        // the shared peptide also maps to the unrelated B
        assert_eq!(
            store.peptide_match(&shared).unwrap().validation.inference_class,
            ProteinInferenceClass::Unrelated
        );
    }

    #[test]
    fn inference_classes() {
        let mut proteins = Proteins::default();
        proteins.add("A", "MKPEPTIDEKAAA", header(1, "Copine family member three", "CPNE3"));
        proteins.add("B", "MKPEPTIDEKAAA", header(1, "Copine family member two", "CPNE2"));
        proteins.add("C", "MKPEPTIDEKAAA", header(1, "Keratin type cytoskeletal", "KRT10"));
        let enzyme = Enzyme::trypsin().unwrap();
        let resolver = GroupResolver::new(&proteins, &enzyme);

        let mut store = MemoryStore::default();
        let related = peptide(&mut store, "PEPTIDEK", &["A", "B"]);
        let mixed = peptide(&mut store, "AAAK", &["A", "B", "C"]);
        group(&mut store, &["A", "B"], &[&related], 0.2);
        group(&mut store, &["A", "B", "C"], &[&mixed], 0.1);

        let ordering = resolver
            .retain_best_scoring_groups(&mut store, &LogProgress::default())
            .unwrap();
        assert_eq!(ordering.n_groups, 2);
        assert_eq!(ordering.n_left, 0);
        assert_eq!(ordering.protein_keys, vec!["A/B/C", "A/B"]);
        assert_eq!(
            store.protein_match("A/B").unwrap().validation.inference_class,
            ProteinInferenceClass::Related
        );
        assert_eq!(
            store.protein_match("A/B/C").unwrap().validation.inference_class,
            ProteinInferenceClass::RelatedAndUnrelated
        );
        assert_eq!(
            store.peptide_match(&related).unwrap().validation.inference_class,
            ProteinInferenceClass::Related
        );
        assert_eq!(
            store.peptide_match(&mixed).unwrap().validation.inference_class,
            ProteinInferenceClass::RelatedAndUnrelated
        );
    }
}
