//! Storage of the identification results
//!
//! Matches reference each other by key only: a peptide match lists the keys
//! of its spectrum matches, a protein match lists the keys of its peptide
//! matches. All access goes through a [`MatchStore`].

use crate::model::{MatchLevel, PeptideMatch, ProteinMatch, SpectrumMatch, ValidationParameter};
use crate::Result;
use std::collections::{BTreeMap, BTreeSet};

pub trait MatchStore {
    /// Keys of every match of `level`, in a stable order
    fn keys(&self, level: MatchLevel) -> Vec<String>;

    /// Pre-fetch a batch of matches before random access
    fn load_matches(&mut self, _level: MatchLevel, _keys: &[String]) -> Result<()> {
        Ok(())
    }

    fn spectrum_match(&self, key: &str) -> Option<&SpectrumMatch>;

    fn spectrum_match_mut(&mut self, key: &str) -> Option<&mut SpectrumMatch>;

    fn peptide_match(&self, key: &str) -> Option<&PeptideMatch>;

    fn peptide_match_mut(&mut self, key: &str) -> Option<&mut PeptideMatch>;

    fn protein_match(&self, key: &str) -> Option<&ProteinMatch>;

    fn protein_match_mut(&mut self, key: &str) -> Option<&mut ProteinMatch>;

    fn insert_peptide_match(&mut self, peptide_match: PeptideMatch);

    fn insert_protein_match(&mut self, protein_match: ProteinMatch);

    fn remove_protein_match(&mut self, key: &str) -> Option<ProteinMatch>;

    /// Drop every peptide and protein match, keeping the spectrum matches
    fn clear_inferred_matches(&mut self);

    /// Keys of the protein matches listing `accession`
    fn protein_keys_for_accession(&self, accession: &str) -> Vec<String>;

    /// Replace a spectrum match in one step
    fn update_spectrum_match(&mut self, spectrum_match: SpectrumMatch) -> bool {
        match self.spectrum_match_mut(&spectrum_match.key) {
            Some(slot) => {
                *slot = spectrum_match;
                true
            }
            None => false,
        }
    }

    fn validation(&self, level: MatchLevel, key: &str) -> Option<&ValidationParameter> {
        match level {
            MatchLevel::Spectrum => self.spectrum_match(key).map(|m| &m.validation),
            MatchLevel::Peptide => self.peptide_match(key).map(|m| &m.validation),
            MatchLevel::Protein => self.protein_match(key).map(|m| &m.validation),
        }
    }

    fn validation_mut(&mut self, level: MatchLevel, key: &str) -> Option<&mut ValidationParameter> {
        match level {
            MatchLevel::Spectrum => self.spectrum_match_mut(key).map(|m| &mut m.validation),
            MatchLevel::Peptide => self.peptide_match_mut(key).map(|m| &mut m.validation),
            MatchLevel::Protein => self.protein_match_mut(key).map(|m| &mut m.validation),
        }
    }
}

/// Arena of matches held in memory
#[derive(Clone, Debug, Default)]
pub struct MemoryStore {
    spectra: BTreeMap<String, SpectrumMatch>,
    peptides: BTreeMap<String, PeptideMatch>,
    proteins: BTreeMap<String, ProteinMatch>,
    accessions: BTreeMap<String, BTreeSet<String>>,
}

impl MemoryStore {
    pub fn insert_spectrum_match(&mut self, spectrum_match: SpectrumMatch) {
        self.spectra
            .insert(spectrum_match.key.clone(), spectrum_match);
    }

    pub fn spectrum_matches(&self) -> impl Iterator<Item = &SpectrumMatch> {
        self.spectra.values()
    }

    pub fn peptide_matches(&self) -> impl Iterator<Item = &PeptideMatch> {
        self.peptides.values()
    }

    pub fn protein_matches(&self) -> impl Iterator<Item = &ProteinMatch> {
        self.proteins.values()
    }
}

impl FromIterator<SpectrumMatch> for MemoryStore {
    fn from_iter<I: IntoIterator<Item = SpectrumMatch>>(iter: I) -> Self {
        let mut store = MemoryStore::default();
        iter.into_iter()
            .for_each(|psm| store.insert_spectrum_match(psm));
        store
    }
}

impl MatchStore for MemoryStore {
    fn keys(&self, level: MatchLevel) -> Vec<String> {
        match level {
            MatchLevel::Spectrum => self.spectra.keys().cloned().collect(),
            MatchLevel::Peptide => self.peptides.keys().cloned().collect(),
            MatchLevel::Protein => self.proteins.keys().cloned().collect(),
        }
    }

    fn spectrum_match(&self, key: &str) -> Option<&SpectrumMatch> {
        self.spectra.get(key)
    }

    fn spectrum_match_mut(&mut self, key: &str) -> Option<&mut SpectrumMatch> {
        self.spectra.get_mut(key)
    }

    fn peptide_match(&self, key: &str) -> Option<&PeptideMatch> {
        self.peptides.get(key)
    }

    fn peptide_match_mut(&mut self, key: &str) -> Option<&mut PeptideMatch> {
        self.peptides.get_mut(key)
    }

    fn protein_match(&self, key: &str) -> Option<&ProteinMatch> {
        self.proteins.get(key)
    }

    fn protein_match_mut(&mut self, key: &str) -> Option<&mut ProteinMatch> {
        self.proteins.get_mut(key)
    }

    fn insert_peptide_match(&mut self, peptide_match: PeptideMatch) {
        self.peptides
            .insert(peptide_match.key.clone(), peptide_match);
    }

    fn insert_protein_match(&mut self, protein_match: ProteinMatch) {
        for accession in &protein_match.accessions {
            self.accessions
                .entry(accession.clone())
                .or_default()
                .insert(protein_match.key.clone());
        }
        self.proteins
            .insert(protein_match.key.clone(), protein_match);
    }

    fn remove_protein_match(&mut self, key: &str) -> Option<ProteinMatch> {
        let removed = self.proteins.remove(key)?;
        for accession in &removed.accessions {
            if let Some(keys) = self.accessions.get_mut(accession) {
                keys.remove(key);
                if keys.is_empty() {
                    self.accessions.remove(accession);
                }
            }
        }
        Some(removed)
    }

    fn clear_inferred_matches(&mut self) {
        self.peptides.clear();
        self.proteins.clear();
        self.accessions.clear();
    }

    fn protein_keys_for_accession(&self, accession: &str) -> Vec<String> {
        self.accessions
            .get(accession)
            .map(|keys| keys.iter().cloned().collect())
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn accession_index() {
        let mut store = MemoryStore::default();
        store.insert_protein_match(ProteinMatch::new(&["A", "B"], false));
        store.insert_protein_match(ProteinMatch::new(&["A"], false));
        assert_eq!(store.protein_keys_for_accession("A"), vec!["A", "A/B"]);
        assert_eq!(store.protein_keys_for_accession("B"), vec!["A/B"]);

        assert!(store.remove_protein_match("A/B").is_some());
        assert!(store.protein_keys_for_accession("B").is_empty());
        assert_eq!(store.keys(MatchLevel::Protein), vec!["A"]);

        store
            .validation_mut(MatchLevel::Protein, "A")
            .unwrap()
            .probability = 0.5;
        assert_eq!(
            store.validation(MatchLevel::Protein, "A").unwrap().confidence(),
            50.0
        );
    }

    #[test]
    fn update_spectrum_matches() {
        let mut store = [SpectrumMatch::new("run1_1", "run1")]
            .into_iter()
            .collect::<MemoryStore>();
        let mut psm = SpectrumMatch::new("run1_1", "run1");
        psm.validation.score = 0.1;
        assert!(store.update_spectrum_match(psm));
        assert_eq!(store.spectrum_match("run1_1").unwrap().validation.score, 0.1);
        assert!(!store.update_spectrum_match(SpectrumMatch::new("missing", "run1")));
    }
}
