//! Collaborators consulted on demand by the validation pipeline

use crate::enzyme::EnzymeCatalog;
use crate::model::PeptideAssumption;
use crate::modification::{Modification, ModificationCatalog};
use crate::parameters::ProbabilisticScore;
use crate::progress::ProgressSink;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct ProteinHeader {
    /// UniProt protein existence level, 1 (protein evidence) to 5 (uncertain)
    pub evidence_level: Option<u8>,
    pub description: Option<String>,
    pub gene_name: Option<String>,
}

pub trait SequenceProvider: Sync {
    fn sequence(&self, accession: &str) -> Option<Arc<str>>;

    fn header(&self, accession: &str) -> Option<ProteinHeader>;

    fn molecular_weight(&self, accession: &str) -> Option<f64>;

    fn is_decoy(&self, accession: &str) -> bool;

    /// Accessions of the proteins containing `peptide`
    fn parent_proteins(&self, peptide: &str) -> Vec<String>;

    /// Number of target sequences searched
    fn n_target_sequences(&self) -> usize;

    /// Were decoy sequences searched alongside the targets?
    fn is_target_decoy(&self) -> bool {
        true
    }

    /// Release cached data under memory pressure
    fn shrink_caches(&self) {}
}

/// Spectrum-level measurements of a candidate identification
pub trait SpectrumProvider {
    /// Fraction of the spectrum intensity explained by the candidate
    fn fragment_coverage(&self, spectrum_key: &str, assumption: &PeptideAssumption) -> f64;

    /// Precursor mass error of the candidate, in ppm
    fn precursor_error(&self, spectrum_key: &str, assumption: &PeptideAssumption) -> f64;
}

/// Uses the measurements stored on the assumptions at import time
#[derive(Copy, Clone, Debug, Default)]
pub struct StoredAnnotations;

impl SpectrumProvider for StoredAnnotations {
    fn fragment_coverage(&self, _: &str, assumption: &PeptideAssumption) -> f64 {
        assumption.fragment_coverage.unwrap_or(0.0)
    }

    fn precursor_error(&self, _: &str, assumption: &PeptideAssumption) -> f64 {
        assumption.precursor_error.unwrap_or(0.0)
    }
}

/// External A-score/PhosphoRS implementation
pub trait SiteProbabilityProvider {
    /// Score every candidate site (1-based) of the modifications of a given
    /// mass, `candidates` listing the variable modifications of that mass and
    /// `occurrences` the number of matches of that mass on the peptide
    fn site_scores(
        &self,
        method: ProbabilisticScore,
        spectrum_key: &str,
        assumption: &PeptideAssumption,
        candidates: &[&Modification],
        occurrences: usize,
    ) -> Option<BTreeMap<usize, f64>>;
}

/// Everything the pipeline reads besides the match store
#[derive(Copy, Clone)]
pub struct Context<'a> {
    pub sequences: &'a dyn SequenceProvider,
    pub spectra: &'a dyn SpectrumProvider,
    pub modifications: &'a dyn ModificationCatalog,
    pub enzyme: &'a dyn EnzymeCatalog,
    pub sites: Option<&'a dyn SiteProbabilityProvider>,
    pub progress: &'a dyn ProgressSink,
}
