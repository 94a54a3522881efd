use crate::provider::SequenceProvider;
use crate::ptm::{ProteinPtmSites, PtmScores};
use crate::specific_map::Partition;
use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt::Display;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum MatchLevel {
    Spectrum,
    Peptide,
    Protein,
}

impl Display for MatchLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MatchLevel::Spectrum => f.write_str("spectrum"),
            MatchLevel::Peptide => f.write_str("peptide"),
            MatchLevel::Protein => f.write_str("protein"),
        }
    }
}

/// Outcome of the validation of a match. Variants are ordered from worst to best
#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ValidationLevel {
    #[default]
    None,
    NotValidated,
    Doubtful,
    Confident,
}

impl ValidationLevel {
    pub fn is_validated(self) -> bool {
        self >= ValidationLevel::Doubtful
    }
}

impl Display for ValidationLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ValidationLevel::None => f.write_str("none"),
            ValidationLevel::NotValidated => f.write_str("not_validated"),
            ValidationLevel::Doubtful => f.write_str("doubtful"),
            ValidationLevel::Confident => f.write_str("confident"),
        }
    }
}

#[derive(
    Copy, Clone, Debug, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize,
)]
#[serde(rename_all = "snake_case")]
pub enum ProteinInferenceClass {
    #[default]
    NotDetermined,
    Related,
    RelatedAndUnrelated,
    Unrelated,
}

impl Display for ProteinInferenceClass {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProteinInferenceClass::NotDetermined => f.write_str("single_protein"),
            ProteinInferenceClass::Related => f.write_str("related"),
            ProteinInferenceClass::RelatedAndUnrelated => f.write_str("related_and_unrelated"),
            ProteinInferenceClass::Unrelated => f.write_str("unrelated"),
        }
    }
}

/// Statistical state attached to a match at any level
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct ValidationParameter {
    /// Raw probability score, lower is better
    pub score: f64,
    /// Posterior error probability estimated from the target-decoy map
    pub probability: f64,
    /// Raw probability score per fraction (spectrum file)
    pub fraction_scores: BTreeMap<String, f64>,
    pub fraction_probabilities: BTreeMap<String, f64>,
    pub level: ValidationLevel,
    /// Set by an operator: the validation level is never recomputed
    pub manual_validation: bool,
    pub doubtful_reason: Option<String>,
    /// Partition of the target-decoy map that scored this match
    pub partition: Option<Partition>,
    pub inference_class: ProteinInferenceClass,
}

impl Default for ValidationParameter {
    fn default() -> Self {
        Self {
            score: 1.0,
            probability: 1.0,
            fraction_scores: BTreeMap::new(),
            fraction_probabilities: BTreeMap::new(),
            level: ValidationLevel::None,
            manual_validation: false,
            doubtful_reason: None,
            partition: None,
            inference_class: ProteinInferenceClass::NotDetermined,
        }
    }
}

impl ValidationParameter {
    /// Confidence in percent, derived from the posterior error probability
    pub fn confidence(&self) -> f64 {
        (100.0 * (1.0 - self.probability)).clamp(0.0, 100.0)
    }

    /// Reset everything but the manual validation outcome
    pub fn reset_scores(&mut self) {
        self.score = 1.0;
        self.probability = 1.0;
        self.fraction_scores.clear();
        self.fraction_probabilities.clear();
        self.partition = None;
        if !self.manual_validation {
            self.level = ValidationLevel::None;
            self.doubtful_reason = None;
        }
    }
}

fn default_true() -> bool {
    true
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct ModificationMatch {
    pub name: String,
    /// 1-based position on the peptide
    pub site: usize,
    #[serde(default = "default_true")]
    pub variable: bool,
    #[serde(default)]
    pub confident: bool,
    #[serde(default)]
    pub inferred: bool,
}

impl ModificationMatch {
    pub fn new<S: Into<String>>(name: S, site: usize) -> Self {
        Self {
            name: name.into(),
            site,
            variable: true,
            confident: false,
            inferred: false,
        }
    }

    pub fn is_localized(&self) -> bool {
        self.confident || self.inferred
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Peptide {
    pub sequence: String,
    #[serde(default)]
    pub modifications: Vec<ModificationMatch>,
    /// Parent protein accessions
    #[serde(default)]
    pub proteins: Vec<String>,
}

impl Peptide {
    pub fn new<S: Into<String>>(sequence: S) -> Self {
        Self {
            sequence: sequence.into(),
            modifications: Vec::new(),
            proteins: Vec::new(),
        }
    }

    /// Identity of the peptide: sequence plus variable modifications, where
    /// only localized modifications carry their site
    pub fn key(&self) -> String {
        let tokens = self
            .variable_modifications()
            .map(|m| match m.is_localized() {
                true => format!("{}@{}", m.name, m.site),
                false => m.name.clone(),
            })
            .sorted()
            .collect::<Vec<_>>();
        match tokens.is_empty() {
            true => self.sequence.clone(),
            false => format!("{}_{}", self.sequence, tokens.join("_")),
        }
    }

    /// Sorted, de-duplicated variable modification names
    pub fn modification_profile(&self) -> String {
        self.variable_modifications()
            .map(|m| m.name.as_str())
            .sorted()
            .dedup()
            .join(",")
    }

    pub fn variable_modifications(&self) -> impl Iterator<Item = &ModificationMatch> {
        self.modifications.iter().filter(|m| m.variable)
    }

    pub fn is_modified(&self) -> bool {
        self.variable_modifications().next().is_some()
    }

    pub fn n_modifications(&self, name: &str) -> usize {
        self.variable_modifications()
            .filter(|m| m.name == name)
            .count()
    }

    /// Sites of the confidently localized or inferred matches of `name`
    pub fn localized_sites(&self, name: &str) -> Vec<usize> {
        self.variable_modifications()
            .filter(|m| m.name == name && m.is_localized())
            .map(|m| m.site)
            .sorted()
            .collect()
    }

    pub fn is_decoy<S: SequenceProvider + ?Sized>(&self, sequences: &S) -> bool {
        self.proteins.iter().any(|acc| sequences.is_decoy(acc))
    }

    /// Same sequence, same variable modification names at the same sites
    pub fn same_identification(&self, other: &Peptide) -> bool {
        if self.sequence != other.sequence {
            return false;
        }
        let lhs = self
            .variable_modifications()
            .map(|m| (m.name.as_str(), m.site))
            .sorted()
            .collect::<Vec<_>>();
        let rhs = other
            .variable_modifications()
            .map(|m| (m.name.as_str(), m.site))
            .sorted()
            .collect::<Vec<_>>();
        lhs == rhs
    }
}

/// A candidate identification reported by one search engine for a spectrum
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct PeptideAssumption {
    pub peptide: Peptide,
    pub charge: u8,
    pub engine: String,
    #[serde(default = "default_rank")]
    pub rank: usize,
    /// Raw engine score, lower is better (e.g. an e-value)
    pub score: f64,
    /// Search engine probability, estimated from the engine's target-decoy map
    #[serde(default = "default_probability")]
    pub probability: f64,
    #[serde(default)]
    pub fragment_coverage: Option<f64>,
    #[serde(default)]
    pub precursor_error: Option<f64>,
}

fn default_rank() -> usize {
    1
}

fn default_probability() -> f64 {
    1.0
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct SpectrumMatch {
    pub key: String,
    /// Spectrum file the spectrum was acquired in
    pub fraction: String,
    pub assumptions: Vec<PeptideAssumption>,
    #[serde(default)]
    pub best: Option<PeptideAssumption>,
    #[serde(default)]
    pub validation: ValidationParameter,
    #[serde(default)]
    pub ptm: PtmScores,
}

impl SpectrumMatch {
    pub fn new<K: Into<String>, F: Into<String>>(key: K, fraction: F) -> Self {
        Self {
            key: key.into(),
            fraction: fraction.into(),
            assumptions: Vec::new(),
            best: None,
            validation: ValidationParameter::default(),
            ptm: PtmScores::default(),
        }
    }

    pub fn charge(&self) -> Option<u8> {
        self.best.as_ref().map(|b| b.charge)
    }

    /// Put the modifications of the best assumption back where its search
    /// engine reported them, dropping any localization done since
    pub fn restore_reported_sites(&mut self) {
        let best = match self.best.as_mut() {
            Some(best) => best,
            None => return,
        };
        let reported = self.assumptions.iter().find(|a| {
            a.engine == best.engine
                && a.rank == best.rank
                && a.score == best.score
                && a.peptide.sequence == best.peptide.sequence
        });
        if let Some(reported) = reported {
            best.peptide.modifications = reported.peptide.modifications.clone();
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct PeptideMatch {
    pub key: String,
    pub peptide: Peptide,
    pub spectra: Vec<String>,
    pub decoy: bool,
    #[serde(default)]
    pub validation: ValidationParameter,
    #[serde(default)]
    pub ptm: PtmScores,
}

impl PeptideMatch {
    pub fn new(peptide: Peptide, decoy: bool) -> Self {
        Self {
            key: peptide.key(),
            peptide,
            spectra: Vec::new(),
            decoy,
            validation: ValidationParameter::default(),
            ptm: PtmScores::default(),
        }
    }
}

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ProteinMatch {
    pub key: String,
    /// Sorted candidate accessions, more than one for a shared group
    pub accessions: Vec<String>,
    pub main_accession: String,
    pub peptides: Vec<String>,
    pub decoy: bool,
    #[serde(default)]
    pub validation: ValidationParameter,
    #[serde(default)]
    pub ptm: ProteinPtmSites,
}

impl ProteinMatch {
    pub fn new<S: AsRef<str>>(accessions: &[S], decoy: bool) -> Self {
        let accessions = accessions
            .iter()
            .map(|s| s.as_ref().to_string())
            .sorted()
            .dedup()
            .collect::<Vec<_>>();
        Self {
            key: accessions.join("/"),
            main_accession: accessions.first().cloned().unwrap_or_default(),
            accessions,
            peptides: Vec::new(),
            decoy,
            validation: ValidationParameter::default(),
            ptm: ProteinPtmSites::default(),
        }
    }

    pub fn group_key<S: AsRef<str>>(accessions: &[S]) -> String {
        accessions
            .iter()
            .map(|s| s.as_ref())
            .sorted()
            .dedup()
            .join("/")
    }

    pub fn is_shared(&self) -> bool {
        self.accessions.len() > 1
    }

    /// `other` is a strict subset of this group
    pub fn contains(&self, other: &ProteinMatch) -> bool {
        other.accessions.len() < self.accessions.len()
            && other
                .accessions
                .iter()
                .all(|acc| self.accessions.binary_search(acc).is_ok())
    }

    pub fn has_accession(&self, accession: &str) -> bool {
        self.accessions.iter().any(|acc| acc == accession)
    }
}
