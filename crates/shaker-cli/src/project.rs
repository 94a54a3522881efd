//! Identification project loaded from JSON, and the knowledge bases the
//! validation pipeline consults

use fnv::FnvHashMap;
use serde::{Deserialize, Serialize};
use shaker_core::model::{PeptideAssumption, SpectrumMatch};
use shaker_core::modification::{Modification, ModificationSet};
use shaker_core::parameters::ProbabilisticScore;
use shaker_core::provider::{ProteinHeader, SequenceProvider, SiteProbabilityProvider};
use std::collections::BTreeMap;
use std::sync::{Arc, Mutex};

#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct ProteinEntry {
    pub accession: String,
    pub sequence: String,
    #[serde(default)]
    pub evidence_level: Option<u8>,
    #[serde(default)]
    pub description: Option<String>,
    #[serde(default)]
    pub gene_name: Option<String>,
    /// Average mass in Da, computed from the sequence if missing
    #[serde(default)]
    pub molecular_weight: Option<f64>,
}

/// Site probabilities computed by an external A-score/PhosphoRS run
#[derive(Serialize, Deserialize, Clone, Debug)]
pub struct SiteProbabilities {
    pub spectrum: String,
    /// Modification mass the sites were scored for
    pub mass: f64,
    /// Scoring method, any method when missing
    #[serde(default)]
    pub method: Option<ProbabilisticScore>,
    /// Scores keyed by 1-based site
    pub scores: BTreeMap<usize, f64>,
}

#[derive(Deserialize, Debug)]
pub struct Project {
    pub spectra: Vec<SpectrumMatch>,
    pub proteins: Vec<ProteinEntry>,
    #[serde(default)]
    pub modifications: ModificationSet,
    #[serde(default)]
    pub site_probabilities: Vec<SiteProbabilities>,
}

impl Project {
    pub fn load<S: AsRef<str>>(path: S) -> anyhow::Result<Self> {
        shaker_core::read_json(path.as_ref()).map_err(anyhow::Error::from)
    }
}

/// Average residue masses
fn residue_mass(aa: u8) -> f64 {
    match aa {
        b'A' => 71.0788,
        b'R' => 156.1875,
        b'N' => 114.1038,
        b'D' => 115.0886,
        b'C' => 103.1388,
        b'E' => 129.1155,
        b'Q' => 128.1307,
        b'G' => 57.0519,
        b'H' => 137.1411,
        b'I' | b'L' => 113.1594,
        b'K' => 128.1741,
        b'M' => 131.1926,
        b'F' => 147.1766,
        b'P' => 97.1167,
        b'S' => 87.0782,
        b'T' => 101.1051,
        b'W' => 186.2132,
        b'Y' => 163.1760,
        b'V' => 99.1326,
        b'U' => 150.0388,
        b'O' => 237.3018,
        _ => 0.0,
    }
}

const WATER: f64 = 18.01528;

/// Protein sequences of the searched database
pub struct ProteinDatabase {
    proteins: Vec<ProteinEntry>,
    index: FnvHashMap<String, usize>,
    decoy_tag: String,
    n_targets: usize,
    target_decoy: bool,
    /// Parent proteins already looked up
    parents: Mutex<FnvHashMap<String, Vec<String>>>,
}

impl ProteinDatabase {
    pub fn new(proteins: Vec<ProteinEntry>, decoy_tag: &str) -> Self {
        let index = proteins
            .iter()
            .enumerate()
            .map(|(ix, entry)| (entry.accession.clone(), ix))
            .collect();
        let n_targets = proteins
            .iter()
            .filter(|entry| !entry.accession.starts_with(decoy_tag))
            .count();
        Self {
            target_decoy: n_targets < proteins.len(),
            proteins,
            index,
            decoy_tag: decoy_tag.into(),
            n_targets,
            parents: Mutex::new(FnvHashMap::default()),
        }
    }

    fn entry(&self, accession: &str) -> Option<&ProteinEntry> {
        self.index.get(accession).map(|ix| &self.proteins[*ix])
    }
}

impl SequenceProvider for ProteinDatabase {
    fn sequence(&self, accession: &str) -> Option<Arc<str>> {
        self.entry(accession).map(|entry| Arc::from(entry.sequence.as_str()))
    }

    fn header(&self, accession: &str) -> Option<ProteinHeader> {
        self.entry(accession).map(|entry| ProteinHeader {
            evidence_level: entry.evidence_level,
            description: entry.description.clone(),
            gene_name: entry.gene_name.clone(),
        })
    }

    fn molecular_weight(&self, accession: &str) -> Option<f64> {
        self.entry(accession).map(|entry| {
            entry.molecular_weight.unwrap_or_else(|| {
                entry.sequence.bytes().map(residue_mass).sum::<f64>() + WATER
            })
        })
    }

    fn is_decoy(&self, accession: &str) -> bool {
        accession.starts_with(&self.decoy_tag)
    }

    fn parent_proteins(&self, peptide: &str) -> Vec<String> {
        if let Ok(parents) = self.parents.lock() {
            if let Some(accessions) = parents.get(peptide) {
                return accessions.clone();
            }
        }
        let accessions = self
            .proteins
            .iter()
            .filter(|entry| entry.sequence.contains(peptide))
            .map(|entry| entry.accession.clone())
            .collect::<Vec<_>>();
        if let Ok(mut parents) = self.parents.lock() {
            parents.insert(peptide.into(), accessions.clone());
        }
        accessions
    }

    fn n_target_sequences(&self) -> usize {
        self.n_targets
    }

    fn is_target_decoy(&self) -> bool {
        self.target_decoy
    }

    fn shrink_caches(&self) {
        if let Ok(mut parents) = self.parents.lock() {
            log::debug!("- dropping {} cached peptide mappings", parents.len());
            parents.clear();
            parents.shrink_to_fit();
        }
    }
}

/// Site probabilities of the project, keyed by spectrum
#[derive(Default)]
pub struct SiteTable {
    sites: FnvHashMap<String, Vec<SiteProbabilities>>,
}

impl SiteTable {
    pub fn new(entries: Vec<SiteProbabilities>) -> Self {
        let mut sites: FnvHashMap<String, Vec<SiteProbabilities>> = FnvHashMap::default();
        for entry in entries {
            sites.entry(entry.spectrum.clone()).or_default().push(entry);
        }
        Self { sites }
    }

    pub fn is_empty(&self) -> bool {
        self.sites.is_empty()
    }
}

impl SiteProbabilityProvider for SiteTable {
    fn site_scores(
        &self,
        method: ProbabilisticScore,
        spectrum_key: &str,
        _: &PeptideAssumption,
        candidates: &[&Modification],
        _: usize,
    ) -> Option<BTreeMap<usize, f64>> {
        let mass = candidates.first()?.mass_key();
        self.sites
            .get(spectrum_key)?
            .iter()
            .filter(|entry| entry.method.map(|m| m == method).unwrap_or(true))
            .find(|entry| shaker_core::modification::MassKey::new(entry.mass) == mass)
            .map(|entry| entry.scores.clone())
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn database() -> ProteinDatabase {
        let entry = |accession: &str, sequence: &str| ProteinEntry {
            accession: accession.into(),
            sequence: sequence.into(),
            evidence_level: Some(1),
            description: None,
            gene_name: None,
            molecular_weight: None,
        };
        ProteinDatabase::new(
            vec![
                entry("P1", "MRLEPTIDEK"),
                entry("P2", "LEPTIDEKGG"),
                entry("rev_P1", "KEDITPELRM"),
            ],
            "rev_",
        )
    }

    #[test]
    fn sequences() {
        let db = database();
        assert!(db.is_target_decoy());
        assert_eq!(db.n_target_sequences(), 2);
        assert!(db.is_decoy("rev_P1"));
        assert_eq!(db.parent_proteins("LEPTIDEK"), vec!["P1", "P2"]);
        db.shrink_caches();
        assert_eq!(db.parent_proteins("LEPTIDEK"), vec!["P1", "P2"]);
        assert_eq!(db.header("P1").unwrap().evidence_level, Some(1));

        let mw = db.molecular_weight("P1").unwrap();
        assert!((mw - 1231.4).abs() < 1.0, "{}", mw);
    }

    #[test]
    fn site_probabilities_by_mass() {
        let table = SiteTable::new(vec![SiteProbabilities {
            spectrum: "s1".into(),
            mass: 79.966331,
            method: Some(ProbabilisticScore::PhosphoRs),
            scores: BTreeMap::from([(4, 99.0)]),
        }]);
        let phospho = Modification {
            name: "Phospho".into(),
            mass: 79.96633,
            specificity: Vec::new(),
        };
        let assumption: PeptideAssumption = serde_json::from_str(
            r#"{ "peptide": { "sequence": "PEPSK" }, "charge": 2, "engine": "comet", "score": 0.1 }"#,
        )
        .unwrap();
        let scores = table.site_scores(
            ProbabilisticScore::PhosphoRs,
            "s1",
            &assumption,
            &[&phospho],
            1,
        );
        assert_eq!(scores, Some(BTreeMap::from([(4, 99.0)])));
        assert!(table
            .site_scores(ProbabilisticScore::AScore, "s1", &assumption, &[&phospho], 1)
            .is_none());
    }
}
