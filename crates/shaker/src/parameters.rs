use crate::enzyme::Enzyme;
use crate::filter::DoubtfulFilter;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ProbabilisticScore {
    AScore,
    PhosphoRs,
}

#[derive(Deserialize, Serialize, Clone, Debug)]
pub struct EnzymeBuilder {
    pub cleave_at: Option<String>,
    pub restrict: Option<char>,
    pub c_terminal: Option<bool>,
    /// Peptides need only one enzymatic terminus
    pub semi_specific: Option<bool>,
}

impl Default for EnzymeBuilder {
    fn default() -> Self {
        Self {
            cleave_at: Some("KR".into()),
            restrict: Some('P'),
            c_terminal: Some(true),
            semi_specific: Some(false),
        }
    }
}

impl EnzymeBuilder {
    /// `None` when the cleavage specification is empty or invalid
    pub fn build(&self) -> Option<Enzyme> {
        Enzyme::new(
            self.cleave_at.as_deref().unwrap_or("KR"),
            self.restrict,
            self.c_terminal.unwrap_or(true),
            self.semi_specific.unwrap_or(false),
        )
    }
}

/// Acceptance of a candidate identification as a spectrum's best assumption
#[derive(Deserialize, Serialize, Clone, Debug, PartialEq)]
pub struct ImportFilter {
    pub min_charge: u8,
    pub max_charge: u8,
    /// Absolute precursor error, in ppm
    pub max_precursor_error: f64,
}

impl Default for ImportFilter {
    fn default() -> Self {
        Self {
            min_charge: 1,
            max_charge: 8,
            max_precursor_error: 20.0,
        }
    }
}

impl ImportFilter {
    pub fn accepts(&self, charge: u8, precursor_error: f64) -> bool {
        charge >= self.min_charge
            && charge <= self.max_charge
            && precursor_error.abs() <= self.max_precursor_error
    }
}

#[derive(Deserialize, Serialize, Clone, Debug, Default)]
pub struct MappingBuilder {
    /// Worker threads used to map peptides to proteins
    pub threads: Option<usize>,
    /// Fraction of the system memory above which mapping is canceled
    pub memory_limit: Option<f64>,
}

#[derive(Serialize, Clone, Copy, Debug, PartialEq)]
pub struct MappingSettings {
    pub threads: usize,
    pub memory_limit: f64,
}

impl Default for MappingSettings {
    fn default() -> Self {
        Self {
            threads: 4,
            memory_limit: 0.8,
        }
    }
}

#[derive(Deserialize, Default, Clone, Debug)]
/// Validation parameters deserialized from JSON
pub struct Builder {
    /// PSM false discovery rate, in percent
    pub psm_fdr: Option<f64>,
    /// Peptide false discovery rate, in percent
    pub peptide_fdr: Option<f64>,
    /// Protein false discovery rate, in percent
    pub protein_fdr: Option<f64>,
    /// False localization rate, in percent
    pub flr: Option<f64>,
    /// Derive the probabilistic score threshold from the FLR map instead of
    /// using `probabilistic_threshold`
    pub estimate_flr: Option<bool>,
    /// Probabilistic site scoring method, or `null` to only use delta scores
    #[serde(default, with = "nullable")]
    pub probabilistic_score: Option<Option<ProbabilisticScore>>,
    pub probabilistic_threshold: Option<f64>,
    pub delta_threshold: Option<f64>,
    /// Move non-confident sites onto sites confidently localized on related
    /// peptides
    pub align_non_confident: Option<bool>,
    /// Minimal number of target hits scoring better than the best decoy for
    /// a match to be confident
    pub min_target_only: Option<usize>,
    /// Partitions with fewer decoys are pooled together
    pub min_partition_decoys: Option<usize>,
    /// Minimal number of target sequences for a match to be confident
    pub min_database_size: Option<usize>,
    /// Use this prefix for decoy proteins
    pub decoy_tag: Option<String>,
    pub enzyme: Option<EnzymeBuilder>,
    pub import_filter: Option<ImportFilter>,
    pub psm_filters: Option<Vec<DoubtfulFilter>>,
    pub peptide_filters: Option<Vec<DoubtfulFilter>>,
    pub protein_filters: Option<Vec<DoubtfulFilter>>,
    pub mapping: Option<MappingBuilder>,
}

// Distinguish a missing `probabilistic_score` from an explicit `null`
mod nullable {
    use serde::{Deserialize, Deserializer};

    pub fn deserialize<'de, T, D>(deserializer: D) -> Result<Option<Option<T>>, D::Error>
    where
        T: Deserialize<'de>,
        D: Deserializer<'de>,
    {
        Option::<T>::deserialize(deserializer).map(Some)
    }
}

impl Builder {
    pub fn make_parameters(self) -> Parameters {
        let fdr = |value: Option<f64>, name: &str| {
            let value = value.unwrap_or(1.0).abs();
            if value > 10.0 {
                log::warn!("{} of {}% is higher than expected", name, value);
            }
            value
        };

        let mapping = self.mapping.unwrap_or_default();
        let default_mapping = MappingSettings::default();
        let memory_limit = mapping
            .memory_limit
            .unwrap_or(default_mapping.memory_limit)
            .clamp(0.05, 1.0);

        Parameters {
            psm_fdr: fdr(self.psm_fdr, "psm_fdr"),
            peptide_fdr: fdr(self.peptide_fdr, "peptide_fdr"),
            protein_fdr: fdr(self.protein_fdr, "protein_fdr"),
            flr: fdr(self.flr, "flr"),
            estimate_flr: self.estimate_flr.unwrap_or(false),
            probabilistic_score: self
                .probabilistic_score
                .unwrap_or(Some(ProbabilisticScore::PhosphoRs)),
            probabilistic_threshold: self.probabilistic_threshold.unwrap_or(95.0),
            delta_threshold: self.delta_threshold.unwrap_or(95.0),
            align_non_confident: self.align_non_confident.unwrap_or(true),
            min_target_only: self.min_target_only.unwrap_or(100),
            min_partition_decoys: self.min_partition_decoys.unwrap_or(100),
            min_database_size: self.min_database_size.unwrap_or(1000),
            decoy_tag: self.decoy_tag.unwrap_or_else(|| "rev_".into()),
            enzyme: self.enzyme.unwrap_or_default(),
            import_filter: self.import_filter.unwrap_or_default(),
            psm_filters: self.psm_filters.unwrap_or_default(),
            peptide_filters: self.peptide_filters.unwrap_or_default(),
            protein_filters: self.protein_filters.unwrap_or_default(),
            mapping: MappingSettings {
                threads: mapping
                    .threads
                    .unwrap_or(default_mapping.threads)
                    .max(1),
                memory_limit,
            },
        }
    }
}

#[derive(Serialize, Clone, Debug)]
pub struct Parameters {
    pub psm_fdr: f64,
    pub peptide_fdr: f64,
    pub protein_fdr: f64,
    pub flr: f64,
    pub estimate_flr: bool,
    pub probabilistic_score: Option<ProbabilisticScore>,
    pub probabilistic_threshold: f64,
    pub delta_threshold: f64,
    pub align_non_confident: bool,
    pub min_target_only: usize,
    pub min_partition_decoys: usize,
    pub min_database_size: usize,
    pub decoy_tag: String,
    pub enzyme: EnzymeBuilder,
    pub import_filter: ImportFilter,
    pub psm_filters: Vec<DoubtfulFilter>,
    pub peptide_filters: Vec<DoubtfulFilter>,
    pub protein_filters: Vec<DoubtfulFilter>,
    pub mapping: MappingSettings,
}

impl Default for Parameters {
    fn default() -> Self {
        Builder::default().make_parameters()
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let parameters = Parameters::default();
        assert_eq!(parameters.psm_fdr, 1.0);
        assert_eq!(
            parameters.probabilistic_score,
            Some(ProbabilisticScore::PhosphoRs)
        );
        assert_eq!(parameters.min_target_only, 100);
        assert_eq!(parameters.mapping.memory_limit, 0.8);
        assert!(parameters.enzyme.build().is_some());
    }

    #[test]
    fn parse_json() {
        let builder: Builder = serde_json::from_str(
            r#"{
                "psm_fdr": 5.0,
                "probabilistic_score": null,
                "mapping": { "threads": 0 },
                "protein_filters": [
                    { "description": "<2 peptides", "criterion": { "MinPeptides": 2 } }
                ]
            }"#,
        )
        .unwrap();
        let parameters = builder.make_parameters();
        assert_eq!(parameters.psm_fdr, 5.0);
        assert_eq!(parameters.peptide_fdr, 1.0);
        assert_eq!(parameters.probabilistic_score, None);
        assert_eq!(parameters.mapping.threads, 1);
        assert_eq!(parameters.protein_filters.len(), 1);

        let builder: Builder =
            serde_json::from_str(r#"{ "probabilistic_score": "AScore" }"#).unwrap();
        assert_eq!(
            builder.make_parameters().probabilistic_score,
            Some(ProbabilisticScore::AScore)
        );
    }
}
