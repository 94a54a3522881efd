//! User-defined filters downgrading validated matches to doubtful

use crate::model::{PeptideMatch, ProteinMatch, SpectrumMatch};
use crate::provider::SpectrumProvider;
use crate::store::MatchStore;
use serde::{Deserialize, Serialize};

#[derive(Copy, Clone, Debug, PartialEq, Serialize, Deserialize)]
pub enum FilterCriterion {
    /// Absolute precursor error, in ppm
    MaxPrecursorError(f64),
    MinFragmentCoverage(f64),
    MinSpectra(usize),
    MinPeptides(usize),
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct DoubtfulFilter {
    /// Recorded as the doubtful reason of the matches failing the filter
    pub description: String,
    pub criterion: FilterCriterion,
}

/// Measurements a filter can be checked against. Missing values never fail
/// a filter.
#[derive(Copy, Clone, Debug, Default, PartialEq)]
pub struct FilterMetrics {
    pub precursor_error: Option<f64>,
    pub fragment_coverage: Option<f64>,
    pub n_spectra: Option<usize>,
    pub n_peptides: Option<usize>,
}

impl DoubtfulFilter {
    pub fn is_validated(&self, metrics: &FilterMetrics) -> bool {
        match self.criterion {
            FilterCriterion::MaxPrecursorError(max) => metrics
                .precursor_error
                .map(|e| e.abs() <= max)
                .unwrap_or(true),
            FilterCriterion::MinFragmentCoverage(min) => metrics
                .fragment_coverage
                .map(|c| c >= min)
                .unwrap_or(true),
            FilterCriterion::MinSpectra(min) => metrics.n_spectra.map(|n| n >= min).unwrap_or(true),
            FilterCriterion::MinPeptides(min) => {
                metrics.n_peptides.map(|n| n >= min).unwrap_or(true)
            }
        }
    }
}

/// Descriptions of the filters failed by a match, in filter order
pub fn failed_filters<'a>(filters: &'a [DoubtfulFilter], metrics: &FilterMetrics) -> Vec<&'a str> {
    filters
        .iter()
        .filter(|filter| !filter.is_validated(metrics))
        .map(|filter| filter.description.as_str())
        .collect()
}

pub trait Filterable {
    fn filter_metrics<S: MatchStore + ?Sized>(
        &self,
        store: &S,
        spectra: &dyn SpectrumProvider,
    ) -> FilterMetrics;
}

impl Filterable for SpectrumMatch {
    fn filter_metrics<S: MatchStore + ?Sized>(
        &self,
        _: &S,
        spectra: &dyn SpectrumProvider,
    ) -> FilterMetrics {
        match &self.best {
            Some(best) => FilterMetrics {
                precursor_error: Some(spectra.precursor_error(&self.key, best)),
                fragment_coverage: Some(spectra.fragment_coverage(&self.key, best)),
                ..Default::default()
            },
            None => FilterMetrics::default(),
        }
    }
}

impl Filterable for PeptideMatch {
    fn filter_metrics<S: MatchStore + ?Sized>(
        &self,
        _: &S,
        _: &dyn SpectrumProvider,
    ) -> FilterMetrics {
        FilterMetrics {
            n_spectra: Some(self.spectra.len()),
            ..Default::default()
        }
    }
}

impl Filterable for ProteinMatch {
    fn filter_metrics<S: MatchStore + ?Sized>(
        &self,
        store: &S,
        _: &dyn SpectrumProvider,
    ) -> FilterMetrics {
        let n_spectra = self
            .peptides
            .iter()
            .filter_map(|key| store.peptide_match(key))
            .map(|peptide| peptide.spectra.len())
            .sum();
        FilterMetrics {
            n_spectra: Some(n_spectra),
            n_peptides: Some(self.peptides.len()),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn failing_filters_are_listed_in_order() {
        let filters = vec![
            DoubtfulFilter {
                description: "<2 peptides".into(),
                criterion: FilterCriterion::MinPeptides(2),
            },
            DoubtfulFilter {
                description: "High precursor error".into(),
                criterion: FilterCriterion::MaxPrecursorError(10.0),
            },
            DoubtfulFilter {
                description: "<3 spectra".into(),
                criterion: FilterCriterion::MinSpectra(3),
            },
        ];
        let metrics = FilterMetrics {
            n_peptides: Some(1),
            n_spectra: Some(2),
            ..Default::default()
        };
        assert_eq!(
            failed_filters(&filters, &metrics),
            vec!["<2 peptides", "<3 spectra"]
        );
        let metrics = FilterMetrics {
            precursor_error: Some(-12.0),
            ..Default::default()
        };
        assert_eq!(
            failed_filters(&filters, &metrics),
            vec!["High precursor error"]
        );
    }
}
