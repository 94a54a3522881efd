use super::Stage;
use crate::fdr::ThresholdResult;
use crate::filter::{failed_filters, DoubtfulFilter, Filterable, FilterMetrics};
use crate::model::{MatchLevel, ValidationLevel, ValidationParameter};
use crate::parameters::Parameters;
use crate::provider::Context;
use crate::specific_map::SpecificMap;
use crate::store::MatchStore;
use crate::{Error, Result};
use std::collections::BTreeMap;

/// Validation outcome of a match
#[derive(Clone, Debug, PartialEq)]
pub struct Outcome {
    pub level: ValidationLevel,
    pub doubtful_reason: Option<String>,
}

pub struct LevelValidator<'a> {
    parameters: &'a Parameters,
    context: &'a Context<'a>,
}

impl<'a> LevelValidator<'a> {
    pub fn new(parameters: &'a Parameters, context: &'a Context<'a>) -> Self {
        Self {
            parameters,
            context,
        }
    }

    fn fdr(&self, level: MatchLevel) -> f64 {
        match level {
            MatchLevel::Spectrum => self.parameters.psm_fdr,
            MatchLevel::Peptide => self.parameters.peptide_fdr,
            MatchLevel::Protein => self.parameters.protein_fdr,
        }
    }

    fn filters(&self, level: MatchLevel) -> &'a [DoubtfulFilter] {
        match level {
            MatchLevel::Spectrum => &self.parameters.psm_filters,
            MatchLevel::Peptide => &self.parameters.peptide_filters,
            MatchLevel::Protein => &self.parameters.protein_filters,
        }
    }

    /// Grade a match against the threshold of its partition
    pub fn outcome(
        &self,
        validation: &ValidationParameter,
        threshold: Option<&ThresholdResult>,
        failed: &[&str],
    ) -> Outcome {
        if !self.context.sequences.is_target_decoy() {
            return Outcome {
                level: ValidationLevel::None,
                doubtful_reason: None,
            };
        }
        let threshold = match threshold {
            Some(threshold) if !threshold.no_validated => threshold,
            _ => {
                return Outcome {
                    level: ValidationLevel::NotValidated,
                    doubtful_reason: None,
                }
            }
        };
        if validation.score > threshold.score_limit {
            return Outcome {
                level: ValidationLevel::NotValidated,
                doubtful_reason: None,
            };
        }

        let mut reasons = failed.iter().map(|s| s.to_string()).collect::<Vec<_>>();
        if validation.confidence() < threshold.confidence_threshold() {
            reasons.push("Low confidence".into());
        }
        if !threshold.enough_hits(self.parameters.min_target_only) {
            reasons.push("Low number of hits".into());
        }
        if self.context.sequences.n_target_sequences() < self.parameters.min_database_size {
            reasons.push("Database too small".into());
        }
        match reasons.is_empty() {
            true => Outcome {
                level: ValidationLevel::Confident,
                doubtful_reason: None,
            },
            false => Outcome {
                level: ValidationLevel::Doubtful,
                doubtful_reason: Some(reasons.join(", ")),
            },
        }
    }

    fn metrics<S: MatchStore + ?Sized>(&self, store: &S, level: MatchLevel, key: &str) -> FilterMetrics {
        let spectra = self.context.spectra;
        match level {
            MatchLevel::Spectrum => store
                .spectrum_match(key)
                .map(|m| m.filter_metrics(store, spectra)),
            MatchLevel::Peptide => store
                .peptide_match(key)
                .map(|m| m.filter_metrics(store, spectra)),
            MatchLevel::Protein => store
                .protein_match(key)
                .map(|m| m.filter_metrics(store, spectra)),
        }
        .unwrap_or_default()
    }

    /// Set the validation level of every match of `level` that was not
    /// validated manually
    pub fn validate<S: MatchStore + ?Sized>(
        &self,
        store: &mut S,
        level: MatchLevel,
        map: &SpecificMap,
    ) -> Result<()> {
        let thresholds: BTreeMap<_, _> = map.thresholds(self.fdr(level));
        let filters = self.filters(level);
        let progress = self.context.progress;
        let keys = store.keys(level);
        store.load_matches(level, &keys)?;
        progress.set_max(keys.len());

        for key in &keys {
            if progress.is_canceled() {
                return Err(Error::Canceled {
                    stage: Stage::Validation,
                });
            }
            progress.increment();
            let validation = store
                .validation(level, key)
                .ok_or_else(|| Error::missing(level, key.as_str()))?;
            if validation.manual_validation {
                continue;
            }
            let threshold = validation
                .partition
                .as_ref()
                .and_then(|partition| thresholds.get(&map.corrected_partition(partition)));
            let metrics = self.metrics(store, level, key);
            let outcome = self.outcome(validation, threshold, &failed_filters(filters, &metrics));
            if let Some(validation) = store.validation_mut(level, key) {
                validation.level = outcome.level;
                validation.doubtful_reason = outcome.doubtful_reason;
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::validation::test::{context, Fixture};

    fn threshold() -> ThresholdResult {
        ThresholdResult {
            score_limit: 0.01,
            confidence_limit: 90.0,
            no_validated: false,
            n_target_only: 500,
            n_max: 10,
            n_validated: 600,
            n_false_positives: 5,
            resolution: 2.0,
        }
    }

    fn validation(score: f64, probability: f64) -> ValidationParameter {
        ValidationParameter {
            score,
            probability,
            ..Default::default()
        }
    }

    #[test]
    fn reasons_in_order() {
        let fixture = Fixture::default();
        let context = context(&fixture);
        let parameters = Parameters::default();
        let validator = LevelValidator::new(&parameters, &context);
        let threshold = threshold();

        let outcome = validator.outcome(&validation(0.001, 0.0), Some(&threshold), &[]);
        assert_eq!(outcome.level, ValidationLevel::Confident);

        let outcome = validator.outcome(&validation(0.001, 0.09), Some(&threshold), &["<2 peptides"]);
        assert_eq!(outcome.level, ValidationLevel::Doubtful);
        assert_eq!(
            outcome.doubtful_reason.as_deref(),
            Some("<2 peptides, Low confidence")
        );

        let sparse = ThresholdResult {
            n_target_only: 50,
            ..threshold
        };
        let outcome = validator.outcome(&validation(0.001, 0.0), Some(&sparse), &[]);
        assert_eq!(outcome.doubtful_reason.as_deref(), Some("Low number of hits"));

        let outcome = validator.outcome(&validation(0.02, 0.0), Some(&threshold), &[]);
        assert_eq!(outcome.level, ValidationLevel::NotValidated);

        let nothing = ThresholdResult {
            no_validated: true,
            ..threshold
        };
        let outcome = validator.outcome(&validation(0.0, 0.0), Some(&nothing), &[]);
        assert_eq!(outcome.level, ValidationLevel::NotValidated);
        let outcome = validator.outcome(&validation(0.0, 0.0), None, &[]);
        assert_eq!(outcome.level, ValidationLevel::NotValidated);
    }

    #[test]
    fn small_databases_and_target_only_searches() {
        let mut fixture = Fixture::default();
        fixture.proteins.n_targets = 10;
        let context = context(&fixture);
        let parameters = Parameters::default();
        let validator = LevelValidator::new(&parameters, &context);
        let outcome = validator.outcome(&validation(0.001, 0.0), Some(&threshold()), &[]);
        assert_eq!(outcome.doubtful_reason.as_deref(), Some("Database too small"));

        fixture.proteins.target_decoy = false;
        let context = crate::validation::test::context(&fixture);
        let validator = LevelValidator::new(&parameters, &context);
        let outcome = validator.outcome(&validation(0.001, 0.0), Some(&threshold()), &[]);
        assert_eq!(outcome.level, ValidationLevel::None);
    }
}
