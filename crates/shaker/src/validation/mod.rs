//! The staged validation pipeline
//!
//! [`ValidationEngine::process`] runs the [`Stage`]s in order, skipping the
//! ones already completed. A canceled run keeps its last completed stage so
//! that the next call resumes where it stopped.
//!
//! Scores are probabilities at every level: a PSM is scored by the combined
//! search engine probability of its best assumption, a peptide by the
//! product of the PEPs of its PSMs and a protein group by the product of the
//! PEPs of its peptides. Each level owns a [`SpecificMap`] turning scores
//! into PEPs and FDR thresholds.

use crate::model::{MatchLevel, ValidationLevel};
use crate::parameters::Parameters;
use crate::protein_grouping::{GroupOrdering, GroupResolver, ResolutionSummary};
use crate::provider::Context;
use crate::ptm::aggregation::{peptide_ptms, protein_ptms};
use crate::ptm::localization::SiteLocalizer;
use crate::ptm::scoring::PtmScorer;
use crate::ptm::FlrMap;
use crate::specific_map::{MapSummary, SpecificMap};
use crate::store::MatchStore;
use crate::{Error, Result};
use log::{info, warn};
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt::Display;
use std::time::Instant;

pub mod best_assumption;
pub mod input;
pub mod levels;
pub mod matches;

#[derive(Copy, Clone, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize)]
pub enum Stage {
    InputMap,
    BestAssumption,
    PsmMap,
    PsmPtms,
    Matches,
    GroupResolution,
    PeptideMap,
    ProteinMap,
    Validation,
    PtmAggregation,
    Report,
}

impl Stage {
    pub const ALL: [Stage; 11] = [
        Stage::InputMap,
        Stage::BestAssumption,
        Stage::PsmMap,
        Stage::PsmPtms,
        Stage::Matches,
        Stage::GroupResolution,
        Stage::PeptideMap,
        Stage::ProteinMap,
        Stage::Validation,
        Stage::PtmAggregation,
        Stage::Report,
    ];
}

impl Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Stage::InputMap => "search engine probabilities",
            Stage::BestAssumption => "best assumptions",
            Stage::PsmMap => "PSM map",
            Stage::PsmPtms => "PSM PTM localization",
            Stage::Matches => "peptide and protein matches",
            Stage::GroupResolution => "protein group resolution",
            Stage::PeptideMap => "peptide map",
            Stage::ProteinMap => "protein map",
            Stage::Validation => "validation",
            Stage::PtmAggregation => "peptide and protein PTMs",
            Stage::Report => "report",
        };
        f.write_str(name)
    }
}

/// Summary statistics of a validated project
#[derive(Clone, Debug, Default, Serialize)]
pub struct Metrics {
    /// Target protein groups, best first
    pub protein_keys: Vec<String>,
    pub max_peptides: usize,
    pub max_spectra: usize,
    pub max_mw: f64,
    pub n_validated_proteins: usize,
    pub n_confident_proteins: usize,
    /// Largest number of validated peptides of a protein group, per fraction
    pub max_validated_peptides: BTreeMap<String, usize>,
    /// Largest number of validated PSMs of a protein group, per fraction
    pub max_validated_spectra: BTreeMap<String, usize>,
    /// Validated target PSMs per fraction
    pub validated_psms: BTreeMap<String, usize>,
    pub resolution: ResolutionSummary,
    pub grouping: String,
}

/// Partition summaries of every map, for reporting
#[derive(Clone, Debug, Default, Serialize)]
pub struct MapSummaries {
    pub input: Vec<MapSummary>,
    pub psm: Vec<MapSummary>,
    pub peptide: Vec<MapSummary>,
    pub protein: Vec<MapSummary>,
    /// Keyed by modification mass
    pub flr: Vec<(String, MapSummary)>,
}

pub struct ValidationEngine {
    pub parameters: Parameters,
    input_map: SpecificMap,
    psm_map: SpecificMap,
    peptide_map: SpecificMap,
    protein_map: SpecificMap,
    flr_map: FlrMap,
    completed: Option<Stage>,
    resolution: ResolutionSummary,
    ordering: GroupOrdering,
    metrics: Metrics,
}

impl ValidationEngine {
    pub fn new(parameters: Parameters) -> Self {
        let min_decoys = parameters.min_partition_decoys;
        Self {
            input_map: SpecificMap::new(min_decoys),
            psm_map: SpecificMap::new(min_decoys),
            peptide_map: SpecificMap::new(min_decoys),
            protein_map: SpecificMap::new(min_decoys),
            flr_map: FlrMap::new(min_decoys),
            completed: None,
            resolution: ResolutionSummary::default(),
            ordering: GroupOrdering::default(),
            metrics: Metrics::default(),
            parameters,
        }
    }

    /// Last stage run to completion
    pub fn completed(&self) -> Option<Stage> {
        self.completed
    }

    pub fn metrics(&self) -> &Metrics {
        &self.metrics
    }

    pub fn map(&self, level: MatchLevel) -> &SpecificMap {
        match level {
            MatchLevel::Spectrum => &self.psm_map,
            MatchLevel::Peptide => &self.peptide_map,
            MatchLevel::Protein => &self.protein_map,
        }
    }

    pub fn map_mut(&mut self, level: MatchLevel) -> &mut SpecificMap {
        match level {
            MatchLevel::Spectrum => &mut self.psm_map,
            MatchLevel::Peptide => &mut self.peptide_map,
            MatchLevel::Protein => &mut self.protein_map,
        }
    }

    pub fn flr_map(&self) -> &FlrMap {
        &self.flr_map
    }

    pub fn summaries(&self) -> MapSummaries {
        MapSummaries {
            input: self.input_map.summaries(self.parameters.psm_fdr),
            psm: self.psm_map.summaries(self.parameters.psm_fdr),
            peptide: self.peptide_map.summaries(self.parameters.peptide_fdr),
            protein: self.protein_map.summaries(self.parameters.protein_fdr),
            flr: self
                .flr_map
                .summaries(self.parameters.flr)
                .into_iter()
                .map(|(mass, summary)| (mass.to_string(), summary))
                .collect(),
        }
    }

    /// Run every stage not completed yet
    pub fn process<S: MatchStore + ?Sized>(
        &mut self,
        store: &mut S,
        context: &Context,
    ) -> Result<&Metrics> {
        for stage in Stage::ALL {
            if self.completed.map(|done| stage <= done).unwrap_or(false) {
                continue;
            }
            if context.progress.is_canceled() {
                return Err(Error::Canceled { stage });
            }
            let start = Instant::now();
            self.run(stage, store, context)?;
            self.completed = Some(stage);
            info!("- {} in {:?}ms", stage, start.elapsed().as_millis());
        }
        Ok(&self.metrics)
    }

    /// The PSM map was edited: rebuild peptides, proteins and everything
    /// downstream
    pub fn spectrum_map_changed<S: MatchStore + ?Sized>(
        &mut self,
        store: &mut S,
        context: &Context,
    ) -> Result<&Metrics> {
        self.completed = self.completed.min(Some(Stage::PsmPtms));
        self.process(store, context)
    }

    /// The peptide map was edited: re-attach peptide probabilities, then
    /// rescore the proteins
    pub fn peptide_map_changed<S: MatchStore + ?Sized>(
        &mut self,
        store: &mut S,
        context: &Context,
    ) -> Result<&Metrics> {
        matches::attach_peptide_probabilities(store, &self.peptide_map, context.progress)?;
        self.completed = self.completed.min(Some(Stage::PeptideMap));
        self.process(store, context)
    }

    /// The protein map was edited: re-attach protein probabilities and
    /// revalidate
    pub fn protein_map_changed<S: MatchStore + ?Sized>(
        &mut self,
        store: &mut S,
        context: &Context,
    ) -> Result<&Metrics> {
        matches::attach_protein_probabilities(store, &self.protein_map, context.progress)?;
        self.completed = self.completed.min(Some(Stage::ProteinMap));
        self.process(store, context)
    }

    fn run<S: MatchStore + ?Sized>(
        &mut self,
        stage: Stage,
        store: &mut S,
        context: &Context,
    ) -> Result<()> {
        let enzyme = context.enzyme.enzyme();
        match stage {
            Stage::InputMap => {
                input::search_engine_probabilities(store, &mut self.input_map, context)
            }
            Stage::BestAssumption => {
                let found = best_assumption::select_best_assumptions(
                    store,
                    &self.parameters.import_filter,
                    context,
                )?;
                info!("- {} best assumptions selected", found);
                Ok(())
            }
            Stage::PsmMap => matches::fill_psm_map(store, &mut self.psm_map, context),
            Stage::PsmPtms => self.psm_ptms(store, context),
            Stage::Matches => {
                matches::attach_psm_probabilities(store, &self.psm_map, context.progress)?;
                matches::build_matches(store, context)
            }
            Stage::GroupResolution => {
                self.resolution = GroupResolver::new(context.sequences, enzyme)
                    .remove_irrelevant_groups(store, context.progress)?;
                Ok(())
            }
            Stage::PeptideMap => {
                matches::fill_peptide_map(store, &mut self.peptide_map, context.progress)?;
                matches::attach_peptide_probabilities(store, &self.peptide_map, context.progress)
            }
            Stage::ProteinMap => {
                matches::score_proteins(store, context.progress)?;
                self.ordering = GroupResolver::new(context.sequences, enzyme)
                    .retain_best_scoring_groups(store, context.progress)?;
                info!("{}", self.ordering.report());
                matches::fill_protein_map(store, &mut self.protein_map, context.progress)?;
                matches::attach_protein_probabilities(store, &self.protein_map, context.progress)
            }
            Stage::Validation => {
                let validator = levels::LevelValidator::new(&self.parameters, context);
                validator.validate(store, MatchLevel::Spectrum, &self.psm_map)?;
                validator.validate(store, MatchLevel::Peptide, &self.peptide_map)?;
                validator.validate(store, MatchLevel::Protein, &self.protein_map)
            }
            Stage::PtmAggregation => {
                peptide_ptms(store, context.modifications, context.progress)?;
                protein_ptms(store, context.sequences, context.progress)
            }
            Stage::Report => {
                self.report_suspicious_partitions();
                self.metrics = self.compute_metrics(store, context);
                Ok(())
            }
        }
    }

    /// Score the sites of every PSM, estimate the false localization rate
    /// and grade the sites, then infer the non-confident ones
    fn psm_ptms<S: MatchStore + ?Sized>(&mut self, store: &mut S, context: &Context) -> Result<()> {
        let scorer = PtmScorer::new(
            context.modifications,
            context.sites,
            self.parameters.probabilistic_score,
        );
        let keys = store.keys(MatchLevel::Spectrum);
        store.load_matches(MatchLevel::Spectrum, &keys)?;
        context.progress.set_max(2 * keys.len());
        self.flr_map.clean();

        for key in &keys {
            if context.progress.is_canceled() {
                return Err(Error::Canceled {
                    stage: Stage::PsmPtms,
                });
            }
            let psm = store
                .spectrum_match_mut(key)
                .ok_or_else(|| Error::missing(MatchLevel::Spectrum, key.as_str()))?;
            // a resumed run must not score sites moved by an earlier inference
            psm.restore_reported_sites();
            scorer.score(psm)?;
            if self.parameters.estimate_flr {
                for point in scorer.flr_points(psm)? {
                    self.flr_map
                        .add_point(point.mass, point.charge, point.score, point.decoy);
                }
            }
            context.progress.increment();
        }

        if self.parameters.estimate_flr {
            // unestimable partitions fall back to the user threshold
            self.flr_map.estimate_probabilities();
        }

        let localizer =
            SiteLocalizer::new(context.modifications, context.enzyme.enzyme(), &self.parameters);
        for key in &keys {
            if context.progress.is_canceled() {
                return Err(Error::Canceled {
                    stage: Stage::PsmPtms,
                });
            }
            let psm = store
                .spectrum_match_mut(key)
                .ok_or_else(|| Error::missing(MatchLevel::Spectrum, key.as_str()))?;
            localizer.assign_site_confidence(psm, &self.flr_map)?;
            context.progress.increment();
        }
        let inferred = localizer.infer_sites(store, context.progress)?;
        info!("- {} modification sites inferred", inferred);
        Ok(())
    }

    fn report_suspicious_partitions(&self) {
        let maps = [
            ("PSM", &self.psm_map),
            ("peptide", &self.peptide_map),
            ("protein", &self.protein_map),
        ];
        for (level, map) in maps {
            for partition in map.suspicious_partitions() {
                warn!(
                    "{} partition {} holds too few decoys for a reliable estimate",
                    level, partition
                );
            }
        }
    }

    fn compute_metrics<S: MatchStore + ?Sized>(&self, store: &S, context: &Context) -> Metrics {
        let mut metrics = Metrics {
            protein_keys: self.ordering.protein_keys.clone(),
            max_peptides: self.ordering.max_peptides,
            max_spectra: self.ordering.max_spectra,
            max_mw: self.ordering.max_mw,
            resolution: self.resolution,
            grouping: self.ordering.report(),
            ..Default::default()
        };

        for psm in store
            .keys(MatchLevel::Spectrum)
            .iter()
            .filter_map(|key| store.spectrum_match(key))
            .filter(|psm| psm.validation.level.is_validated())
            .filter(|psm| {
                psm.best
                    .as_ref()
                    .map(|best| !best.peptide.is_decoy(context.sequences))
                    .unwrap_or(false)
            })
        {
            *metrics.validated_psms.entry(psm.fraction.clone()).or_default() += 1;
        }

        for protein in store
            .keys(MatchLevel::Protein)
            .iter()
            .filter_map(|key| store.protein_match(key))
            .filter(|protein| !protein.decoy)
        {
            match protein.validation.level {
                ValidationLevel::Confident => {
                    metrics.n_validated_proteins += 1;
                    metrics.n_confident_proteins += 1;
                }
                ValidationLevel::Doubtful => metrics.n_validated_proteins += 1,
                _ => continue,
            }

            let mut peptides: BTreeMap<&str, usize> = BTreeMap::new();
            let mut spectra: BTreeMap<&str, usize> = BTreeMap::new();
            for peptide in protein
                .peptides
                .iter()
                .filter_map(|key| store.peptide_match(key))
                .filter(|peptide| peptide.validation.level.is_validated())
            {
                let mut fractions = Vec::new();
                for psm in peptide
                    .spectra
                    .iter()
                    .filter_map(|key| store.spectrum_match(key))
                    .filter(|psm| psm.validation.level.is_validated())
                {
                    *spectra.entry(psm.fraction.as_str()).or_default() += 1;
                    fractions.push(psm.fraction.as_str());
                }
                fractions.sort_unstable();
                fractions.dedup();
                for fraction in fractions {
                    *peptides.entry(fraction).or_default() += 1;
                }
            }
            for (fraction, n) in peptides {
                let max = metrics
                    .max_validated_peptides
                    .entry(fraction.to_string())
                    .or_default();
                *max = (*max).max(n);
            }
            for (fraction, n) in spectra {
                let max = metrics
                    .max_validated_spectra
                    .entry(fraction.to_string())
                    .or_default();
                *max = (*max).max(n);
            }
        }
        metrics
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;
    use crate::enzyme::Enzyme;
    use crate::model::{Peptide, PeptideAssumption, SpectrumMatch};
    use crate::modification::ModificationSet;
    use crate::progress::LogProgress;
    use crate::provider::{ProteinHeader, SequenceProvider, StoredAnnotations};
    use crate::store::MemoryStore;
    use std::sync::Arc;

    /// Protein sequences keyed by accession, decoys prefixed with `rev_`
    pub struct Proteins {
        pub sequences: BTreeMap<String, String>,
        pub n_targets: usize,
        pub target_decoy: bool,
    }

    impl Default for Proteins {
        fn default() -> Self {
            let sequences = [
                ("P1", "MKPEPTIDEKAAGSPEPTIDER"),
                ("P2", "MKPEPTIDEKLLQEPTIDEK"),
                ("rev_P1", "REDITPEPSGAAKEDITPEPKM"),
            ];
            Self {
                sequences: sequences
                    .iter()
                    .map(|(a, s)| (a.to_string(), s.to_string()))
                    .collect(),
                n_targets: 5000,
                target_decoy: true,
            }
        }
    }

    impl SequenceProvider for Proteins {
        fn sequence(&self, accession: &str) -> Option<Arc<str>> {
            self.sequences.get(accession).map(|s| Arc::from(s.as_str()))
        }

        fn header(&self, _: &str) -> Option<ProteinHeader> {
            None
        }

        fn molecular_weight(&self, accession: &str) -> Option<f64> {
            self.sequences.get(accession).map(|s| s.len() as f64 * 110.0)
        }

        fn is_decoy(&self, accession: &str) -> bool {
            accession.starts_with("rev_")
        }

        fn parent_proteins(&self, peptide: &str) -> Vec<String> {
            self.sequences
                .iter()
                .filter(|(_, sequence)| sequence.contains(peptide))
                .map(|(accession, _)| accession.clone())
                .collect()
        }

        fn n_target_sequences(&self) -> usize {
            self.n_targets
        }

        fn is_target_decoy(&self) -> bool {
            self.target_decoy
        }
    }

    pub struct Fixture {
        pub proteins: Proteins,
        pub modifications: ModificationSet,
        pub enzyme: Enzyme,
        pub progress: LogProgress,
    }

    impl Default for Fixture {
        fn default() -> Self {
            Self {
                proteins: Proteins::default(),
                modifications: crate::ptm::scoring::test::catalog(),
                enzyme: Enzyme::trypsin().expect("trypsin is a valid enzyme"),
                progress: LogProgress::default(),
            }
        }
    }

    pub fn context(fixture: &Fixture) -> Context<'_> {
        Context {
            sequences: &fixture.proteins,
            spectra: &StoredAnnotations,
            modifications: &fixture.modifications,
            enzyme: &fixture.enzyme,
            sites: None,
            progress: &fixture.progress,
        }
    }

    fn psm(key: &str, sequence: &str, accession: &str, charge: u8, score: f64) -> SpectrumMatch {
        let mut peptide = Peptide::new(sequence);
        peptide.proteins.push(accession.into());
        let mut psm = SpectrumMatch::new(key, "run1");
        psm.assumptions.push(PeptideAssumption {
            peptide,
            charge,
            engine: "comet".into(),
            rank: 1,
            score,
            probability: 1.0,
            fragment_coverage: Some(0.5),
            precursor_error: Some(1.0),
        });
        psm
    }

    fn store() -> MemoryStore {
        let mut psms = Vec::new();
        for i in 0..40 {
            psms.push(psm(&format!("t{}", i), "PEPTIDEK", "P1", 2, i as f64 * 1e-4));
        }
        for i in 0..10 {
            psms.push(psm(&format!("d{}", i), "EDITPEPK", "rev_P1", 2, 0.5 + i as f64 * 1e-3));
        }
        psms.into_iter().collect()
    }

    #[test]
    fn canceled_runs_resume() {
        let fixture = Fixture::default();
        let mut store = store();
        let mut engine = ValidationEngine::new(Parameters::default());
        fixture.progress.cancel();
        let err = engine.process(&mut store, &context(&fixture)).unwrap_err();
        assert!(matches!(err, Error::Canceled { .. }));
        assert_eq!(engine.completed(), None);

        let fixture = Fixture::default();
        engine.process(&mut store, &context(&fixture)).unwrap();
        assert_eq!(engine.completed(), Some(Stage::Report));
        assert_eq!(store.keys(MatchLevel::Peptide).len(), 2);
    }

    #[test]
    fn map_changes_rewind_the_pipeline() {
        let fixture = Fixture::default();
        let mut store = store();
        let mut engine = ValidationEngine::new(Parameters::default());
        engine.process(&mut store, &context(&fixture)).unwrap();

        let n_validated = engine.metrics().validated_psms.clone();
        engine
            .spectrum_map_changed(&mut store, &context(&fixture))
            .unwrap();
        assert_eq!(engine.metrics().validated_psms, n_validated);
        engine
            .protein_map_changed(&mut store, &context(&fixture))
            .unwrap();
        assert_eq!(engine.completed(), Some(Stage::Report));
    }
}
