use crate::input::Settings;
use crate::project::{Project, ProteinDatabase, SiteTable};
use anyhow::Context as _;
use log::info;
use serde::Serialize;
use shaker_core::peptide_mapping::{PeptideMapper, SystemMemory};
use shaker_core::progress::LogProgress;
use shaker_core::provider::{Context, SiteProbabilityProvider, StoredAnnotations};
use shaker_core::store::MemoryStore;
use shaker_core::validation::{MapSummaries, Metrics, ValidationEngine};
use std::path::PathBuf;
use std::time::Instant;

pub struct Runner {
    pub parameters: Settings,
    start: Instant,
}

/// Contents of `results.json`
#[derive(Serialize)]
struct Report<'a> {
    #[serde(flatten)]
    settings: &'a Settings,
    metrics: &'a Metrics,
    maps: MapSummaries,
}

impl Runner {
    pub fn new(parameters: Settings) -> anyhow::Result<Self> {
        Ok(Self {
            parameters,
            start: Instant::now(),
        })
    }

    pub(crate) fn make_path<S: AsRef<str>>(&self, file_name: S) -> PathBuf {
        self.parameters.output_directory.join(file_name.as_ref())
    }

    pub fn run(mut self) -> anyhow::Result<Settings> {
        let project = Project::load(&self.parameters.project)
            .with_context(|| format!("Failed to read project from `{}`", self.parameters.project))?;
        let parameters = &self.parameters.parameters;
        let enzyme = parameters
            .enzyme
            .build()
            .context("`enzyme.cleave_at` must list at least one residue")?;
        info!(
            "loaded {} spectra, {} proteins in {:#?}",
            project.spectra.len(),
            project.proteins.len(),
            self.start.elapsed()
        );

        let database = ProteinDatabase::new(project.proteins, &parameters.decoy_tag);
        let sites = SiteTable::new(project.site_probabilities);
        let progress = LogProgress::default();
        let memory = SystemMemory::default();
        let mut store = project.spectra.into_iter().collect::<MemoryStore>();

        let mapped = PeptideMapper::new(&database, &memory, parameters.mapping)
            .map_assumptions(&mut store, &progress)
            .context("Failed to map peptides to proteins")?;
        info!("mapped {} peptide sequences in {:#?}", mapped, self.start.elapsed());

        let context = Context {
            sequences: &database,
            spectra: &StoredAnnotations,
            modifications: &project.modifications,
            enzyme: &enzyme,
            sites: match sites.is_empty() {
                true => None,
                false => Some(&sites as &dyn SiteProbabilityProvider),
            },
            progress: &progress,
        };

        let mut engine = ValidationEngine::new(parameters.clone());
        engine
            .process(&mut store, &context)
            .context("Failed to validate the project")?;

        let metrics = engine.metrics();
        for (fraction, count) in &metrics.validated_psms {
            info!("{}: validated {} target peptide-spectrum matches", fraction, count);
        }
        info!(
            "validated {} target peptides",
            store
                .peptide_matches()
                .filter(|peptide| !peptide.decoy && peptide.validation.level.is_validated())
                .count()
        );
        info!(
            "validated {} target protein groups ({} confident)",
            metrics.n_validated_proteins, metrics.n_confident_proteins
        );
        log::trace!("writing outputs");

        let psms = self.write_psms(&store)?;
        self.parameters.output_paths.push(psms);
        let peptides = self.write_peptides(&store)?;
        self.parameters.output_paths.push(peptides);
        let proteins = self.write_proteins(&store, &database)?;
        self.parameters.output_paths.push(proteins);

        let path = self.make_path("results.json");
        self.parameters.output_paths.push(path.display().to_string());
        let report = Report {
            settings: &self.parameters,
            metrics: engine.metrics(),
            maps: engine.summaries(),
        };
        println!("{}", serde_json::to_string_pretty(&report)?);
        let bytes = serde_json::to_vec_pretty(&report)?;
        std::fs::write(&path, bytes)?;

        info!("finished in {}s", self.start.elapsed().as_secs());
        Ok(self.parameters)
    }
}
