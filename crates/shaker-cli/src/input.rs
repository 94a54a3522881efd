use anyhow::{ensure, Context};
use clap::ArgMatches;
use serde::{Deserialize, Serialize};
use shaker_core::parameters::{Builder, MappingBuilder, Parameters};
use std::path::PathBuf;

#[derive(Serialize)]
/// Actual validation settings - may include overrides or default values not set by user
pub struct Settings {
    pub version: String,
    pub parameters: Parameters,
    pub project: String,
    pub output_paths: Vec<String>,

    #[serde(skip_serializing)]
    pub output_directory: PathBuf,
}

#[derive(Deserialize)]
/// Input validation parameters deserialized from JSON file
pub struct Input {
    #[serde(flatten)]
    validation: Builder,
    project: Option<String>,
    output_directory: Option<String>,
}

impl Input {
    pub fn from_arguments(matches: ArgMatches) -> anyhow::Result<Self> {
        let path = matches
            .get_one::<String>("parameters")
            .context("`parameters` must be set")?;
        let mut input = Input::load(path)
            .with_context(|| format!("Failed to read parameters from `{path}`"))?;

        // Handle JSON configuration overrides
        if let Some(output_directory) = matches.get_one::<String>("output_directory") {
            log::trace!("overriding `output_directory` parameter.");
            input.output_directory = Some(output_directory.into());
        }
        if let Some(project) = matches.get_one::<String>("project") {
            log::trace!("overriding `project` parameter.");
            input.project = Some(project.into());
        }
        if let Some(fdr) = matches.get_one::<f64>("fdr").copied() {
            log::trace!("overriding `psm_fdr`, `peptide_fdr` and `protein_fdr` parameters.");
            input.validation.psm_fdr = Some(fdr);
            input.validation.peptide_fdr = Some(fdr);
            input.validation.protein_fdr = Some(fdr);
        }
        if let Some(threads) = matches.get_one::<u16>("threads").copied() {
            log::trace!("overriding `mapping.threads` parameter.");
            input
                .validation
                .mapping
                .get_or_insert_with(MappingBuilder::default)
                .threads = Some(threads as usize);
        }

        // avoid to later fail if these parameters are not set (but doesn't check if files exist)
        ensure!(
            input.output_directory.is_some(),
            "`output_directory` must be set. For more information try '--help'"
        );
        ensure!(
            input.project.is_some(),
            "`project` must be set. For more information try '--help'"
        );

        Ok(input)
    }

    pub fn load<S: AsRef<str>>(path: S) -> anyhow::Result<Self> {
        shaker_core::read_json(path.as_ref()).map_err(anyhow::Error::from)
    }

    pub fn build(mut self) -> anyhow::Result<Settings> {
        let mapping = self
            .validation
            .mapping
            .get_or_insert_with(MappingBuilder::default);
        if mapping.threads.is_none() {
            mapping.threads = Some(num_cpus::get());
        }
        let parameters = self.validation.make_parameters();

        if parameters.delta_threshold < 0.0 || parameters.probabilistic_threshold < 0.0 {
            log::warn!("site localization thresholds are expected to be percentages");
        }
        if parameters.min_partition_decoys == 0 {
            log::warn!("`min_partition_decoys: 0` disables pooling of suspicious partitions");
        }

        let project = self.project.context("'project' must be provided!")?;

        let output_directory = match self.output_directory {
            Some(path) => {
                let path = PathBuf::from(path);
                std::fs::create_dir_all(&path)?;
                path
            }
            None => std::env::current_dir()?,
        };

        Ok(Settings {
            version: clap::crate_version!().into(),
            parameters,
            project,
            output_paths: Vec::new(),
            output_directory,
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn flattened_parameters() {
        let input: Input = serde_json::from_str(
            r#"{
                "psm_fdr": 5.0,
                "probabilistic_score": null,
                "mapping": { "memory_limit": 2.0 },
                "project": "project.json",
                "output_directory": "out"
            }"#,
        )
        .unwrap();
        let parameters = input.validation.make_parameters();
        assert_eq!(parameters.psm_fdr, 5.0);
        assert_eq!(parameters.peptide_fdr, 1.0);
        assert_eq!(parameters.probabilistic_score, None);
        assert_eq!(parameters.mapping.memory_limit, 1.0);
        assert_eq!(input.project.as_deref(), Some("project.json"));
    }
}
