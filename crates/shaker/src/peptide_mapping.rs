//! Parallel mapping of peptide sequences to their parent proteins

use crate::model::MatchLevel;
use crate::parameters::MappingSettings;
use crate::progress::ProgressSink;
use crate::provider::SequenceProvider;
use crate::store::MatchStore;
use crate::{Error, Result};
use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Mutex};
use std::time::Duration;
use sysinfo::{System, SystemExt};

const RESULT_TIMEOUT: Duration = Duration::from_secs(3600);

pub trait MemoryMonitor: Sync {
    /// Fraction of the memory currently in use, between 0 and 1
    fn used_fraction(&self) -> f64;
}

/// System-wide memory usage, as reported by `sysinfo`
pub struct SystemMemory {
    system: Mutex<System>,
}

impl Default for SystemMemory {
    fn default() -> Self {
        Self {
            system: Mutex::new(System::new()),
        }
    }
}

impl MemoryMonitor for SystemMemory {
    fn used_fraction(&self) -> f64 {
        let mut system = match self.system.lock() {
            Ok(system) => system,
            Err(poisoned) => poisoned.into_inner(),
        };
        system.refresh_memory();
        match system.total_memory() {
            0 => 0.0,
            total => system.used_memory() as f64 / total as f64,
        }
    }
}

pub struct PeptideMapper<'a> {
    sequences: &'a dyn SequenceProvider,
    monitor: &'a dyn MemoryMonitor,
    settings: MappingSettings,
}

impl<'a> PeptideMapper<'a> {
    pub fn new(
        sequences: &'a dyn SequenceProvider,
        monitor: &'a dyn MemoryMonitor,
        settings: MappingSettings,
    ) -> Self {
        Self {
            sequences,
            monitor,
            settings,
        }
    }

    /// Is memory still above the limit once the sequence caches are shrunk?
    fn under_pressure(&self) -> bool {
        if self.monitor.used_fraction() <= self.settings.memory_limit {
            return false;
        }
        log::warn!(
            "memory usage above {:.0}%, shrinking sequence caches",
            100.0 * self.settings.memory_limit
        );
        self.sequences.shrink_caches();
        self.monitor.used_fraction() > self.settings.memory_limit
    }

    /// Map every sequence of `peptides` to its parent proteins, inserting the
    /// results into `mapped` as they come back from the workers. Results
    /// committed before an error are kept.
    pub fn map(
        &self,
        peptides: &[String],
        mapped: &mut BTreeMap<String, Vec<String>>,
        progress: &dyn ProgressSink,
    ) -> Result<()> {
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(self.settings.threads.max(1))
            .build()
            .map_err(|e| Error::ResourceExhaustion {
                reason: e.to_string(),
            })?;
        progress.set_max(peptides.len());

        let cancel = AtomicBool::new(false);
        let (tx, rx) = mpsc::channel::<(&String, Vec<String>)>();
        let mut commit = |peptide: &String, proteins: Vec<String>| -> Result<()> {
            progress.increment();
            if proteins.is_empty() {
                return Err(Error::invariant(
                    peptide.as_str(),
                    format!("No protein was found for peptide of sequence {}", peptide),
                ));
            }
            mapped.insert(peptide.clone(), proteins);
            Ok(())
        };

        let exhausted = || Error::ResourceExhaustion {
            reason: format!(
                "memory usage above {:.0}% while mapping peptides",
                100.0 * self.settings.memory_limit
            ),
        };

        pool.in_place_scope(|scope| {
            let mut submit = || -> Result<()> {
                for peptide in peptides {
                    if progress.is_canceled() {
                        return Err(Error::Canceled {
                            stage: crate::validation::Stage::InputMap,
                        });
                    }
                    if self.under_pressure() {
                        return Err(exhausted());
                    }
                    let tx = tx.clone();
                    let cancel = &cancel;
                    let sequences = self.sequences;
                    scope.spawn(move |_| {
                        if cancel.load(Ordering::Relaxed) {
                            return;
                        }
                        let _ = tx.send((peptide, sequences.parent_proteins(peptide)));
                    });
                    if self.under_pressure() {
                        return Err(exhausted());
                    }
                    for (peptide, proteins) in rx.try_iter() {
                        commit(peptide, proteins)?;
                    }
                }
                Ok(())
            };
            let submitted = submit();
            drop(tx);
            if let Err(e) = submitted {
                // jobs not yet started return immediately
                cancel.store(true, Ordering::Relaxed);
                return Err(e);
            }

            loop {
                match rx.recv_timeout(RESULT_TIMEOUT) {
                    Ok((peptide, proteins)) => {
                        if let Err(e) = commit(peptide, proteins) {
                            cancel.store(true, Ordering::Relaxed);
                            return Err(e);
                        }
                    }
                    Err(mpsc::RecvTimeoutError::Disconnected) => return Ok(()),
                    Err(mpsc::RecvTimeoutError::Timeout) => {
                        cancel.store(true, Ordering::Relaxed);
                        return Err(Error::ResourceExhaustion {
                            reason: "timed out waiting for peptide mapping results".into(),
                        });
                    }
                }
            }
        })
    }

    /// Fill the parent proteins of every assumption listing none. Returns the
    /// number of distinct sequences mapped.
    pub fn map_assumptions<S: MatchStore + ?Sized>(
        &self,
        store: &mut S,
        progress: &dyn ProgressSink,
    ) -> Result<usize> {
        let keys = store.keys(MatchLevel::Spectrum);
        store.load_matches(MatchLevel::Spectrum, &keys)?;
        let peptides = keys
            .iter()
            .filter_map(|key| store.spectrum_match(key))
            .flat_map(|psm| psm.assumptions.iter())
            .filter(|a| a.peptide.proteins.is_empty())
            .map(|a| a.peptide.sequence.clone())
            .collect::<BTreeSet<_>>()
            .into_iter()
            .collect::<Vec<_>>();
        if peptides.is_empty() {
            return Ok(0);
        }
        log::info!("- mapping {} peptides to proteins", peptides.len());

        let mut mapped = BTreeMap::new();
        let result = self.map(&peptides, &mut mapped, progress);
        for key in &keys {
            if let Some(psm) = store.spectrum_match_mut(key) {
                for assumption in psm
                    .assumptions
                    .iter_mut()
                    .filter(|a| a.peptide.proteins.is_empty())
                {
                    if let Some(proteins) = mapped.get(&assumption.peptide.sequence) {
                        assumption.peptide.proteins = proteins.clone();
                    }
                }
            }
        }
        result.map(|_| mapped.len())
    }
}
