use crate::project::ProteinDatabase;
use crate::Runner;
use itertools::Itertools;
use rayon::prelude::*;
use shaker_core::model::{Peptide, PeptideMatch, ProteinMatch, SpectrumMatch, ValidationParameter};
use shaker_core::provider::SequenceProvider;
use shaker_core::store::MemoryStore;
use std::collections::{BTreeMap, BTreeSet};

fn modifications(peptide: &Peptide) -> String {
    peptide
        .modifications
        .iter()
        .map(|m| format!("{}@{}", m.name, m.site))
        .join(";")
}

fn confident_sites(peptide: &Peptide) -> String {
    peptide
        .modifications
        .iter()
        .filter(|m| m.confident)
        .map(|m| format!("{}@{}", m.name, m.site))
        .join(";")
}

fn protein_sites(sites: &BTreeMap<usize, BTreeSet<String>>) -> String {
    sites
        .iter()
        .flat_map(|(site, names)| names.iter().map(move |name| format!("{}@{}", name, site)))
        .join(";")
}

fn push_validation(record: &mut csv::ByteRecord, validation: &ValidationParameter) {
    record.push_field(ryu::Buffer::new().format(validation.score).as_bytes());
    record.push_field(ryu::Buffer::new().format(validation.probability).as_bytes());
    record.push_field(ryu::Buffer::new().format(validation.confidence()).as_bytes());
    record.push_field(validation.level.to_string().as_bytes());
    record.push_field(
        validation
            .doubtful_reason
            .as_deref()
            .unwrap_or_default()
            .as_bytes(),
    );
    record.push_field(
        itoa::Buffer::new()
            .format(validation.manual_validation as u8)
            .as_bytes(),
    );
}

const VALIDATION_HEADERS: [&str; 6] = [
    "score",
    "posterior_error",
    "confidence",
    "validation",
    "doubtful_reason",
    "manual_validation",
];

impl Runner {
    pub fn serialize_psm(&self, psm: &SpectrumMatch) -> Option<csv::ByteRecord> {
        let best = psm.best.as_ref()?;
        let mut record = csv::ByteRecord::new();
        record.push_field(psm.key.as_bytes());
        record.push_field(psm.fraction.as_bytes());
        record.push_field(best.peptide.sequence.as_bytes());
        record.push_field(modifications(&best.peptide).as_bytes());
        record.push_field(confident_sites(&best.peptide).as_bytes());
        record.push_field(best.peptide.proteins.join(";").as_bytes());
        record.push_field(itoa::Buffer::new().format(best.charge).as_bytes());
        record.push_field(best.engine.as_bytes());
        record.push_field(ryu::Buffer::new().format(best.score).as_bytes());
        record.push_field(
            psm.validation
                .partition
                .as_ref()
                .map(|partition| partition.to_string())
                .unwrap_or_default()
                .as_bytes(),
        );
        push_validation(&mut record, &psm.validation);
        Some(record)
    }

    pub fn write_psms(&self, store: &MemoryStore) -> anyhow::Result<String> {
        let path = self.make_path("psms.tsv");

        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(vec![]);

        let mut headers = csv::ByteRecord::from(vec![
            "spectrum",
            "fraction",
            "peptide",
            "modifications",
            "confident_sites",
            "proteins",
            "charge",
            "engine",
            "engine_score",
            "partition",
        ]);
        headers.extend(VALIDATION_HEADERS);

        wtr.write_byte_record(&headers)?;
        for record in store
            .spectrum_matches()
            .collect::<Vec<_>>()
            .into_par_iter()
            .filter_map(|psm| self.serialize_psm(psm))
            .collect::<Vec<_>>()
        {
            wtr.write_byte_record(&record)?;
        }

        wtr.flush()?;
        let bytes = wtr.into_inner()?;
        std::fs::write(&path, bytes)?;
        Ok(path.display().to_string())
    }

    pub fn serialize_peptide(&self, peptide: &PeptideMatch) -> csv::ByteRecord {
        let mut record = csv::ByteRecord::new();
        record.push_field(peptide.key.as_bytes());
        record.push_field(peptide.peptide.sequence.as_bytes());
        record.push_field(modifications(&peptide.peptide).as_bytes());
        record.push_field(confident_sites(&peptide.peptide).as_bytes());
        record.push_field(peptide.peptide.proteins.join(";").as_bytes());
        record.push_field(itoa::Buffer::new().format(peptide.spectra.len()).as_bytes());
        record.push_field(itoa::Buffer::new().format(peptide.decoy as u8).as_bytes());
        push_validation(&mut record, &peptide.validation);
        record
    }

    pub fn write_peptides(&self, store: &MemoryStore) -> anyhow::Result<String> {
        let path = self.make_path("peptides.tsv");

        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(vec![]);

        let mut headers = csv::ByteRecord::from(vec![
            "key",
            "peptide",
            "modifications",
            "confident_sites",
            "proteins",
            "num_spectra",
            "decoy",
        ]);
        headers.extend(VALIDATION_HEADERS);

        wtr.write_byte_record(&headers)?;
        for record in store
            .peptide_matches()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|peptide| self.serialize_peptide(peptide))
            .collect::<Vec<_>>()
        {
            wtr.write_byte_record(&record)?;
        }

        wtr.flush()?;
        let bytes = wtr.into_inner()?;
        std::fs::write(&path, bytes)?;
        Ok(path.display().to_string())
    }

    pub fn serialize_protein(
        &self,
        protein: &ProteinMatch,
        database: &ProteinDatabase,
    ) -> csv::ByteRecord {
        let header = database.header(&protein.main_accession).unwrap_or_default();
        let mut record = csv::ByteRecord::new();
        record.push_field(protein.key.as_bytes());
        record.push_field(protein.main_accession.as_bytes());
        record.push_field(protein.accessions.join(";").as_bytes());
        record.push_field(header.description.unwrap_or_default().as_bytes());
        record.push_field(header.gene_name.unwrap_or_default().as_bytes());
        record.push_field(
            ryu::Buffer::new()
                .format(
                    database
                        .molecular_weight(&protein.main_accession)
                        .unwrap_or_default()
                        / 1000.0,
                )
                .as_bytes(),
        );
        record.push_field(itoa::Buffer::new().format(protein.peptides.len()).as_bytes());
        record.push_field(protein.validation.inference_class.to_string().as_bytes());
        record.push_field(protein_sites(&protein.ptm.main).as_bytes());
        record.push_field(protein_sites(&protein.ptm.secondary).as_bytes());
        record.push_field(itoa::Buffer::new().format(protein.decoy as u8).as_bytes());
        push_validation(&mut record, &protein.validation);
        record
    }

    pub fn write_proteins(
        &self,
        store: &MemoryStore,
        database: &ProteinDatabase,
    ) -> anyhow::Result<String> {
        let path = self.make_path("proteins.tsv");

        let mut wtr = csv::WriterBuilder::new()
            .delimiter(b'\t')
            .from_writer(vec![]);

        let mut headers = csv::ByteRecord::from(vec![
            "key",
            "main_accession",
            "accessions",
            "description",
            "gene_name",
            "molecular_weight_kda",
            "num_peptides",
            "inference",
            "main_sites",
            "secondary_sites",
            "decoy",
        ]);
        headers.extend(VALIDATION_HEADERS);

        wtr.write_byte_record(&headers)?;
        for record in store
            .protein_matches()
            .collect::<Vec<_>>()
            .into_par_iter()
            .map(|protein| self.serialize_protein(protein, database))
            .collect::<Vec<_>>()
        {
            wtr.write_byte_record(&record)?;
        }

        wtr.flush()?;
        let bytes = wtr.into_inner()?;
        std::fs::write(&path, bytes)?;
        Ok(path.display().to_string())
    }
}
