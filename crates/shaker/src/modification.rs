use std::{
    collections::BTreeMap,
    fmt::{Display, Write},
    str::FromStr,
};

use serde::{Deserialize, Serialize};

pub const VALID_AA: [u8; 22] = [
    b'A', b'C', b'D', b'E', b'F', b'G', b'H', b'I', b'K', b'L', b'M', b'N', b'P', b'Q', b'R', b'S',
    b'T', b'V', b'W', b'Y', b'U', b'O',
];

#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum ModificationSpecificity {
    PeptideN(Option<u8>),
    PeptideC(Option<u8>),
    ProteinN(Option<u8>),
    ProteinC(Option<u8>),
    Residue(u8),
}

impl Display for ModificationSpecificity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let r = match self {
            ModificationSpecificity::PeptideN(r) => {
                f.write_char('^')?;
                *r
            }
            ModificationSpecificity::PeptideC(r) => {
                f.write_char('$')?;
                *r
            }
            ModificationSpecificity::ProteinN(r) => {
                f.write_char('[')?;
                *r
            }
            ModificationSpecificity::ProteinC(r) => {
                f.write_char(']')?;
                *r
            }
            ModificationSpecificity::Residue(r) => Some(*r),
        };

        if let Some(r) = r {
            f.write_char(r as char)?;
        }

        Ok(())
    }
}

impl Serialize for ModificationSpecificity {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: serde::Serializer,
    {
        serializer.serialize_str(&self.to_string())
    }
}

impl<'de> Deserialize<'de> for ModificationSpecificity {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        let s = String::deserialize(deserializer)?;
        s.parse().map_err(|e: InvalidModification| {
            serde::de::Error::custom(format!("invalid modification specificity: {:?}", e))
        })
    }
}

#[derive(Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InvalidModification {
    Empty,
    InvalidResidue(char),
    TooLong(String),
}

impl FromStr for ModificationSpecificity {
    type Err = InvalidModification;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        if s.len() > 2 {
            return Err(InvalidModification::TooLong(s.into()));
        }
        if let Some(rest) = s.strip_prefix('^') {
            return Ok(ModificationSpecificity::PeptideN(
                rest.chars().next().map(|ch| ch as u8),
            ));
        }
        if let Some(rest) = s.strip_prefix('$') {
            return Ok(ModificationSpecificity::PeptideC(
                rest.chars().next().map(|ch| ch as u8),
            ));
        }
        if let Some(rest) = s.strip_prefix('[') {
            return Ok(ModificationSpecificity::ProteinN(
                rest.chars().next().map(|ch| ch as u8),
            ));
        }
        if let Some(rest) = s.strip_prefix(']') {
            return Ok(ModificationSpecificity::ProteinC(
                rest.chars().next().map(|ch| ch as u8),
            ));
        }
        match s.chars().next() {
            Some(c) => {
                if VALID_AA.contains(&(c as u8)) {
                    Ok(ModificationSpecificity::Residue(c as u8))
                } else {
                    Err(InvalidModification::InvalidResidue(c))
                }
            }
            None => Err(InvalidModification::Empty),
        }
    }
}

/// Masses are compared at 1e-4 Da
#[derive(Copy, Clone, Debug, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
pub struct MassKey(i64);

impl MassKey {
    pub fn new(mass: f64) -> Self {
        MassKey((mass * 1e4).round() as i64)
    }

    pub fn mass(&self) -> f64 {
        self.0 as f64 / 1e4
    }
}

impl Display for MassKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{:.4}", self.mass())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Modification {
    pub name: String,
    pub mass: f64,
    pub specificity: Vec<ModificationSpecificity>,
}

impl Modification {
    pub fn mass_key(&self) -> MassKey {
        MassKey::new(self.mass)
    }

    /// Modifications targeting amino acids anywhere on the peptide. Only
    /// these are scored for localization.
    pub fn is_site_specific(&self) -> bool {
        !self.specificity.is_empty()
            && self
                .specificity
                .iter()
                .all(|s| matches!(s, ModificationSpecificity::Residue(_)))
    }

    /// 1-based sites of `sequence` this modification can occupy
    pub fn possible_sites(&self, sequence: &str) -> Vec<usize> {
        let bytes = sequence.as_bytes();
        let n = bytes.len();
        let mut sites = Vec::new();
        for spec in &self.specificity {
            match *spec {
                ModificationSpecificity::Residue(r) => sites.extend(
                    bytes
                        .iter()
                        .enumerate()
                        .filter(|(_, aa)| **aa == r)
                        .map(|(ix, _)| ix + 1),
                ),
                ModificationSpecificity::PeptideN(r) | ModificationSpecificity::ProteinN(r) => {
                    if n > 0 && r.map(|r| bytes[0] == r).unwrap_or(true) {
                        sites.push(1);
                    }
                }
                ModificationSpecificity::PeptideC(r) | ModificationSpecificity::ProteinC(r) => {
                    if n > 0 && r.map(|r| bytes[n - 1] == r).unwrap_or(true) {
                        sites.push(n);
                    }
                }
            }
        }
        sites.sort_unstable();
        sites.dedup();
        sites
    }
}

/// Knowledge base of the modifications searched
pub trait ModificationCatalog {
    fn resolve(&self, name: &str) -> Option<&Modification>;

    /// Names of the variable modifications searched, in a stable order
    fn variable_modifications(&self) -> Vec<String>;

    /// Variable modifications sharing the mass of `name`, `name` included
    fn same_mass(&self, name: &str) -> Vec<&Modification> {
        let key = match self.resolve(name) {
            Some(m) => m.mass_key(),
            None => return Vec::new(),
        };
        self.variable_modifications()
            .iter()
            .filter_map(|other| self.resolve(other))
            .filter(|other| other.mass_key() == key)
            .collect()
    }
}

/// In-memory catalog, keyed by name
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ModificationSet {
    pub variable: BTreeMap<String, Modification>,
    #[serde(default)]
    pub fixed: BTreeMap<String, Modification>,
}

impl ModificationSet {
    pub fn add_variable(&mut self, modification: Modification) {
        self.variable
            .insert(modification.name.clone(), modification);
    }

    pub fn add_fixed(&mut self, modification: Modification) {
        self.fixed.insert(modification.name.clone(), modification);
    }
}

impl ModificationCatalog for ModificationSet {
    fn resolve(&self, name: &str) -> Option<&Modification> {
        self.variable.get(name).or_else(|| self.fixed.get(name))
    }

    fn variable_modifications(&self) -> Vec<String> {
        self.variable.keys().cloned().collect()
    }
}

/// Parse specificity strings, dropping invalid ones
pub fn validate_specificities(input: &[String]) -> Vec<ModificationSpecificity> {
    let mut output = Vec::new();
    for s in input {
        match ModificationSpecificity::from_str(s) {
            Ok(m) => output.push(m),
            Err(InvalidModification::Empty) => {
                log::error!("Skipping invalid modification string: empty")
            }
            Err(InvalidModification::InvalidResidue(c)) => {
                log::error!(
                    "Skipping invalid modification string: unrecognized residue ({})",
                    c
                )
            }
            Err(InvalidModification::TooLong(s)) => {
                log::error!("Skipping invalid modification string: {} is too long", s)
            }
        }
    }
    output
}
