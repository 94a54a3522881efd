pub mod enzyme;
pub mod fdr;
pub mod filter;
pub mod model;
pub mod modification;
pub mod parameters;
pub mod peptide_mapping;
pub mod protein_grouping;
pub mod provider;
pub mod progress;
pub mod ptm;
pub mod specific_map;
pub mod store;
pub mod validation;

use model::MatchLevel;
use validation::Stage;

#[derive(Debug)]
pub enum Error {
    /// A scoring partition holds no decoy hits, so no PEP or FDR can be derived
    EstimationUnsupported { partition: String },
    /// A fatal inconsistency in the identification results
    InvariantViolation { key: String, reason: String },
    /// Memory pressure forced the remaining work to be canceled
    ResourceExhaustion { reason: String },
    /// The run was canceled before `stage` could complete
    Canceled { stage: Stage },
    MissingMatch { level: MatchLevel, key: String },
    Json(serde_json::Error),
}

impl Error {
    pub fn invariant<K: Into<String>, R: Into<String>>(key: K, reason: R) -> Self {
        Error::InvariantViolation {
            key: key.into(),
            reason: reason.into(),
        }
    }

    pub fn missing<K: Into<String>>(level: MatchLevel, key: K) -> Self {
        Error::MissingMatch {
            level,
            key: key.into(),
        }
    }
}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::EstimationUnsupported { partition } => {
                write!(f, "no decoy hits in partition `{}`", partition)
            }
            Self::InvariantViolation { key, reason } => write!(f, "{} ({})", reason, key),
            Self::ResourceExhaustion { reason } => write!(f, "out of resources: {}", reason),
            Self::Canceled { stage } => write!(f, "run canceled during {}", stage),
            Self::MissingMatch { level, key } => write!(f, "{} match `{}` not found", level, key),
            Self::Json(e) => e.fmt(f),
        }
    }
}

impl std::error::Error for Error {}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e)
    }
}

pub type Result<T> = std::result::Result<T, Error>;

pub fn read_json<P, T>(path: P) -> std::result::Result<T, std::io::Error>
where
    P: AsRef<std::path::Path>,
    T: for<'de> serde::Deserialize<'de>,
{
    let contents = std::fs::read_to_string(path)?;
    serde_json::from_str(&contents).map_err(std::io::Error::from)
}
