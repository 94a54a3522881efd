use fnv::FnvHashSet;
use regex::Regex;

use crate::modification::VALID_AA;

#[derive(Clone, Debug)]
pub struct Enzyme {
    // Skip cleaving if the site is followed matching this AA
    pub skip_suffix: Option<char>,
    // Regex for matching cleavage sites
    regex: Regex,
    // Cleave at c-terminal?
    pub c_terminal: bool,
    /// Peptides need only one enzymatic terminus
    pub semi_specific: bool,
}

/// Knowledge base holding the enzyme used for digestion
pub trait EnzymeCatalog {
    fn enzyme(&self) -> &Enzyme;
}

impl EnzymeCatalog for Enzyme {
    fn enzyme(&self) -> &Enzyme {
        self
    }
}

impl Enzyme {
    /// Build an enzyme cleaving at any residue of `cleave`. `"$"` only cleaves
    /// at protein termini. Returns `None` for an empty or invalid cleavage
    /// specification.
    pub fn new(
        cleave: &str,
        skip_suffix: Option<char>,
        c_terminal: bool,
        semi_specific: bool,
    ) -> Option<Self> {
        if !cleave.chars().all(|x| VALID_AA.contains(&(x as u8))) && cleave != "$" {
            log::error!(
                "Enzyme cleavage sequence contains non-amino acid characters: {}",
                cleave
            );
            return None;
        }
        if let Some(skip) = skip_suffix.filter(|x| !VALID_AA.contains(&(*x as u8))) {
            log::error!(
                "Enzyme cleavage restriction is non-amino acid character: {}",
                skip
            );
            return None;
        }

        match cleave {
            "" => None,
            "$" => Some(Enzyme {
                regex: Regex::new("$").ok()?,
                skip_suffix: None,
                c_terminal: true,
                semi_specific,
            }),
            _ => Some(Enzyme {
                regex: Regex::new(&format!("[{}]", cleave)).ok()?,
                skip_suffix,
                c_terminal,
                semi_specific,
            }),
        }
    }

    pub fn trypsin() -> Option<Self> {
        Self::new("KR", Some('P'), true, false)
    }

    fn cleavage_sites(&self, sequence: &str) -> Vec<std::ops::Range<usize>> {
        let mut ranges = Vec::new();
        let mut left = 0;
        for mat in self.regex.find_iter(sequence) {
            let right = match self.c_terminal {
                true => mat.end(),
                false => mat.start(),
            };
            if let Some(skip) = self.skip_suffix {
                if right < sequence.len() && sequence[right..].starts_with(skip) {
                    continue;
                }
            }
            ranges.push(left..right);
            left = right;
        }
        ranges.push(left..sequence.len());
        ranges
    }

    /// Positions (0-based, between residues) where `sequence` is cut
    fn cut_positions(&self, sequence: &str) -> FnvHashSet<usize> {
        self.cleavage_sites(sequence)
            .into_iter()
            .map(|range| range.start)
            .collect()
    }

    /// Number of cleavage sites found inside `peptide`
    pub fn missed_cleavages(&self, peptide: &str) -> usize {
        let n = peptide.len();
        self.cut_positions(peptide)
            .into_iter()
            .filter(|&p| p > 0 && p < n)
            .count()
    }

    /// Is `peptide` produced by a specific digestion of `protein` at one of
    /// its occurrences? A removed initiator methionine counts as a cleavage.
    pub fn is_enzymatic(&self, peptide: &str, protein: &str) -> bool {
        if peptide.is_empty() {
            return false;
        }
        let cuts = self.cut_positions(protein);
        protein.match_indices(peptide).any(|(start, _)| {
            let end = start + peptide.len();
            let nterm = start == 0
                || cuts.contains(&start)
                || (start == 1 && protein.starts_with('M'));
            let cterm = end == protein.len() || cuts.contains(&end);
            nterm && cterm
        })
    }
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn trypsin_missed_cleavages() {
        let tryp = Enzyme::trypsin().unwrap();
        assert_eq!(tryp.missed_cleavages("MADEEK"), 0);
        assert_eq!(tryp.missed_cleavages("MADEEKLPPGWEK"), 1);
        // cleavage before proline is skipped
        assert_eq!(tryp.missed_cleavages("LPKPGWEK"), 0);
        assert_eq!(tryp.missed_cleavages("SSGRVYYFNHITNASQWERPSGN"), 1);
    }

    #[test]
    fn enzymatic_peptides() {
        let sequence = "MADEEKLPPGWEKRMSRSSGRVYYFNHITNASQWERPSGN";
        let tryp = Enzyme::trypsin().unwrap();
        assert!(tryp.is_enzymatic("MADEEK", sequence));
        assert!(tryp.is_enzymatic("ADEEK", sequence));
        assert!(tryp.is_enzymatic("LPPGWEK", sequence));
        assert!(tryp.is_enzymatic("VYYFNHITNASQWERPSGN", sequence));
        assert!(!tryp.is_enzymatic("DEEKLPP", sequence));
        assert!(!tryp.is_enzymatic("PPGWEK", sequence));
        assert!(!tryp.is_enzymatic("NOTFOUND", sequence));
    }

    #[test]
    fn invalid_enzymes() {
        assert!(Enzyme::new("", None, true, false).is_none());
        assert!(Enzyme::new("KZ", None, true, false).is_none());
        assert!(Enzyme::new("KR", Some('1'), true, false).is_none());
        let whole = Enzyme::new("$", None, true, false).unwrap();
        assert_eq!(whole.missed_cleavages("PEPTIDEK"), 0);
    }
}
