//! Channel-name matching strategies.
//!
//! The ratios are deliberately simple heuristics: a character multiset
//! overlap for `similar` and a token-set overlap for `fuzzy`. Candidate
//! ranking depends on their exact values.

use std::collections::{BTreeSet, HashMap};
use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MatchMode {
    /// Case-insensitive name equality.
    Exact,
    /// Character-overlap ratio at or above the similarity threshold.
    Similar,
    /// Token-overlap ratio at or above the fuzzy threshold, or one name
    /// containing the other.
    #[default]
    Fuzzy,
}

impl MatchMode {
    /// Score `candidate` against `query`. Returns the ratio when it clears
    /// `threshold`, `None` otherwise.
    pub fn score(self, query: &str, candidate: &str, threshold: f64) -> Option<f64> {
        let score = match self {
            MatchMode::Exact => {
                if exact_match(query, candidate) {
                    1.0
                } else {
                    return None;
                }
            }
            MatchMode::Similar => similar_ratio(query, candidate),
            MatchMode::Fuzzy => {
                let ratio = token_ratio(query, candidate);
                if ratio < threshold && contains_either(query, candidate) {
                    threshold
                } else {
                    ratio
                }
            }
        };
        (score > 0.0 && score >= threshold).then_some(score)
    }
}

impl fmt::Display for MatchMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Exact => write!(f, "exact"),
            Self::Similar => write!(f, "similar"),
            Self::Fuzzy => write!(f, "fuzzy"),
        }
    }
}

impl FromStr for MatchMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "exact" => Ok(Self::Exact),
            "similar" => Ok(Self::Similar),
            "fuzzy" => Ok(Self::Fuzzy),
            other => Err(format!(
                "Invalid match mode '{other}': must be 'exact', 'similar' or 'fuzzy'"
            )),
        }
    }
}

/// Lower-case and collapse runs of whitespace.
pub fn normalize(name: &str) -> String {
    name.split_whitespace()
        .map(str::to_lowercase)
        .collect::<Vec<_>>()
        .join(" ")
}

pub fn exact_match(a: &str, b: &str) -> bool {
    let a = normalize(a);
    !a.is_empty() && a == normalize(b)
}

/// Shared characters (multiset intersection) over the longer name's length.
pub fn similar_ratio(a: &str, b: &str) -> f64 {
    let a: Vec<char> = normalize(a).chars().collect();
    let b: Vec<char> = normalize(b).chars().collect();
    let longer = a.len().max(b.len());
    if longer == 0 {
        return 0.0;
    }
    let mut counts: HashMap<char, usize> = HashMap::new();
    for c in &a {
        *counts.entry(*c).or_default() += 1;
    }
    let mut shared = 0usize;
    for c in &b {
        if let Some(n) = counts.get_mut(c) {
            if *n > 0 {
                *n -= 1;
                shared += 1;
            }
        }
    }
    shared as f64 / longer as f64
}

/// Lower-cased word tokens, split on anything that is not alphanumeric.
pub fn tokens(name: &str) -> BTreeSet<String> {
    name.split(|c: char| !c.is_alphanumeric())
        .filter(|t| !t.is_empty())
        .map(str::to_lowercase)
        .collect()
}

/// |intersection| / max(|a|, |b|) over the two token sets.
pub fn token_ratio(a: &str, b: &str) -> f64 {
    let a = tokens(a);
    let b = tokens(b);
    let larger = a.len().max(b.len());
    if larger == 0 {
        return 0.0;
    }
    a.intersection(&b).count() as f64 / larger as f64
}

fn contains_either(a: &str, b: &str) -> bool {
    let a = normalize(a);
    let b = normalize(b);
    !a.is_empty() && !b.is_empty() && (a.contains(&b) || b.contains(&a))
}
