//! Name similarity used to resolve raw lender names against the directory.

use serde::{Deserialize, Serialize};

/// How two names were judged similar.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum MatchType {
    Exact,
    Substring,
    Fuzzy,
    None,
}

/// Score awarded when one name contains the other.
pub const SUBSTRING_SCORE: f64 = 0.90;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Similarity {
    /// Always within `[0, 1]`.
    pub value: f64,
    pub match_type: MatchType,
}

impl Similarity {
    const NONE: Similarity = Similarity {
        value: 0.0,
        match_type: MatchType::None,
    };
}

/// Scores two names after lowercasing and trimming both.
///
/// Equal names score 1.0, containment scores [`SUBSTRING_SCORE`], anything
/// else is `(max_len - levenshtein) / max_len` over Unicode scalar values.
pub fn score(a: &str, b: &str) -> Similarity {
    let a = a.trim().to_lowercase();
    let b = b.trim().to_lowercase();

    if a.is_empty() || b.is_empty() {
        return Similarity::NONE;
    }
    if a == b {
        return Similarity {
            value: 1.0,
            match_type: MatchType::Exact,
        };
    }
    if a.contains(&b) || b.contains(&a) {
        return Similarity {
            value: SUBSTRING_SCORE,
            match_type: MatchType::Substring,
        };
    }

    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let max_len = a.len().max(b.len());
    let distance = levenshtein(&a, &b);

    Similarity {
        value: (max_len - distance) as f64 / max_len as f64,
        match_type: MatchType::Fuzzy,
    }
}

/// Classic two-row edit distance.
fn levenshtein(a: &[char], b: &[char]) -> usize {
    if a.is_empty() {
        return b.len();
    }
    if b.is_empty() {
        return a.len();
    }

    let mut prev: Vec<usize> = (0..=b.len()).collect();
    let mut curr = vec![0usize; b.len() + 1];

    for (i, ca) in a.iter().enumerate() {
        curr[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let cost = usize::from(ca != cb);
            curr[j + 1] = (prev[j] + cost).min(prev[j + 1] + 1).min(curr[j] + 1);
        }
        std::mem::swap(&mut prev, &mut curr);
    }

    prev[b.len()]
}
