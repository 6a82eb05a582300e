//! Filename tokenization and variation grouping.
//!
//! A variation set is a run of files in the same folder whose names differ
//! only by a single numeric index, e.g. `impact_01.wav`, `impact_02.wav`,
//! `impact_03.wav`. Detection works on token sequences produced from the
//! filename stem, compared pairwise over a naturally ordered file list.

use std::cmp::Ordering;
use std::collections::HashSet;
use std::path::{Path, PathBuf};

/// Distance abbreviations that glue onto a preceding digit run.
///
/// A name like `waterfall 5m` must not be treated as `waterfall` + index `5`,
/// so `5m` becomes a single opaque token. The downside is that a digit run
/// followed by a word starting with one of these letters and a boundary is
/// also caught, which is a much rarer shape than distances in file names.
const DISTANCE_UNITS: [&str; 8] = ["ft", "FT", "Ft", "m", "M", "cm", "CM", "Cm"];

/// One atomic unit of a filename stem.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Token {
    /// Maximal run of ASCII letters.
    Letters(String),
    /// Maximal run of ASCII digits. The only token kind allowed to differ
    /// between members of a variation pair.
    Digits(String),
    /// Digit run immediately followed by a distance unit, kept opaque so it
    /// never counts as a variation index.
    DigitsWithUnit(String),
}

impl Token {
    fn is_digits(&self) -> bool {
        matches!(self, Token::Digits(_))
    }
}

/// A file path together with the token sequence of its stem.
pub type TokenSequence = (PathBuf, Vec<Token>);

/// Splits a filename stem into tokens, scanning left to right.
///
/// At each position the longest digit run with a trailing distance unit wins,
/// then a maximal letter run, then a maximal digit run. Punctuation and
/// spaces only separate tokens and produce none themselves.
pub fn tokenize(stem: &str) -> Vec<Token> {
    let chars: Vec<char> = stem.chars().collect();
    let mut tokens = Vec::new();
    let mut i = 0;

    while i < chars.len() {
        let c = chars[i];
        if c.is_ascii_digit() {
            let mut j = i;
            while j < chars.len() && chars[j].is_ascii_digit() {
                j += 1;
            }
            if let Some(unit_len) = match_distance_unit(&chars[j..]) {
                let end = j + unit_len;
                tokens.push(Token::DigitsWithUnit(chars[i..end].iter().collect()));
                i = end;
            } else {
                tokens.push(Token::Digits(chars[i..j].iter().collect()));
                i = j;
            }
        } else if c.is_ascii_alphabetic() {
            let mut j = i;
            while j < chars.len() && chars[j].is_ascii_alphabetic() {
                j += 1;
            }
            tokens.push(Token::Letters(chars[i..j].iter().collect()));
            i = j;
        } else {
            // separator
            i += 1;
        }
    }

    tokens
}

/// Returns the length of a distance unit at the start of `rest`, provided it
/// is followed by a boundary (end of stem or a non-alphanumeric character).
fn match_distance_unit(rest: &[char]) -> Option<usize> {
    for unit in DISTANCE_UNITS {
        let len = unit.chars().count();
        if rest.len() < len {
            continue;
        }
        if !rest[..len].iter().zip(unit.chars()).all(|(&a, b)| a == b) {
            continue;
        }
        let bounded = match rest.get(len) {
            None => true,
            Some(c) => !c.is_ascii_alphanumeric(),
        };
        if bounded {
            return Some(len);
        }
    }
    None
}

/// Tokenizes a list of file paths by their stems, preserving order.
pub fn tokenize_paths(files: &[PathBuf]) -> Vec<TokenSequence> {
    files
        .iter()
        .map(|path| {
            let stem = path
                .file_stem()
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            (path.clone(), tokenize(&stem))
        })
        .collect()
}

/// Numeric-aware path ordering, so `abc_3` sorts before `abc_11`.
pub fn natural_cmp(a: &Path, b: &Path) -> Ordering {
    natural_str_cmp(&a.to_string_lossy(), &b.to_string_lossy())
}

/// Sorts paths in place with [`natural_cmp`].
pub fn natural_sort(files: &mut [PathBuf]) {
    files.sort_by(|a, b| natural_cmp(a, b));
}

fn natural_str_cmp(a: &str, b: &str) -> Ordering {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    let (mut i, mut j) = (0, 0);

    loop {
        match (a.get(i), b.get(j)) {
            (None, None) => return Ordering::Equal,
            (None, Some(_)) => return Ordering::Less,
            (Some(_), None) => return Ordering::Greater,
            (Some(&ca), Some(&cb)) => {
                if ca.is_ascii_digit() && cb.is_ascii_digit() {
                    let ra = digit_run(&a, i);
                    let rb = digit_run(&b, j);
                    match compare_digit_runs(&a[i..ra], &b[j..rb]) {
                        Ordering::Equal => {
                            i = ra;
                            j = rb;
                        }
                        other => return other,
                    }
                } else {
                    match ca.cmp(&cb) {
                        Ordering::Equal => {
                            i += 1;
                            j += 1;
                        }
                        other => return other,
                    }
                }
            }
        }
    }
}

fn digit_run(chars: &[char], start: usize) -> usize {
    let mut end = start;
    while end < chars.len() && chars[end].is_ascii_digit() {
        end += 1;
    }
    end
}

/// Compares two digit runs by numeric value, falling back to the raw text so
/// `01` and `1` still order deterministically.
fn compare_digit_runs(a: &[char], b: &[char]) -> Ordering {
    let ta = a.iter().position(|c| *c != '0').unwrap_or(a.len());
    let tb = b.iter().position(|c| *c != '0').unwrap_or(b.len());
    let (sa, sb) = (&a[ta..], &b[tb..]);

    sa.len()
        .cmp(&sb.len())
        .then_with(|| sa.cmp(sb))
        .then_with(|| a.cmp(b))
}

/// Whether two adjacent token sequences form a variation pair.
///
/// Requires the same parent folder, equal sequence length and exactly one
/// differing index where both sides are pure digit runs. Identical sequences
/// do not count: without a differing index there is nothing to vary.
fn is_variation_pair(previous: &TokenSequence, current: &TokenSequence) -> bool {
    // Comparing across folder levels would chain unrelated files together.
    if previous.0.parent() != current.0.parent() {
        return false;
    }

    let (prev_tokens, cur_tokens) = (&previous.1, &current.1);
    if prev_tokens.len() != cur_tokens.len() {
        return false;
    }

    let mut diff_index = None;
    for (i, (a, b)) in prev_tokens.iter().zip(cur_tokens.iter()).enumerate() {
        if a == b {
            continue;
        }
        if !(a.is_digits() && b.is_digits()) {
            return false;
        }
        match diff_index {
            None => diff_index = Some(i),
            Some(allowed) if allowed == i => {}
            Some(_) => return false,
        }
    }

    diff_index.is_some()
}

/// Groups files into variation sets with one linear pass over adjacent pairs.
///
/// A match extends the running group; a non-match closes it. This chains
/// matches rather than building full equivalence classes, so two non-adjacent
/// members of a group are not guaranteed to match each other directly.
pub fn find_variation_groups(tokenized: &[TokenSequence]) -> Vec<Vec<PathBuf>> {
    let mut groups = Vec::new();
    let mut running: Vec<PathBuf> = Vec::new();

    for pair in tokenized.windows(2) {
        let (previous, current) = (&pair[0], &pair[1]);
        if is_variation_pair(previous, current) {
            if !running.contains(&previous.0) {
                running.push(previous.0.clone());
            }
            if !running.contains(&current.0) {
                running.push(current.0.clone());
            }
        } else if !running.is_empty() {
            groups.push(std::mem::take(&mut running));
        }
    }
    if !running.is_empty() {
        groups.push(running);
    }

    groups
}

/// Drops groups whose first member's stem contains any exclusion keyword.
pub fn remove_excluded_groups(groups: Vec<Vec<PathBuf>>, keywords: &[String]) -> Vec<Vec<PathBuf>> {
    if keywords.is_empty() {
        return groups;
    }
    groups
        .into_iter()
        .filter(|group| {
            let stem = group
                .first()
                .and_then(|p| p.file_stem())
                .map(|s| s.to_string_lossy().into_owned())
                .unwrap_or_default();
            !keywords.iter().any(|keyword| stem.contains(keyword))
        })
        .collect()
}

/// Complement of the grouped files: everything in `all_files` that ended up
/// in no variation group, in the original order.
pub fn files_without_variations(groups: &[Vec<PathBuf>], all_files: &[PathBuf]) -> Vec<PathBuf> {
    let grouped: HashSet<&PathBuf> = groups.iter().flatten().collect();
    all_files
        .iter()
        .filter(|file| !grouped.contains(file))
        .cloned()
        .collect()
}
