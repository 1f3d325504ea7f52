//! Fan-out extraction
//!
//! A task's `filter` regex is applied to its command output; each capture
//! group collects one value per match, keyed by the group's name (or its
//! index when unnamed). The resulting columns must stay equally long — they
//! are zipped into per-iteration artefact overlays — both before and after
//! `filterExclude` strikes whole positions out.

use std::collections::{BTreeMap, BTreeSet};

use anyhow::{bail, Context, Result};
use regex::Regex;

use crate::error::ErrorCode;

/// Extracted groups plus the number of fan-out iterations they produce.
pub type Extraction = (BTreeMap<String, Vec<String>>, usize);

/// Collect capture-group values from `output` using `include`, then drop
/// every position whose value matches `exclude` (when non-empty).
///
/// A count of zero is not an error; the caller skips the subtree.
pub fn extract(output: &str, include: &str, exclude: &str) -> Result<Extraction> {
    let matcher =
        Regex::new(include).with_context(|| format!("invalid filter regex '{include}'"))?;
    let names: Vec<Option<&str>> = matcher.capture_names().collect();

    let mut groups: BTreeMap<String, Vec<String>> = BTreeMap::new();
    for captures in matcher.captures_iter(output) {
        // Group 0 is the whole match; only the real capture groups fan out.
        for idx in 1..captures.len() {
            let key = match names.get(idx).and_then(|name| *name) {
                Some(name) => name.to_string(),
                None => idx.to_string(),
            };
            let value = captures
                .get(idx)
                .map(|m| m.as_str().to_string())
                .unwrap_or_default();
            groups.entry(key).or_default().push(value);
        }
    }

    check_balanced(&groups)?;

    if !exclude.is_empty() {
        let excluder = Regex::new(exclude)
            .with_context(|| format!("invalid filter exclude regex '{exclude}'"))?;

        // Exclusion is positional: a value matching in any group removes that
        // position from every group, keeping the columns aligned.
        let mut doomed: BTreeSet<usize> = BTreeSet::new();
        for values in groups.values() {
            for (position, value) in values.iter().enumerate() {
                if excluder.is_match(value) {
                    doomed.insert(position);
                }
            }
        }

        if !doomed.is_empty() {
            for values in groups.values_mut() {
                let mut position = 0;
                values.retain(|_| {
                    let keep = !doomed.contains(&position);
                    position += 1;
                    keep
                });
            }
        }

        check_balanced(&groups)?;
    }

    let count = groups.values().map(Vec::len).min().unwrap_or(0);
    Ok((groups, count))
}

fn check_balanced(groups: &BTreeMap<String, Vec<String>>) -> Result<()> {
    let min = groups.values().map(Vec::len).min().unwrap_or(0);
    let max = groups.values().map(Vec::len).max().unwrap_or(0);
    if min != max {
        bail!("{}", ErrorCode::GroupCountMismatch);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn collects_named_groups_across_matches() {
        let output = "L3-CORE\nAGG\n";
        let (groups, count) = extract(output, r"(?P<vdc>\S+)", "").unwrap();
        assert_eq!(count, 2);
        assert_eq!(groups["vdc"], vec!["L3-CORE", "AGG"]);
    }

    #[test]
    fn unnamed_groups_are_keyed_by_index() {
        let output = "eth0 up\neth1 down\n";
        let (groups, count) = extract(output, r"(\S+) (\S+)", "").unwrap();
        assert_eq!(count, 2);
        assert_eq!(groups["1"], vec!["eth0", "eth1"]);
        assert_eq!(groups["2"], vec!["up", "down"]);
    }

    #[test]
    fn exclusion_removes_positions_from_every_group() {
        let output = "x 1\ny 2\nz 3\n";
        let (groups, count) = extract(output, r"(?P<a>\S+) (?P<b>\S+)", "^y$").unwrap();
        assert_eq!(count, 2);
        assert_eq!(groups["a"], vec!["x", "z"]);
        assert_eq!(groups["b"], vec!["1", "3"]);
    }

    #[test]
    fn exclusion_can_empty_the_result() {
        let output = "a\nb\n";
        let (_, count) = extract(output, r"(?P<v>\S+)", r"\S+").unwrap();
        assert_eq!(count, 0);
    }

    #[test]
    fn no_matches_yield_zero_count() {
        let (groups, count) = extract("nothing here", r"(?P<n>\d{5})", "").unwrap();
        assert_eq!(count, 0);
        assert!(groups.is_empty());
    }

    #[test]
    fn optional_group_absence_keeps_columns_aligned() {
        // The second group may not participate in a match; its value is then
        // the empty string, not a shorter column.
        let output = "alpha beta\ngamma\n";
        let (groups, count) = extract(output, r"(?m)^(\S+)( \S+)?$", "").unwrap();
        assert_eq!(count, 2);
        assert_eq!(groups["1"], vec!["alpha", "gamma"]);
        assert_eq!(groups["2"], vec![" beta", ""]);
    }

    #[test]
    fn invalid_include_regex_is_an_error() {
        assert!(extract("x", "(unclosed", "").is_err());
    }

    #[test]
    fn invalid_exclude_regex_is_an_error() {
        assert!(extract("x", r"(?P<v>\S+)", "(unclosed").is_err());
    }
}
