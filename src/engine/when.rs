//! When-clause evaluation
//!
//! A `when` sequence gates a task on the outcome of an earlier named task or
//! on an artefact value. Clauses are scanned in order; the first clause with
//! a base decides. Every predicate on that clause must hold, after which its
//! actions fire and the task is allowed through. A clause may not be based on
//! both a task name and a variable at once.

use std::collections::HashMap;

use regex::Regex;
use tracing::{debug, warn};

use crate::engine::NamedOutcome;
use crate::error::ErrorCode;
use crate::schema::When;

/// What a passing clause asked the engine to do.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Action {
    /// Shut the run down successfully.
    Exit,
    /// Skip following siblings until the task with this name.
    MoveTo(String),
}

/// Outcome of evaluating a clause sequence.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Verdict {
    pub passed: bool,
    pub action: Option<Action>,
}

impl Verdict {
    fn failed() -> Self {
        Verdict {
            passed: false,
            action: None,
        }
    }

    fn passed_with(clause: &When) -> Self {
        let action = if clause.on_exit {
            Some(Action::Exit)
        } else if !clause.on_move.is_empty() {
            Some(Action::MoveTo(clause.on_move.clone()))
        } else {
            None
        };
        Verdict {
            passed: true,
            action,
        }
    }
}

/// Evaluate `clauses` against the named-task table and the current artefacts.
///
/// An empty sequence passes. A clause with neither base is skipped; the first
/// clause with a base is decisive.
pub fn evaluate(
    clauses: &[When],
    names: &HashMap<String, NamedOutcome>,
    artefacts: &HashMap<String, String>,
) -> Result<Verdict, ErrorCode> {
    for clause in clauses {
        if !clause.name.is_empty() && !clause.variable.is_empty() {
            warn!("when clause may not be based on both a task name and a variable");
            return Err(ErrorCode::WhenDoubleBased);
        }

        if !clause.name.is_empty() {
            return Ok(match_named(clause, names));
        }

        if !clause.variable.is_empty() {
            return Ok(match_variable(clause, artefacts));
        }
    }

    debug!("no based when clause present, condition passes");
    Ok(Verdict {
        passed: true,
        action: None,
    })
}

fn match_named(clause: &When, names: &HashMap<String, NamedOutcome>) -> Verdict {
    let Some(entry) = names.get(&clause.name) else {
        warn!("named task '{}' has not produced a result yet", clause.name);
        return Verdict::failed();
    };
    if entry.status.is_empty() {
        warn!("named task '{}' has not produced a result yet", clause.name);
        return Verdict::failed();
    }

    if !clause.if_status.is_empty() && entry.status != clause.if_status {
        warn!(
            "ifStatus check failed: want '{}', have '{}'",
            clause.if_status, entry.status
        );
        return Verdict::failed();
    }

    if !clause.if_output_contains.is_empty()
        && !entry.output.contains(&clause.if_output_contains)
    {
        warn!(
            "ifOutputContains check failed: '{}' not found in task '{}'",
            clause.if_output_contains, clause.name
        );
        return Verdict::failed();
    }

    if !clause.if_output_not_contains.is_empty()
        && entry.output.contains(&clause.if_output_not_contains)
    {
        warn!(
            "ifOutputNotContains check failed: '{}' found in task '{}'",
            clause.if_output_not_contains, clause.name
        );
        return Verdict::failed();
    }

    if !clause.if_output_contains_re.is_empty() {
        match Regex::new(&clause.if_output_contains_re) {
            Ok(re) if re.is_match(&entry.output) => {}
            _ => {
                warn!(
                    "ifOutputContainsRe check failed: '{}' in task '{}'",
                    clause.if_output_contains_re, clause.name
                );
                return Verdict::failed();
            }
        }
    }

    if !clause.if_output_not_contains_re.is_empty() {
        match Regex::new(&clause.if_output_not_contains_re) {
            Ok(re) if !re.is_match(&entry.output) => {}
            _ => {
                warn!(
                    "ifOutputNotContainsRe check failed: '{}' in task '{}'",
                    clause.if_output_not_contains_re, clause.name
                );
                return Verdict::failed();
            }
        }
    }

    debug!("named when clause on '{}' passed", clause.name);
    Verdict::passed_with(clause)
}

fn match_variable(clause: &When, artefacts: &HashMap<String, String>) -> Verdict {
    let value = match artefacts.get(&clause.variable) {
        Some(value) if !value.is_empty() => value,
        _ => {
            warn!("variable '{}' does not exist in memory", clause.variable);
            return Verdict::failed();
        }
    };

    if !clause.if_value.is_empty() && value != &clause.if_value {
        warn!(
            "ifValue check failed: want '{}', have '{}'",
            clause.if_value, value
        );
        return Verdict::failed();
    }

    if !clause.if_value_not.is_empty() && value == &clause.if_value_not {
        warn!(
            "ifValueNot check failed: '{}' equals current value",
            clause.if_value_not
        );
        return Verdict::failed();
    }

    debug!("variable when clause on '{}' passed", clause.variable);
    Verdict::passed_with(clause)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn names(entries: &[(&str, &str, &str)]) -> HashMap<String, NamedOutcome> {
        entries
            .iter()
            .map(|(name, status, output)| {
                (
                    name.to_string(),
                    NamedOutcome {
                        status: status.to_string(),
                        output: output.to_string(),
                    },
                )
            })
            .collect()
    }

    fn artefacts(pairs: &[(&str, &str)]) -> HashMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn clause() -> When {
        When::default()
    }

    #[test]
    fn empty_sequence_passes() {
        let verdict = evaluate(&[], &HashMap::new(), &HashMap::new()).unwrap();
        assert!(verdict.passed);
        assert_eq!(verdict.action, None);
    }

    #[test]
    fn double_based_clause_is_an_error() {
        let mut when = clause();
        when.name = "probe".into();
        when.variable = "vendor".into();
        assert_eq!(
            evaluate(&[when], &HashMap::new(), &HashMap::new()),
            Err(ErrorCode::WhenDoubleBased)
        );
    }

    #[test]
    fn unknown_named_task_fails_the_condition() {
        let mut when = clause();
        when.name = "missing".into();
        let verdict = evaluate(&[when], &HashMap::new(), &HashMap::new()).unwrap();
        assert!(!verdict.passed);
    }

    #[test]
    fn status_and_output_predicates() {
        let table = names(&[("probe", "success", "VLAN0010 active\nVLAN0020 active")]);

        let mut ok = clause();
        ok.name = "probe".into();
        ok.if_status = "success".into();
        ok.if_output_contains = "VLAN0010".into();
        ok.if_output_not_contains = "err-disabled".into();
        assert!(evaluate(&[ok], &table, &HashMap::new()).unwrap().passed);

        let mut wrong_status = clause();
        wrong_status.name = "probe".into();
        wrong_status.if_status = "fail".into();
        assert!(!evaluate(&[wrong_status], &table, &HashMap::new()).unwrap().passed);

        let mut missing_text = clause();
        missing_text.name = "probe".into();
        missing_text.if_output_contains = "VLAN0099".into();
        assert!(!evaluate(&[missing_text], &table, &HashMap::new()).unwrap().passed);
    }

    #[test]
    fn regex_predicates() {
        let table = names(&[("probe", "success", "uptime is 41 weeks")]);

        let mut contains = clause();
        contains.name = "probe".into();
        contains.if_output_contains_re = r"\d+\sweeks".into();
        assert!(evaluate(&[contains], &table, &HashMap::new()).unwrap().passed);

        let mut not_contains = clause();
        not_contains.name = "probe".into();
        not_contains.if_output_not_contains_re = r"\d+\syears".into();
        assert!(evaluate(&[not_contains], &table, &HashMap::new()).unwrap().passed);

        let mut matching_forbidden = clause();
        matching_forbidden.name = "probe".into();
        matching_forbidden.if_output_not_contains_re = r"\d+\sweeks".into();
        assert!(!evaluate(&[matching_forbidden], &table, &HashMap::new())
            .unwrap()
            .passed);

        // An unparsable pattern cannot be verified, so the predicate fails.
        let mut invalid = clause();
        invalid.name = "probe".into();
        invalid.if_output_contains_re = "(unclosed".into();
        assert!(!evaluate(&[invalid], &table, &HashMap::new()).unwrap().passed);
    }

    #[test]
    fn variable_predicates() {
        let vars = artefacts(&[("vendor", "cisco")]);

        let mut equals = clause();
        equals.variable = "vendor".into();
        equals.if_value = "cisco".into();
        assert!(evaluate(&[equals], &HashMap::new(), &vars).unwrap().passed);

        let mut differs = clause();
        differs.variable = "vendor".into();
        differs.if_value_not = "cisco".into();
        assert!(!evaluate(&[differs], &HashMap::new(), &vars).unwrap().passed);

        let mut unknown = clause();
        unknown.variable = "absent".into();
        assert!(!evaluate(&[unknown], &HashMap::new(), &vars).unwrap().passed);
    }

    #[test]
    fn passing_clause_carries_actions() {
        let table = names(&[("probe", "success", "")]);

        let mut mover = clause();
        mover.name = "probe".into();
        mover.on_move = "tail".into();
        let verdict = evaluate(&[mover], &table, &HashMap::new()).unwrap();
        assert!(verdict.passed);
        assert_eq!(verdict.action, Some(Action::MoveTo("tail".into())));

        let mut exiter = clause();
        exiter.variable = "flag".into();
        let vars = artefacts(&[("flag", "on")]);
        exiter.on_exit = true;
        exiter.on_move = "ignored".into();
        let verdict = evaluate(&[exiter], &HashMap::new(), &vars).unwrap();
        assert_eq!(verdict.action, Some(Action::Exit));
    }

    #[test]
    fn failing_clause_suppresses_actions() {
        let mut when = clause();
        when.name = "missing".into();
        when.on_move = "tail".into();
        let verdict = evaluate(&[when], &HashMap::new(), &HashMap::new()).unwrap();
        assert!(!verdict.passed);
        assert_eq!(verdict.action, None);
    }

    #[test]
    fn first_based_clause_decides() {
        let table = names(&[("probe", "fail", "")]);

        // Baseless clause is skipped, the named one fails the sequence even
        // though a later clause would pass.
        let baseless = clause();
        let mut failing = clause();
        failing.name = "probe".into();
        failing.if_status = "success".into();
        let mut passing = clause();
        passing.variable = "vendor".into();

        let vars = artefacts(&[("vendor", "cisco")]);
        let verdict = evaluate(&[baseless, failing, passing], &table, &vars).unwrap();
        assert!(!verdict.passed);
    }
}
