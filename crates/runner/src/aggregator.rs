//! Reconcile the planned agenda with what the engine reported.
//!
//! Every agenda identity ends up in exactly one of passing, failing or
//! skipped; `unchanged` is the subset of passing with no outstanding diff.
//! Output follows agenda order. Reports for identities outside the agenda
//! are logged and dropped.

use std::collections::{HashMap, HashSet};
use tracing::{debug, warn};
use vizreg_common::{EndpointOutcomes, EndpointTestResult, TestIdentity};

use crate::executor::EngineRun;

pub fn aggregate(
    agenda: &[TestIdentity],
    run: &EngineRun,
    current_diffs: &[TestIdentity],
) -> EndpointOutcomes {
    let planned: HashSet<String> = agenda.iter().map(|id| id.canonical()).collect();

    let passing: HashSet<&str> = run.passing.iter().map(String::as_str).collect();

    // Failing wins over passing; the last non-empty message is kept
    let mut failing: HashMap<&str, &str> = HashMap::new();
    for report in &run.failing {
        let message = failing.entry(report.test_title.as_str()).or_insert("");
        if !report.error_message.is_empty() {
            *message = report.error_message.as_str();
        }
    }

    for title in passing.iter().chain(failing.keys()) {
        if !planned.contains(*title) {
            warn!("Engine reported '{}', which is not on this run's agenda", title);
        }
    }

    let diffs: HashSet<String> = current_diffs.iter().map(|id| id.canonical()).collect();

    let mut outcomes = EndpointOutcomes::default();
    for identity in agenda {
        let name = identity.canonical();
        if let Some(message) = failing.get(name.as_str()) {
            let message = (!message.is_empty()).then(|| message.to_string());
            outcomes.failing.push(EndpointTestResult::new(identity, message));
        } else if passing.contains(name.as_str()) {
            let result = EndpointTestResult::new(identity, None);
            if !diffs.contains(&name) {
                outcomes.unchanged.push(result.clone());
            }
            outcomes.passing.push(result);
        } else {
            outcomes.skipped.push(EndpointTestResult::new(identity, None));
        }
    }

    debug!(
        "Aggregated {} planned: {} passing ({} unchanged), {} failing, {} skipped",
        agenda.len(),
        outcomes.passing.len(),
        outcomes.unchanged.len(),
        outcomes.failing.len(),
        outcomes.skipped.len()
    );

    outcomes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::executor::{EngineExit, FailureReport};
    use crate::parser::EngineTally;
    use std::time::Duration;
    use test_case::test_case;
    use vizreg_common::Viewport;

    fn id(s: &str) -> TestIdentity {
        TestIdentity::parse(s).unwrap()
    }

    fn run(passing: &[&str], failing: &[(&str, &str)]) -> EngineRun {
        EngineRun {
            exit: EngineExit::Success,
            passing: passing.iter().map(|s| s.to_string()).collect(),
            failing: failing
                .iter()
                .map(|(t, m)| FailureReport {
                    test_title: t.to_string(),
                    error_message: m.to_string(),
                })
                .collect(),
            user_terminated: false,
            cancelled: false,
            tally: EngineTally::default(),
            duration: Duration::ZERO,
        }
    }

    fn titles(results: &[EndpointTestResult]) -> Vec<&str> {
        results.iter().map(|r| r.test_title.as_str()).collect()
    }

    #[test]
    fn test_unreported_identity_is_skipped() {
        let agenda = vec![id("Start @ iphone-6"), id("Blog @ iphone-6")];
        let outcomes = aggregate(&agenda, &run(&["Start @ iphone-6"], &[]), &[]);

        assert_eq!(titles(&outcomes.passing), vec!["Start @ iphone-6"]);
        assert_eq!(titles(&outcomes.skipped), vec!["Blog @ iphone-6"]);
        assert_eq!(outcomes.skipped[0].viewport, Viewport::preset("iphone-6"));
        assert!(outcomes.failing.is_empty());
    }

    #[test]
    fn test_unchanged_excludes_current_diffs() {
        let agenda = vec![id("Start @ 1920,1080"), id("Blog @ 1920,1080")];
        let outcomes = aggregate(
            &agenda,
            &run(&["Blog @ 1920,1080", "Start @ 1920,1080"], &[]),
            &[id("Start @ 1920,1080")],
        );

        assert_eq!(titles(&outcomes.passing), vec!["Start @ 1920,1080", "Blog @ 1920,1080"]);
        assert_eq!(titles(&outcomes.unchanged), vec!["Blog @ 1920,1080"]);
    }

    #[test]
    fn test_failure_wins_and_keeps_last_message() {
        let agenda = vec![id("Start @ iphone-6")];
        let outcomes = aggregate(
            &agenda,
            &run(
                &["Start @ iphone-6"],
                &[
                    ("Start @ iphone-6", "first"),
                    ("Start @ iphone-6", "Image was 3% different"),
                    ("Start @ iphone-6", ""),
                ],
            ),
            &[],
        );

        assert!(outcomes.passing.is_empty());
        assert_eq!(
            outcomes.failing[0].error_message.as_deref(),
            Some("Image was 3% different")
        );
    }

    #[test]
    fn test_reports_outside_agenda_are_dropped() {
        let agenda = vec![id("Start @ iphone-6")];
        let outcomes = aggregate(&agenda, &run(&["Start @ iphone-6", "Ghost @ iphone-6"], &[]), &[]);
        assert_eq!(titles(&outcomes.passing), vec!["Start @ iphone-6"]);
    }

    #[test_case(&[], &[] ; "nothing reported")]
    #[test_case(&["A @ v1", "B @ v2"], &[] ; "all passing")]
    #[test_case(&["A @ v1"], &[("B @ v1", "boom")] ; "mixed")]
    #[test_case(&["A @ v1"], &[("A @ v1", "")] ; "pass then inline failure")]
    fn test_every_planned_identity_classified_once(passing: &[&str], failing: &[(&str, &str)]) {
        let agenda = vec![id("A @ v1"), id("A @ v2"), id("B @ v1"), id("B @ v2")];
        let outcomes = aggregate(&agenda, &run(passing, failing), &[id("B @ v2")]);

        for identity in &agenda {
            let name = identity.canonical();
            let hits = [&outcomes.passing, &outcomes.failing, &outcomes.skipped]
                .iter()
                .filter(|bucket| bucket.iter().any(|r| r.test_title == name))
                .count();
            assert_eq!(hits, 1, "{} classified {} times", name, hits);
        }
        for unchanged in &outcomes.unchanged {
            assert!(outcomes.passing.contains(unchanged));
        }
    }
}
