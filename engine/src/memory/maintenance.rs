//! Pure planning for memory maintenance
//!
//! These functions decide what deduplication, pruning and consolidation would
//! do to a snapshot of experiences without touching storage. The service
//! applies the plans under its writer gate.

use super::patterns::LessonPattern;
use super::similarity::is_near_duplicate;
use super::types::{Experience, Severity};
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeMap;

/// Outcome of deduplicating a snapshot
#[derive(Debug, Default)]
pub struct DedupPlan {
    pub kept: Vec<Experience>,
    pub removed: Vec<Experience>,
}

/// Whether `candidate` should replace `incumbent` as a cluster's survivor
///
/// Higher severity wins; among equal severities the more recent record wins.
/// On a full tie the incumbent stays.
pub fn supersedes(candidate: &Experience, incumbent: &Experience) -> bool {
    let (c, i) = (candidate.severity().rank(), incumbent.severity().rank());
    c > i || (c == i && candidate.created_at > incumbent.created_at)
}

fn dedup_pass(experiences: Vec<Experience>, threshold: f64) -> DedupPlan {
    let mut plan = DedupPlan::default();

    for exp in experiences {
        let existing = plan.kept.iter().position(|accepted| {
            is_near_duplicate(&exp.record.summary, &accepted.record.summary, threshold)
        });

        match existing {
            Some(index) if supersedes(&exp, &plan.kept[index]) => {
                let replaced = std::mem::replace(&mut plan.kept[index], exp);
                plan.removed.push(replaced);
            }
            Some(_) => plan.removed.push(exp),
            None => plan.kept.push(exp),
        }
    }

    plan
}

/// Collapse near-duplicate summaries to one survivor each
///
/// Passes repeat until one removes nothing, so no two survivors are near
/// duplicates of each other and a second run is a no-op.
pub fn plan_deduplication(experiences: Vec<Experience>, threshold: f64) -> DedupPlan {
    let mut kept = experiences;
    let mut removed = Vec::new();

    loop {
        let pass = dedup_pass(kept, threshold);
        kept = pass.kept;
        if pass.removed.is_empty() {
            break;
        }
        removed.extend(pass.removed);
    }

    DedupPlan { kept, removed }
}

/// Outcome of pruning a snapshot
#[derive(Debug, Default, PartialEq, Eq)]
pub struct PrunePlan {
    pub removed_ids: Vec<String>,
    pub critical_kept: usize,
    pub high_kept: usize,
    pub medium_removed: usize,
    pub low_removed: usize,
}

/// The instant `cutoff_days` before `now`
///
/// Saturates at the earliest representable time, so any `u32` is accepted.
pub fn prune_cutoff(now: DateTime<Utc>, cutoff_days: u32) -> DateTime<Utc> {
    now.checked_sub_signed(Duration::days(i64::from(cutoff_days)))
        .unwrap_or(DateTime::<Utc>::MIN_UTC)
}

/// Select medium and low experiences created before `cutoff`
///
/// Critical and high experiences are never selected.
pub fn plan_pruning(experiences: &[Experience], cutoff: DateTime<Utc>) -> PrunePlan {
    let mut plan = PrunePlan::default();

    for exp in experiences {
        match exp.severity() {
            Severity::Critical => plan.critical_kept += 1,
            Severity::High => plan.high_kept += 1,
            Severity::Medium | Severity::Low if exp.created_at >= cutoff => {}
            Severity::Medium => {
                plan.medium_removed += 1;
                plan.removed_ids.push(exp.id.clone());
            }
            Severity::Low => {
                plan.low_removed += 1;
                plan.removed_ids.push(exp.id.clone());
            }
        }
    }

    plan
}

/// Group experiences by detected pattern, in first-seen order
pub fn group_by_pattern(experiences: &[Experience]) -> Vec<(LessonPattern, Vec<&Experience>)> {
    let mut groups: Vec<(LessonPattern, Vec<&Experience>)> = Vec::new();

    for exp in experiences {
        let pattern = LessonPattern::detect(exp);
        match groups.iter_mut().find(|(p, _)| *p == pattern) {
            Some((_, members)) => members.push(exp),
            None => groups.push((pattern, vec![exp])),
        }
    }

    groups
}

pub fn severity_distribution(members: &[&Experience]) -> BTreeMap<String, usize> {
    let mut distribution = BTreeMap::new();
    for exp in members {
        *distribution
            .entry(exp.severity().to_string())
            .or_insert(0) += 1;
    }
    distribution
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory::types::{ErrorType, ExperienceRecord};

    fn exp(summary: &str, severity: Severity, age_days: i64) -> Experience {
        Experience::restore(
            format!("{}-{}", summary.len(), age_days),
            Utc::now() - Duration::days(age_days),
            ExperienceRecord::new(
                "p",
                "m",
                "s",
                severity,
                ErrorType::Bug,
                summary,
                "cause",
                "fix",
            ),
        )
    }

    #[test]
    fn test_dedup_keeps_more_severe() {
        let plan = plan_deduplication(
            vec![
                exp("SQL injection in login", Severity::Critical, 10),
                exp("SQL injection vulnerability in login endpoint", Severity::Medium, 1),
                exp("Unrelated performance issue", Severity::Low, 1),
            ],
            0.8,
        );
        assert_eq!(plan.kept.len(), 2);
        assert_eq!(plan.removed.len(), 1);
        assert_eq!(plan.kept[0].severity(), Severity::Critical);
    }

    #[test]
    fn test_dedup_keeps_more_recent_on_equal_severity() {
        let plan = plan_deduplication(
            vec![
                exp("SQL injection in login", Severity::High, 10),
                exp("SQL injection vulnerability in login endpoint", Severity::High, 1),
            ],
            0.8,
        );
        assert_eq!(plan.kept.len(), 1);
        assert_eq!(
            plan.kept[0].record.summary,
            "SQL injection vulnerability in login endpoint"
        );
    }

    #[test]
    fn test_dedup_second_run_is_noop() {
        let first = plan_deduplication(
            vec![
                exp("cache miss storm", Severity::Low, 3),
                exp("cache miss storm on deploy", Severity::Medium, 2),
                exp("storm", Severity::High, 1),
                exp("totally different thing", Severity::Low, 1),
            ],
            0.8,
        );
        // only the two "cache miss storm" records merge
        assert_eq!(first.removed.len(), 1);
        assert_eq!(first.kept.len(), 3);

        let second = plan_deduplication(first.kept.clone(), 0.8);
        assert!(second.removed.is_empty());
        assert_eq!(second.kept.len(), first.kept.len());
    }

    #[test]
    fn test_severe_keyword_summary_keeps_unrelated_records() {
        let plan = plan_deduplication(
            vec![
                exp("Timeout", Severity::Critical, 1),
                exp(
                    "Login page timeout when database pool exhausted under load",
                    Severity::Medium,
                    2,
                ),
                exp("cache miss storm", Severity::Low, 3),
                exp("storm", Severity::High, 4),
            ],
            0.8,
        );
        assert!(plan.removed.is_empty());
        assert_eq!(plan.kept.len(), 4);
    }

    #[test]
    fn test_prune_respects_severity_and_age() {
        let snapshot = vec![
            exp("old critical", Severity::Critical, 400),
            exp("old high", Severity::High, 400),
            exp("old medium", Severity::Medium, 100),
            exp("old low", Severity::Low, 91),
            exp("fresh low", Severity::Low, 5),
        ];
        let plan = plan_pruning(&snapshot, Utc::now() - Duration::days(90));
        assert_eq!(plan.critical_kept, 1);
        assert_eq!(plan.high_kept, 1);
        assert_eq!(plan.medium_removed, 1);
        assert_eq!(plan.low_removed, 1);
        assert_eq!(plan.removed_ids.len(), 2);
    }

    #[test]
    fn test_prune_cutoff_saturates() {
        let now = Utc::now();
        assert_eq!(prune_cutoff(now, 90), now - Duration::days(90));
        assert_eq!(prune_cutoff(now, u32::MAX), DateTime::<Utc>::MIN_UTC);

        let snapshot = vec![exp("ancient low", Severity::Low, 100_000)];
        assert!(plan_pruning(&snapshot, prune_cutoff(now, u32::MAX))
            .removed_ids
            .is_empty());
    }

    #[test]
    fn test_grouping_preserves_first_seen_order() {
        let snapshot = vec![
            exp("slow query", Severity::Low, 1),
            exp("SQL injection in search", Severity::High, 1),
            exp("another slow page", Severity::Low, 1),
        ];
        let groups = group_by_pattern(&snapshot);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].0, LessonPattern::Other(ErrorType::Bug));
        assert_eq!(groups[0].1.len(), 2);
        assert_eq!(groups[1].0, LessonPattern::SqlInjection);

        let distribution = severity_distribution(&groups[0].1);
        assert_eq!(distribution.get("low"), Some(&2));
    }
}
