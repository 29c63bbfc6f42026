//! Review pattern detection: decide when accumulated feedback means a
//! chunk needs a human look, with an explainable reason.

use std::collections::BTreeMap;

use tracing::info;

use feedrank_core::{CommentAnalysis, IssueType, Result, Severity};
use feedrank_store::SqliteStore;

/// How many explicit needs_review votes trigger a flag.
const NEEDS_REVIEW_THRESHOLD: usize = 2;
/// How many moderate-severity items trigger a flag.
const MODERATE_THRESHOLD: usize = 3;
/// Minimum absolute count for the recurring-issue rule.
const RECURRING_MIN: usize = 3;
/// How many issue pairs to persist on the flag.
const TOP_ISSUES: usize = 5;

/// Detector output: evidence always, a reason only when a rule fired.
#[derive(Debug, Clone)]
pub struct ReviewPatternSummary {
    pub reason: Option<String>,
    /// Top issue types by count, first-seen order breaking ties.
    pub common_issues: Vec<(IssueType, usize)>,
    /// Counts per severity bucket, fixed bucket order.
    pub severity_distribution: Vec<(Severity, usize)>,
    pub total_feedbacks: usize,
}

impl ReviewPatternSummary {
    pub fn should_flag(&self) -> bool {
        self.reason.is_some()
    }
}

pub struct ReviewPatternDetector;

impl ReviewPatternDetector {
    /// Evaluate the flagging rules over the AI-analyzed feedback for one
    /// chunk. Rules run in priority order and the first match wins:
    /// explicit review votes and severe incidents are high-confidence
    /// triggers that should not wait for volume, while the frequency rule
    /// needs a density threshold to avoid over-flagging quiet documents.
    pub fn detect(analyses: &[CommentAnalysis]) -> ReviewPatternSummary {
        let total = analyses.len();

        let needs_review = analyses.iter().filter(|a| a.needs_review).count();
        let severe = analyses
            .iter()
            .filter(|a| a.severity == Severity::Severe)
            .count();
        let moderate = analyses
            .iter()
            .filter(|a| a.severity == Severity::Moderate)
            .count();

        // Issue counts in first-seen order so ties break deterministically.
        let mut issue_order: Vec<IssueType> = Vec::new();
        let mut issue_counts: BTreeMap<usize, usize> = BTreeMap::new();
        for analysis in analyses {
            for &issue in &analysis.issue_types {
                if issue == IssueType::None {
                    continue;
                }
                let pos = match issue_order.iter().position(|&i| i == issue) {
                    Some(p) => p,
                    None => {
                        issue_order.push(issue);
                        issue_order.len() - 1
                    }
                };
                *issue_counts.entry(pos).or_insert(0) += 1;
            }
        }
        let mut common_issues: Vec<(IssueType, usize)> = issue_order
            .iter()
            .enumerate()
            .map(|(pos, &issue)| (issue, issue_counts[&pos]))
            .collect();
        common_issues.sort_by(|a, b| b.1.cmp(&a.1));
        common_issues.truncate(TOP_ISSUES);

        let severity_distribution: Vec<(Severity, usize)> = Severity::all()
            .iter()
            .map(|&sev| (sev, analyses.iter().filter(|a| a.severity == sev).count()))
            .collect();

        let reason = if needs_review >= NEEDS_REVIEW_THRESHOLD {
            Some(format!("{} users flagged for review", needs_review))
        } else if severe >= 1 {
            Some("Severe issues reported".to_string())
        } else if moderate >= MODERATE_THRESHOLD {
            Some("Multiple moderate issues".to_string())
        } else if let Some(&(top_issue, count)) = common_issues.first() {
            let threshold = (RECURRING_MIN as f64).max(total as f64 * 0.5);
            if count as f64 >= threshold {
                Some(format!("Recurring issue: {}", top_issue.label()))
            } else {
                None
            }
        } else {
            None
        };

        ReviewPatternSummary {
            reason,
            common_issues,
            severity_distribution,
            total_feedbacks: total,
        }
    }
}

/// Run the detector over every chunk with analyzed feedback and upsert the
/// flags that fire. Returns the number of chunks flagged.
pub fn detect_and_flag(store: &SqliteStore) -> Result<usize> {
    let feedback = store.feedback_with_chunks()?;

    let mut per_chunk: BTreeMap<i64, Vec<CommentAnalysis>> = BTreeMap::new();
    for item in &feedback {
        if let Some(analysis) = &item.feedback.analysis {
            for &chunk_id in &item.chunk_ids {
                per_chunk.entry(chunk_id).or_default().push(analysis.clone());
            }
        }
    }

    let mut flagged = 0;
    for (chunk_id, analyses) in &per_chunk {
        let summary = ReviewPatternDetector::detect(analyses);
        if let Some(reason) = &summary.reason {
            store.upsert_review_flag(
                *chunk_id,
                reason,
                &summary.common_issues,
                &summary.severity_distribution,
                summary.total_feedbacks as i64,
            )?;
            flagged += 1;
        }
    }
    if flagged > 0 {
        info!("Review detection flagged {} chunks", flagged);
    }
    Ok(flagged)
}

#[cfg(test)]
mod tests {
    use super::*;
    use feedrank_store::{AddChunkOptions, FlagStatus};
    use tempfile::TempDir;

    fn item(
        severity: Severity,
        issues: &[IssueType],
        needs_review: bool,
    ) -> CommentAnalysis {
        CommentAnalysis {
            sentiment_score: 0.0,
            issue_types: issues.to_vec(),
            severity,
            needs_review,
            confidence: 0.9,
            summary: String::new(),
        }
    }

    #[test]
    fn test_needs_review_votes_win() {
        let analyses = vec![
            item(Severity::None, &[], true),
            item(Severity::Severe, &[], true),
        ];
        let summary = ReviewPatternDetector::detect(&analyses);
        assert_eq!(summary.reason.as_deref(), Some("2 users flagged for review"));
    }

    #[test]
    fn test_single_severe_flags() {
        let analyses = vec![
            item(Severity::None, &[], false),
            item(Severity::Severe, &[IssueType::Incorrect], false),
            item(Severity::None, &[], false),
        ];
        let summary = ReviewPatternDetector::detect(&analyses);
        assert_eq!(summary.reason.as_deref(), Some("Severe issues reported"));
    }

    #[test]
    fn test_three_moderates_flag() {
        let analyses = vec![
            item(Severity::Moderate, &[], false),
            item(Severity::Moderate, &[], false),
            item(Severity::Moderate, &[], false),
        ];
        let summary = ReviewPatternDetector::detect(&analyses);
        assert_eq!(summary.reason.as_deref(), Some("Multiple moderate issues"));
        assert_eq!(
            summary.severity_distribution,
            vec![
                (Severity::None, 0),
                (Severity::Minor, 0),
                (Severity::Moderate, 3),
                (Severity::Severe, 0),
            ]
        );
    }

    #[test]
    fn test_two_moderates_do_not_flag() {
        let analyses = vec![
            item(Severity::Moderate, &[], false),
            item(Severity::Moderate, &[], false),
        ];
        assert!(!ReviewPatternDetector::detect(&analyses).should_flag());
    }

    #[test]
    fn test_recurring_issue_needs_density() {
        // 3 of 6 mention outdated: meets max(3, 50% of 6).
        let mut analyses = vec![
            item(Severity::Minor, &[IssueType::Outdated], false),
            item(Severity::Minor, &[IssueType::Outdated], false),
            item(Severity::None, &[IssueType::Outdated], false),
        ];
        analyses.extend(std::iter::repeat_with(|| item(Severity::None, &[], false)).take(3));
        let summary = ReviewPatternDetector::detect(&analyses);
        assert_eq!(summary.reason.as_deref(), Some("Recurring issue: outdated"));

        // 3 of 8 does not reach 50%.
        analyses.extend(std::iter::repeat_with(|| item(Severity::None, &[], false)).take(2));
        assert!(!ReviewPatternDetector::detect(&analyses).should_flag());
    }

    #[test]
    fn test_recurring_issue_absolute_minimum() {
        // 2 of 2 is 100% but below the absolute minimum of 3.
        let analyses = vec![
            item(Severity::None, &[IssueType::MissingInfo], false),
            item(Severity::None, &[IssueType::MissingInfo], false),
        ];
        assert!(!ReviewPatternDetector::detect(&analyses).should_flag());
    }

    #[test]
    fn test_common_issues_tie_broken_by_first_seen() {
        let analyses = vec![
            item(Severity::None, &[IssueType::PoorCitation], false),
            item(Severity::None, &[IssueType::Outdated], false),
            item(Severity::None, &[IssueType::PoorCitation, IssueType::Outdated], false),
        ];
        let summary = ReviewPatternDetector::detect(&analyses);
        assert_eq!(
            summary.common_issues,
            vec![(IssueType::PoorCitation, 2), (IssueType::Outdated, 2)]
        );
    }

    #[test]
    fn test_none_issue_excluded() {
        let analyses = vec![
            item(Severity::None, &[IssueType::None], false),
            item(Severity::None, &[IssueType::None], false),
            item(Severity::None, &[IssueType::None], false),
            item(Severity::None, &[IssueType::None], false),
        ];
        let summary = ReviewPatternDetector::detect(&analyses);
        assert!(summary.common_issues.is_empty());
        assert!(!summary.should_flag());
    }

    #[test]
    fn test_empty_input() {
        let summary = ReviewPatternDetector::detect(&[]);
        assert!(!summary.should_flag());
        assert_eq!(summary.total_feedbacks, 0);
    }

    #[test]
    fn test_detect_and_flag_persists() {
        let dir = TempDir::new().unwrap();
        let store = SqliteStore::open(dir.path(), 8).unwrap();
        let cid = store.add_chunk("text", None, AddChunkOptions::default()).unwrap();

        let qid = store.add_query("q", None, false, 0, None).unwrap();
        let rid = store.add_response(qid, "a", &[cid], None).unwrap();
        let fid = store.add_feedback(rid, 1, Some("totally wrong")).unwrap();
        store
            .update_feedback_analysis(
                fid,
                &CommentAnalysis {
                    sentiment_score: -0.9,
                    issue_types: vec![IssueType::Incorrect],
                    severity: Severity::Severe,
                    needs_review: true,
                    confidence: 0.95,
                    summary: "wrong answer".into(),
                },
            )
            .unwrap();

        let flagged = detect_and_flag(&store).unwrap();
        assert_eq!(flagged, 1);

        let flags = store.flags_by_status(FlagStatus::Pending).unwrap();
        assert_eq!(flags.len(), 1);
        assert_eq!(flags[0].chunk_id, cid);
        assert_eq!(flags[0].reason, "Severe issues reported");
        assert_eq!(flags[0].common_issues, vec![(IssueType::Incorrect, 1)]);
        assert_eq!(flags[0].total_feedbacks, 1);
    }
}
