//! Confidence gate: which remediation actions an analysis warrants.

use super::ActionKind;
use crate::analysis::Analysis;
use crate::detect::Severity;
use crate::incident::Incident;
use serde::Serialize;

pub const CHAT_THRESHOLD: f64 = 0.7;
pub const TICKET_THRESHOLD: f64 = 0.5;
pub const REVIEW_THRESHOLD: f64 = 0.6;
pub const ROLLBACK_THRESHOLD: f64 = 0.8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct ActionPlan {
    pub notify_chat: bool,
    pub create_ticket: bool,
    pub comment_on_review: bool,
    pub create_code_issue: bool,
    pub suggest_rollback: bool,
}

impl ActionPlan {
    /// Enabled actions, in a fixed order.
    pub fn kinds(&self) -> Vec<ActionKind> {
        [
            (self.create_ticket, ActionKind::TicketCreate),
            (self.comment_on_review, ActionKind::CommentOnReview),
            (self.notify_chat, ActionKind::ChatNotify),
            (self.create_code_issue, ActionKind::CodeIssueCreate),
            (self.suggest_rollback, ActionKind::RollbackSuggest),
        ]
        .into_iter()
        .filter_map(|(enabled, kind)| enabled.then_some(kind))
        .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.kinds().is_empty()
    }
}

/// Pure: the same inputs always yield the same plan. All thresholds are strict.
pub fn plan(incident: &Incident, analysis: &Analysis) -> ActionPlan {
    let confidence = analysis.confidence;
    ActionPlan {
        notify_chat: confidence > CHAT_THRESHOLD,
        create_ticket: confidence > TICKET_THRESHOLD,
        comment_on_review: analysis.has_related_commits() && confidence > REVIEW_THRESHOLD,
        create_code_issue: analysis
            .suggested_actions
            .iter()
            .any(|a| a.to_lowercase().contains("code")),
        suggest_rollback: analysis.has_related_deployments()
            && matches!(incident.severity, Severity::High | Severity::Critical)
            && confidence > ROLLBACK_THRESHOLD,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Signal, SignalKind};
    use chrono::Utc;

    fn incident(severity: Severity) -> Incident {
        Incident::open(
            Signal::new("s1", SignalKind::Error, "salesforce", "boom", severity, Utc::now()),
            Utc::now(),
        )
    }

    fn analysis(confidence: f64) -> Analysis {
        let mut a = Analysis::failed(Utc::now());
        a.root_cause = "x".into();
        a.confidence = confidence;
        a
    }

    #[test]
    fn test_low_confidence_enables_nothing() {
        let p = plan(&incident(Severity::High), &analysis(0.45));
        assert!(p.is_empty());
    }

    #[test]
    fn test_thresholds_are_strict() {
        let inc = incident(Severity::High);
        let p = plan(&inc, &analysis(0.7));
        assert!(!p.notify_chat);
        assert!(p.create_ticket);

        let p = plan(&inc, &analysis(0.5));
        assert!(!p.create_ticket);
    }

    #[test]
    fn test_review_comment_needs_commits() {
        let inc = incident(Severity::Medium);
        let mut a = analysis(0.65);
        assert!(!plan(&inc, &a).comment_on_review);
        a.related_commits.push("abc".into());
        assert!(plan(&inc, &a).comment_on_review);
    }

    #[test]
    fn test_code_issue_is_case_insensitive() {
        let inc = incident(Severity::Low);
        let mut a = analysis(0.1);
        a.suggested_actions.push("Review recent CODE changes".into());
        let p = plan(&inc, &a);
        assert!(p.create_code_issue);
        assert_eq!(p.kinds(), vec![ActionKind::CodeIssueCreate]);
    }

    #[test]
    fn test_rollback_needs_severity_deployments_and_confidence() {
        let mut a = analysis(0.85);
        a.related_deployments.push("0Af1".into());
        assert!(plan(&incident(Severity::Critical), &a).suggest_rollback);
        assert!(plan(&incident(Severity::High), &a).suggest_rollback);
        assert!(!plan(&incident(Severity::Medium), &a).suggest_rollback);

        a.confidence = 0.8;
        assert!(!plan(&incident(Severity::Critical), &a).suggest_rollback);
    }

    #[test]
    fn test_plan_is_deterministic() {
        let inc = incident(Severity::Critical);
        let mut a = analysis(0.95);
        a.related_commits.push("abc".into());
        a.related_deployments.push("0Af1".into());
        a.suggested_actions.push("Review recent code changes".into());
        let first = plan(&inc, &a);
        assert_eq!(first, plan(&inc, &a));
        assert_eq!(first.kinds().len(), 5);
    }
}
