//! Deterministic rule engine. Always available; used whenever delegated
//! reasoning is disabled or fails.

use super::context::AnalysisContext;
use super::{Analysis, CodeChange};
use crate::detect::SignalKind;
use crate::incident::Incident;
use chrono::{DateTime, Duration, Utc};
use std::collections::BTreeSet;

pub const UNDETERMINED: &str = "unable to determine root cause.";

const DEPLOYMENT_WINDOW_SECS: i64 = 3600;
const CLUSTER_WINDOW_SECS: i64 = 300;

/// One applied factor: its reason, weight and suggested follow-up.
struct Factor {
    reason: String,
    weight: f64,
    action: String,
}

/// First deployment that precedes some signal by less than an hour.
fn deployment_correlation(incident: &Incident, ctx: &AnalysisContext) -> Option<String> {
    ctx.recent_deployments.iter().find_map(|d| {
        incident
            .signals
            .iter()
            .any(|s| {
                let diff = s.timestamp - d.created_at;
                diff >= Duration::zero() && diff < Duration::seconds(DEPLOYMENT_WINDOW_SECS)
            })
            .then(|| d.id.clone())
    })
}

fn code_correlation(ctx: &AnalysisContext) -> Option<String> {
    ctx.related_code_changes
        .iter()
        .max_by(|a, b| a.relevance.total_cmp(&b.relevance))
        .map(|c| c.commit.sha.clone())
}

fn pattern_factors(incident: &Incident) -> Vec<Factor> {
    let mut factors = Vec::new();
    let signals = &incident.signals;

    let errors = signals.iter().filter(|s| s.kind == SignalKind::Error).count();
    if errors > 1 {
        factors.push(Factor {
            reason: format!("Multiple errors detected ({})", errors),
            weight: 0.1,
            action: "Investigate error clustering pattern".into(),
        });
    }

    let components: Vec<&str> = signals.iter().filter_map(|s| s.component.as_deref()).collect();
    let distinct: BTreeSet<&str> = components.iter().copied().collect();
    if components.len() > 1 && distinct.len() == 1 {
        let component = components[0];
        factors.push(Factor {
            reason: format!("All errors in same component: {}", component),
            weight: 0.2,
            action: format!("Focus investigation on {} component", component),
        });
    }

    if signals.len() > 1 {
        let first = signals.iter().map(|s| s.timestamp).min();
        let last = signals.iter().map(|s| s.timestamp).max();
        if let (Some(first), Some(last)) = (first, last) {
            if (last - first).num_seconds() < CLUSTER_WINDOW_SECS {
                factors.push(Factor {
                    reason: "Signals clustered in time (< 5 minutes)".into(),
                    weight: 0.15,
                    action: "Investigate what triggered simultaneous issues".into(),
                });
            }
        }
    }

    factors
}

/// Files touched by relevant commits, one entry per (commit, file).
fn code_changes(ctx: &AnalysisContext) -> Vec<CodeChange> {
    let mut seen = BTreeSet::new();
    let mut out = Vec::new();
    for rc in &ctx.related_code_changes {
        if !seen.insert(rc.commit.sha.as_str()) {
            continue;
        }
        let summary = rc.commit.message.lines().next().unwrap_or_default();
        for file in &rc.commit.files_changed {
            out.push(CodeChange {
                file: file.clone(),
                change_type: "modification".into(),
                description: format!("{} ({})", summary, rc.commit.sha),
                likelihood: rc.relevance.min(1.0),
            });
        }
    }
    out
}

/// Score `incident` against `ctx` using the fixed factor table.
pub fn analyze(incident: &Incident, ctx: &AnalysisContext, now: DateTime<Utc>) -> Analysis {
    let mut factors = Vec::new();

    if let Some(id) = deployment_correlation(incident, ctx) {
        factors.push(Factor {
            reason: format!("Correlated with deployment: {}", id),
            weight: 0.4,
            action: "Review recent deployment changes".into(),
        });
    }
    if let Some(sha) = code_correlation(ctx) {
        factors.push(Factor {
            reason: format!("Related to code changes: {}", sha),
            weight: 0.3,
            action: "Review recent code changes".into(),
        });
    }
    if !ctx.similar_incidents.is_empty() {
        factors.push(Factor {
            reason: "Similar incidents found in history".into(),
            weight: 0.2,
            action: "Review resolution of similar incidents".into(),
        });
    }
    factors.extend(pattern_factors(incident));

    let (root_cause, confidence) = if factors.is_empty() {
        (UNDETERMINED.to_string(), 0.0)
    } else {
        let reasons: Vec<&str> = factors.iter().map(|f| f.reason.as_str()).collect();
        let total: f64 = factors.iter().map(|f| f.weight).sum();
        (reasons.join("; "), total.clamp(0.0, 1.0))
    };

    Analysis {
        root_cause,
        confidence,
        related_deployments: ctx.recent_deployments.iter().map(|d| d.id.clone()).collect(),
        related_commits: ctx.recent_commits.iter().map(|c| c.sha.clone()).collect(),
        suggested_actions: factors.into_iter().map(|f| f.action).collect(),
        code_changes: code_changes(ctx),
        impact_assessment: None,
        analyzed_at: now,
    }
}
