//! Payload and message rendering for each action kind.

use crate::analysis::Analysis;
use crate::detect::Severity;
use crate::incident::Incident;
use serde_json::{json, Value};
use std::fmt::Write;

const ROOT_CAUSE_PREVIEW: usize = 200;
const COMMITS_LISTED: usize = 5;
const REVIEW_ACTIONS_LISTED: usize = 3;
const TIME_FORMAT: &str = "%Y-%m-%d %H:%M:%S UTC";

pub fn ticket_priority(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "Highest",
        Severity::High => "High",
        Severity::Medium => "Medium",
        Severity::Low => "Low",
    }
}

fn chat_color(severity: Severity) -> &'static str {
    match severity {
        Severity::Critical => "danger",
        Severity::High => "warning",
        Severity::Medium => "#ff9900",
        Severity::Low => "good",
    }
}

fn percent(confidence: f64) -> String {
    format!("{:.1}%", confidence * 100.0)
}

/// Cut `text` to at most `max` characters, marking the cut with "...".
pub fn truncate(text: &str, max: usize) -> String {
    match text.char_indices().nth(max) {
        Some((idx, _)) => format!("{}...", &text[..idx]),
        None => text.to_string(),
    }
}

fn summary(incident: &Incident) -> String {
    format!("[{}] {}", incident.severity.as_str().to_uppercase(), incident.title)
}

fn incident_link(dashboard_url: &str, incident: &Incident) -> String {
    format!("{}/incidents/{}", dashboard_url.trim_end_matches('/'), incident.id)
}

pub fn ticket_payload(incident: &Incident, analysis: &Analysis, project: &str) -> Value {
    let mut d = String::new();
    let _ = writeln!(d, "*Incident Details:*");
    let _ = writeln!(d, "- ID: {}", incident.id);
    let _ = writeln!(d, "- Severity: {}", incident.severity.as_str().to_uppercase());
    let _ = writeln!(d, "- Created: {}", incident.created_at.format(TIME_FORMAT));
    let _ = writeln!(d, "\n*Description:*\n{}", incident.description);
    let _ = writeln!(d, "\n*Signals Detected:*");
    for (i, s) in incident.signals.iter().enumerate() {
        let _ = writeln!(d, "{}. *{}* from {}", i + 1, s.kind, s.source);
        let _ = writeln!(d, "   - Component: {}", s.component.as_deref().unwrap_or("Unknown"));
        let _ = writeln!(d, "   - Time: {}", s.timestamp.format(TIME_FORMAT));
        let _ = writeln!(d, "   - Details: {}", s.description);
    }

    let _ = writeln!(d, "\n*Analysis:*");
    let _ = writeln!(d, "- Root Cause: {}", analysis.root_cause);
    let _ = writeln!(d, "- Confidence: {}", percent(analysis.confidence));
    let _ = writeln!(
        d,
        "- Impact: {}",
        analysis.impact_assessment.as_deref().unwrap_or("Not assessed")
    );
    let _ = writeln!(d, "\n*Suggested Actions:*");
    for a in &analysis.suggested_actions {
        let _ = writeln!(d, "- {}", a);
    }
    if analysis.has_related_deployments() {
        let _ = writeln!(d, "\n*Related Deployments:* {}", analysis.related_deployments.join(", "));
    }
    if analysis.has_related_commits() {
        let commits: Vec<&str> = analysis
            .related_commits
            .iter()
            .take(COMMITS_LISTED)
            .map(String::as_str)
            .collect();
        let _ = writeln!(d, "\n*Related Commits:* {}", commits.join(", "));
    }

    json!({
        "project": {"key": project},
        "summary": summary(incident),
        "description": d,
        "issuetype": {"name": "Bug"},
        "priority": {"name": ticket_priority(incident.severity)},
        "labels": ["signalwatch", "auto-created", incident.severity.as_str()],
    })
}

pub fn review_comment(incident: &Incident, analysis: &Analysis, dashboard_url: &str) -> String {
    let mut c = String::new();
    let _ = writeln!(c, "## Incident Alert\n");
    let _ = writeln!(
        c,
        "This change may be related to incident **{}** detected in production.\n",
        incident.id
    );
    let _ = writeln!(c, "**Incident Details:**");
    let _ = writeln!(c, "- **Severity:** {}", incident.severity.as_str().to_uppercase());
    let _ = writeln!(c, "- **Description:** {}", incident.description);
    let _ = writeln!(c, "- **Detected:** {}", incident.created_at.format(TIME_FORMAT));
    let _ = writeln!(c, "\n**Analysis:**");
    let _ = writeln!(c, "- **Root Cause:** {}", analysis.root_cause);
    let _ = writeln!(c, "- **Confidence:** {}", percent(analysis.confidence));

    if !analysis.suggested_actions.is_empty() {
        let _ = writeln!(c, "\n**Recommended Actions:**");
        for a in analysis.suggested_actions.iter().take(REVIEW_ACTIONS_LISTED) {
            let _ = writeln!(c, "- {}", a);
        }
    }

    let _ = writeln!(c, "\n**Next Steps:**");
    let _ = writeln!(c, "1. Review the changes for potential issues");
    let _ = writeln!(c, "2. Consider whether a rollback is necessary");
    let _ = writeln!(c, "3. Follow the incident at {}", incident_link(dashboard_url, incident));
    c
}

pub fn chat_alert(incident: &Incident, analysis: &Analysis) -> Value {
    let fields = json!([
        {"title": "Incident ID", "value": incident.id, "short": true},
        {"title": "Severity", "value": incident.severity.as_str().to_uppercase(), "short": true},
        {"title": "Status", "value": incident.status.as_str(), "short": true},
        {"title": "Confidence", "value": percent(analysis.confidence), "short": true},
        {"title": "Root Cause", "value": truncate(&analysis.root_cause, ROOT_CAUSE_PREVIEW), "short": false},
    ]);

    json!({
        "attachments": [{
            "color": chat_color(incident.severity),
            "title": format!("ALERT: {}", incident.title),
            "text": incident.description,
            "fields": fields,
            "footer": "signalwatch",
            "ts": incident.created_at.timestamp(),
        }]
    })
}

pub fn code_issue_payload(incident: &Incident, analysis: &Analysis, dashboard_url: &str) -> Value {
    let mut b = String::new();
    let _ = writeln!(b, "## Incident Report: {}\n", incident.id);
    let _ = writeln!(b, "**Severity:** {}", incident.severity.as_str().to_uppercase());
    let _ = writeln!(b, "**Status:** {}", incident.status);
    let _ = writeln!(b, "**Created:** {}", incident.created_at.format(TIME_FORMAT));
    let _ = writeln!(b, "\n### Description\n{}", incident.description);
    let _ = writeln!(b, "\n### Signals Detected");
    for s in &incident.signals {
        let _ = writeln!(b, "- **{}** from `{}`", s.kind, s.source);
        let _ = writeln!(b, "  - Component: `{}`", s.component.as_deref().unwrap_or("Unknown"));
        let _ = writeln!(b, "  - Time: {}", s.timestamp.format(TIME_FORMAT));
        let _ = writeln!(b, "  - Details: {}", s.description);
    }

    let _ = writeln!(b, "\n### Analysis");
    let _ = writeln!(b, "- **Root Cause:** {}", analysis.root_cause);
    let _ = writeln!(b, "- **Confidence:** {}", percent(analysis.confidence));
    let _ = writeln!(b, "\n### Recommended Actions");
    for a in &analysis.suggested_actions {
        let _ = writeln!(b, "- [ ] {}", a);
    }
    if !analysis.code_changes.is_empty() {
        let _ = writeln!(b, "\n### Code Changes to Investigate");
        for change in &analysis.code_changes {
            let _ = writeln!(
                b,
                "- `{}` - {} (likelihood: {})",
                change.file,
                change.description,
                percent(change.likelihood)
            );
        }
    }
    let _ = writeln!(b, "\n### Links\n- {}", incident_link(dashboard_url, incident));

    let mut labels = vec!["signalwatch", "auto-created", incident.severity.as_str()];
    if analysis.has_related_commits() {
        labels.push("deployment-related");
    }

    json!({
        "title": summary(incident),
        "body": b,
        "labels": labels,
    })
}

pub fn rollback_message(incident: &Incident, analysis: &Analysis, dashboard_url: &str) -> Value {
    let link = incident_link(dashboard_url, incident);
    json!({
        "text": "*URGENT: Rollback Recommendation*",
        "attachments": [{
            "color": "danger",
            "title": format!("Incident {} - {}", incident.id, incident.title),
            "fields": [
                {"title": "Severity", "value": incident.severity.as_str().to_uppercase(), "short": true},
                {"title": "Confidence", "value": percent(analysis.confidence), "short": true},
                {"title": "Related Deployments", "value": analysis.related_deployments.join(", "), "short": false},
                {"title": "Root Cause", "value": analysis.root_cause, "short": false},
            ],
            "actions": [
                {"type": "button", "text": "Initiate Rollback", "style": "danger", "url": link},
                {"type": "button", "text": "View Details", "url": link},
            ],
        }]
    })
}
