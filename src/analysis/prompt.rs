//! Prompt construction and response parsing for delegated reasoning.

use super::context::AnalysisContext;
use super::{Analysis, AnalysisError, CodeChange};
use crate::incident::Incident;
use chrono::{DateTime, Utc};
use serde::Deserialize;

pub const SYSTEM_PROMPT: &str = "You are an expert platform engineer and DevOps engineer specializing in \
root cause analysis. Analyze the provided incident data and answer with a single JSON object.";

const RESPONSE_SHAPE: &str = r#"{
  "root_cause": "detailed root cause explanation",
  "confidence": 0.85,
  "related_deployments": ["deployment_id"],
  "related_commits": ["commit_sha"],
  "impact_assessment": "impact description",
  "suggested_actions": ["action"],
  "code_changes": [
    {"file": "path/to/file", "change_type": "modification", "description": "what changed", "likelihood": 0.8}
  ]
}"#;

/// Render the incident, its signals and the gathered context as a prompt.
pub fn build_prompt(incident: &Incident, ctx: &AnalysisContext) -> String {
    let mut lines = vec![
        "Analyze this incident and provide a root cause analysis.".to_string(),
        String::new(),
        "INCIDENT:".to_string(),
        format!("- ID: {}", incident.id),
        format!("- Title: {}", incident.title),
        format!("- Description: {}", incident.description),
        format!("- Severity: {}", incident.severity),
        format!("- Created: {}", incident.created_at.to_rfc3339()),
        String::new(),
        "SIGNALS:".to_string(),
    ];

    for (i, s) in incident.signals.iter().enumerate() {
        let metadata = serde_json::to_string(&s.metadata).unwrap_or_else(|_| "{}".into());
        lines.extend([
            format!("Signal {}:", i + 1),
            format!("- Kind: {}", s.kind),
            format!("- Source: {}", s.source),
            format!("- Component: {}", s.component.as_deref().unwrap_or("unknown")),
            format!("- Description: {}", s.description),
            format!("- Timestamp: {}", s.timestamp.to_rfc3339()),
            format!("- Metadata: {}", metadata),
        ]);
    }

    lines.push(String::new());
    lines.push("CONTEXT:".to_string());
    lines.push(format!("Recent deployments: {}", ctx.recent_deployments.len()));
    lines.extend(ctx.recent_deployments.iter().map(|d| format!("- {} at {}", d.id, d.created_at.to_rfc3339())));
    lines.push(format!("Recent commits: {}", ctx.recent_commits.len()));
    lines.extend(
        ctx.recent_commits
            .iter()
            .map(|c| format!("- {} {}", c.sha, c.message.lines().next().unwrap_or_default())),
    );
    lines.push(format!("Related code changes: {}", ctx.related_code_changes.len()));
    lines.extend(
        ctx.related_code_changes
            .iter()
            .map(|rc| format!("- {} (relevance {:.2})", rc.commit.sha, rc.relevance)),
    );
    lines.push(format!("Similar incidents: {}", ctx.similar_incidents.len()));

    lines.push(String::new());
    lines.push(
        "Provide: the most likely root cause, a confidence between 0.0 and 1.0, related \
         deployments and commits, the impact, suggested actions and code changes to investigate."
            .to_string(),
    );
    lines.push("Answer in this JSON format:".to_string());
    lines.push(RESPONSE_SHAPE.to_string());

    let mut prompt = lines.join("\n");
    prompt.push('\n');
    prompt
}

/// Accepted response shape; keys may be snake_case or camelCase.
#[derive(Debug, Deserialize)]
struct ResponseBody {
    #[serde(alias = "rootCause")]
    root_cause: String,
    confidence: f64,
    #[serde(default, alias = "relatedDeployments")]
    related_deployments: Vec<String>,
    #[serde(default, alias = "relatedCommits")]
    related_commits: Vec<String>,
    #[serde(default, alias = "suggestedActions")]
    suggested_actions: Vec<String>,
    #[serde(default, alias = "codeChanges")]
    code_changes: Vec<CodeChange>,
    #[serde(default, alias = "impactAssessment")]
    impact_assessment: Option<String>,
}

/// Outermost `{ ... }` block of a possibly prose-wrapped reply.
fn json_block(text: &str) -> Option<&str> {
    let start = text.find('{')?;
    let end = text.rfind('}')?;
    (end > start).then(|| &text[start..=end])
}

/// Parse a reasoning-service reply into an [`Analysis`].
///
/// Any other shape is an error so the caller can fall back to rules.
pub fn parse_response(text: &str, now: DateTime<Utc>) -> Result<Analysis, AnalysisError> {
    let block = json_block(text).ok_or_else(|| AnalysisError::Unparseable("no JSON object in reply".into()))?;
    let body: ResponseBody = serde_json::from_str(block).map_err(|e| AnalysisError::Unparseable(e.to_string()))?;

    if !body.confidence.is_finite() || !(0.0..=1.0).contains(&body.confidence) {
        return Err(AnalysisError::Unparseable(format!(
            "confidence {} outside [0, 1]",
            body.confidence
        )));
    }

    let code_changes = body
        .code_changes
        .into_iter()
        .map(|mut c| {
            c.likelihood = c.likelihood.clamp(0.0, 1.0);
            c
        })
        .collect();

    Ok(Analysis {
        root_cause: body.root_cause,
        confidence: body.confidence,
        related_deployments: body.related_deployments,
        related_commits: body.related_commits,
        suggested_actions: body.suggested_actions,
        code_changes,
        impact_assessment: body.impact_assessment,
        analyzed_at: now,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::Deployment;
    use crate::detect::{Severity, Signal, SignalKind};

    #[test]
    fn test_prompt_embeds_incident_and_signals() {
        let s = Signal::new("sf-apex-1", SignalKind::Error, "salesforce", "Apex error: boom", Severity::High, Utc::now())
            .with_component("AccountTriggerHandler");
        let inc = Incident::open(s, Utc::now());
        let prompt = build_prompt(&inc, &AnalysisContext::default());
        assert!(prompt.contains(&inc.id));
        assert!(prompt.contains("Component: AccountTriggerHandler"));
        assert!(prompt.contains("Recent deployments: 0"));
        assert!(prompt.contains("\"root_cause\""));
    }

    #[test]
    fn test_prompt_sections_in_order() {
        let now = Utc::now();
        let first = Signal::new("s1", SignalKind::Error, "salesforce", "boom", Severity::High, now);
        let second = Signal::new("s2", SignalKind::Error, "salesforce", "bang", Severity::High, now);
        let mut inc = Incident::open(first, now);
        inc.attach(second, now);
        let ctx = AnalysisContext {
            recent_deployments: vec![Deployment { id: "0Af1".into(), created_at: now }],
            ..AnalysisContext::default()
        };

        let prompt = build_prompt(&inc, &ctx);
        assert!(prompt.starts_with("Analyze this incident and provide a root cause analysis.\n\nINCIDENT:\n"));
        assert!(prompt.ends_with("}\n"));

        let at = |needle: &str| prompt.find(needle).unwrap();
        assert!(at("INCIDENT:") < at("\nSIGNALS:"));
        assert!(at("Signal 1:") < at("Signal 2:"));
        assert!(at("Signal 2:") < at("\n\nCONTEXT:\n"));
        assert!(prompt.contains(&format!("Recent deployments: 1\n- 0Af1 at {}\n", now.to_rfc3339())));
        assert!(prompt.contains("Similar incidents: 0\n\nProvide:"));
        assert!(prompt.contains("Answer in this JSON format:\n{"));
    }

    #[test]
    fn test_parse_prose_wrapped_reply() {
        let reply = r#"Here is my analysis:
```json
{"root_cause": "null pointer in trigger", "confidence": 0.82,
 "related_commits": ["abc"], "suggested_actions": ["Revert abc"],
 "code_changes": [{"file": "a.cls", "change_type": "modification", "description": "x", "likelihood": 1.4}]}
```"#;
        let a = parse_response(reply, Utc::now()).unwrap();
        assert_eq!(a.root_cause, "null pointer in trigger");
        assert_eq!(a.confidence, 0.82);
        assert_eq!(a.related_commits, vec!["abc".to_string()]);
        assert_eq!(a.code_changes[0].likelihood, 1.0);
    }

    #[test]
    fn test_parse_camel_case_keys() {
        let reply = r#"{"rootCause": "bad deploy", "confidence": 0.9, "relatedDeployments": ["0Af1"],
            "impactAssessment": "checkout down", "codeChanges": [{"file": "a", "changeType": "deletion"}]}"#;
        let a = parse_response(reply, Utc::now()).unwrap();
        assert_eq!(a.related_deployments, vec!["0Af1".to_string()]);
        assert_eq!(a.impact_assessment.as_deref(), Some("checkout down"));
        assert_eq!(a.code_changes[0].change_type, "deletion");
    }

    #[test]
    fn test_missing_confidence_is_rejected() {
        let err = parse_response(r#"{"root_cause": "something"}"#, Utc::now()).unwrap_err();
        assert!(matches!(err, AnalysisError::Unparseable(_)));
    }

    #[test]
    fn test_out_of_range_or_textual_confidence_is_rejected() {
        assert!(parse_response(r#"{"root_cause": "x", "confidence": 1.5}"#, Utc::now()).is_err());
        assert!(parse_response(r#"{"root_cause": "x", "confidence": "high"}"#, Utc::now()).is_err());
        assert!(parse_response("I could not determine anything.", Utc::now()).is_err());
    }
}
