//! Normalizers mapping raw source records into [`Signal`]s.
//!
//! Records that do not describe an anomaly (a successful deployment, a passing
//! test) are dropped. Malformed records are dropped with a debug log; a
//! normalizer never fails a fetch.

use super::{Severity, Signal, SignalKind};
use chrono::{DateTime, NaiveDateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::debug;

/// The record shapes a feed can carry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    ApexError,
    FlowError,
    Deployment,
    GithubDeployment,
    TestResult,
    MonitoringAlert,
    LogAnomaly,
}

impl RecordKind {
    /// Normalize one raw record produced by adapter `adapter`.
    pub fn normalize(&self, record: &Value, adapter: &str) -> Option<Signal> {
        let signal = match self {
            RecordKind::ApexError => apex_error(record),
            RecordKind::FlowError => flow_error(record),
            RecordKind::Deployment => deployment(record),
            RecordKind::GithubDeployment => github_deployment(record),
            RecordKind::TestResult => test_result(record),
            RecordKind::MonitoringAlert => monitoring_alert(record),
            RecordKind::LogAnomaly => log_anomaly(record),
        };

        match signal {
            Some(s) => Some(s.with_adapter(adapter).with_raw(record.to_string())),
            None => {
                debug!(adapter = %adapter, kind = ?self, "record skipped during normalization");
                None
            }
        }
    }
}

/// Parse a source timestamp. Offsets are honoured; naive values are taken as UTC.
pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    if let Ok(dt) = DateTime::parse_from_rfc3339(value) {
        return Some(dt.with_timezone(&Utc));
    }
    // Salesforce style: 2025-01-01T10:00:00.000+0000
    if let Ok(dt) = DateTime::parse_from_str(value, "%Y-%m-%dT%H:%M:%S%.f%z") {
        return Some(dt.with_timezone(&Utc));
    }
    let trimmed = value.trim_end_matches('Z');
    for fmt in ["%Y-%m-%dT%H:%M:%S%.f", "%Y-%m-%d %H:%M:%S%.f"] {
        if let Ok(naive) = NaiveDateTime::parse_from_str(trimmed, fmt) {
            return Some(naive.and_utc());
        }
    }
    None
}

/// Severity from free-text error messages.
pub fn keyword_severity(message: &str) -> Severity {
    let msg = message.to_lowercase();
    let has_any = |words: &[&str]| words.iter().any(|w| msg.contains(w));

    if has_any(&["critical", "fatal", "system"]) {
        Severity::Critical
    } else if has_any(&["error", "exception", "fail"]) {
        Severity::High
    } else if has_any(&["warning", "deprecated"]) {
        Severity::Medium
    } else {
        Severity::Low
    }
}

/// Severity from a monitoring system's own label.
pub fn alert_severity(label: &str) -> Severity {
    match label.to_lowercase().as_str() {
        "critical" => Severity::Critical,
        "high" | "error" => Severity::High,
        "medium" | "warning" => Severity::Medium,
        "low" => Severity::Low,
        _ => Severity::Medium,
    }
}

fn str_at<'a>(record: &'a Value, path: &[&str]) -> Option<&'a str> {
    let mut cur = record;
    for key in path {
        cur = cur.get(key)?;
    }
    cur.as_str()
}

/// Record ids may be strings or numbers depending on the source.
fn id_at(record: &Value, key: &str) -> Option<String> {
    match record.get(key)? {
        Value::String(s) => Some(s.clone()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn ts_at(record: &Value, key: &str) -> Option<DateTime<Utc>> {
    str_at(record, &[key]).and_then(parse_timestamp)
}

fn meta(pairs: Vec<(&str, Option<Value>)>) -> Map<String, Value> {
    pairs
        .into_iter()
        .map(|(k, v)| (k.to_string(), v.unwrap_or(Value::Null)))
        .collect()
}

fn apex_error(record: &Value) -> Option<Signal> {
    let id = id_at(record, "Id")?;
    let timestamp = ts_at(record, "CreatedDate")?;
    let message = str_at(record, &["Message"]).unwrap_or("Unknown error");
    let class_name = str_at(record, &["ApexClass", "Name"]);

    Some(
        Signal::new(
            format!("sf-apex-{}", id),
            SignalKind::Error,
            "salesforce",
            format!("Apex error: {}", message),
            keyword_severity(message),
            timestamp,
        )
        .with_component(class_name.unwrap_or("apex"))
        .with_metadata(meta(vec![
            ("class_name", class_name.map(Value::from)),
            ("method_name", record.get("MethodName").cloned()),
            ("line_number", record.get("Line").cloned()),
            ("stack_trace", record.get("StackTrace").cloned()),
        ])),
    )
}

fn flow_error(record: &Value) -> Option<Signal> {
    let id = id_at(record, "Id")?;
    let timestamp = ts_at(record, "CreatedDate")?;
    let message = str_at(record, &["ErrorMessage"]).unwrap_or("Unknown error");
    let flow_name = str_at(record, &["FlowVersionView", "MasterLabel"]);

    Some(
        Signal::new(
            format!("sf-flow-{}", id),
            SignalKind::Error,
            "salesforce",
            format!("Flow error: {}", message),
            keyword_severity(message),
            timestamp,
        )
        .with_component(flow_name.unwrap_or("flow"))
        .with_metadata(meta(vec![
            ("flow_name", flow_name.map(Value::from)),
            ("element_name", record.get("ElementName").cloned()),
        ])),
    )
}

fn deployment(record: &Value) -> Option<Signal> {
    if str_at(record, &["Status"]) != Some("Failed") {
        return None;
    }
    let id = id_at(record, "Id")?;
    let timestamp = ts_at(record, "CreatedDate")?;
    let message = str_at(record, &["ErrorMessage"]).unwrap_or("Unknown error");

    Some(
        Signal::new(
            format!("deploy-{}", id),
            SignalKind::Deployment,
            "salesforce",
            format!("Deployment failed: {}", message),
            Severity::High,
            timestamp,
        )
        .with_component("deployment")
        .with_metadata(meta(vec![
            ("deployment_id", Some(Value::from(id))),
            ("created_by", str_at(record, &["CreatedBy", "Name"]).map(Value::from)),
            ("component_failures", record.get("ComponentFailures").cloned()),
        ])),
    )
}

fn github_deployment(record: &Value) -> Option<Signal> {
    let failed = ["state", "status"]
        .iter()
        .any(|key| str_at(record, &[*key]) == Some("failure"));
    if !failed {
        return None;
    }
    let id = id_at(record, "id")?;
    let timestamp = ts_at(record, "created_at")?;
    let message = str_at(record, &["description"]).unwrap_or("Unknown error");

    Some(
        Signal::new(
            format!("gh-deploy-{}", id),
            SignalKind::Deployment,
            "github",
            format!("GitHub deployment failed: {}", message),
            Severity::High,
            timestamp,
        )
        .with_component("deployment")
        .with_metadata(meta(vec![
            ("deployment_id", Some(Value::from(id))),
            ("environment", record.get("environment").cloned()),
            ("ref", record.get("ref").cloned()),
            ("sha", record.get("sha").cloned()),
        ])),
    )
}

fn test_result(record: &Value) -> Option<Signal> {
    if str_at(record, &["Outcome"]) != Some("Fail") {
        return None;
    }
    let id = id_at(record, "Id")?;
    let timestamp = ts_at(record, "SystemModstamp")?;
    let method = str_at(record, &["MethodName"]).unwrap_or("unknown");
    let message = str_at(record, &["Message"]).unwrap_or("Unknown error");
    let test_class = str_at(record, &["ApexClass", "Name"]);

    Some(
        Signal::new(
            format!("test-{}", id),
            SignalKind::TestFailure,
            "salesforce",
            format!("Test failure: {} - {}", method, message),
            Severity::Medium,
            timestamp,
        )
        .with_component(test_class.unwrap_or("apex_test"))
        .with_metadata(meta(vec![
            ("test_class", test_class.map(Value::from)),
            ("test_method", record.get("MethodName").cloned()),
            ("stack_trace", record.get("StackTrace").cloned()),
            ("run_time", record.get("TestTimestamp").cloned()),
        ])),
    )
}

fn object_metadata(record: &Value) -> Map<String, Value> {
    record
        .get("metadata")
        .and_then(Value::as_object)
        .cloned()
        .unwrap_or_default()
}

fn monitoring_alert(record: &Value) -> Option<Signal> {
    let id = id_at(record, "id")?;
    // Alerts without a usable timestamp are stamped on arrival.
    let timestamp = ts_at(record, "timestamp").unwrap_or_else(Utc::now);
    let message = str_at(record, &["message"]).unwrap_or("unknown");
    let severity = alert_severity(str_at(record, &["severity"]).unwrap_or(""));

    let mut signal = Signal::new(
        format!("monitoring-{}", id),
        SignalKind::MonitoringAlert,
        "monitoring",
        format!("Monitoring alert: {}", message),
        severity,
        timestamp,
    )
    .with_metadata(object_metadata(record));
    if let Some(component) = str_at(record, &["component"]) {
        signal = signal.with_component(component);
    }
    Some(signal)
}

fn log_anomaly(record: &Value) -> Option<Signal> {
    let id = id_at(record, "id")?;
    let timestamp = ts_at(record, "timestamp").unwrap_or_else(Utc::now);
    let description = str_at(record, &["description"]).unwrap_or("unknown");

    let mut signal = Signal::new(
        format!("log-anomaly-{}", id),
        SignalKind::LogAnomaly,
        "logs",
        format!("Log anomaly detected: {}", description),
        Severity::Medium,
        timestamp,
    )
    .with_metadata(object_metadata(record));
    if let Some(component) = str_at(record, &["component"]) {
        signal = signal.with_component(component);
    }
    Some(signal)
}
