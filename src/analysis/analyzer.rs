use super::context::{self, AnalysisContext, ContextProvider};
use super::prompt::{build_prompt, parse_response, SYSTEM_PROMPT};
use super::reasoning::ReasoningService;
use super::{rules, Analysis, AnalysisError};
use crate::incident::Incident;
use chrono::Utc;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Produces an [`Analysis`] for an incident.
///
/// Analysis is total: delegated reasoning failures fall back to the rule
/// engine, and an incident that cannot be analyzed at all gets a
/// zero-confidence "analysis failed" result.
pub struct RootCauseAnalyzer {
    context: Arc<dyn ContextProvider>,
    reasoning: Option<Arc<dyn ReasoningService>>,
    window: chrono::Duration,
    reasoning_timeout: Duration,
}

impl RootCauseAnalyzer {
    /// Rule-based analyzer over `context`, looking back `window`.
    pub fn new(context: Arc<dyn ContextProvider>, window: chrono::Duration) -> Self {
        Self {
            context,
            reasoning: None,
            window,
            reasoning_timeout: Duration::from_secs(60),
        }
    }

    /// Prefer `service` for analysis, bounded by `timeout`.
    pub fn with_reasoning(mut self, service: Arc<dyn ReasoningService>, timeout: Duration) -> Self {
        self.reasoning = Some(service);
        self.reasoning_timeout = timeout;
        self
    }

    pub fn is_delegated(&self) -> bool {
        self.reasoning.is_some()
    }

    pub async fn gather_context(&self, incident: &Incident) -> AnalysisContext {
        context::gather(self.context.as_ref(), incident, self.window, Utc::now()).await
    }

    /// Gather context and analyze in one step.
    pub async fn analyze_incident(&self, incident: &Incident) -> Analysis {
        let ctx = self.gather_context(incident).await;
        self.analyze(incident, &ctx).await
    }

    pub async fn analyze(&self, incident: &Incident, ctx: &AnalysisContext) -> Analysis {
        let now = Utc::now();
        if incident.signals.is_empty() {
            let e = AnalysisError::EmptyIncident(incident.id.clone());
            warn!(incident_id = %incident.id, error = %e, "analysis failed");
            return Analysis::failed(now);
        }

        if let Some(service) = &self.reasoning {
            match self.delegated(service.as_ref(), incident, ctx).await {
                Ok(analysis) => {
                    info!(
                        incident_id = %incident.id,
                        service = %service.name(),
                        confidence = analysis.confidence,
                        "delegated analysis complete"
                    );
                    return analysis;
                }
                Err(e) => {
                    warn!(incident_id = %incident.id, error = %e, "delegated analysis failed, using rule engine");
                }
            }
        }

        let analysis = rules::analyze(incident, ctx, now);
        debug!(incident_id = %incident.id, confidence = analysis.confidence, root_cause = %analysis.root_cause, "rule-based analysis complete");
        analysis
    }

    async fn delegated(
        &self,
        service: &dyn ReasoningService,
        incident: &Incident,
        ctx: &AnalysisContext,
    ) -> Result<Analysis, AnalysisError> {
        let prompt = build_prompt(incident, ctx);
        let reply = tokio::time::timeout(self.reasoning_timeout, service.complete(SYSTEM_PROMPT, &prompt))
            .await
            .map_err(|_| AnalysisError::Timeout(self.reasoning_timeout.as_secs()))??;
        parse_response(&reply, Utc::now())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analysis::context::StaticContext;
    use crate::analysis::ANALYSIS_FAILED;
    use crate::detect::{Severity, Signal, SignalKind};

    struct CannedReasoning {
        reply: Result<String, String>,
        delay: Option<Duration>,
    }

    #[async_trait::async_trait]
    impl ReasoningService for CannedReasoning {
        fn name(&self) -> &str {
            "canned"
        }

        async fn complete(&self, _system: &str, _prompt: &str) -> Result<String, AnalysisError> {
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            self.reply.clone().map_err(AnalysisError::Reasoning)
        }
    }

    fn incident() -> Incident {
        let now = Utc::now();
        let mut inc = Incident::open(
            Signal::new("s1", SignalKind::Error, "salesforce", "boom", Severity::High, now).with_component("A"),
            now,
        );
        inc.attach(
            Signal::new("s2", SignalKind::Error, "salesforce", "boom", Severity::High, now).with_component("A"),
            now,
        );
        inc
    }

    fn analyzer_with(reasoning: CannedReasoning) -> RootCauseAnalyzer {
        RootCauseAnalyzer::new(Arc::new(StaticContext::default()), chrono::Duration::hours(24))
            .with_reasoning(Arc::new(reasoning), Duration::from_millis(100))
    }

    #[tokio::test]
    async fn test_rule_engine_without_reasoning() {
        let analyzer = RootCauseAnalyzer::new(Arc::new(StaticContext::default()), chrono::Duration::hours(24));
        assert!(!analyzer.is_delegated());
        let a = analyzer.analyze_incident(&incident()).await;
        assert!((a.confidence - 0.45).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_delegated_reply_is_used() {
        let analyzer = analyzer_with(CannedReasoning {
            reply: Ok(r#"{"root_cause": "bad trigger", "confidence": 0.9}"#.into()),
            delay: None,
        });
        let a = analyzer.analyze_incident(&incident()).await;
        assert_eq!(a.root_cause, "bad trigger");
        assert_eq!(a.confidence, 0.9);
    }

    #[tokio::test]
    async fn test_missing_confidence_falls_back_to_rules() {
        let analyzer = analyzer_with(CannedReasoning {
            reply: Ok(r#"{"root_cause": "bad trigger"}"#.into()),
            delay: None,
        });
        let a = analyzer.analyze_incident(&incident()).await;
        assert!(a.root_cause.contains("Multiple errors detected"));
        assert!((a.confidence - 0.45).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_service_error_and_timeout_fall_back() {
        let failing = analyzer_with(CannedReasoning {
            reply: Err("HTTP 500".into()),
            delay: None,
        });
        assert!((failing.analyze_incident(&incident()).await.confidence - 0.45).abs() < 1e-9);

        let slow = analyzer_with(CannedReasoning {
            reply: Ok(r#"{"root_cause": "late", "confidence": 0.9}"#.into()),
            delay: Some(Duration::from_secs(5)),
        });
        assert_ne!(slow.analyze_incident(&incident()).await.root_cause, "late");
    }

    #[tokio::test]
    async fn test_empty_incident_yields_failed_analysis() {
        let analyzer = RootCauseAnalyzer::new(Arc::new(StaticContext::default()), chrono::Duration::hours(24));
        let mut inc = incident();
        inc.signals.clear();
        let a = analyzer.analyze(&inc, &AnalysisContext::default()).await;
        assert_eq!(a.root_cause, ANALYSIS_FAILED);
        assert_eq!(a.confidence, 0.0);
    }
}
