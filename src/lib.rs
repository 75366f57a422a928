//! signalwatch -- correlates anomaly signals into incidents, explains them and
//! acts on the confident ones.
//!
//! The pipeline is: signal adapters ([`detect`]) feed the incident correlator
//! ([`correlate`]); each updated incident is analyzed ([`analysis`]) and, when
//! confidence is high enough, remediated through external sinks ([`actions`]).
//! The [`agent`] drives the poll loop and [`api`] exposes its state.

pub mod actions;
pub mod agent;
pub mod analysis;
pub mod api;
pub mod config;
pub mod correlate;
pub mod demo;
pub mod detect;
pub mod incident;

use std::sync::Arc;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;

use crate::actions::{ActionExecutor, ActionSinks, ChatSink, DryRunSink, ExecutorSettings, ReviewSink, TicketSink, WebhookSink};
use crate::agent::ObservabilityAgent;
use crate::analysis::{HttpContextProvider, OpenAiCompatClient, RootCauseAnalyzer};
use crate::config::{secret_from_env, AgentConfig};
use crate::detect::{FeedAdapter, HttpFeed, SignalDetector, SignalSource};

fn webhook(label: &str, url: &str, timeout: Duration) -> Result<Arc<WebhookSink>> {
    let sink = WebhookSink::new(label, url, timeout).with_context(|| format!("failed to build {} sink", label))?;
    Ok(Arc::new(sink))
}

fn build_sinks(config: &AgentConfig) -> Result<ActionSinks> {
    let actions = &config.actions;
    let timeout = Duration::from_secs(actions.sink_timeout_secs);

    let tickets: Arc<dyn TicketSink> = match actions.ticket_webhook.as_deref() {
        Some(url) => webhook("tickets", url, timeout)?,
        None => Arc::new(DryRunSink::new("tickets")),
    };
    let code_issues: Arc<dyn TicketSink> = match actions.code_issue_webhook.as_deref() {
        Some(url) => webhook("code-issues", url, timeout)?,
        None => Arc::new(DryRunSink::new("code-issues")),
    };
    let reviews: Arc<dyn ReviewSink> = match actions.review_webhook.as_deref() {
        Some(url) => webhook("reviews", url, timeout)?,
        None => Arc::new(DryRunSink::new("reviews")),
    };
    let chat: Arc<dyn ChatSink> = match actions.chat_webhook.as_deref() {
        Some(url) => webhook("chat", url, timeout)?,
        None => Arc::new(DryRunSink::new("chat")),
    };

    Ok(ActionSinks {
        tickets,
        code_issues,
        reviews,
        chat,
    })
}

/// Build the agent described by `config`.
///
/// Each source becomes an HTTP feed; sinks without a webhook URL run dry.
pub fn build_agent(config: &AgentConfig) -> Result<ObservabilityAgent> {
    let poll = &config.agent;

    let mut sources: Vec<Arc<dyn SignalSource>> = Vec::with_capacity(config.sources.len());
    for source in &config.sources {
        let token = secret_from_env(source.token_env.as_deref());
        let feed = HttpFeed::new(source.url.as_str(), token, poll.source_timeout())
            .with_context(|| format!("failed to build feed for source {}", source.name))?;
        sources.push(Arc::new(FeedAdapter::new(source.name.as_str(), source.kind, feed)));
    }
    let lookback = chrono::Duration::from_std(Duration::from_secs(poll.initial_lookback_secs))
        .context("agent.initial_lookback_secs is out of range")?;
    let detector = SignalDetector::new(sources, Utc::now() - lookback, poll.source_timeout());

    let ctx = &config.context;
    let history = HttpContextProvider::new(
        ctx.deployments_url.clone(),
        ctx.commits_url.clone(),
        secret_from_env(ctx.token_env.as_deref()),
        poll.source_timeout(),
    )
    .context("failed to build context provider")?;
    let window = chrono::Duration::try_hours(ctx.window_hours).context("context.window_hours is out of range")?;
    let mut analyzer = RootCauseAnalyzer::new(Arc::new(history), window);

    let reasoning = &config.reasoning;
    if reasoning.enabled {
        let timeout = Duration::from_secs(reasoning.timeout_secs);
        let client = OpenAiCompatClient::new(
            reasoning.endpoint.as_str(),
            reasoning.model.as_str(),
            secret_from_env(reasoning.api_key_env.as_deref()),
            timeout,
        )
        .context("failed to build reasoning client")?
        .with_sampling(reasoning.temperature, reasoning.max_tokens);
        analyzer = analyzer.with_reasoning(Arc::new(client), timeout);
    }

    let actions = &config.actions;
    let settings = ExecutorSettings {
        chat_channel: actions.chat_channel.clone(),
        rollback_channel: actions.rollback_channel.clone(),
        ticket_project: actions.ticket_project.clone(),
        dashboard_url: actions.dashboard_url.clone(),
        sink_timeout: Duration::from_secs(actions.sink_timeout_secs),
    };
    let executor = ActionExecutor::new(build_sinks(config)?, settings);

    Ok(ObservabilityAgent::new(detector, analyzer, executor, poll.poll_interval()))
}

/// Start the daemon: the agent's poll loop plus the API server.
///
/// Runs until ctrl-c, then stops the agent and waits for its loop to exit.
pub async fn serve(config: &AgentConfig, bind: &str) -> Result<()> {
    let addr: std::net::SocketAddr = bind.parse().with_context(|| format!("invalid bind address: {}", bind))?;
    let agent = Arc::new(build_agent(config)?);
    let app = api::router(api::state::AppState::new(Arc::clone(&agent)));

    let listener = tokio::net::TcpListener::bind(addr)
        .await
        .with_context(|| format!("failed to bind {}", addr))?;
    let runner = tokio::spawn(Arc::clone(&agent).run());

    tracing::info!(%addr, "signalwatch listening");
    axum::serve(listener, app)
        .with_graceful_shutdown(async {
            if let Err(e) = tokio::signal::ctrl_c().await {
                tracing::error!(error = %e, "failed to listen for shutdown signal");
            }
            tracing::info!("shutdown requested");
        })
        .await?;

    agent.stop();
    if let Err(e) = runner.await {
        tracing::error!(error = %e, "agent loop ended abnormally");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::SourceConfig;
    use crate::detect::RecordKind;

    #[test]
    fn test_build_agent_from_defaults() {
        let agent = build_agent(&AgentConfig::default()).unwrap();
        assert!(!agent.is_running());
    }

    #[test]
    fn test_build_agent_with_sources_and_webhooks() {
        let mut config = AgentConfig::default();
        config.sources.push(SourceConfig {
            name: "alerts".into(),
            kind: RecordKind::MonitoringAlert,
            url: "http://127.0.0.1:9/alerts".into(),
            token_env: None,
        });
        config.actions.chat_webhook = Some("http://127.0.0.1:9/chat".into());
        config.reasoning.enabled = true;
        assert!(build_agent(&config).is_ok());
    }

    #[test]
    fn test_build_agent_rejects_unrepresentable_window() {
        let mut config = AgentConfig::default();
        config.context.window_hours = i64::MAX;
        let err = build_agent(&config).unwrap_err();
        assert!(err.to_string().contains("context.window_hours"));
    }

    #[tokio::test]
    async fn test_serve_rejects_bad_bind_address() {
        let err = serve(&AgentConfig::default(), "not-an-address").await.unwrap_err();
        assert!(err.to_string().contains("invalid bind address"));
    }
}
