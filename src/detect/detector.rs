use super::{Signal, SignalSource};
use chrono::{DateTime, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

/// Runs every registered adapter once per poll cycle and tracks the watermark.
pub struct SignalDetector {
    sources: Vec<Arc<dyn SignalSource>>,
    watermark: Mutex<DateTime<Utc>>,
    source_timeout: Duration,
}

impl SignalDetector {
    /// Create a detector whose first cycle looks back from `initial_watermark`.
    pub fn new(
        sources: Vec<Arc<dyn SignalSource>>,
        initial_watermark: DateTime<Utc>,
        source_timeout: Duration,
    ) -> Self {
        Self {
            sources,
            watermark: Mutex::new(initial_watermark),
            source_timeout,
        }
    }

    pub fn source_names(&self) -> Vec<String> {
        self.sources.iter().map(|s| s.name().to_string()).collect()
    }

    pub async fn watermark(&self) -> DateTime<Utc> {
        *self.watermark.lock().await
    }

    /// Collect signals from all adapters since the last watermark.
    ///
    /// The result is the unsorted union of every adapter's batch; only the
    /// order within one adapter's batch is meaningful. The watermark advances
    /// to the cycle's start time even when some adapters failed or timed out.
    pub async fn detect_signals(&self) -> Vec<Signal> {
        let since = self.watermark().await;
        let cycle_start = Utc::now();
        let mut signals = Vec::new();

        for source in &self.sources {
            match tokio::time::timeout(self.source_timeout, source.fetch_since(since)).await {
                Ok(batch) => {
                    debug!(adapter = %source.name(), count = batch.len(), "adapter returned signals");
                    signals.extend(batch);
                }
                Err(_) => {
                    warn!(
                        adapter = %source.name(),
                        timeout_secs = self.source_timeout.as_secs(),
                        "adapter fetch timed out, skipping this cycle"
                    );
                }
            }
        }

        *self.watermark.lock().await = cycle_start;
        if !signals.is_empty() {
            info!(count = signals.len(), since = %since.to_rfc3339(), "signals detected");
        }
        signals
    }

    /// Ask the adapter that produced `signal` whether it has cleared.
    pub async fn check_resolved(&self, signal: &Signal) -> bool {
        let Some(source) = self.sources.iter().find(|s| s.name() == signal.adapter) else {
            warn!(signal_id = %signal.id, adapter = %signal.adapter, "no adapter registered for signal");
            return false;
        };

        match tokio::time::timeout(self.source_timeout, source.check_resolved(signal)).await {
            Ok(resolved) => resolved,
            Err(_) => {
                warn!(signal_id = %signal.id, adapter = %signal.adapter, "resolution check timed out");
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detect::{Severity, SignalKind};

    struct FixedSource {
        name: String,
        signals: Vec<Signal>,
        delay: Option<Duration>,
    }

    #[async_trait::async_trait]
    impl SignalSource for FixedSource {
        fn name(&self) -> &str {
            &self.name
        }

        async fn fetch_since(&self, _since: DateTime<Utc>) -> Vec<Signal> {
            if let Some(d) = self.delay {
                tokio::time::sleep(d).await;
            }
            self.signals.clone()
        }

        async fn check_resolved(&self, _signal: &Signal) -> bool {
            true
        }
    }

    fn signal(id: &str, adapter: &str) -> Signal {
        Signal::new(id, SignalKind::Error, "test", "boom", Severity::High, Utc::now()).with_adapter(adapter)
    }

    #[tokio::test]
    async fn test_union_and_watermark_advance() {
        let a: Arc<dyn SignalSource> = Arc::new(FixedSource {
            name: "a".into(),
            signals: vec![signal("a-1", "a"), signal("a-2", "a")],
            delay: None,
        });
        let b: Arc<dyn SignalSource> = Arc::new(FixedSource {
            name: "b".into(),
            signals: vec![signal("b-1", "b")],
            delay: None,
        });

        let start = Utc::now() - chrono::Duration::hours(1);
        let detector = SignalDetector::new(vec![a, b], start, Duration::from_secs(5));
        let signals = detector.detect_signals().await;

        assert_eq!(signals.len(), 3);
        // Per-adapter order is preserved.
        let a_ids: Vec<_> = signals.iter().filter(|s| s.adapter == "a").map(|s| s.id.as_str()).collect();
        assert_eq!(a_ids, vec!["a-1", "a-2"]);
        assert!(detector.watermark().await > start);
    }

    #[tokio::test]
    async fn test_slow_adapter_does_not_block_others() {
        let slow: Arc<dyn SignalSource> = Arc::new(FixedSource {
            name: "slow".into(),
            signals: vec![signal("s-1", "slow")],
            delay: Some(Duration::from_secs(5)),
        });
        let fast: Arc<dyn SignalSource> = Arc::new(FixedSource {
            name: "fast".into(),
            signals: vec![signal("f-1", "fast")],
            delay: None,
        });

        let start = Utc::now() - chrono::Duration::hours(1);
        let detector = SignalDetector::new(vec![slow, fast], start, Duration::from_millis(50));
        let signals = detector.detect_signals().await;

        assert_eq!(signals.len(), 1);
        assert_eq!(signals[0].id, "f-1");
        // Watermark still advances past the failed adapter.
        assert!(detector.watermark().await > start);
    }

    #[tokio::test]
    async fn test_check_resolved_routes_by_adapter() {
        let a: Arc<dyn SignalSource> = Arc::new(FixedSource {
            name: "a".into(),
            signals: vec![],
            delay: None,
        });
        let detector = SignalDetector::new(vec![a], Utc::now(), Duration::from_secs(1));
        assert!(detector.check_resolved(&signal("x", "a")).await);
        assert!(!detector.check_resolved(&signal("y", "unknown")).await);
    }
}
