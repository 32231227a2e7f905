// logpulse/src/worker.rs
//
// Periodic rhythm analysis task. One long-lived loop per process: run the
// analyzer over the last `interval` seconds, log the counts, sleep exactly
// one interval so consecutive invocations see disjoint ingestion windows.
// Errors are logged and the next tick is the retry. Shutdown is a watch
// signal; an in-flight run is abandoned at its next suspension point.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::watch;
use tracing::{error, info};

use crate::analyzer::RhythmAnalyzer;

pub async fn run_analysis_loop(
    analyzer: Arc<RhythmAnalyzer>,
    interval_sec: u64,
    mut shutdown: watch::Receiver<bool>,
) {
    info!(interval_sec, "rhythm analysis worker started");
    let interval = Duration::from_secs(interval_sec);

    loop {
        tokio::select! {
            result = analyzer.run(interval_sec as i64) => {
                match result {
                    Ok(report) => {
                        let novel = report.novel_anomalies.len();
                        let frequency = report.frequency_anomalies.len();
                        if novel > 0 || frequency > 0 {
                            info!(novel, frequency, "worker detected anomalies");
                        } else {
                            info!("worker: window clean");
                        }
                    }
                    Err(e) => error!(error = %e, "periodic analysis failed"),
                }
            }
            _ = shutdown.changed() => break,
        }

        tokio::select! {
            _ = tokio::time::sleep(interval) => {}
            _ = shutdown.changed() => break,
        }
    }

    info!("rhythm analysis worker stopped");
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::control::ControlRegistry;
    use crate::evals::EvalCapture;
    use crate::gateway::memory::MemoryBackend;
    use crate::gateway::{GatewayConfig, VectorGateway};
    use crate::promote::PromotionService;

    #[tokio::test]
    async fn worker_exits_promptly_on_shutdown() {
        let dir = tempfile::tempdir().unwrap();
        let gateway = Arc::new(VectorGateway::new(
            Arc::new(MemoryBackend::new()),
            GatewayConfig::default(),
        ));
        gateway
            .setup_collections(chrono::Utc::now().timestamp())
            .await
            .unwrap();
        let control = Arc::new(
            ControlRegistry::open(
                &dir.path().join("registry.db"),
                EvalCapture::new(dir.path().join("evals")),
            )
            .await
            .unwrap(),
        );
        let analyzer = Arc::new(RhythmAnalyzer::new(
            Arc::clone(&gateway),
            control,
            PromotionService::new(Arc::clone(&gateway)),
        ));

        let (tx, rx) = watch::channel(false);
        let handle = tokio::spawn(run_analysis_loop(Arc::clone(&analyzer), 60, rx));

        // Give the first run a moment, then request shutdown.
        tokio::time::sleep(Duration::from_millis(50)).await;
        tx.send(true).unwrap();

        tokio::time::timeout(Duration::from_secs(2), handle)
            .await
            .expect("worker did not stop in time")
            .unwrap();
        assert!(analyzer.runs() >= 1);
    }
}
