//! Prometheus /metrics + health check HTTP endpoints
//!
//! Endpoints:
//!   GET /metrics  — Prometheus text format
//!   GET /healthz  — Liveness probe (always 200 if process is running)
//!   GET /readyz   — Readiness probe (200 if the note store is reachable)

use anyhow::Result;
use axum::{extract::State, http::StatusCode, response::IntoResponse, routing::get, Router};
use cryptnote_reveal::NoteService;
use prometheus_client::{encoding::text::encode, registry::Registry};
use std::sync::Arc;
use tokio::sync::watch;

/// Shared state behind the HTTP endpoints
#[derive(Clone)]
pub struct HealthState {
    pub registry: Arc<Registry>,
    pub service: Arc<NoteService>,
}

pub fn router(state: HealthState) -> Router {
    Router::new()
        .route("/metrics", get(metrics_handler))
        .route("/healthz", get(healthz_handler))
        .route("/readyz", get(readyz_handler))
        .with_state(state)
}

/// Serve metrics and health endpoints on `addr` until `shutdown` fires.
pub async fn serve(
    addr: String,
    state: HealthState,
    mut shutdown: watch::Receiver<bool>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(&addr)
        .await
        .map_err(|e| anyhow::anyhow!("metrics bind {addr}: {e}"))?;

    tracing::info!(addr = %addr, "metrics: listening on /metrics, /healthz, /readyz");

    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.wait_for(|stop| *stop).await;
        })
        .await
        .map_err(|e| anyhow::anyhow!("metrics server: {e}"))
}

async fn metrics_handler(State(state): State<HealthState>) -> impl IntoResponse {
    // Refresh store gauges on scrape.
    match state.service.stats().await {
        Ok(stats) => {
            let metrics = state.service.metrics();
            metrics.notes_active.set(stats.active as i64);
            metrics.notes_stored.set(stats.total as i64);
        }
        Err(e) => tracing::warn!("store stats unavailable: {e}"),
    }

    let mut body = String::new();
    match encode(&mut body, &state.registry) {
        Ok(()) => (
            StatusCode::OK,
            [("content-type", "text/plain; version=0.0.4")],
            body,
        ),
        Err(e) => {
            tracing::error!("metrics encode failed: {e}");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                [("content-type", "text/plain")],
                e.to_string(),
            )
        }
    }
}

/// Liveness probe: returns 200 if the process is running.
async fn healthz_handler() -> impl IntoResponse {
    (StatusCode::OK, "ok")
}

/// Readiness probe: returns 200 if the note store answers, 503 otherwise.
async fn readyz_handler(State(state): State<HealthState>) -> impl IntoResponse {
    let store = Arc::clone(state.service.store());
    match tokio::task::spawn_blocking(move || store.check_health()).await {
        Ok(Ok(())) => (StatusCode::OK, "ready"),
        _ => (StatusCode::SERVICE_UNAVAILABLE, "store unreachable"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::Request;
    use cryptnote_core::SystemClock;
    use cryptnote_reveal::{NoteMetrics, ServiceOptions};
    use cryptnote_store::MemoryNoteStore;
    use tower::ServiceExt;

    fn state() -> HealthState {
        let mut registry = Registry::default();
        let metrics = NoteMetrics::new(&mut registry);
        let service = NoteService::new(
            Arc::new(MemoryNoteStore::new()),
            test_provider(),
            Arc::new(SystemClock),
            ServiceOptions::default(),
        )
        .with_metrics(metrics);
        HealthState {
            registry: Arc::new(registry),
            service: Arc::new(service),
        }
    }

    fn test_provider() -> Arc<cryptnote_crypto::CryptoProvider> {
        Arc::new(
            cryptnote_crypto::CryptoProvider::new(
                &secrecy::SecretString::from("metrics-test-secret"),
                cryptnote_crypto::KdfParams {
                    mem_cost_kib: 1024,
                    time_cost: 1,
                    parallelism: 1,
                },
            )
            .unwrap(),
        )
    }

    async fn get(path: &str) -> (StatusCode, String) {
        let response = router(state())
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, String::from_utf8(bytes.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_probes() {
        assert_eq!(get("/healthz").await, (StatusCode::OK, "ok".to_string()));
        assert_eq!(get("/readyz").await, (StatusCode::OK, "ready".to_string()));
    }

    #[tokio::test]
    async fn test_metrics_exposes_store_gauges() {
        let (status, body) = get("/metrics").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.contains("cryptnote_notes_active 0"));
        assert!(body.contains("cryptnote_notes_stored 0"));
    }
}
