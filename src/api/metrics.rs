//! Request counters in Prometheus text format

use axum::extract::{MatchedPath, Request, State};
use axum::http::header;
use axum::middleware::Next;
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::Router;
use dashmap::DashMap;
use std::fmt::Write;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

const REQUESTS_METRIC: &str = "api_requests_count";

/// Sink for per-request outcomes
pub trait RequestMetrics: Send + Sync {
    fn inc_api_requests_count(&self, method: &str, endpoint: &str, status: u16);
}

/// Discards everything
#[derive(Debug, Default)]
pub struct NoOpMetrics;

impl RequestMetrics for NoOpMetrics {
    fn inc_api_requests_count(&self, _method: &str, _endpoint: &str, _status: u16) {}
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
struct RequestLabels {
    method: String,
    endpoint: String,
    status: u16,
}

/// `api_requests_count{app,method,endpoint,status}` counter family
#[derive(Debug)]
pub struct ApiMetrics {
    app: String,
    requests: DashMap<RequestLabels, AtomicU64>,
}

impl ApiMetrics {
    pub fn new(app: impl Into<String>) -> Self {
        Self {
            app: app.into(),
            requests: DashMap::new(),
        }
    }

    pub fn requests_count(&self, method: &str, endpoint: &str, status: u16) -> u64 {
        let labels = RequestLabels {
            method: method.to_string(),
            endpoint: endpoint.to_string(),
            status,
        };
        self.requests
            .get(&labels)
            .map(|count| count.load(Ordering::Relaxed))
            .unwrap_or(0)
    }

    /// Render every series, sorted by labels
    pub fn render(&self) -> String {
        let mut series: Vec<_> = self
            .requests
            .iter()
            .map(|entry| (entry.key().clone(), entry.value().load(Ordering::Relaxed)))
            .collect();
        series.sort();

        let mut out = String::new();
        let _ = writeln!(out, "# HELP {} Number of API requests", REQUESTS_METRIC);
        let _ = writeln!(out, "# TYPE {} counter", REQUESTS_METRIC);
        for (labels, count) in series {
            let _ = writeln!(
                out,
                "{}{{app=\"{}\",method=\"{}\",endpoint=\"{}\",status=\"{}\"}} {}",
                REQUESTS_METRIC,
                escape_label(&self.app),
                escape_label(&labels.method),
                escape_label(&labels.endpoint),
                labels.status,
                count
            );
        }
        out
    }
}

impl RequestMetrics for ApiMetrics {
    fn inc_api_requests_count(&self, method: &str, endpoint: &str, status: u16) {
        let labels = RequestLabels {
            method: method.to_string(),
            endpoint: endpoint.to_string(),
            status,
        };
        self.requests
            .entry(labels)
            .or_default()
            .fetch_add(1, Ordering::Relaxed);
    }
}

fn escape_label(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('"', "\\\"")
        .replace('\n', "\\n")
}

/// Count every response by method, route and status
pub async fn track_requests(
    State(metrics): State<Arc<dyn RequestMetrics>>,
    req: Request,
    next: Next,
) -> Response {
    let method = req.method().to_string();
    let endpoint = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(req).await;
    metrics.inc_api_requests_count(&method, &endpoint, response.status().as_u16());
    response
}

async fn render_metrics(State(metrics): State<Arc<ApiMetrics>>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics.render(),
    )
}

/// Router served on the metrics address
pub fn metrics_router(metrics: Arc<ApiMetrics>) -> Router {
    Router::new()
        .route("/metrics", get(render_metrics))
        .with_state(metrics)
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use tower::ServiceExt;

    #[test]
    fn test_render_counts() {
        let metrics = ApiMetrics::new("chunk-vault");
        metrics.inc_api_requests_count("GET", "/download", 404);
        metrics.inc_api_requests_count("GET", "/download", 404);
        metrics.inc_api_requests_count("POST", "/upload", 201);

        let text = metrics.render();

        assert!(text.contains("# TYPE api_requests_count counter"));
        assert!(text.contains(
            "api_requests_count{app=\"chunk-vault\",method=\"GET\",endpoint=\"/download\",status=\"404\"} 2"
        ));
        assert!(text.contains(
            "api_requests_count{app=\"chunk-vault\",method=\"POST\",endpoint=\"/upload\",status=\"201\"} 1"
        ));
        assert_eq!(metrics.requests_count("PUT", "/upload", 201), 0);
    }

    #[test]
    fn test_label_escaping() {
        assert_eq!(escape_label("a\"b\\c"), "a\\\"b\\\\c");
    }

    #[tokio::test]
    async fn test_metrics_endpoint() {
        let metrics = Arc::new(ApiMetrics::new("svc"));
        metrics.inc_api_requests_count("POST", "/addServer", 201);

        let response = metrics_router(metrics)
            .oneshot(
                HttpRequest::builder()
                    .uri("/metrics")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let text = String::from_utf8(body.to_vec()).unwrap();
        assert!(text.contains("endpoint=\"/addServer\",status=\"201\"} 1"));
    }
}
