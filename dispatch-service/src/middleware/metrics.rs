use crate::services::metrics::{HTTP_REQUESTS_TOTAL, HTTP_REQUEST_DURATION};
use axum::extract::{MatchedPath, Request};
use axum::middleware::Next;
use axum::response::Response;
use std::time::Instant;

/// Record request count and latency, labelled by the matched route template
/// so path parameters do not explode label cardinality.
///
/// Install with `Router::route_layer` so the route has been matched.
pub async fn http_metrics_middleware(req: Request, next: Next) -> Response {
    let start = Instant::now();
    let method = req.method().to_string();
    let route = req
        .extensions()
        .get::<MatchedPath>()
        .map(|path| path.as_str().to_string())
        .unwrap_or_else(|| "unmatched".to_string());

    let response = next.run(req).await;

    let status = response.status().as_u16().to_string();
    HTTP_REQUESTS_TOTAL
        .with_label_values(&[&method, &route, &status])
        .inc();
    HTTP_REQUEST_DURATION
        .with_label_values(&[&method, &route])
        .observe(start.elapsed().as_secs_f64());

    response
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use axum::http::{Request as HttpRequest, StatusCode};
    use axum::routing::get;
    use axum::Router;
    use tower::ServiceExt;

    #[tokio::test]
    async fn labels_requests_by_route_template() {
        let app = Router::new()
            .route("/probe/:probe_id", get(|| async { StatusCode::NO_CONTENT }))
            .route_layer(axum::middleware::from_fn(http_metrics_middleware));

        let before = HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/probe/:probe_id", "204"])
            .get();

        let response = app
            .oneshot(
                HttpRequest::builder()
                    .uri("/probe/42")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::NO_CONTENT);

        let after = HTTP_REQUESTS_TOTAL
            .with_label_values(&["GET", "/probe/:probe_id", "204"])
            .get();
        assert_eq!(after, before + 1.0);
    }
}
