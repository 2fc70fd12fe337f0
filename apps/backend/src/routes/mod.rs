pub mod cors;
pub mod health;

use anyhow::Result;
use axum::{http::Uri, routing::get, Router};
use tower::ServiceBuilder;
use tower_http::trace::TraceLayer;

use crate::errors::AppError;
use crate::state::AppState;

async fn not_found(uri: Uri) -> AppError {
    AppError::NotFound(uri.path().to_string())
}

pub fn build_router(state: AppState, allowed_origins: &[String]) -> Result<Router> {
    let cors = cors::cors_layer(allowed_origins)?;

    Ok(Router::new()
        .route("/", get(health::liveness_handler))
        .route("/health", get(health::readiness_handler))
        .fallback(not_found)
        .with_state(state)
        .layer(
            ServiceBuilder::new()
                .layer(TraceLayer::new_for_http())
                .layer(cors),
        ))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;
    use std::sync::Arc;

    use axum::body::{to_bytes, Body};
    use axum::http::{header, Method, Request, StatusCode};
    use axum::response::Response;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::model::SharedModel;
    use crate::state::ServiceState;

    const BODY_LIMIT: usize = 64 * 1024;

    fn origins() -> Vec<String> {
        vec![
            "http://localhost:3000".to_string(),
            "http://127.0.0.1:3000".to_string(),
        ]
    }

    fn test_router(service: Arc<ServiceState>) -> Router {
        build_router(AppState::new(service), &origins()).unwrap()
    }

    async fn json_body(response: Response) -> Value {
        let bytes = to_bytes(response.into_body(), BODY_LIMIT).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn test_liveness_independent_of_model() {
        let service = Arc::new(ServiceState::new(5000));
        let response = test_router(service).oneshot(get_request("/")).await.unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["service"], crate::SERVICE_NAME);
        assert_eq!(json["version"], env!("CARGO_PKG_VERSION"));
    }

    #[tokio::test]
    async fn test_readiness_before_model_loaded() {
        let service = Arc::new(ServiceState::new(5000));
        let response = test_router(service)
            .oneshot(get_request("/health"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::OK);
        let json = json_body(response).await;
        assert_eq!(json["status"], "healthy");
        assert_eq!(json["modelReady"], false);
        assert!(json["modelName"].is_null());
    }

    #[tokio::test]
    async fn test_readiness_after_model_loaded() {
        let service = Arc::new(ServiceState::new(5000));
        let app = test_router(service.clone());

        service
            .install_model(SharedModel::new(
                "en_core_web_sm",
                "3.7.1",
                vec!["ner".to_string()],
                HashSet::new(),
            ))
            .unwrap();

        let json = json_body(app.oneshot(get_request("/health")).await.unwrap()).await;
        assert_eq!(json["modelReady"], true);
        assert_eq!(json["modelName"], "en_core_web_sm");
    }

    #[tokio::test]
    async fn test_unknown_route_is_404() {
        let service = Arc::new(ServiceState::new(5000));
        let response = test_router(service)
            .oneshot(get_request("/api/v1/analyze"))
            .await
            .unwrap();

        assert_eq!(response.status(), StatusCode::NOT_FOUND);
        let json = json_body(response).await;
        assert_eq!(json["error"]["code"], "NOT_FOUND");
    }

    #[tokio::test]
    async fn test_allowed_origin_gets_cors_headers() {
        let service = Arc::new(ServiceState::new(5000));
        let request = Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "http://localhost:3000")
            .body(Body::empty())
            .unwrap();

        let response = test_router(service).oneshot(request).await.unwrap();
        let headers = response.headers();
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://localhost:3000"
        );
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_CREDENTIALS], "true");
    }

    #[tokio::test]
    async fn test_disallowed_origin_lacks_cors_headers() {
        let service = Arc::new(ServiceState::new(5000));
        let request = Request::builder()
            .uri("/health")
            .header(header::ORIGIN, "http://evil.example:3000")
            .body(Body::empty())
            .unwrap();

        let response = test_router(service).oneshot(request).await.unwrap();
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }

    #[tokio::test]
    async fn test_preflight_from_allowed_origin() {
        let service = Arc::new(ServiceState::new(5000));
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/health")
            .header(header::ORIGIN, "http://127.0.0.1:3000")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .header(header::ACCESS_CONTROL_REQUEST_HEADERS, "x-requested-with")
            .body(Body::empty())
            .unwrap();

        let response = test_router(service).oneshot(request).await.unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let headers = response.headers();
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_ORIGIN],
            "http://127.0.0.1:3000"
        );
        assert_eq!(headers[header::ACCESS_CONTROL_ALLOW_METHODS], "GET");
        assert_eq!(
            headers[header::ACCESS_CONTROL_ALLOW_HEADERS],
            "x-requested-with"
        );
    }

    #[tokio::test]
    async fn test_preflight_from_disallowed_origin() {
        let service = Arc::new(ServiceState::new(5000));
        let request = Request::builder()
            .method(Method::OPTIONS)
            .uri("/health")
            .header(header::ORIGIN, "http://localhost:8080")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "GET")
            .body(Body::empty())
            .unwrap();

        let response = test_router(service).oneshot(request).await.unwrap();
        assert!(response
            .headers()
            .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
            .is_none());
    }
}
