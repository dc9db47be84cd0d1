//! HTTP endpoint called by the browser extension.
//!
//! One route accepts an [`IllustrationRecord`], downloads its images, and
//! echoes the record back. Per-image success or failure only shows up in the
//! logs; the response is the same either way.

use axum::{
    Json, Router,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
};
use std::sync::Arc;
use tower_http::cors::{Any, CorsLayer};

use crate::fetcher::ImageFetcher;
use crate::record::IllustrationRecord;

/// Shared handler state.
#[derive(Clone)]
pub struct AppContext {
    pub fetcher: Arc<ImageFetcher>,
}

/// Error body in the `{"detail": ...}` shape the extension expects.
pub struct ApiError {
    status: StatusCode,
    detail: String,
}

impl ApiError {
    fn new(status: StatusCode, detail: impl Into<String>) -> Self {
        Self { status, detail: detail.into() }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (self.status, Json(serde_json::json!({ "detail": self.detail }))).into_response()
    }
}

/// Build the router with the download endpoint mounted at `route`.
pub fn create_router(ctx: AppContext, route: &str) -> Router {
    // The extension posts from arbitrary page origins
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route(route, post(download_image))
        .layer(cors)
        .with_state(ctx)
}

async fn health_check() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

async fn download_image(
    State(ctx): State<AppContext>,
    Json(record): Json<IllustrationRecord>,
) -> Result<Json<IllustrationRecord>, ApiError> {
    record
        .validate()
        .map_err(|e| ApiError::new(StatusCode::UNPROCESSABLE_ENTITY, format!("{e:#}")))?;

    log::info!(
        "Received illustration {} ({} image(s)): {}",
        record.illust_id,
        record.image_urls.len(),
        record.title
    );

    match ctx.fetcher.fetch_all(&record).await {
        Ok(report) => {
            log::debug!("{} saved, {} failed", report.saved(), report.failed());
            Ok(Json(record))
        }
        Err(e) => {
            log::error!("Download batch for {} aborted: {e:#}", record.illust_id);
            Err(ApiError::new(StatusCode::INTERNAL_SERVER_ERROR, format!("{e:#}")))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::metadata::{fixtures, read_record};
    use axum::body::Body;
    use axum::http::{Request, header};
    use http_body_util::BodyExt;
    use tempfile::TempDir;
    use tower::ServiceExt;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn test_router(dir: &TempDir) -> (Router, Arc<ImageFetcher>) {
        let mut config = Config::default();
        config.storage.download_dir = Some(dir.path().to_path_buf());
        config.http.request_delay_ms = 0;
        let fetcher = Arc::new(ImageFetcher::new(&config).unwrap());
        let ctx = AppContext { fetcher: fetcher.clone() };
        (create_router(ctx, &config.server.route), fetcher)
    }

    fn post_json(uri: &str, body: String) -> Request<Body> {
        Request::post(uri)
            .header(header::CONTENT_TYPE, "application/json")
            .body(Body::from(body))
            .unwrap()
    }

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn health_endpoint() {
        let dir = TempDir::new().unwrap();
        let (app, _) = test_router(&dir);
        let response = app
            .oneshot(Request::get("/health").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await["status"], "ok");
    }

    #[tokio::test]
    async fn download_echoes_record_even_when_images_fail() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/img1.png"))
            .respond_with(ResponseTemplate::new(200).set_body_bytes(fixtures::png_bytes()))
            .mount(&server)
            .await;

        let dir = TempDir::new().unwrap();
        let (app, fetcher) = test_router(&dir);
        let body = serde_json::json!({
            "illust_id": "12345",
            "tags": ["a", "猫"],
            "image_urls": [format!("{}/img1.png", server.uri()), format!("{}/gone.jpg", server.uri())],
        });

        let response = app
            .oneshot(post_json("/download-image", body.to_string()))
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);

        let echoed = body_json(response).await;
        assert_eq!(echoed["illust_id"], "12345");
        assert_eq!(echoed["tags"][1], "猫");
        assert_eq!(echoed["user_name"], "");

        let saved = read_record(&fetcher.image_dir().join("img1.png")).unwrap();
        assert_eq!(saved.tags, vec!["a", "猫"]);
        assert!(!fetcher.image_dir().join("gone.jpg").exists());
    }

    #[tokio::test]
    async fn blank_illust_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (app, _) = test_router(&dir);
        let body = r#"{"illust_id": "", "image_urls": []}"#.to_string();

        let response = app.oneshot(post_json("/download-image", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
        assert!(body_json(response).await["detail"].as_str().unwrap().contains("illust_id"));
    }

    #[tokio::test]
    async fn missing_image_urls_is_rejected() {
        let dir = TempDir::new().unwrap();
        let (app, _) = test_router(&dir);
        let body = r#"{"illust_id": "1"}"#.to_string();

        let response = app.oneshot(post_json("/download-image", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn cors_preflight_is_allowed() {
        let dir = TempDir::new().unwrap();
        let (app, _) = test_router(&dir);
        let request = Request::builder()
            .method("OPTIONS")
            .uri("/download-image")
            .header(header::ORIGIN, "https://www.pixiv.net")
            .header(header::ACCESS_CONTROL_REQUEST_METHOD, "POST")
            .body(Body::empty())
            .unwrap();

        let response = app.oneshot(request).await.unwrap();
        assert_eq!(
            response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
            "*"
        );
    }
}
