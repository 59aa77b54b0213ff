pub mod health;

use axum::{
    routing::{get, post, put},
    Router,
};

use crate::cameras::handlers as cameras;
use crate::layout::handlers as layout;
use crate::playback::handlers as tiles;
use crate::state::AppState;

pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health::health_handler))
        // Cameras and selection
        .route("/api/v1/cameras", get(cameras::handle_list_cameras))
        .route("/api/v1/cameras/refresh", post(cameras::handle_refresh))
        .route("/api/v1/source", put(cameras::handle_switch_source))
        .route("/api/v1/selection", put(cameras::handle_set_selection))
        .route(
            "/api/v1/selection/expanded/:id",
            post(cameras::handle_toggle_expanded),
        )
        // Layout
        .route("/api/v1/layout", post(layout::handle_layout))
        // Tile playback
        .route("/api/v1/tiles", get(tiles::handle_list_tiles))
        .route("/api/v1/tiles/:id", get(tiles::handle_poll_tile))
        .route("/api/v1/tiles/:id/attach", post(tiles::handle_attach))
        .route("/api/v1/tiles/:id/detach", post(tiles::handle_detach))
        .route("/api/v1/tiles/:id/events", post(tiles::handle_event))
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use std::sync::{Arc, Mutex};
    use std::time::Duration;

    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Method, Request, StatusCode};
    use serde_json::{json, Value};
    use tower::ServiceExt;

    use super::*;
    use crate::cameras::selection::MemorySelectionStore;
    use crate::cameras::{Camera, CameraSource, SourceError};
    use crate::config::Config;
    use crate::layout::AspectModel;
    use crate::playback::{PlaybackSupervisor, RelayHub, SupervisorConfig};
    use crate::viewer::Viewer;

    struct StaticSource {
        cameras: Vec<Camera>,
        base_url: Mutex<String>,
    }

    #[async_trait]
    impl CameraSource for StaticSource {
        async fn fetch_cameras(&self) -> Result<Vec<Camera>, SourceError> {
            if self.cameras.is_empty() {
                return Err(SourceError::Empty);
            }
            Ok(self.cameras.clone())
        }

        fn base_url(&self) -> String {
            self.base_url.lock().unwrap().clone()
        }

        fn set_base_url(&self, base_url: &str) {
            *self.base_url.lock().unwrap() = base_url.to_string();
        }
    }

    fn camera(id: &str, aspect: f32) -> Camera {
        Camera {
            id: id.to_string(),
            name: id.to_string(),
            stream_name: id.to_string(),
            sub_stream_name: None,
            aspect_ratio: Some(aspect),
            enabled: true,
        }
    }

    fn config() -> Config {
        Config {
            frigate_url: "http://nvr:5000".into(),
            redis_url: None,
            port: 0,
            rust_log: "info".into(),
            watchdog_timeout: Duration::from_secs(60),
            watchdog_poll: Duration::from_secs(10),
            reconnect_indicator: Duration::from_millis(1500),
            wall_crop_cap: 0.1,
            source_timeout: Duration::from_secs(1),
        }
    }

    async fn app(cameras: Vec<Camera>) -> Router {
        let relay = RelayHub::new();
        let aspects = AspectModel::new();
        let supervisor = Arc::new(PlaybackSupervisor::new(
            SupervisorConfig::default(),
            aspects.clone(),
            Arc::new(relay.clone()),
        ));
        let viewer = Arc::new(Viewer::new(
            Arc::new(StaticSource {
                cameras,
                base_url: Mutex::new("http://nvr:5000".to_string()),
            }),
            Arc::new(MemorySelectionStore::new()),
            aspects,
            supervisor,
        ));
        let _ = viewer.refresh().await;
        build_router(AppState {
            config: config(),
            viewer,
            relay,
        })
    }

    async fn call(app: &Router, method: Method, uri: &str, body: Option<Value>) -> (StatusCode, Value) {
        let builder = Request::builder().method(method).uri(uri);
        let request = match body {
            Some(json) => builder
                .header("content-type", "application/json")
                .body(Body::from(json.to_string()))
                .unwrap(),
            None => builder.body(Body::empty()).unwrap(),
        };
        let response = app.clone().oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        let value = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).unwrap()
        };
        (status, value)
    }

    #[tokio::test]
    async fn test_health() {
        let app = app(vec![]).await;
        let (status, body) = call(&app, Method::GET, "/health", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["status"], "ok");
    }

    #[tokio::test]
    async fn test_refresh_failure_is_bad_gateway() {
        let app = app(vec![]).await;
        let (status, body) = call(&app, Method::POST, "/api/v1/cameras/refresh", None).await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert_eq!(body["error"]["code"], "SOURCE_ERROR");

        let (_, listing) = call(&app, Method::GET, "/api/v1/cameras", None).await;
        assert_eq!(listing["error"], "Empty response from server");
    }

    #[tokio::test]
    async fn test_selection_then_wall_layout() {
        let app = app(vec![camera("a", 16.0 / 9.0), camera("b", 16.0 / 9.0), camera("c", 16.0 / 9.0)]).await;

        let (status, body) = call(
            &app,
            Method::PUT,
            "/api/v1/selection",
            Some(json!({"selected": ["c", "a", "b"]})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["selection"]["selected"], json!(["a", "b", "c"]));

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/v1/layout",
            Some(json!({"width": 300, "height": 100, "strategy": "wall"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["layout"]["grid"], json!([2, 2]));
        assert_eq!(body["layout"]["tiles"].as_array().map(Vec::len), Some(3));
    }

    #[tokio::test]
    async fn test_layout_rejects_bad_crop_cap() {
        let app = app(vec![camera("a", 1.0)]).await;
        let (status, body) = call(
            &app,
            Method::POST,
            "/api/v1/layout",
            Some(json!({"width": 640, "height": 480, "strategy": "wall", "crop_cap": 2.0})),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");
    }

    #[tokio::test]
    async fn test_tile_poll_attach_and_events() {
        let app = app(vec![camera("a", 4.0 / 3.0)]).await;

        let (status, body) = call(&app, Method::GET, "/api/v1/tiles/a", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["commands"][0]["command"], "open");
        assert_eq!(body["health"]["phase"], "playing");
        let session_id = body["session_id"].as_str().unwrap().to_string();

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/v1/tiles/a/attach",
            Some(json!({"surface": "video-a"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["attached"], true);

        let (_, body) = call(&app, Method::GET, "/api/v1/tiles/a", None).await;
        let commands: Vec<&str> = body["commands"]
            .as_array()
            .unwrap()
            .iter()
            .filter_map(|c| c["command"].as_str())
            .collect();
        assert_eq!(commands, vec!["attach", "set_target_aspect", "play"]);

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/v1/tiles/a/events",
            Some(json!({"session_id": session_id, "event": {"type": "playing"}})),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, body) = call(
            &app,
            Method::POST,
            "/api/v1/tiles/a/events",
            Some(json!({"session_id": uuid::Uuid::new_v4(), "event": {"type": "playing"}})),
        )
        .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert_eq!(body["error"]["code"], "CONFLICT");
    }

    #[tokio::test]
    async fn test_unknown_tile_is_not_found() {
        let app = app(vec![camera("a", 1.0)]).await;
        let (status, _) = call(&app, Method::GET, "/api/v1/tiles/nope", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
        let (status, _) = call(&app, Method::POST, "/api/v1/tiles/nope/detach", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_expanded_toggle() {
        let app = app(vec![camera("a", 1.0), camera("b", 1.0)]).await;
        let (status, body) = call(&app, Method::POST, "/api/v1/selection/expanded/a", None).await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["expanded"], json!(["a"]));

        let (status, _) = call(&app, Method::POST, "/api/v1/selection/expanded/b", None).await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_measured_aspect_bumps_layout_generation_on_poll() {
        let app = app(vec![camera("a", 16.0 / 9.0)]).await;

        let (_, body) = call(&app, Method::GET, "/api/v1/tiles/a", None).await;
        assert_eq!(body["layout_generation"], 0);
        let session_id = body["session_id"].as_str().unwrap().to_string();

        let (status, _) = call(
            &app,
            Method::POST,
            "/api/v1/tiles/a/events",
            Some(json!({"session_id": session_id, "event": {"type": "measured_aspect", "ratio": 1.5}})),
        )
        .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        // The event pump runs on its own task.
        let mut generation = Value::Null;
        for _ in 0..50 {
            tokio::task::yield_now().await;
            let (_, body) = call(&app, Method::GET, "/api/v1/tiles/a", None).await;
            generation = body["layout_generation"].clone();
            if generation == 1 {
                break;
            }
        }
        assert_eq!(generation, 1);

        let (_, body) = call(
            &app,
            Method::POST,
            "/api/v1/layout",
            Some(json!({"width": 640, "height": 480})),
        )
        .await;
        assert_eq!(body["generation"], 1);
    }

    #[tokio::test]
    async fn test_list_tiles_reports_sessions() {
        let app = app(vec![camera("a", 1.0), camera("b", 1.0)]).await;
        call(&app, Method::PUT, "/api/v1/selection", Some(json!({"selected": ["a", "b"]}))).await;

        let (status, body) = call(&app, Method::GET, "/api/v1/tiles", None).await;
        assert_eq!(status, StatusCode::OK);
        let tiles = body.as_array().unwrap();
        assert_eq!(tiles.len(), 2);
        assert_eq!(tiles[0]["health"]["tile_id"], "a");
        assert_eq!(tiles[1]["health"]["tile_id"], "b");
        assert!(tiles.iter().all(|t| t["session_id"].is_string()));
    }

    #[tokio::test]
    async fn test_switch_source_rewrites_open_locator() {
        let app = app(vec![camera("a", 1.0)]).await;

        let (status, body) = call(&app, Method::PUT, "/api/v1/source", Some(json!({"url": "nvr-without-scheme"}))).await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"]["code"], "VALIDATION_ERROR");

        let (status, body) = call(
            &app,
            Method::PUT,
            "/api/v1/source",
            Some(json!({"url": "http://10.1.1.4:5000/"})),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["source_url"], "http://10.1.1.4:5000/");

        let (_, body) = call(&app, Method::GET, "/api/v1/tiles/a", None).await;
        assert_eq!(body["commands"][0]["command"], "open");
        assert_eq!(body["commands"][0]["locator"], "rtsp://10.1.1.4:8554/a");
        assert_eq!(body["commands"][0]["audio"], true);
    }
}
