//! API server initialization

use std::net::SocketAddr;

use anyhow::Result;
use axum::Router;
use axum::extract::State;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{any, get};
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;

use super::{AppState, pubsub};
use crate::app::BrokerApp;

pub struct ApiServer {
    app: BrokerApp,
}

impl ApiServer {
    pub fn new(app: BrokerApp) -> Self {
        Self { app }
    }

    /// Returns the app for graceful shutdown
    pub async fn start(self) -> Result<BrokerApp> {
        let app = self.app;
        let shutdown = app.shutdown.clone();

        let addr = SocketAddr::new(app.config.server.host.parse()?, app.config.server.port);
        let router = build_router(app.state());

        let listener = TcpListener::bind(addr).await?;
        tracing::info!(
            addr = %addr,
            engine = app.store.engine_name(),
            "hubbub listening"
        );
        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.wait())
            .await?;

        Ok(app)
    }
}

/// Build the broker router: the three pub/sub locations plus health
pub fn build_router(state: AppState) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/pub", any(pubsub::pub_location))
        .route("/sub", any(pubsub::sub_location))
        .route("/pubsub", any(pubsub::pubsub_location))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health(State(state): State<AppState>) -> Response {
    match state.store.health_check().await {
        Ok(()) => (
            StatusCode::OK,
            format!("{{\"status\": \"ok\", \"engine\": \"{}\"}}", state.store.engine_name()),
        )
            .into_response(),
        Err(e) => {
            tracing::error!(error = %e, "health check failed");
            StatusCode::SERVICE_UNAVAILABLE.into_response()
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use axum::body::{Body, to_bytes};
    use axum::http::{Request, header};
    use tokio::sync::watch;
    use tower::util::ServiceExt;

    use super::*;
    use crate::channel::events::EventBroadcaster;
    use crate::core::cli::CliConfig;
    use crate::core::config::AppConfig;
    use crate::store::ChannelStore;
    use crate::store::memory::MemoryStorageEngine;

    fn test_config() -> AppConfig {
        AppConfig::load(&CliConfig::default()).unwrap()
    }

    /// Keep the watch sender alive for the lifetime of the test
    fn test_state(config: AppConfig) -> (AppState, watch::Sender<bool>) {
        let store = ChannelStore::new(Arc::new(MemoryStorageEngine::new()));
        let events = EventBroadcaster::new(store.clone(), config.events.clone());
        let (tx, rx) = watch::channel(false);
        let state = AppState {
            config: Arc::new(config),
            store,
            events,
            http_client: reqwest::Client::new(),
            shutdown_rx: rx,
        };
        (state, tx)
    }

    async fn body_string(resp: Response) -> String {
        let bytes = to_bytes(resp.into_body(), usize::MAX).await.unwrap();
        String::from_utf8_lossy(&bytes).into_owned()
    }

    fn post(uri: &str, body: &str) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "text/plain")
            .body(Body::from(body.to_owned()))
            .unwrap()
    }

    fn get(uri: &str) -> Request<Body> {
        Request::builder().method("GET").uri(uri).body(Body::empty()).unwrap()
    }

    #[tokio::test]
    async fn health_reports_engine() {
        let (state, _tx) = test_state(test_config());
        let router = build_router(state);
        let resp = router.oneshot(get("/health")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_string(resp).await;
        assert!(body.contains("\"engine\": \"memory\""), "{body}");
    }

    #[tokio::test]
    async fn publish_then_subscribe() {
        let (state, _tx) = test_state(test_config());
        let router = build_router(state);

        let resp = router
            .clone()
            .oneshot(post("/pub?id=X", "hello"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let info = body_string(resp).await;
        assert!(info.contains("queued messages: 1"), "{info}");
        assert!(info.contains("active subscribers: 0"), "{info}");

        let resp = router.oneshot(get("/sub?id=X")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(resp.headers().contains_key(header::LAST_MODIFIED));
        assert!(resp.headers().contains_key(header::ETAG));
        assert_eq!(
            resp.headers().get(header::CONTENT_TYPE).unwrap(),
            "text/plain"
        );
        assert_eq!(body_string(resp).await, "hello");
    }

    #[tokio::test]
    async fn subscribe_then_publish_longpoll() {
        let (state, _tx) = test_state(test_config());
        let router = build_router(state);

        let sub_router = router.clone();
        let subscriber =
            tokio::spawn(async move { sub_router.oneshot(get("/sub?id=Y")).await.unwrap() });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let resp = router.oneshot(post("/pub?id=Y", "hi")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::CREATED);

        let resp = subscriber.await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "hi");
    }

    #[tokio::test]
    async fn resume_via_etag() {
        let (state, _tx) = test_state(test_config());
        let router = build_router(state);

        for body in ["one", "two", "three"] {
            let resp = router.clone().oneshot(post("/pub?id=Z", body)).await.unwrap();
            assert_eq!(resp.status(), StatusCode::ACCEPTED);
        }

        let resp = router.clone().oneshot(get("/sub?id=Z")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let lm = resp.headers().get(header::LAST_MODIFIED).unwrap().clone();
        let etag = resp.headers().get(header::ETAG).unwrap().clone();
        assert_eq!(body_string(resp).await, "one");

        let resp = router
            .clone()
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/sub?id=Z")
                    .header(header::IF_MODIFIED_SINCE, &lm)
                    .header(header::IF_NONE_MATCH, &etag)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let lm2 = resp.headers().get(header::LAST_MODIFIED).unwrap().clone();
        let etag2 = resp.headers().get(header::ETAG).unwrap().clone();
        assert_eq!(body_string(resp).await, "two");

        let resp = router
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/sub?id=Z")
                    .header(header::IF_MODIFIED_SINCE, &lm2)
                    .header(header::IF_NONE_MATCH, &etag2)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(body_string(resp).await, "three");
    }

    #[tokio::test]
    async fn composite_channel_advances_per_position() {
        let mut config = test_config();
        config.channels.split_delimiter = Some(",".to_owned());
        let (state, _tx) = test_state(config);
        let router = build_router(state);

        let resp = router.clone().oneshot(post("/pub?id=A", "from-a")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let resp = router.clone().oneshot(get("/sub?id=A,B")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let lm = resp.headers().get(header::LAST_MODIFIED).unwrap().clone();
        let etag = resp.headers().get(header::ETAG).unwrap().clone();
        assert_eq!(etag.to_str().unwrap(), "[0],-1");
        assert_eq!(body_string(resp).await, "from-a");

        let resp = router.clone().oneshot(post("/pub?id=B", "from-b")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let resp = router
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/sub?id=A,B")
                    .header(header::IF_MODIFIED_SINCE, &lm)
                    .header(header::IF_NONE_MATCH, &etag)
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let etag2 = resp.headers().get(header::ETAG).unwrap().clone();
        assert_eq!(etag2.to_str().unwrap(), "-1,[0]");
        assert_eq!(body_string(resp).await, "from-b");
    }

    #[tokio::test]
    async fn cors_preflight() {
        let (state, _tx) = test_state(test_config());
        let router = build_router(state);

        let resp = router
            .oneshot(
                Request::builder()
                    .method("OPTIONS")
                    .uri("/sub?id=X")
                    .header(header::ORIGIN, "https://example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert_eq!(
            resp.headers()
                .get(header::ACCESS_CONTROL_ALLOW_ORIGIN)
                .unwrap(),
            "*"
        );
        assert_eq!(
            resp.headers()
                .get(header::ACCESS_CONTROL_ALLOW_METHODS)
                .unwrap(),
            "GET, OPTIONS"
        );
    }

    #[tokio::test]
    async fn origin_mismatch_is_forbidden() {
        let mut config = test_config();
        config.cors.allow_origin = "https://allowed.example".to_owned();
        let (state, _tx) = test_state(config);
        let router = build_router(state);

        let resp = router
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/sub?id=X")
                    .header(header::ORIGIN, "https://evil.example")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn authorization_failure_denies_publish() {
        // an upstream that denies everything
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let auth_router = Router::new().route(
            "/auth",
            axum::routing::get(|| async { StatusCode::UNAUTHORIZED }),
        );
        tokio::spawn(async move {
            axum::serve(listener, auth_router).await.unwrap();
        });

        let mut config = test_config();
        config.publisher.authorize_url = Some(format!("http://{addr}/auth"));
        let (state, _tx) = test_state(config);
        let store = state.store.clone();
        let router = build_router(state);

        let resp = router.oneshot(post("/pub?id=X", "nope")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);

        // nothing was queued
        let channel = crate::channel::id::ChannelId::Single("pubsub/X".into());
        assert!(store.find_channel(&channel).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn missing_channel_id_is_not_found() {
        let (state, _tx) = test_state(test_config());
        let router = build_router(state);
        let resp = router.oneshot(get("/sub")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::NOT_FOUND);
        assert_eq!(body_string(resp).await, "No channel id provided.");
    }

    #[tokio::test]
    async fn oversized_channel_id_is_forbidden() {
        let mut config = test_config();
        config.channels.max_channel_id_length = 8;
        let (state, _tx) = test_state(config);
        let router = build_router(state);
        let resp = router
            .oneshot(get("/sub?id=waytoolongforthis"))
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn eventsource_negotiates_stream() {
        let (state, _tx) = test_state(test_config());
        let router = build_router(state);
        let resp = router
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/sub?id=E")
                    .header(header::ACCEPT, "text/event-stream")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        assert!(
            resp.headers()
                .get(header::CONTENT_TYPE)
                .unwrap()
                .to_str()
                .unwrap()
                .starts_with("text/event-stream")
        );
    }

    #[tokio::test]
    async fn delete_answers_gone_to_waiting_longpoll() {
        let (state, _tx) = test_state(test_config());
        let router = build_router(state);

        // drain history so the longpoll hangs on live delivery
        let resp = router.clone().oneshot(post("/pub?id=D", "x")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);
        let resp = router.clone().oneshot(get("/sub?id=D")).await.unwrap();
        let lm = resp.headers().get(header::LAST_MODIFIED).unwrap().clone();
        let etag = resp.headers().get(header::ETAG).unwrap().clone();

        let sub_router = router.clone();
        let waiting = tokio::spawn(async move {
            sub_router
                .oneshot(
                    Request::builder()
                        .method("GET")
                        .uri("/sub?id=D")
                        .header(header::IF_MODIFIED_SINCE, &lm)
                        .header(header::IF_NONE_MATCH, &etag)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap()
        });
        tokio::time::sleep(std::time::Duration::from_millis(50)).await;

        let resp = router
            .oneshot(
                Request::builder()
                    .method("DELETE")
                    .uri("/pub?id=D")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);

        let resp = waiting.await.unwrap();
        assert_eq!(resp.status(), StatusCode::GONE);
    }

    #[tokio::test]
    async fn publisher_location_rejects_unconfigured_methods() {
        let (state, _tx) = test_state(test_config());
        let router = build_router(state);
        let resp = router
            .oneshot(
                Request::builder()
                    .method("PATCH")
                    .uri("/pub?id=X")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::FORBIDDEN);
    }

    #[tokio::test]
    async fn large_body_is_coalesced() {
        let (state, _tx) = test_state(test_config());
        let router = build_router(state);

        // a body that arrives as many small chunks
        let chunks: Vec<Result<bytes::Bytes, std::convert::Infallible>> = (0..256)
            .map(|i| Ok(bytes::Bytes::from(format!("{i:04}-chunk "))))
            .collect();
        let stream_body = Body::from_stream(futures::stream::iter(chunks));
        let req = Request::builder()
            .method("POST")
            .uri("/pub?id=big")
            .header(header::CONTENT_TYPE, "text/plain")
            .body(stream_body)
            .unwrap();
        let resp = router.clone().oneshot(req).await.unwrap();
        assert_eq!(resp.status(), StatusCode::ACCEPTED);

        let resp = router.oneshot(get("/sub?id=big")).await.unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let body = body_string(resp).await;
        assert!(body.starts_with("0000-chunk "));
        assert!(body.ends_with("0255-chunk "));
        assert_eq!(body.len(), 256 * 11);
    }
}
