use axum::{routing::get, Router};
use std::sync::Arc;
use tower_http::trace::TraceLayer;

use crate::handlers::{health, publish};
use crate::AppState;

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health::health_check))
        .route("/publish/:route", get(publish::publish))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Config;
    use crate::emitter::DeliveryMode;
    use async_trait::async_trait;
    use axum::body::{to_bytes, Body};
    use axum::http::{Request, StatusCode};
    use pretty_assertions::assert_eq;
    use shared::messaging::{
        DeliveryFuture, InMemoryBroker, MessageError, MessagePublisher, MessageResult,
        OutboundMessage,
    };
    use std::collections::HashMap;
    use std::time::{Duration, Instant};
    use tower::ServiceExt;

    mockall::mock! {
        pub Publisher {}

        #[async_trait]
        impl MessagePublisher for Publisher {
            async fn send(&self, message: OutboundMessage) -> MessageResult<DeliveryFuture>;
            async fn flush(&self, timeout: Duration) -> MessageResult<()>;
        }
    }

    fn small_config(extra: &[(&str, &str)]) -> Config {
        let mut vars: HashMap<String, String> = [
            ("PUBLISH_TOPIC1_COUNT", "100"),
            ("PUBLISH_TOPIC2_COUNT", "200"),
            ("PUBLISH_TOPIC3_COUNT", "300"),
        ]
        .iter()
        .map(|(k, v)| (k.to_string(), v.to_string()))
        .collect();
        for (k, v) in extra {
            vars.insert(k.to_string(), v.to_string());
        }
        Config::from_vars(|key| vars.get(key).cloned()).unwrap()
    }

    fn app(config: Config, publisher: Arc<dyn MessagePublisher>) -> Router {
        create_router(Arc::new(AppState {
            config,
            publisher,
            started_at: Instant::now(),
        }))
    }

    fn payloads(broker: &InMemoryBroker, topic: &str) -> Vec<String> {
        broker.messages(topic).into_iter().map(|m| m.payload).collect()
    }

    async fn get(router: Router, uri: &str) -> (StatusCode, String) {
        let response = router
            .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, String::from_utf8(body.to_vec()).unwrap())
    }

    #[tokio::test]
    async fn test_each_route_fills_its_own_topic() {
        let broker = InMemoryBroker::new(1);
        let config = small_config(&[("PUBLISH_AWAIT_DELIVERY", "true")]);

        for (route, topic, label, count) in [
            ("topic1", "my-topic-01", "publish1", 100),
            ("topic2", "my-topic-02", "publish2", 200),
            ("topic3", "my-topic-03", "publish3", 300),
        ] {
            let router = app(config.clone(), Arc::new(broker.clone()));
            let (status, body) = get(router, &format!("/publish/{}", route)).await;
            assert_eq!((status, body.as_str()), (StatusCode::OK, "done"));

            let mut sent = payloads(&broker, topic);
            assert_eq!(sent.len(), count);
            sent.sort_by_key(|p| p.rsplit('-').next().and_then(|i| i.parse::<usize>().ok()));
            let expected: Vec<String> =
                (0..count).map(|i| format!("{}-message-{}", label, i)).collect();
            assert_eq!(sent, expected);
        }
    }

    #[tokio::test]
    async fn test_sequential_route_preserves_order() {
        let broker = InMemoryBroker::new(1);
        let router = app(small_config(&[]), Arc::new(broker.clone()));
        let (_, body) = get(router, "/publish/topic1").await;
        assert_eq!(body, "done");

        let expected: Vec<String> = (0..100).map(|i| format!("publish1-message-{}", i)).collect();
        assert_eq!(payloads(&broker, "my-topic-01"), expected);
    }

    #[tokio::test]
    async fn test_done_even_when_broker_is_down() {
        let mut publisher = MockPublisher::new();
        publisher
            .expect_send()
            .times(100)
            .returning(|_| Err(MessageError::Connection("broker unreachable".to_string())));

        let config = small_config(&[]);
        assert_eq!(config.publish.delivery, DeliveryMode::FireAndForget);

        let (status, body) = get(app(config, Arc::new(publisher)), "/publish/topic1").await;
        assert_eq!((status, body.as_str()), (StatusCode::OK, "done"));
    }

    #[tokio::test]
    async fn test_pooled_route_done_when_broker_is_down() {
        let broker = InMemoryBroker::default();
        broker.set_unavailable(true);

        let router = app(small_config(&[]), Arc::new(broker.clone()));
        let (status, body) = get(router, "/publish/topic3").await;
        assert_eq!((status, body.as_str()), (StatusCode::OK, "done"));
        assert_eq!(broker.message_count("my-topic-03"), 0);
    }

    #[tokio::test]
    async fn test_awaiting_acks_reports_failures() {
        let broker = InMemoryBroker::default();
        broker.set_unavailable(true);
        let config = small_config(&[("PUBLISH_AWAIT_DELIVERY", "true")]);

        let (status, body) = get(app(config, Arc::new(broker)), "/publish/topic2").await;
        assert_eq!(status, StatusCode::BAD_GATEWAY);
        assert!(body.contains("DELIVERY_FAILED"));
    }

    #[tokio::test]
    async fn test_unknown_route_is_not_found() {
        let publisher = MockPublisher::new();
        let (status, _) = get(app(small_config(&[]), Arc::new(publisher)), "/publish/topic4").await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn test_health() {
        let router = app(small_config(&[]), Arc::new(InMemoryBroker::default()));
        let (status, body) = get(router, "/health").await;
        assert_eq!(status, StatusCode::OK);

        let health: serde_json::Value = serde_json::from_str(&body).unwrap();
        assert_eq!(health["status"], "healthy");
        assert_eq!(health["service"], "publisher-service");
    }
}
