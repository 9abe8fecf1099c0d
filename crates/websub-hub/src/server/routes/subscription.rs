//! Subscription and unsubscription requests.
//!
//! Lifecycle of one inbound POST: the request is validated and answered
//! immediately - 400 with the classified error, or 202 meaning "received
//! for processing". On 202 the connection is done; verification of intent
//! and any store mutation continue on a detached task with no further
//! coupling to the original caller. A denied or failed handshake is
//! silent: the 202 has already gone out.

use std::sync::Arc;

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::{IntoResponse, Response};
use chrono::Utc;
use tracing::{error, info, instrument};

use crate::hub::{self, validate, Mode, SubscriptionRequest, VerificationOutcome};
use crate::server::AppState;
use crate::store::TopicId;

/// POST handler for subscription requests. Mounted on every path; the
/// path is not inspected.
pub async fn handle(
    State(state): State<Arc<AppState>>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    // Leases count from the time validation begins.
    let now = Utc::now();

    let content_type = headers
        .get(header::CONTENT_TYPE)
        .and_then(|value| value.to_str().ok());
    let content_length = headers
        .get(header::CONTENT_LENGTH)
        .and_then(|value| value.to_str().ok());

    let request = match validate(content_type, content_length, &body, now) {
        Ok(request) => request,
        Err(e) => {
            info!(error = %e, "rejected subscription request");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    info!(
        mode = %request.mode,
        topic = %request.topic,
        callback = %request.callback,
        "request accepted for processing"
    );

    tokio::spawn(process(state, request));

    StatusCode::ACCEPTED.into_response()
}

/// Verify intent and enact the request. Runs detached from the original
/// connection; holds the (topic, callback) lock across verification and
/// mutation so concurrent requests for the same pair cannot interleave.
#[instrument(skip_all, fields(mode = %request.mode, topic = %request.topic, callback = %request.callback))]
async fn process(state: Arc<AppState>, request: SubscriptionRequest) {
    let _guard = state.locks.lock(&request.topic, &request.callback).await;

    let topic = match state.store.topic_id(request.topic.as_str()).await {
        Ok(topic) => topic,
        Err(e) => {
            error!(error = %e, "topic lookup failed");
            return;
        }
    };

    match state.verifier.verify(&request, topic).await {
        VerificationOutcome::Accepted => {
            if let Some(topic) = topic {
                commit(&state, &request, topic).await;
            }
        }
        VerificationOutcome::DeniedNotFound => {
            info!("request denied: topic not registered");
        }
        VerificationOutcome::DeniedByCallback => {
            info!("request discarded: callback did not confirm");
        }
    }
}

async fn commit(state: &AppState, request: &SubscriptionRequest, topic: TopicId) {
    let result = match request.mode {
        Mode::Subscribe => {
            let lease_seconds = state.verifier.effective_lease_seconds(request);
            let expires_at = hub::lease_expiry(request.received_at, lease_seconds);
            state
                .store
                .upsert_subscription(
                    topic,
                    request.callback.as_str(),
                    request.secret.as_deref(),
                    expires_at,
                )
                .await
        }
        Mode::Unsubscribe => {
            state
                .store
                .remove_subscription(topic, request.callback.as_str())
                .await
        }
    };

    match result {
        Ok(()) => info!("request committed"),
        // Mutations are single statements; a failure leaves no partial record.
        Err(e) => error!(error = %e, "failed to commit verified request"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::IntentVerifier;
    use crate::server::create_router;
    use crate::store::{MemoryStore, Store};
    use axum::body::Body;
    use axum::http::Request;
    use http_body_util::BodyExt;
    use std::time::Duration;
    use tower::ServiceExt;
    use wiremock::matchers::method;
    use wiremock::{Mock, MockServer, Respond, ResponseTemplate};

    struct EchoChallenge;

    impl Respond for EchoChallenge {
        fn respond(&self, request: &wiremock::Request) -> ResponseTemplate {
            match request
                .url
                .query_pairs()
                .find(|(key, _)| key == "hub.challenge")
            {
                Some((_, challenge)) => {
                    ResponseTemplate::new(200).set_body_string(challenge.into_owned())
                }
                None => ResponseTemplate::new(404),
            }
        }
    }

    fn test_state() -> Arc<AppState> {
        let verifier = IntentVerifier::new(Duration::from_secs(1), 864_000);
        Arc::new(AppState::new(Store::Memory(MemoryStore::default()), verifier))
    }

    fn form(pairs: &[(&str, &str)]) -> String {
        url::form_urlencoded::Serializer::new(String::new())
            .extend_pairs(pairs)
            .finish()
    }

    fn post(uri: &str, body: String) -> Request<Body> {
        Request::builder()
            .method("POST")
            .uri(uri)
            .header(header::CONTENT_TYPE, "application/x-www-form-urlencoded")
            .header(header::CONTENT_LENGTH, body.len().to_string())
            .body(Body::from(body))
            .unwrap()
    }

    #[tokio::test]
    async fn test_invalid_request_gets_400_with_message() {
        let app = create_router(test_state());

        let body = form(&[("hub.mode", "subscribe")]);
        let response = app.oneshot(post("/", body)).await.unwrap();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        let body = response.into_body().collect().await.unwrap().to_bytes();
        assert_eq!(
            std::str::from_utf8(&body).unwrap(),
            "request must include hub.callback, hub.mode and hub.topic"
        );
    }

    #[tokio::test]
    async fn test_path_is_not_inspected() {
        let app = create_router(test_state());

        let body = form(&[("hub.mode", "publish")]);
        let response = app.oneshot(post("/some/other/path", body)).await.unwrap();

        // Reaches the same handler: validation error, not a 404
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_subscribe_commits_after_verification() {
        let callback_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(EchoChallenge)
            .mount(&callback_server)
            .await;

        let state = test_state();
        let topic = state.store.add_topic("http://example.org/feed").await.unwrap();

        let callback = format!("{}/cb", callback_server.uri());
        let before = Utc::now();
        let body = form(&[
            ("hub.callback", &callback),
            ("hub.mode", "subscribe"),
            ("hub.topic", "http://example.org/feed"),
            ("secret", "tell-no-one"),
        ]);

        let app = create_router(state.clone());
        let response = app.oneshot(post("/", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        // The handshake runs detached; wait for the commit.
        let mut record = None;
        for _ in 0..100 {
            if let Some(found) = state.store.subscription(topic, &callback).await.unwrap() {
                record = Some(found);
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let record = record.expect("subscription was not committed");

        assert_eq!(record.secret.as_deref(), Some("tell-no-one"));
        // No lease requested: the 10-day default applies from validation time.
        let lease = (record.expires_at - before).num_seconds();
        assert!((863_998..=864_002).contains(&lease), "lease was {lease}");
    }

    #[tokio::test]
    async fn test_unknown_topic_gets_denial_and_no_record() {
        let callback_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&callback_server)
            .await;

        let state = test_state();
        let callback = format!("{}/cb", callback_server.uri());
        let body = form(&[
            ("hub.callback", &callback),
            ("hub.mode", "subscribe"),
            ("hub.topic", "http://example.org/unknown-feed"),
        ]);

        let app = create_router(state.clone());
        let response = app.oneshot(post("/", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let mut denial = None;
        for _ in 0..100 {
            let received = callback_server.received_requests().await.unwrap();
            if let Some(request) = received.first() {
                denial = Some(request.clone());
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        let denial = denial.expect("denial callback was never delivered");

        let query: std::collections::HashMap<String, String> = denial
            .url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(query["hub.mode"], "denied");
        assert_eq!(query["hub.reason"], "not found");
        assert_eq!(query["hub.topic"], "http://example.org/unknown-feed");

        assert_eq!(state.store.subscription_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_callback_rejection_leaves_store_unchanged() {
        let callback_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&callback_server)
            .await;

        let state = test_state();
        state.store.add_topic("http://example.org/feed").await.unwrap();

        let callback = format!("{}/cb", callback_server.uri());
        let body = form(&[
            ("hub.callback", &callback),
            ("hub.mode", "subscribe"),
            ("hub.topic", "http://example.org/feed"),
        ]);

        let app = create_router(state.clone());
        let response = app.oneshot(post("/", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        // Wait for the challenge GET to be answered, then give the task a
        // moment; nothing may have been stored.
        let mut challenged = false;
        for _ in 0..100 {
            if !callback_server.received_requests().await.unwrap().is_empty() {
                challenged = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(challenged, "challenge GET was never issued");

        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(state.store.subscription_count().await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_unsubscribe_removes_record() {
        let callback_server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(EchoChallenge)
            .mount(&callback_server)
            .await;

        let state = test_state();
        let topic = state.store.add_topic("http://example.org/feed").await.unwrap();
        let callback = format!("{}/cb", callback_server.uri());
        state
            .store
            .upsert_subscription(topic, &callback, None, Utc::now() + chrono::TimeDelta::days(1))
            .await
            .unwrap();

        let body = form(&[
            ("hub.callback", &callback),
            ("hub.mode", "unsubscribe"),
            ("hub.topic", "http://example.org/feed"),
        ]);

        let app = create_router(state.clone());
        let response = app.oneshot(post("/", body)).await.unwrap();
        assert_eq!(response.status(), StatusCode::ACCEPTED);

        let mut removed = false;
        for _ in 0..100 {
            if state.store.subscription_count().await.unwrap() == 0 {
                removed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        assert!(removed, "subscription was not removed");
    }
}
