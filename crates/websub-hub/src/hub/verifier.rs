//! Verification of intent.
//!
//! Confirms with the subscriber's callback that the (un)subscription was
//! actually requested: the hub issues a GET carrying a fresh challenge
//! token and accepts only if the callback echoes it back verbatim with a
//! 2xx status. Unknown topics get a denial notification instead.
//!
//! The handshake is synchronous from the hub's point of view - the hub
//! waits for the echo - even though the 202 to the original caller has
//! already gone out by the time it runs. There are no retries and no
//! cancellation once the GET is issued; a timeout counts as a denial.

use std::time::Duration;

use rand::{distr::Alphanumeric, Rng};
use reqwest::StatusCode;
use tracing::{debug, instrument, warn};

use super::SubscriptionRequest;
use crate::store::TopicId;

/// Challenge length. A hub-chosen constant; the protocol leaves it open.
const CHALLENGE_LENGTH: usize = 100;

/// Result of a verification attempt
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum VerificationOutcome {
    /// Callback echoed the challenge; the request may be enacted.
    Accepted,
    /// The topic is not registered with this hub; the subscriber was sent
    /// a denial notification.
    DeniedNotFound,
    /// Callback unreachable, refused, or answered with the wrong body.
    DeniedByCallback,
}

/// Performs challenge/response handshakes against subscriber callbacks
pub struct IntentVerifier {
    http: reqwest::Client,
    default_lease_seconds: u64,
}

impl IntentVerifier {
    /// Create a verifier. `timeout` bounds every outbound callback GET.
    pub fn new(timeout: Duration, default_lease_seconds: u64) -> Self {
        let http = reqwest::Client::builder()
            .timeout(timeout)
            .user_agent(concat!("websub-hub/", env!("CARGO_PKG_VERSION")))
            .build()
            .expect("Failed to build HTTP client");

        Self {
            http,
            default_lease_seconds,
        }
    }

    /// The lease length that applies to a request, falling back to the
    /// hub default when the subscriber did not ask for one.
    pub fn effective_lease_seconds(&self, request: &SubscriptionRequest) -> u64 {
        request.lease_seconds.unwrap_or(self.default_lease_seconds)
    }

    /// Run the verification handshake for a validated request.
    #[instrument(skip_all, fields(mode = %request.mode, topic = %request.topic, callback = %request.callback))]
    pub async fn verify(
        &self,
        request: &SubscriptionRequest,
        topic: Option<TopicId>,
    ) -> VerificationOutcome {
        if topic.is_none() {
            self.send_denial(request).await;
            return VerificationOutcome::DeniedNotFound;
        }

        let challenge = challenge_token();
        let lease_seconds = self.effective_lease_seconds(request);

        let mut url = request.callback.clone();
        url.query_pairs_mut()
            .append_pair("hub.topic", request.topic.as_str())
            .append_pair("hub.mode", request.mode.as_str())
            .append_pair("hub.challenge", &challenge)
            .append_pair("hub.lease_seconds", &lease_seconds.to_string());

        let response = match self.http.get(url).send().await {
            Ok(response) => response,
            Err(e) => {
                debug!(error = %e, "verification request failed");
                return VerificationOutcome::DeniedByCallback;
            }
        };

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            // Subscriber actively disagrees.
            debug!("callback answered 404");
            return VerificationOutcome::DeniedByCallback;
        }
        if !status.is_success() {
            debug!(status = %status, "callback refused verification");
            return VerificationOutcome::DeniedByCallback;
        }

        match response.bytes().await {
            Ok(body) if body.as_ref() == challenge.as_bytes() => VerificationOutcome::Accepted,
            Ok(_) => {
                debug!("callback did not echo the challenge");
                VerificationOutcome::DeniedByCallback
            }
            Err(e) => {
                debug!(error = %e, "failed to read callback response");
                VerificationOutcome::DeniedByCallback
            }
        }
    }

    /// Notify the callback that its request was denied because the topic
    /// is unknown. Fire-and-forget: the response is not inspected.
    async fn send_denial(&self, request: &SubscriptionRequest) {
        let mut url = request.callback.clone();
        url.query_pairs_mut()
            .append_pair("hub.topic", request.topic.as_str())
            .append_pair("hub.mode", "denied")
            .append_pair("hub.reason", "not found");

        if let Err(e) = self.http.get(url).send().await {
            warn!(error = %e, callback = %request.callback, "failed to deliver denial");
        }
    }
}

/// Generate a fresh random alphanumeric challenge. Ephemeral, scoped to a
/// single verification attempt, never persisted or reused. A fast PRNG is
/// enough here: the token only guards against casual replay.
fn challenge_token() -> String {
    rand::rng()
        .sample_iter(&Alphanumeric)
        .take(CHALLENGE_LENGTH)
        .map(char::from)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hub::Mode;
    use chrono::Utc;
    use url::Url;
    use wiremock::matchers::{method, path, query_param};
    use wiremock::{Mock, MockServer, Request, Respond, ResponseTemplate};

    /// Responds to a verification GET by echoing `hub.challenge` back,
    /// the way a well-behaved subscriber would.
    struct EchoChallenge;

    impl Respond for EchoChallenge {
        fn respond(&self, request: &Request) -> ResponseTemplate {
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

    fn subscribe_request(callback: &str) -> SubscriptionRequest {
        SubscriptionRequest {
            callback: Url::parse(callback).unwrap(),
            topic: Url::parse("http://example.org/feed").unwrap(),
            mode: Mode::Subscribe,
            lease_seconds: None,
            secret: None,
            received_at: Utc::now(),
        }
    }

    fn verifier() -> IntentVerifier {
        IntentVerifier::new(Duration::from_secs(5), 864_000)
    }

    #[tokio::test]
    async fn test_challenge_token_shape() {
        let token = challenge_token();
        assert_eq!(token.len(), CHALLENGE_LENGTH);
        assert!(token.chars().all(|c| c.is_ascii_alphanumeric()));
        assert_ne!(token, challenge_token());
    }

    #[tokio::test]
    async fn test_accepted_when_callback_echoes_challenge() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(path("/cb"))
            .respond_with(EchoChallenge)
            .mount(&server)
            .await;

        let request = subscribe_request(&format!("{}/cb", server.uri()));
        let outcome = verifier().verify(&request, Some(TopicId(1))).await;
        assert_eq!(outcome, VerificationOutcome::Accepted);

        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 1);
        let query: std::collections::HashMap<String, String> = received[0]
            .url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(query["hub.topic"], "http://example.org/feed");
        assert_eq!(query["hub.mode"], "subscribe");
        assert_eq!(query["hub.lease_seconds"], "864000");
        assert_eq!(query["hub.challenge"].len(), CHALLENGE_LENGTH);
    }

    #[tokio::test]
    async fn test_requested_lease_used_over_default() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .and(query_param("hub.lease_seconds", "3600"))
            .respond_with(EchoChallenge)
            .mount(&server)
            .await;

        let mut request = subscribe_request(&format!("{}/cb", server.uri()));
        request.lease_seconds = Some(3600);
        let outcome = verifier().verify(&request, Some(TopicId(1))).await;
        assert_eq!(outcome, VerificationOutcome::Accepted);
    }

    #[tokio::test]
    async fn test_denied_on_404() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(404))
            .mount(&server)
            .await;

        let request = subscribe_request(&format!("{}/cb", server.uri()));
        let outcome = verifier().verify(&request, Some(TopicId(1))).await;
        assert_eq!(outcome, VerificationOutcome::DeniedByCallback);
    }

    #[tokio::test]
    async fn test_denied_on_server_error() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let request = subscribe_request(&format!("{}/cb", server.uri()));
        let outcome = verifier().verify(&request, Some(TopicId(1))).await;
        assert_eq!(outcome, VerificationOutcome::DeniedByCallback);
    }

    #[tokio::test]
    async fn test_denied_on_wrong_echo() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not the challenge"))
            .mount(&server)
            .await;

        let request = subscribe_request(&format!("{}/cb", server.uri()));
        let outcome = verifier().verify(&request, Some(TopicId(1))).await;
        assert_eq!(outcome, VerificationOutcome::DeniedByCallback);
    }

    #[tokio::test]
    async fn test_denied_on_unreachable_callback() {
        // Nothing listens here.
        let request = subscribe_request("http://127.0.0.1:1/cb");
        let outcome = verifier().verify(&request, Some(TopicId(1))).await;
        assert_eq!(outcome, VerificationOutcome::DeniedByCallback);
    }

    #[tokio::test]
    async fn test_denied_on_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(
                ResponseTemplate::new(200).set_delay(Duration::from_secs(5)),
            )
            .mount(&server)
            .await;

        let verifier = IntentVerifier::new(Duration::from_millis(200), 864_000);
        let request = subscribe_request(&format!("{}/cb", server.uri()));
        let outcome = verifier.verify(&request, Some(TopicId(1))).await;
        assert_eq!(outcome, VerificationOutcome::DeniedByCallback);
    }

    #[tokio::test]
    async fn test_unknown_topic_sends_denial() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200))
            .mount(&server)
            .await;

        // Callback already carries a query string; the denial parameters
        // must merge with it rather than clobber it.
        let request = subscribe_request(&format!("{}/cb?existing=1", server.uri()));
        let outcome = verifier().verify(&request, None).await;
        assert_eq!(outcome, VerificationOutcome::DeniedNotFound);

        let received = server.received_requests().await.unwrap();
        assert_eq!(received.len(), 1);
        let query: std::collections::HashMap<String, String> = received[0]
            .url
            .query_pairs()
            .map(|(k, v)| (k.into_owned(), v.into_owned()))
            .collect();
        assert_eq!(query["existing"], "1");
        assert_eq!(query["hub.mode"], "denied");
        assert_eq!(query["hub.reason"], "not found");
        assert_eq!(query["hub.topic"], "http://example.org/feed");
        assert!(!query.contains_key("hub.challenge"));
    }
}
