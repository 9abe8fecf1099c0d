//! Manual-test subscriber for the WebSub hub.
//!
//! Plays the role of a subscriber's callback endpoint: answers the hub's
//! verification GET by echoing `hub.challenge`, and logs denial
//! notifications. With `--request` it first POSTs a subscription request
//! at the hub, so a full subscribe round-trip can be exercised from one
//! terminal:
//!
//! ```text
//! websub-hub --topic http://example.org/feed &
//! websub-subscriber --request subscribe --topic http://example.org/feed
//! ```

use std::collections::HashMap;
use std::net::SocketAddr;

use anyhow::{Context, Result};
use axum::{
    extract::Query,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::get,
    Router,
};
use clap::{Parser, ValueEnum};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Debug, Clone, Copy, ValueEnum)]
enum RequestMode {
    Subscribe,
    Unsubscribe,
}

impl RequestMode {
    fn as_str(self) -> &'static str {
        match self {
            RequestMode::Subscribe => "subscribe",
            RequestMode::Unsubscribe => "unsubscribe",
        }
    }
}

/// Toy subscriber callback endpoint for exercising a WebSub hub by hand
#[derive(Parser)]
#[command(name = "websub-subscriber")]
#[command(author, version, about, long_about = None)]
struct Cli {
    /// Address the callback endpoint binds to
    #[arg(long, default_value = "127.0.0.1:8001")]
    listen: SocketAddr,

    /// Hub endpoint to send the initial request to
    #[arg(long, default_value = "http://127.0.0.1:8000/")]
    hub: String,

    /// Send a subscription request to the hub on startup
    #[arg(long, value_enum)]
    request: Option<RequestMode>,

    /// Topic URL for the startup request
    #[arg(long, default_value = "http://example.org/feed")]
    topic: String,

    /// Requested lease length in seconds
    #[arg(long)]
    lease_seconds: Option<u64>,

    /// Secret to attach to the subscription
    #[arg(long)]
    secret: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(
            EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| EnvFilter::new("info,websub_subscriber=debug")),
        )
        .with(tracing_subscriber::fmt::layer().with_target(true))
        .init();

    let cli = Cli::parse();

    let app = create_router();
    // Bind before poking the hub so its verification GET finds us listening.
    let listener = tokio::net::TcpListener::bind(cli.listen)
        .await
        .with_context(|| format!("Failed to bind callback endpoint on {}", cli.listen))?;
    info!("Callback endpoint listening on {}", cli.listen);

    if let Some(mode) = cli.request {
        send_request(&cli, mode).await?;
    }

    axum::serve(listener, app).await?;
    Ok(())
}

fn create_router() -> Router {
    Router::new()
        .route("/", get(callback_handler))
        .route("/*path", get(callback_handler))
        .layer(TraceLayer::new_for_http())
}

/// Answer the hub's verification GET.
///
/// Echoes `hub.challenge` to confirm intent. Denial notifications carry no
/// challenge; they are logged and acknowledged. Anything else gets a 404,
/// which a hub reads as "subscriber disagrees".
async fn callback_handler(Query(params): Query<HashMap<String, String>>) -> Response {
    if params.get("hub.mode").map(String::as_str) == Some("denied") {
        warn!(
            topic = params.get("hub.topic").map(String::as_str).unwrap_or("?"),
            reason = params.get("hub.reason").map(String::as_str).unwrap_or("?"),
            "hub denied the subscription"
        );
        return StatusCode::OK.into_response();
    }

    match params.get("hub.challenge") {
        Some(challenge) => {
            info!(
                mode = params.get("hub.mode").map(String::as_str).unwrap_or("?"),
                topic = params.get("hub.topic").map(String::as_str).unwrap_or("?"),
                lease_seconds = params.get("hub.lease_seconds").map(String::as_str).unwrap_or("?"),
                "echoing verification challenge"
            );
            (StatusCode::OK, challenge.clone()).into_response()
        }
        None => StatusCode::NOT_FOUND.into_response(),
    }
}

/// POST a subscription request at the hub and report its answer.
async fn send_request(cli: &Cli, mode: RequestMode) -> Result<()> {
    let callback = format!("http://{}/", cli.listen);
    let mut form: Vec<(&str, String)> = vec![
        ("hub.callback", callback),
        ("hub.mode", mode.as_str().to_string()),
        ("hub.topic", cli.topic.clone()),
    ];
    if let Some(lease) = cli.lease_seconds {
        form.push(("hub.lease_seconds", lease.to_string()));
    }
    if let Some(secret) = &cli.secret {
        form.push(("secret", secret.clone()));
    }

    let response = reqwest::Client::new()
        .post(&cli.hub)
        .form(&form)
        .send()
        .await
        .with_context(|| format!("Failed to reach hub at {}", cli.hub))?;

    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    if status.is_success() {
        info!(%status, mode = mode.as_str(), topic = %cli.topic, "hub accepted the request");
    } else {
        warn!(%status, error = %body, "hub rejected the request");
    }

    Ok(())
}
