mod model;
mod util;

use std::{
    io::Cursor,
    net::{AddrParseError, IpAddr, SocketAddr},
    sync::Arc,
};

use axum::{
    body::Bytes,
    extract::{rejection::JsonRejection, State},
    http::{HeaderMap, StatusCode, Uri},
    response::{IntoResponse, Response},
    routing::post,
    Json, Router,
};
use ed25519_dalek::{VerifyingKey, PUBLIC_KEY_LENGTH};
use tokio::net::TcpListener;
use tracing::{debug, info, warn};
use tracing_subscriber::EnvFilter;

use crate::{
    model::{Authorization, AuthorizerRequest, UNSCOPED_RESOURCE},
    util::{verify, wait_for_shutdown, DenyReason, RequestBody, VerificationOutcome},
};

#[tokio::main]
async fn main() -> Result<(), Error> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| "info".into()))
        .init();

    let config = Config::from_env()?;
    let state = AppState {
        pubkey: Arc::new(config.pubkey),
    };
    let tcp = TcpListener::bind(config.listen).await?;
    info!(addr = %config.listen, "authorizer listening");
    axum::serve(tcp, router(state))
        .with_graceful_shutdown(wait_for_shutdown())
        .await?;
    Ok(())
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/authorize", post(authorize))
        .route("/interactions", post(interactions))
        .with_state(state)
}

/// Handles an API Gateway REQUEST authorizer event.
///
/// An event that cannot be read is denied like any other bad request.
pub async fn authorize(
    State(state): State<AppState>,
    event: Result<Json<AuthorizerRequest>, JsonRejection>,
) -> Authorization {
    let Json(event) = match event {
        Ok(event) => event,
        Err(rejection) => {
            let reason = DenyReason::MalformedEvent(rejection.body_text());
            return decide(VerificationOutcome::Denied(reason), UNSCOPED_RESOURCE);
        }
    };
    debug!(
        kind = event.kind.as_deref(),
        method = event.http_method.as_deref(),
        path = event.path.as_deref().or(event.resource.as_deref()),
        "authorizer event"
    );
    let headers = event.headers.unwrap_or_default();
    let mut body = RequestBody::from(event.body.unwrap_or_default());
    let outcome = verify(&headers, &mut body, &state.pubkey);
    decide(outcome, &event.method_arn)
}

/// Verifies a webhook delivery as it came off the wire.
pub async fn interactions(
    State(state): State<AppState>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Authorization {
    let mut body = RequestBody::new(Cursor::new(body));
    let outcome = verify(&headers, &mut body, &state.pubkey);
    decide(outcome, uri.path())
}

fn decide(outcome: VerificationOutcome, resource: &str) -> Authorization {
    let authorization = Authorization::new(outcome, resource);
    match &authorization.error {
        None => info!(
            resource,
            allowed = authorization.is_allowed(),
            "signature verified"
        ),
        Some(reason) => warn!(resource, %reason, "request denied"),
    }
    authorization
}

impl IntoResponse for Authorization {
    fn into_response(self) -> Response {
        let status = if self.error.is_some() {
            StatusCode::UNAUTHORIZED
        } else {
            StatusCode::OK
        };
        (status, Json(self)).into_response()
    }
}

#[derive(Clone)]
pub struct AppState {
    pubkey: Arc<VerifyingKey>,
}

#[derive(Debug)]
pub struct Config {
    pubkey: VerifyingKey,
    listen: SocketAddr,
}

impl Config {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let pub_key_string = lookup("DISCORD_PUBKEY")
            .filter(|key| !key.is_empty())
            .ok_or(ConfigError::MissingPubkey)?;
        let pub_key_bytes: [u8; PUBLIC_KEY_LENGTH] = hex::decode(pub_key_string.trim())?
            .try_into()
            .map_err(|bytes: Vec<u8>| ConfigError::PubkeyLength(bytes.len()))?;
        let pubkey = VerifyingKey::from_bytes(&pub_key_bytes)?;
        let listen = match lookup("LISTEN_ADDR") {
            Some(addr) => addr.parse::<SocketAddr>()?,
            None => SocketAddr::from((IpAddr::from([0, 0, 0, 0]), 8080)),
        };
        Ok(Self { pubkey, listen })
    }
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Expected DISCORD_PUBKEY")]
    MissingPubkey,
    #[error("Discord pubkey was invalid hex: {0}")]
    PubkeyHex(#[from] hex::FromHexError),
    #[error("Discord pubkey was wrong length ({0} bytes, 32 expected)")]
    PubkeyLength(usize),
    #[error("Invalid Ed25519 verifying key: {0}")]
    PubkeyPoint(#[from] ed25519_dalek::SignatureError),
    #[error("LISTEN_ADDR was not a socket address: {0}")]
    ListenAddr(#[from] AddrParseError),
}

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
