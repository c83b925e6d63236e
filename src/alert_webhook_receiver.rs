use std::{
    net::{IpAddr, SocketAddr},
    sync::Arc,
    time::Duration,
};

use anyhow::{Context, Result};
use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::post,
    Router,
};
use bytes::Bytes;
use serde::Deserialize;
use serde_with::{serde_as, DurationSecondsWithFrac};
use thiserror::Error;
use tower_http::{timeout::TimeoutLayer, trace::TraceLayer};

use crate::{
    dispatcher::{DispatchError, Dispatcher},
    message::Handle,
    metrics,
    normalizer::{self, NormalizationError, Schema},
};

#[serde_as]
#[derive(Debug, Deserialize, Clone)]
pub struct AlertReceiverSettings {
    pub bind_address: IpAddr,
    pub port: u16,
    /// additionally accept any known schema on `/`
    #[serde(default)]
    pub content_sniffing: bool,
    #[serde_as(as = "DurationSecondsWithFrac<f64>")]
    pub request_timeout: Duration,
}

impl AlertReceiverSettings {
    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

fn default_recipient_env_var() -> String {
    String::from("IMESSAGE_RECIPIENT")
}

/// where the recipient of the messages comes from
#[derive(Debug, Deserialize, Clone)]
pub struct RecipientSettings {
    /// environment variable holding the recipient, takes precedence over `handle`
    #[serde(default = "default_recipient_env_var")]
    pub env_var: String,
    /// fallback if the environment variable isn't set
    #[serde(default)]
    pub handle: Option<String>,
}

impl Default for RecipientSettings {
    fn default() -> Self {
        Self {
            env_var: default_recipient_env_var(),
            handle: None,
        }
    }
}

impl RecipientSettings {
    /// Looks up the recipient. The environment is read on every call so the
    /// recipient can be changed without restarting.
    pub fn resolve(&self) -> Option<Handle> {
        std::env::var(&self.env_var)
            .ok()
            .and_then(|handle| Handle::new(handle).ok())
            .or_else(|| self.handle.clone().and_then(|handle| Handle::new(handle).ok()))
    }
}

/// Error occuring while handling a webhook request
#[derive(Error, Debug)]
pub enum ReceiverError {
    #[error("no recipient configured, set the {env_var} environment variable or recipient.handle")]
    MissingConfiguration { env_var: String },
    #[error(transparent)]
    Normalization(#[from] NormalizationError),
    #[error(transparent)]
    Dispatch(#[from] DispatchError),
}

impl ReceiverError {
    fn reason(&self) -> &'static str {
        match self {
            ReceiverError::MissingConfiguration { .. } => "missing_configuration",
            ReceiverError::Normalization(err) => err.reason(),
            ReceiverError::Dispatch(err) => err.reason(),
        }
    }

    fn status_code(&self) -> StatusCode {
        match self {
            ReceiverError::Normalization(NormalizationError::BadRequest { .. }) => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }
}

impl IntoResponse for ReceiverError {
    fn into_response(self) -> Response {
        (self.status_code(), self.to_string()).into_response()
    }
}

pub struct State {
    dispatcher: Dispatcher,
    recipient: RecipientSettings,
}

impl State {
    pub fn new(dispatcher: Dispatcher, recipient: RecipientSettings) -> Self {
        Self {
            dispatcher,
            recipient,
        }
    }

    /// recipient lookup, normalization and dispatch of a single webhook body
    async fn process(&self, expected: Schema, body: &[u8]) -> Result<StatusCode, ReceiverError> {
        let recipient =
            self.recipient
                .resolve()
                .ok_or_else(|| ReceiverError::MissingConfiguration {
                    env_var: self.recipient.env_var.clone(),
                })?;

        let message = normalizer::normalize(body, expected, recipient)?;
        tracing::debug!(?message, "normalized alert payload");

        let delivery = self.dispatcher.dispatch(&message).await?;
        tracing::info!(
            recipient = %message.handle(),
            delivery = delivery.as_str(),
            "processed {} webhook",
            expected
        );

        Ok(StatusCode::OK)
    }
}

async fn receive(
    route: &'static str,
    expected: Schema,
    state: &State,
    body: Bytes,
) -> Result<StatusCode, ReceiverError> {
    let result = state.process(expected, &body).await;

    match &result {
        Ok(_) => {
            metrics::RECEIVED_ALERTS
                .with_label_values(&[route, expected.as_str()])
                .inc();
        }
        Err(err) => {
            metrics::REJECTED_REQUESTS
                .with_label_values(&[route, err.reason()])
                .inc();

            match err {
                ReceiverError::Normalization(NormalizationError::BadRequest { .. }) => {
                    tracing::debug!(
                        body = %String::from_utf8_lossy(&body),
                        "got bad request: {}",
                        err
                    );
                }
                ReceiverError::Normalization(err) => {
                    let payload = err.payload().map(ToString::to_string).unwrap_or_default();
                    tracing::warn!(%payload, "error formatting message: {}", err);
                }
                ReceiverError::MissingConfiguration { .. } | ReceiverError::Dispatch(_) => {
                    tracing::error!("failed to process {} webhook: {}", expected, err);
                }
            }
        }
    }

    result
}

async fn grafana_receiver(
    Extension(state): Extension<Arc<State>>,
    body: Bytes,
) -> Result<StatusCode, ReceiverError> {
    receive("/grafana", Schema::Grafana, &state, body).await
}

async fn alertmanager_receiver(
    Extension(state): Extension<Arc<State>>,
    body: Bytes,
) -> Result<StatusCode, ReceiverError> {
    receive("/alertmanager", Schema::Alertmanager, &state, body).await
}

async fn sniffing_receiver(
    Extension(state): Extension<Arc<State>>,
    body: Bytes,
) -> Result<StatusCode, ReceiverError> {
    receive("/", Schema::Any, &state, body).await
}

/// webhook routes, `/` is only mounted with content sniffing enabled
pub fn router(state: Arc<State>, settings: &AlertReceiverSettings) -> Router {
    let mut app = Router::new()
        .route("/grafana", post(grafana_receiver))
        .route("/alertmanager", post(alertmanager_receiver));

    if settings.content_sniffing {
        app = app.route("/", post(sniffing_receiver));
    }

    app.layer(TraceLayer::new_for_http())
        .layer(TimeoutLayer::new(settings.request_timeout))
        .layer(Extension(state))
}

pub async fn run_alert_receiver(settings: &AlertReceiverSettings, state: State) -> Result<()> {
    let addr = settings.to_socket_addr();
    let app = router(Arc::new(state), settings);

    tracing::info!("starting alert webhook receiver on {}", addr);

    axum::Server::bind(&addr)
        .serve(app.into_make_service())
        .await
        .context("alert webhook receiver crashed")?;

    Ok(())
}
