//! Here we expose prometheus metrics about alert-relay
use std::net::{IpAddr, SocketAddr};

use anyhow::{Context, Result};
use axum::{
    http::{header::CONTENT_TYPE, StatusCode},
    response::IntoResponse,
    routing::get,
    Router,
};
use prometheus::{Encoder, TextEncoder};
use serde::Deserialize;

#[derive(Debug, Deserialize, Clone)]
pub struct TelemetryEndpointSettings {
    pub bind_address: IpAddr,
    pub port: u16,
}

impl TelemetryEndpointSettings {
    pub fn to_socket_addr(&self) -> SocketAddr {
        SocketAddr::new(self.bind_address, self.port)
    }
}

async fn metrics_handler() -> Result<impl IntoResponse, (StatusCode, String)> {
    let mut buffer = vec![];
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();

    encoder
        .encode(&metric_families, &mut buffer)
        .map_err(|err| (StatusCode::INTERNAL_SERVER_ERROR, err.to_string()))?;

    Ok(([(CONTENT_TYPE, encoder.format_type().to_owned())], buffer))
}

pub fn router() -> Router {
    Router::new().route("/metrics", get(metrics_handler))
}

pub async fn run_telemetry_endpoint(settings: &TelemetryEndpointSettings) -> Result<()> {
    axum::Server::bind(&settings.to_socket_addr())
        .serve(router().into_make_service())
        .await
        .context("telemetry endpoint crashed")?;

    Ok(())
}
