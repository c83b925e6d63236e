//! grafana and alertmanager webhook receiver that forwards alerts to a messaging gateway
//!
//! Features:
//! - one route per alert source (`/grafana`, `/alertmanager`), optionally a
//!   content sniffing route (`/`) accepting every known schema
//! - alerts are normalized into a single plain text message per webhook
//! - delivery can be paused by placing a marker file

use std::sync::Arc;

use anyhow::{Context, Result};
use settings::Settings;

use crate::{
    alert_webhook_receiver::State,
    dispatcher::{Dispatcher, MarkerFile},
};

mod alert;
mod alert_webhook_receiver;
mod dispatcher;
mod log;
mod message;
mod metrics;
mod normalizer;
mod settings;
mod telemetry_endpoint;

/// exit the complete program if one thread panics
fn setup_panic_handler() {
	let default_panic = std::panic::take_hook();
	std::panic::set_hook(Box::new(move |info| {
		default_panic(info);
		std::process::exit(1);
	}));
}

/// the entry point of the program
#[tokio::main]
pub async fn main() -> Result<()> {
	setup_panic_handler();

	let settings = Settings::global();

	log::setup_logging(&settings.log).context("could not setup logging")?;

	let pause = Arc::new(MarkerFile(settings.pause_marker.clone()));
	let dispatcher =
		Dispatcher::new(&settings.gateway, pause).context("failed to construct dispatcher")?;

	tracing::info!(
		gateway = %settings.gateway.url,
		pause_marker = %settings.pause_marker.display(),
		"dispatcher ready"
	);

	tokio::spawn(async move {
		#[allow(clippy::expect_used)]
		telemetry_endpoint::run_telemetry_endpoint(&settings.telemetry_endpoint)
			.await
			.expect("telemetry endpoint failed to start or crashed");
	});

	alert_webhook_receiver::run_alert_receiver(
		&settings.alert_webhook_receiver,
		State::new(dispatcher, settings.recipient.clone()),
	)
	.await
}
