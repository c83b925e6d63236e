//! prometheus meters, exposed by the [telemetry endpoint](crate::telemetry_endpoint)

use once_cell::sync::Lazy;
use prometheus::{opts, register_int_counter_vec, IntCounterVec};

/// total number of webhook bodies that were normalized successfully
#[allow(clippy::expect_used)]
pub static RECEIVED_ALERTS: Lazy<IntCounterVec> = Lazy::new(|| {
	register_int_counter_vec!(
		opts!("received_total", "total number of normalized webhook payloads")
			.namespace("alert_relay")
			.subsystem("webhook"),
		&["route", "schema"]
	)
	.expect("failed to register received_total counter")
});

/// total number of requests that failed before or during dispatch
#[allow(clippy::expect_used)]
pub static REJECTED_REQUESTS: Lazy<IntCounterVec> = Lazy::new(|| {
	register_int_counter_vec!(
		opts!("rejected_total", "total number of failed webhook requests")
			.namespace("alert_relay")
			.subsystem("webhook"),
		&["route", "reason"]
	)
	.expect("failed to register rejected_total counter")
});

/// outcome of every dispatch attempt: sent, paused, rejected or transport_error
#[allow(clippy::expect_used)]
pub static DELIVERIES: Lazy<IntCounterVec> = Lazy::new(|| {
	register_int_counter_vec!(
		opts!("deliveries_total", "total number of dispatch attempts by outcome")
			.namespace("alert_relay")
			.subsystem("dispatcher"),
		&["outcome"]
	)
	.expect("failed to register deliveries_total counter")
});
