//! Detects the alert schema of a webhook body and renders it into a
//! [NormalizedMessage].
//!
//! Bodies are received from [alert_webhook_receiver](crate::alert_webhook_receiver),
//! normalized messages are handed to the [dispatcher](crate::dispatcher).

use std::fmt::{self, Write};

use serde::de::DeserializeOwned;
use serde_json::Value;
use thiserror::Error;

use crate::{
	alert::{AlertmanagerBatch, GrafanaBatch, GrafanaLegacy},
	message::{Handle, NormalizedMessage},
};

/// the schema family a route expects
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Schema {
	/// grafana, either legacy or unified alerting
	Grafana,
	/// prometheus alertmanager
	Alertmanager,
	/// no expectation, sniff the schema from the content
	Any,
}

impl Schema {
	pub fn as_str(&self) -> &'static str {
		match self {
			Schema::Grafana => "grafana",
			Schema::Alertmanager => "alertmanager",
			Schema::Any => "any",
		}
	}
}

impl Schema {
	/// what a body on a route with this expectation is called in error messages
	fn payload_kind(&self) -> &'static str {
		match self {
			Schema::Any => "json",
			schema => schema.as_str(),
		}
	}
}

impl fmt::Display for Schema {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(self.as_str())
	}
}

/// Error occuring when normalizing a webhook body
#[derive(Error, Debug)]
pub enum NormalizationError {
	/// body isn't json or doesn't fit the schema the route expects
	#[error("malformed {} payload: {source}", .expected.payload_kind())]
	BadRequest {
		expected: Schema,
		#[source]
		source: serde_json::Error,
	},
	/// body is json but doesn't match any schema we know
	#[error("unsupported payload: body does not match any known alert schema")]
	UnsupportedPayload { payload: Value },
	/// batch without a single alert in it
	#[error("no alerts found in {variant} payload, cannot build message")]
	NoAlerts { variant: &'static str, payload: Value },
}

impl NormalizationError {
	/// the decoded payload that couldn't be normalized, for diagnostic logging
	pub fn payload(&self) -> Option<&Value> {
		match self {
			NormalizationError::BadRequest { .. } => None,
			NormalizationError::UnsupportedPayload { payload }
			| NormalizationError::NoAlerts { payload, .. } => Some(payload),
		}
	}

	/// short label used in metrics
	pub fn reason(&self) -> &'static str {
		match self {
			NormalizationError::BadRequest { .. } => "bad_request",
			NormalizationError::UnsupportedPayload { .. } => "unsupported_payload",
			NormalizationError::NoAlerts { .. } => "no_alerts",
		}
	}
}

/// all alert payloads we know how to render
#[derive(Debug, Clone)]
pub enum AlertPayload {
	Alertmanager(AlertmanagerBatch),
	GrafanaBatch(GrafanaBatch),
	GrafanaLegacy(GrafanaLegacy),
}

impl AlertPayload {
	/// name of the concrete variant, used in logs and metrics
	pub fn variant(&self) -> &'static str {
		match self {
			AlertPayload::Alertmanager(_) => "alertmanager",
			AlertPayload::GrafanaBatch(_) => "grafana_batch",
			AlertPayload::GrafanaLegacy(_) => "grafana_legacy",
		}
	}

	/// Decodes `body` according to the `expected` schema.
	///
	/// Routes with a fixed schema decode straight into that schema, every
	/// failure is a [NormalizationError::BadRequest]. [Schema::Any] tries
	/// grafana legacy, grafana batch (only with an `orgId`) and alertmanager
	/// in that order and fails with [NormalizationError::UnsupportedPayload]
	/// if none fits.
	pub fn detect(body: &[u8], expected: Schema) -> Result<Self, NormalizationError> {
		let bad_request = |source| NormalizationError::BadRequest { expected, source };

		match expected {
			Schema::Alertmanager => {
				serde_json::from_slice(body).map(AlertPayload::Alertmanager).map_err(bad_request)
			}
			Schema::Grafana => {
				let value: Value = serde_json::from_slice(body).map_err(bad_request)?;

				// the legacy format is recognisable by its rule name, try it first
				match reinterpret(&value) {
					Ok(legacy) => Ok(AlertPayload::GrafanaLegacy(legacy)),
					Err(_) => reinterpret(&value).map(AlertPayload::GrafanaBatch).map_err(bad_request),
				}
			}
			Schema::Any => {
				let value: Value = serde_json::from_slice(body).map_err(bad_request)?;

				if let Ok(legacy) = reinterpret(&value) {
					return Ok(AlertPayload::GrafanaLegacy(legacy));
				}
				// alertmanager batches look the same apart from the organisation
				if value.get("orgId").is_some() {
					if let Ok(batch) = reinterpret(&value) {
						return Ok(AlertPayload::GrafanaBatch(batch));
					}
				}
				if let Ok(batch) = reinterpret(&value) {
					return Ok(AlertPayload::Alertmanager(batch));
				}

				Err(NormalizationError::UnsupportedPayload { payload: value })
			}
		}
	}

	/// Renders the payload into the text body of the outgoing message.
	/// Batches produce one block per alert, in the order they were received.
	pub fn render(&self) -> Result<String, NormalizationError> {
		let mut out = String::new();

		match self {
			AlertPayload::Alertmanager(batch) => {
				if batch.alerts.is_empty() {
					return Err(self.no_alerts());
				}

				for alert in &batch.alerts {
					// writing into a String can't fail
					let _ = write!(
						out,
						"[{}][{}] {}\n{}\n",
						alert.label("alertname"),
						alert.status,
						alert.annotation("description"),
						alert.generator_url,
					);
				}
			}
			AlertPayload::GrafanaBatch(batch) => {
				if batch.alerts.is_empty() {
					return Err(self.no_alerts());
				}

				for alert in &batch.alerts {
					tracing::debug!("processing alert {}", alert.label("alertname"));
					let _ = writeln!(
						out,
						"[{}] {} {}",
						alert.status,
						alert.label("alertname"),
						alert.generator_url
					);
				}
			}
			AlertPayload::GrafanaLegacy(legacy) => {
				let _ = write!(out, "[{}] {} {}", legacy.state, legacy.rule_name, legacy.message);
			}
		}

		Ok(out)
	}

	fn no_alerts(&self) -> NormalizationError {
		let payload = match self {
			AlertPayload::Alertmanager(batch) => serde_json::to_value(batch),
			AlertPayload::GrafanaBatch(batch) => serde_json::to_value(batch),
			AlertPayload::GrafanaLegacy(legacy) => serde_json::to_value(legacy),
		}
		.unwrap_or(Value::Null);

		NormalizationError::NoAlerts { variant: self.variant(), payload }
	}
}

/// typed reinterpretation of an already decoded json value
fn reinterpret<T: DeserializeOwned>(value: &Value) -> Result<T, serde_json::Error> {
	T::deserialize(value)
}

/// Turns a webhook body into the message for `recipient`.
///
/// # Arguments
///
/// * `body` - raw request body
///
/// * `expected` - schema the route expects, [Schema::Any] to sniff the content
///
/// * `recipient` - who should receive the message
pub fn normalize(
	body: &[u8],
	expected: Schema,
	recipient: Handle,
) -> Result<NormalizedMessage, NormalizationError> {
	let payload = AlertPayload::detect(body, expected)?;
	tracing::debug!(expected = %expected, "detected {} payload", payload.variant());

	let message = payload.render()?;

	Ok(NormalizedMessage::new(message, recipient))
}
