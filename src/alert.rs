//! data structures for deserializing incoming alerts
//!
//! Grafana and alertmanager both deliver batches of alerts, grafana's legacy
//! alerting delivers a single alert rule per request. Fields that are not
//! needed to tell the schemas apart default to empty values, so partially
//! filled payloads still decode.
use std::{collections::HashMap, fmt};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// status of a single alert
#[derive(Clone, Debug, PartialEq, Eq, Deserialize, Serialize)]
#[serde(from = "String", into = "String")]
pub enum AlertStatus {
	/// alert is currently active
	Firing,
	/// alert was active and has been resolved
	Resolved,
	/// any status string we don't know about, kept verbatim
	Other(String),
}

impl Default for AlertStatus {
	fn default() -> Self {
		AlertStatus::Other(String::new())
	}
}

impl From<String> for AlertStatus {
	fn from(status: String) -> Self {
		match status.as_str() {
			"firing" => AlertStatus::Firing,
			"resolved" => AlertStatus::Resolved,
			_ => AlertStatus::Other(status),
		}
	}
}

impl From<AlertStatus> for String {
	fn from(status: AlertStatus) -> Self {
		status.to_string()
	}
}

impl fmt::Display for AlertStatus {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			AlertStatus::Firing => f.write_str("firing"),
			AlertStatus::Resolved => f.write_str("resolved"),
			AlertStatus::Other(status) => f.write_str(status),
		}
	}
}

/// a single alert inside a grafana or alertmanager batch
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AlertEvent {
	#[serde(default)]
	pub status: AlertStatus,
	#[serde(default)]
	pub labels: HashMap<String, String>,
	#[serde(default)]
	pub annotations: HashMap<String, String>,
	#[serde(default)]
	pub starts_at: Option<DateTime<Utc>>,
	#[serde(default)]
	pub ends_at: Option<DateTime<Utc>>,
	#[serde(default, rename = "generatorURL")]
	pub generator_url: String,
	#[serde(default)]
	pub fingerprint: Option<String>,
	/// grafana only
	#[serde(default, rename = "silenceURL")]
	pub silence_url: Option<String>,
	/// grafana only
	#[serde(default, rename = "dashboardURL")]
	pub dashboard_url: Option<String>,
	/// grafana only
	#[serde(default, rename = "panelURL")]
	pub panel_url: Option<String>,
	/// grafana only, the values of the queries that triggered the alert
	#[serde(default)]
	pub values: Option<HashMap<String, f64>>,
}

impl AlertEvent {
	/// value of a label, empty if the label isn't set
	pub fn label(&self, name: &str) -> &str {
		self.labels.get(name).map_or("", String::as_str)
	}

	/// value of an annotation, empty if the annotation isn't set
	pub fn annotation(&self, name: &str) -> &str {
		self.annotations.get(name).map_or("", String::as_str)
	}
}

/// webhook payload sent by prometheus alertmanager
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(clippy::missing_docs_in_private_items)]
pub struct AlertmanagerBatch {
	#[serde(default)]
	pub version: String,
	#[serde(default)]
	pub group_key: String,
	#[serde(default)]
	pub truncated_alerts: u64,
	#[serde(default)]
	pub status: String,
	#[serde(default)]
	pub receiver: String,
	pub alerts: Vec<AlertEvent>,
	#[serde(default)]
	pub group_labels: HashMap<String, String>,
	#[serde(default)]
	pub common_labels: HashMap<String, String>,
	#[serde(default)]
	pub common_annotations: HashMap<String, String>,
	#[serde(default, rename = "externalURL")]
	pub external_url: String,
}

/// webhook payload sent by grafana's unified alerting
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(clippy::missing_docs_in_private_items)]
pub struct GrafanaBatch {
	#[serde(default)]
	pub receiver: String,
	#[serde(default)]
	pub status: String,
	/// alertmanager doesn't know about organisations, content sniffing relies on it
	#[serde(default)]
	pub org_id: Option<i64>,
	pub alerts: Vec<AlertEvent>,
	#[serde(default)]
	pub group_labels: HashMap<String, String>,
	#[serde(default)]
	pub common_labels: HashMap<String, String>,
	#[serde(default)]
	pub common_annotations: HashMap<String, String>,
	#[serde(default, rename = "externalURL")]
	pub external_url: String,
	#[serde(default)]
	pub version: String,
	#[serde(default)]
	pub group_key: String,
	#[serde(default)]
	pub truncated_alerts: u64,
	#[serde(default)]
	pub title: String,
	#[serde(default)]
	pub state: String,
	#[serde(default)]
	pub message: String,
}

/// webhook payload sent by grafana's legacy dashboard alerting, one alert rule per request
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[serde(rename_all = "camelCase")]
#[allow(clippy::missing_docs_in_private_items)]
pub struct GrafanaLegacy {
	#[serde(default)]
	pub title: String,
	#[serde(default)]
	pub rule_id: i64,
	pub rule_name: String,
	#[serde(default)]
	pub rule_url: String,
	pub state: String,
	#[serde(default)]
	pub image_url: Option<String>,
	#[serde(default)]
	pub message: String,
	#[serde(default)]
	pub eval_matches: Vec<EvalMatch>,
	#[serde(default)]
	pub tags: HashMap<String, String>,
	#[serde(default)]
	pub org_id: Option<i64>,
	#[serde(default)]
	pub dashboard_id: Option<i64>,
	#[serde(default)]
	pub panel_id: Option<i64>,
}

/// a series that matched the alert rule condition
#[derive(Clone, Debug, Default, Deserialize, Serialize)]
#[allow(clippy::missing_docs_in_private_items)]
pub struct EvalMatch {
	#[serde(default)]
	pub value: Option<f64>,
	#[serde(default)]
	pub metric: String,
	#[serde(default)]
	pub tags: Option<HashMap<String, String>>,
}
