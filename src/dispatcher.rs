//! Delivers [NormalizedMessage]s to the messaging gateway.
//!
//! Nothing is retried or queued: a failed delivery fails the webhook request
//! and it's up to grafana/alertmanager to send it again.

use std::{path::PathBuf, sync::Arc, time::Duration};

use reqwest::StatusCode;
use serde::Deserialize;
use serde_with::{serde_as, DurationSecondsWithFrac};
use thiserror::Error;
use url::Url;

use crate::{message::NormalizedMessage, metrics};

/// config file options for the messaging gateway
#[serde_as]
#[derive(Debug, Clone, Deserialize)]
pub struct GatewaySettings {
	/// endpoint messages are POSTed to
	pub url: Url,
	/// upper bound for a single delivery
	#[serde_as(as = "DurationSecondsWithFrac<f64>")]
	pub timeout: Duration,
}

/// Operator controlled kill switch. While paused, messages are dropped
/// instead of being sent.
pub trait PauseSwitch: Send + Sync {
	fn is_paused(&self) -> bool;
}

/// pauses delivery while a regular file exists at the given path,
/// directories and dangling symlinks don't count
#[derive(Debug, Clone)]
pub struct MarkerFile(pub PathBuf);

impl PauseSwitch for MarkerFile {
	fn is_paused(&self) -> bool {
		std::fs::metadata(&self.0).map(|meta| meta.is_file()).unwrap_or(false)
	}
}

impl<F> PauseSwitch for F
where
	F: Fn() -> bool + Send + Sync,
{
	fn is_paused(&self) -> bool {
		self()
	}
}

/// Error occuring when dispatching a message
#[derive(Error, Debug)]
pub enum DispatchError {
	/// the http client couldn't be constructed
	#[error("failed to build http client: {0}")]
	Client(#[source] reqwest::Error),
	/// gateway answered with something else than 200
	#[error("unexpected response from messaging gateway ({status}): {body}")]
	DeliveryRejected { status: StatusCode, body: String },
	/// gateway couldn't be reached or didn't answer in time
	#[error("failed to reach messaging gateway: {0}")]
	Transport(#[source] reqwest::Error),
}

impl DispatchError {
	/// short label used in metrics
	pub fn reason(&self) -> &'static str {
		match self {
			DispatchError::Client(_) => "client_error",
			DispatchError::DeliveryRejected { .. } => "rejected",
			DispatchError::Transport(_) => "transport_error",
		}
	}
}

/// successful outcome of [Dispatcher::dispatch]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
	/// the gateway accepted the message
	Sent,
	/// delivery is paused, the message was dropped
	Paused,
}

impl Delivery {
	pub fn as_str(&self) -> &'static str {
		match self {
			Delivery::Sent => "sent",
			Delivery::Paused => "paused",
		}
	}
}

/// sends messages to the messaging gateway
#[derive(Clone)]
pub struct Dispatcher {
	client: reqwest::Client,
	endpoint: Url,
	pause: Arc<dyn PauseSwitch>,
}

impl std::fmt::Debug for Dispatcher {
	fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
		f.debug_struct("Dispatcher").field("endpoint", &self.endpoint.as_str()).finish()
	}
}

impl Dispatcher {
	/// Constructs a dispatcher
	///
	/// # Arguments
	///
	/// * `settings` - gateway endpoint and timeout of a single delivery
	///
	/// * `pause` - checked before every delivery
	pub fn new(settings: &GatewaySettings, pause: Arc<dyn PauseSwitch>) -> Result<Self, DispatchError> {
		let client = reqwest::Client::builder()
			.timeout(settings.timeout)
			.build()
			.map_err(DispatchError::Client)?;

		Ok(Self { client, endpoint: settings.url.clone(), pause })
	}

	/// Sends `msg` to the gateway, unless delivery is paused.
	///
	/// Only a `200 OK` counts as success. Every call results in exactly one
	/// request (or none while paused), identical messages are not deduplicated.
	pub async fn dispatch(&self, msg: &NormalizedMessage) -> Result<Delivery, DispatchError> {
		let result = self.deliver(msg).await;

		let outcome = match &result {
			Ok(delivery) => delivery.as_str(),
			Err(err) => err.reason(),
		};
		metrics::DELIVERIES.with_label_values(&[outcome]).inc();

		result
	}

	async fn deliver(&self, msg: &NormalizedMessage) -> Result<Delivery, DispatchError> {
		if self.pause.is_paused() {
			tracing::info!(recipient = %msg.handle(), "delivery is paused, won't send message");
			return Ok(Delivery::Paused);
		}

		let response = self
			.client
			.post(self.endpoint.clone())
			.json(msg)
			.send()
			.await
			.map_err(DispatchError::Transport)?;

		let status = response.status();
		if status != StatusCode::OK {
			let body = response.text().await.unwrap_or_default();
			tracing::error!(%status, %body, "messaging gateway rejected message");
			return Err(DispatchError::DeliveryRejected { status, body });
		}

		tracing::debug!(recipient = %msg.handle(), bytes = msg.message().len(), "message delivered");
		Ok(Delivery::Sent)
	}
}

#[cfg(test)]
mod tests {
	use std::sync::atomic::{AtomicUsize, Ordering};

	use serde_json::json;
	use wiremock::{
		matchers::{body_json, method, path},
		Mock, MockServer, ResponseTemplate,
	};

	use super::*;
	use crate::message::Handle;

	fn settings(url: &str) -> GatewaySettings {
		GatewaySettings { url: Url::parse(url).unwrap(), timeout: Duration::from_secs(5) }
	}

	fn message() -> NormalizedMessage {
		NormalizedMessage::new(
			String::from("[Disk][firing] full\nhttp://x\n"),
			Handle::new("+15550001111").unwrap(),
		)
	}

	fn never_paused() -> Arc<dyn PauseSwitch> {
		Arc::new(|| false)
	}

	#[tokio::test]
	async fn posts_message_to_gateway() {
		let server = MockServer::start().await;

		Mock::given(method("POST"))
			.and(path("/message"))
			.and(body_json(json!({
				"body": { "message": "[Disk][firing] full\nhttp://x\n" },
				"recipient": { "handle": "+15550001111" }
			})))
			.respond_with(ResponseTemplate::new(200))
			.expect(1)
			.mount(&server)
			.await;

		let dispatcher =
			Dispatcher::new(&settings(&format!("{}/message", server.uri())), never_paused()).unwrap();

		assert_eq!(dispatcher.dispatch(&message()).await.unwrap(), Delivery::Sent);
	}

	#[tokio::test]
	async fn same_message_is_sent_twice() {
		let server = MockServer::start().await;

		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(200))
			.expect(2)
			.mount(&server)
			.await;

		let dispatcher =
			Dispatcher::new(&settings(&format!("{}/message", server.uri())), never_paused()).unwrap();
		let msg = message();

		assert_eq!(dispatcher.dispatch(&msg).await.unwrap(), Delivery::Sent);
		assert_eq!(dispatcher.dispatch(&msg).await.unwrap(), Delivery::Sent);
	}

	#[tokio::test]
	async fn non_200_is_rejected_with_body() {
		let server = MockServer::start().await;

		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(202).set_body_string("queued elsewhere"))
			.mount(&server)
			.await;

		let dispatcher =
			Dispatcher::new(&settings(&format!("{}/message", server.uri())), never_paused()).unwrap();

		match dispatcher.dispatch(&message()).await {
			Err(DispatchError::DeliveryRejected { status, body }) => {
				assert_eq!(status, StatusCode::ACCEPTED);
				assert_eq!(body, "queued elsewhere");
			}
			other => panic!("unexpected result {other:?}"),
		}
	}

	#[tokio::test]
	async fn server_error_is_rejected() {
		let server = MockServer::start().await;

		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(500).set_body_string("imessage not running"))
			.mount(&server)
			.await;

		let dispatcher =
			Dispatcher::new(&settings(&format!("{}/message", server.uri())), never_paused()).unwrap();

		let err = dispatcher.dispatch(&message()).await.unwrap_err();
		assert!(err.to_string().contains("imessage not running"));
	}

	#[tokio::test]
	async fn unreachable_gateway_is_a_transport_error() {
		// grab a free port and close it again so nothing is listening there
		let port = std::net::TcpListener::bind("127.0.0.1:0").unwrap().local_addr().unwrap().port();

		let dispatcher =
			Dispatcher::new(&settings(&format!("http://127.0.0.1:{port}/message")), never_paused())
				.unwrap();

		assert!(matches!(
			dispatcher.dispatch(&message()).await,
			Err(DispatchError::Transport(_))
		));
	}

	#[tokio::test]
	async fn slow_gateway_times_out() {
		let server = MockServer::start().await;

		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(200).set_delay(Duration::from_secs(2)))
			.mount(&server)
			.await;

		let mut settings = settings(&format!("{}/message", server.uri()));
		settings.timeout = Duration::from_millis(200);
		let dispatcher = Dispatcher::new(&settings, never_paused()).unwrap();

		match dispatcher.dispatch(&message()).await {
			Err(DispatchError::Transport(err)) => assert!(err.is_timeout()),
			other => panic!("unexpected result {other:?}"),
		}
	}

	#[tokio::test]
	async fn paused_dispatcher_never_calls_gateway() {
		let server = MockServer::start().await;

		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(200))
			.expect(0)
			.mount(&server)
			.await;

		let checks = Arc::new(AtomicUsize::new(0));
		let pause = {
			let checks = Arc::clone(&checks);
			move || {
				checks.fetch_add(1, Ordering::SeqCst);
				true
			}
		};

		let dispatcher =
			Dispatcher::new(&settings(&format!("{}/message", server.uri())), Arc::new(pause))
				.unwrap();

		for _ in 0..3 {
			assert_eq!(dispatcher.dispatch(&message()).await.unwrap(), Delivery::Paused);
		}
		assert_eq!(checks.load(Ordering::SeqCst), 3);
	}

	#[tokio::test]
	async fn marker_file_toggles_delivery() {
		let server = MockServer::start().await;

		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(200))
			.expect(1)
			.mount(&server)
			.await;

		let dir = tempfile::tempdir().unwrap();
		let marker = dir.path().join("pause");

		let dispatcher = Dispatcher::new(
			&settings(&format!("{}/message", server.uri())),
			Arc::new(MarkerFile(marker.clone())),
		)
		.unwrap();

		std::fs::write(&marker, b"").unwrap();
		assert_eq!(dispatcher.dispatch(&message()).await.unwrap(), Delivery::Paused);

		std::fs::remove_file(&marker).unwrap();
		assert_eq!(dispatcher.dispatch(&message()).await.unwrap(), Delivery::Sent);
	}

	#[tokio::test]
	async fn directory_at_marker_path_does_not_pause() {
		let server = MockServer::start().await;

		Mock::given(method("POST"))
			.respond_with(ResponseTemplate::new(200))
			.expect(1)
			.mount(&server)
			.await;

		let dir = tempfile::tempdir().unwrap();
		let marker = dir.path().join("pause");
		std::fs::create_dir(&marker).unwrap();

		let dispatcher = Dispatcher::new(
			&settings(&format!("{}/message", server.uri())),
			Arc::new(MarkerFile(marker)),
		)
		.unwrap();

		assert_eq!(dispatcher.dispatch(&message()).await.unwrap(), Delivery::Sent);
	}
}
