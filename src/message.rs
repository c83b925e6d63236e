//! The message we hand to the messaging gateway. It's the only thing the
//! [dispatcher](crate::dispatcher) knows about, all alert schemas are
//! normalized into it by the [normalizer](crate::normalizer).

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Error occuring when constructing a [Handle]
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum HandleError {
	/// the handle was empty or only consisted of whitespace
	#[error("recipient handle must not be empty")]
	Empty,
}

/// identifier of the delivery target (phone number, mail address, ...).
/// Never empty.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[serde(try_from = "String", into = "String")]
pub struct Handle(String);

impl Handle {
	/// Tries constructing a [Handle]. Surrounding whitespace is stripped.
	pub fn new(handle: impl Into<String>) -> Result<Self, HandleError> {
		let handle = handle.into();
		let trimmed = handle.trim();

		if trimmed.is_empty() {
			return Err(HandleError::Empty);
		}

		if trimmed.len() == handle.len() {
			Ok(Self(handle))
		} else {
			Ok(Self(trimmed.to_owned()))
		}
	}

	pub fn as_str(&self) -> &str {
		self.0.as_str()
	}
}

impl TryFrom<String> for Handle {
	type Error = HandleError;

	fn try_from(handle: String) -> Result<Self, Self::Error> {
		Self::new(handle)
	}
}

impl From<Handle> for String {
	fn from(handle: Handle) -> Self {
		handle.0
	}
}

impl fmt::Display for Handle {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		f.write_str(&self.0)
	}
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[allow(clippy::missing_docs_in_private_items)]
pub struct Body {
	pub message: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
#[allow(clippy::missing_docs_in_private_items)]
pub struct Recipient {
	pub handle: Handle,
}

/// Normalized alert notification, serializes to
/// `{"body": {"message": ...}, "recipient": {"handle": ...}}`
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct NormalizedMessage {
	/// the rendered alert text
	pub body: Body,
	/// who should receive the message
	pub recipient: Recipient,
}

impl NormalizedMessage {
	/// construct message for recipient
	pub fn new(message: String, handle: Handle) -> Self {
		Self { body: Body { message }, recipient: Recipient { handle } }
	}

	pub fn message(&self) -> &str {
		self.body.message.as_str()
	}

	pub fn handle(&self) -> &Handle {
		&self.recipient.handle
	}
}
