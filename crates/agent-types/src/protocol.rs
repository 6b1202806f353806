//! Wire protocol types for client connections.
//!
//! Clients talk to the agent over a persistent message-based connection
//! carrying JSON text frames. Requests are a tagged union on the `type`
//! field; replies share a uniform `{error, data}` shape.

use crate::event::EventId;
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// A request received from a client connection.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum Request {
	/// Invoke a named command with JSON arguments.
	ActionRequest {
		/// Name of the registered action.
		command: String,
		/// Positional JSON arguments.
		arguments: Vec<Value>,
	},
	/// Register for event delivery, optionally replaying from a checkpoint.
	EventsRequest {
		/// Event names the connection wants to receive.
		events: Vec<String>,
		/// Checkpoint of the last event the client has seen, if any.
		#[serde(default, rename = "lastEventId")]
		last_event_id: Option<EventId>,
	},
}

/// Uniform reply shape for action results and subscription acks.
///
/// Exactly one of `error` and `data` is meaningful: a success carries
/// `error: null`, a failure carries `data: null`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CallResult {
	/// Error message, or `null` on success.
	pub error: Option<String>,
	/// Result payload, or `null` on failure.
	pub data: Value,
}

impl CallResult {
	/// Builds a successful result wrapping `data`.
	pub fn ok(data: impl Into<Value>) -> Self {
		Self {
			error: None,
			data: data.into(),
		}
	}

	/// Builds a failed result carrying `error`.
	pub fn err(error: impl Into<String>) -> Self {
		Self {
			error: Some(error.into()),
			data: Value::Null,
		}
	}
}
