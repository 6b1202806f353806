//! Application events and their total-order checkpoint tokens.
//!
//! Every event delivered to a client carries an [`EventId`] encoding the
//! position of its originating log as `(block, log index)`. Clients store the
//! id of the last event they processed and hand it back on reconnect to
//! resume the stream from that point.

use crate::chain::BlockRef;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;
use thiserror::Error;

/// Errors produced when decoding an event id token.
#[derive(Debug, Error)]
pub enum EventIdError {
	/// The token did not have the expected `block,logIndex` shape.
	#[error("malformed event id '{0}'")]
	Malformed(String),
	/// The block part of the token could not be parsed.
	#[error("invalid block reference in event id: {0}")]
	Block(String),
	/// The log index part of the token could not be parsed.
	#[error("invalid log index in event id: {0}")]
	LogIndex(String),
}

/// Total-order position of a log, serialized as `"<block>,<logIndex>"`.
///
/// The block part is usually a block hash, so ordering two ids requires
/// resolving both blocks to their numbers through the chain client. The token
/// itself is opaque to clients.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct EventId {
	block: BlockRef,
	log_index: u64,
}

impl EventId {
	/// Creates an id from a block reference and a log index.
	pub fn new(block: impl Into<BlockRef>, log_index: u64) -> Self {
		Self {
			block: block.into(),
			log_index,
		}
	}

	/// The block part of the id.
	pub fn block(&self) -> &BlockRef {
		&self.block
	}

	/// The log index part of the id.
	pub fn log_index(&self) -> u64 {
		self.log_index
	}
}

impl fmt::Display for EventId {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		write!(f, "{},{}", self.block, self.log_index)
	}
}

impl FromStr for EventId {
	type Err = EventIdError;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		let (block, log_index) = s
			.split_once(',')
			.ok_or_else(|| EventIdError::Malformed(s.to_string()))?;
		let block: BlockRef = block.parse().map_err(EventIdError::Block)?;
		let log_index: u64 = log_index
			.parse()
			.map_err(|e: std::num::ParseIntError| EventIdError::LogIndex(e.to_string()))?;
		Ok(Self { block, log_index })
	}
}

impl Serialize for EventId {
	fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
	where
		S: Serializer,
	{
		serializer.serialize_str(&self.to_string())
	}
}

impl<'de> Deserialize<'de> for EventId {
	fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
	where
		D: Deserializer<'de>,
	{
		let s = String::deserialize(deserializer)?;
		s.parse().map_err(D::Error::custom)
	}
}

/// The unit delivered to subscribed clients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Event {
	/// Replay checkpoint for this event.
	pub id: EventId,
	/// Application event name clients subscribe to.
	pub event: String,
	/// Transformed payload.
	pub data: Value,
}
