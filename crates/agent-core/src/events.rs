//! Log filtering and decoding into application events.
//!
//! A filter binds a contract address and a declared ABI event to a
//! transformer. Logs from confirmed blocks are matched on address plus
//! signature topic, decoded with the dynamic ABI decoder and handed to the
//! transformer, which yields zero or more named application events.

use agent_chain::{ChainClient, ChainError};
use agent_types::{EventId, Log};
use alloy_dyn_abi::{DynSolValue, EventExt};
use alloy_json_abi::Event as AbiEvent;
use alloy_primitives::Address;
use serde_json::Value;

type Transformer = Box<dyn Fn(&Log, &Value) -> Vec<(String, Value)> + Send + Sync>;

/// Matches logs of one contract event and maps them to application events.
pub struct EventFilter {
	contract: Address,
	event: AbiEvent,
	transformer: Transformer,
}

impl EventFilter {
	/// Creates a filter with a custom transformer.
	///
	/// The transformer receives the raw log and the decoded parameters as a
	/// JSON object keyed by parameter name, and returns the
	/// `(event_name, payload)` pairs to deliver.
	pub fn new(
		contract: Address,
		event: AbiEvent,
		transformer: impl Fn(&Log, &Value) -> Vec<(String, Value)> + Send + Sync + 'static,
	) -> Self {
		Self {
			contract,
			event,
			transformer: Box::new(transformer),
		}
	}

	/// Creates a filter that forwards the decoded parameters unchanged under
	/// a fixed application event name.
	pub fn renamed(contract: Address, event: AbiEvent, name: impl Into<String>) -> Self {
		let name = name.into();
		Self::new(contract, event, move |_, decoded| {
			vec![(name.clone(), decoded.clone())]
		})
	}

	fn matches(&self, log: &Log) -> bool {
		log.address == self.contract && log.topics.first() == Some(&self.event.selector())
	}

	/// Applies the filter to one log. Non-matching logs produce nothing;
	/// matching logs that fail to decode are dropped with a warning, since a
	/// signature collision on a foreign contract layout is not fatal.
	fn apply(&self, log: &Log) -> Vec<(String, Value)> {
		if !self.matches(log) {
			return Vec::new();
		}
		let decoded = match self
			.event
			.decode_log_parts(log.topics.iter().copied(), &log.data, true)
		{
			Ok(decoded) => decoded,
			Err(error) => {
				tracing::warn!(
					contract = %self.contract,
					event = %self.event.name,
					%error,
					"matching log failed to decode"
				);
				return Vec::new();
			}
		};

		let mut indexed = decoded.indexed.into_iter();
		let mut body = decoded.body.into_iter();
		let mut params = serde_json::Map::new();
		for (position, input) in self.event.inputs.iter().enumerate() {
			let Some(value) = (if input.indexed {
				indexed.next()
			} else {
				body.next()
			}) else {
				break;
			};
			let key = if input.name.is_empty() {
				format!("arg{}", position)
			} else {
				input.name.clone()
			};
			params.insert(key, dyn_value_to_json(&value));
		}

		(self.transformer)(log, &Value::Object(params))
	}
}

/// Runs every filter against `log`, concatenating the produced events.
pub(crate) fn log_events(filters: &[EventFilter], log: &Log) -> Vec<(String, Value)> {
	filters.iter().flat_map(|filter| filter.apply(log)).collect()
}

/// JSON rendering of decoded ABI values.
///
/// Numbers are rendered as decimal strings so 256-bit values survive JSON
/// round-trips; byte values as 0x-prefixed hex.
fn dyn_value_to_json(value: &DynSolValue) -> Value {
	match value {
		DynSolValue::Bool(b) => Value::Bool(*b),
		DynSolValue::Int(i, _) => Value::String(i.to_string()),
		DynSolValue::Uint(u, _) => Value::String(u.to_string()),
		DynSolValue::Address(a) => Value::String(a.to_string()),
		DynSolValue::Function(f) => Value::String(format!("0x{}", hex::encode(f.as_slice()))),
		DynSolValue::FixedBytes(word, size) => {
			Value::String(format!("0x{}", hex::encode(&word[..*size])))
		}
		DynSolValue::Bytes(bytes) => Value::String(format!("0x{}", hex::encode(bytes))),
		DynSolValue::String(s) => Value::String(s.clone()),
		DynSolValue::Array(items) | DynSolValue::FixedArray(items) | DynSolValue::Tuple(items) => {
			Value::Array(items.iter().map(dyn_value_to_json).collect())
		}
		_ => Value::Null,
	}
}

/// True when event `a` happened strictly before event `b`.
///
/// Checkpoint ids usually carry block hashes, so both blocks are resolved to
/// numbers through the chain before the `(block, log index)` comparison.
pub async fn is_before(
	chain: &dyn ChainClient,
	a: &EventId,
	b: &EventId,
) -> Result<bool, ChainError> {
	let (block_a, block_b) =
		futures::try_join!(chain.get_block(a.block()), chain.get_block(b.block()))?;
	Ok((block_a.number, a.log_index()) < (block_b.number, b.log_index()))
}

/// True when event `a` happened strictly after event `b`.
pub async fn is_after(
	chain: &dyn ChainClient,
	a: &EventId,
	b: &EventId,
) -> Result<bool, ChainError> {
	is_before(chain, b, a).await
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::{hash, EventChain};
	use agent_types::BlockRef;
	use alloy_primitives::{B256, U256};
	use serde_json::json;
	use std::sync::Arc;

	fn transfer_event() -> AbiEvent {
		AbiEvent::parse("event Transfer(address indexed from, address indexed to, uint256 value)")
			.unwrap()
	}

	fn transfer_log(contract: Address, from: Address, to: Address, value: u64) -> Log {
		let event = transfer_event();
		Log {
			address: contract,
			topics: vec![event.selector(), from.into_word(), to.into_word()],
			data: B256::from(U256::from(value)).0.to_vec().into(),
			block_hash: B256::repeat_byte(0x01),
			log_index: 0,
		}
	}

	#[test]
	fn decodes_matching_logs_into_named_parameters() {
		let contract = Address::repeat_byte(0xaa);
		let from = Address::repeat_byte(0x01);
		let to = Address::repeat_byte(0x02);
		let filter = EventFilter::renamed(contract, transfer_event(), "transfer");

		let events = filter.apply(&transfer_log(contract, from, to, 27));
		assert_eq!(events.len(), 1);
		let (name, data) = &events[0];
		assert_eq!(name, "transfer");
		assert_eq!(
			*data,
			json!({
				"from": from.to_string(),
				"to": to.to_string(),
				"value": "27",
			})
		);
	}

	#[test]
	fn ignores_logs_from_other_contracts_or_events() {
		let contract = Address::repeat_byte(0xaa);
		let from = Address::repeat_byte(0x01);
		let filter = EventFilter::renamed(contract, transfer_event(), "transfer");

		let foreign = transfer_log(Address::repeat_byte(0xbb), from, from, 1);
		assert!(filter.apply(&foreign).is_empty());

		let mut wrong_topic = transfer_log(contract, from, from, 1);
		wrong_topic.topics[0] = B256::repeat_byte(0xff);
		assert!(filter.apply(&wrong_topic).is_empty());
	}

	#[test]
	fn transformer_can_fan_out_multiple_events() {
		let contract = Address::repeat_byte(0xaa);
		let from = Address::repeat_byte(0x01);
		let filter = EventFilter::new(contract, transfer_event(), |_, decoded| {
			vec![
				("sent".to_string(), decoded["from"].clone()),
				("received".to_string(), decoded["to"].clone()),
			]
		});

		let events = filter.apply(&transfer_log(contract, from, from, 1));
		assert_eq!(events.len(), 2);
		assert_eq!(events[0].0, "sent");
		assert_eq!(events[1].0, "received");
	}

	#[tokio::test]
	async fn orders_event_ids_across_blocks_and_within_a_block() {
		let chain = Arc::new(EventChain::new(Address::repeat_byte(0xaa)));
		let early = EventId::new(hash(3), 1);
		let late = EventId::new(hash(5), 0);
		let sibling = EventId::new(BlockRef::Number(3), 2);

		assert!(is_before(chain.as_ref(), &early, &late).await.unwrap());
		assert!(!is_before(chain.as_ref(), &late, &early).await.unwrap());
		assert!(is_after(chain.as_ref(), &late, &early).await.unwrap());

		// Same block: the log index breaks the tie.
		assert!(is_before(chain.as_ref(), &early, &sibling).await.unwrap());
		assert!(!is_before(chain.as_ref(), &early, &early).await.unwrap());
	}
}
