//! Transaction types for the nonce-serialized dispatch pipeline.
//!
//! A [`RawTransactionRequest`] is an unsigned transaction intent: everything a
//! caller knows about the transaction except its sequence number. The nonce is
//! assigned by the dispatcher at signing time, producing a
//! [`SignedTransaction`] that is never mutated afterwards.

use alloy_primitives::{Address, Bytes, B256, U256};
use serde::{Deserialize, Serialize};

/// An unsigned transaction intent, missing nonce and signature.
///
/// Immutable once submitted to a dispatcher.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RawTransactionRequest {
	/// Recipient address; `None` deploys a contract.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub to: Option<Address>,
	/// Call data.
	#[serde(default, skip_serializing_if = "Option::is_none")]
	pub data: Option<Bytes>,
	/// Value transferred in wei.
	#[serde(default)]
	pub value: U256,
	/// Gas price in wei.
	pub gas_price: u128,
	/// Gas limit.
	pub gas_limit: u64,
}

/// A signed, RLP-encoded transaction produced by a dispatcher.
///
/// The raw bytes are what gets broadcast; the hash identifies the transaction
/// for receipt correlation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SignedTransaction {
	/// The nonce the transaction was signed with.
	pub nonce: u64,
	/// Transaction hash of the signed envelope.
	pub hash: B256,
	/// Encoded bytes ready for broadcast.
	pub raw: Bytes,
}
