//! Chain data types as seen by the agent.
//!
//! These are deliberately reduced views of what the node returns: the
//! confirmation tracker and the log pipeline only need block numbers, hashes,
//! transaction lists and logs. The full RPC shapes stay inside the chain
//! client implementation.

use alloy_primitives::{Address, Bytes, B256};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Reference to a block, either by number or by hash.
///
/// Event checkpoints carry block hashes; the confirmation tracker works with
/// numbers. Both resolve to the same block through the chain client.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum BlockRef {
	/// Block height.
	Number(u64),
	/// Block hash.
	Hash(B256),
}

impl fmt::Display for BlockRef {
	fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
		match self {
			BlockRef::Number(n) => write!(f, "{}", n),
			BlockRef::Hash(h) => write!(f, "{}", h),
		}
	}
}

impl FromStr for BlockRef {
	type Err = String;

	fn from_str(s: &str) -> Result<Self, Self::Err> {
		if s.starts_with("0x") {
			let hash: B256 = s
				.parse()
				.map_err(|e| format!("invalid block hash '{}': {}", s, e))?;
			Ok(BlockRef::Hash(hash))
		} else {
			let number: u64 = s
				.parse()
				.map_err(|e| format!("invalid block number '{}': {}", s, e))?;
			Ok(BlockRef::Number(number))
		}
	}
}

impl From<u64> for BlockRef {
	fn from(number: u64) -> Self {
		BlockRef::Number(number)
	}
}

impl From<B256> for BlockRef {
	fn from(hash: B256) -> Self {
		BlockRef::Hash(hash)
	}
}

/// A chain block reduced to what the agent consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
	/// Block height.
	pub number: u64,
	/// Block hash.
	pub hash: B256,
	/// Hashes of the transactions included in the block, in block order.
	pub transactions: Vec<B256>,
}

/// A transaction receipt reduced to what the agent consumes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransactionReceipt {
	/// Hash of the transaction this receipt belongs to.
	pub transaction_hash: B256,
	/// Hash of the block the transaction landed in.
	pub block_hash: B256,
	/// Height of the block the transaction landed in.
	pub block_number: u64,
	/// Whether the transaction succeeded.
	pub success: bool,
	/// Logs emitted by the transaction.
	pub logs: Vec<Log>,
}

/// A single log entry emitted by a contract.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Log {
	/// Address of the emitting contract.
	pub address: Address,
	/// Log topics; the first topic is the event signature hash.
	pub topics: Vec<B256>,
	/// ABI-encoded non-indexed event data.
	pub data: Bytes,
	/// Hash of the block containing the log.
	pub block_hash: B256,
	/// Position of the log within its block.
	pub log_index: u64,
}
