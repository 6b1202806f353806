//! Chain access layer for the agent.
//!
//! This crate owns everything that talks to the node: the [`ChainClient`]
//! trait over the RPC surface the agent consumes, the reconnecting
//! [`Connector`] that keeps a new-block subscription alive, the
//! [`BlockTracker`] that turns raw block notifications into a confirmed-block
//! stream, and the alloy-backed implementations of both transports.

use agent_types::{Block, BlockRef, TransactionReceipt};
use alloy_primitives::{Address, B256};
use async_trait::async_trait;
use futures::future::BoxFuture;
use std::sync::Arc;
use thiserror::Error;

pub mod connector;
pub mod tracker;

/// Re-export implementations
pub mod implementations {
	pub mod alloy;
}

pub use connector::Connector;
pub use tracker::BlockTracker;

/// Errors that can occur while talking to the chain.
#[derive(Debug, Error)]
pub enum ChainError {
	/// A read call failed at the transport or node level.
	#[error("rpc error: {0}")]
	Rpc(String),
	/// The requested block does not exist on the node.
	#[error("block {0} not found")]
	BlockNotFound(BlockRef),
	/// The node rejected a broadcast transaction.
	#[error("broadcast rejected: {0}")]
	Broadcast(String),
	/// The new-block subscription ended or failed.
	#[error("subscription lost: {0}")]
	Subscription(String),
	/// The confirmation window cannot uphold its ordering guarantee.
	///
	/// Seeing a latest block at or below the confirmed head means the
	/// configured depth is too shallow for the chain's production rate.
	/// Not recoverable.
	#[error("confirmation depth too shallow: latest block {latest} is not past confirmed head {head}")]
	ConfirmDepthTooShallow {
		/// The injected latest-known block number.
		latest: u64,
		/// The confirmed head at the time of injection.
		head: u64,
	},
}

impl ChainError {
	/// True when a broadcast was rejected because the transaction carried a
	/// stale or colliding nonce. Nodes report this in the error text.
	pub fn is_nonce_conflict(&self) -> bool {
		matches!(self, ChainError::Broadcast(msg) if msg.to_lowercase().contains("nonce"))
	}
}

/// The chain RPC surface the agent consumes.
///
/// All calls are idempotent reads except [`send_raw_transaction`]
/// (`ChainClient::send_raw_transaction`); the client performs no internal
/// retries. Sharing one client across many concurrent callers is safe.
#[async_trait]
pub trait ChainClient: Send + Sync {
	/// Fetches a block by number or hash.
	async fn get_block(&self, block: &BlockRef) -> Result<Block, ChainError>;

	/// Fetches the receipt for a transaction, `None` if not yet mined.
	async fn get_transaction_receipt(
		&self,
		hash: &B256,
	) -> Result<Option<TransactionReceipt>, ChainError>;

	/// Fetches the account's current transaction count (next nonce).
	async fn get_transaction_count(&self, address: Address) -> Result<u64, ChainError>;

	/// Broadcasts a signed transaction, returning its hash.
	async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, ChainError>;

	/// Fetches the latest block number. Doubles as the liveness ping.
	async fn get_block_number(&self) -> Result<u64, ChainError>;
}

/// One live new-block subscription on a transport.
///
/// A subscription does not survive its transport; when [`next_block`]
/// (`ChainSubscription::next_block`) reports an error the owner must discard
/// it and build a fresh one through the factory.
#[async_trait]
pub trait ChainSubscription: Send {
	/// Waits for the next new-block notification and returns its number.
	async fn next_block(&mut self) -> Result<u64, ChainError>;
}

/// Builds a fresh [`ChainSubscription`], invoked on every (re)connect.
pub type SubscriptionFactory =
	Arc<dyn Fn() -> BoxFuture<'static, Result<Box<dyn ChainSubscription>, ChainError>> + Send + Sync>;
