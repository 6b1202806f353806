//! Alloy-backed chain client and block subscription.
//!
//! Reads and broadcasts go over HTTP; the new-block feed uses a WebSocket
//! subscription so the connector can detect a dead transport quickly. Both
//! map the node's RPC shapes down to the reduced types in `agent-types`.

use crate::{ChainClient, ChainError, ChainSubscription, SubscriptionFactory};
use agent_types::{Block, BlockRef, Log, TransactionReceipt};
use alloy_primitives::{Address, B256};
use alloy_provider::{Provider, ProviderBuilder, WsConnect};
use alloy_pubsub::PubSubFrontend;
use alloy_rpc_types::{BlockNumberOrTag, BlockTransactions, BlockTransactionsKind};
use alloy_transport_http::Http;
use async_trait::async_trait;
use futures::stream::{Stream, StreamExt};
use futures::FutureExt;
use std::pin::Pin;
use std::sync::Arc;

/// HTTP chain client backed by an alloy provider.
///
/// The provider is stateless per call, so one client is safely shared by
/// every concurrent fetch in the process.
pub struct AlloyChain {
	provider: Arc<dyn Provider<Http<reqwest::Client>> + Send + Sync>,
}

impl AlloyChain {
	/// Creates a client for the node at `url`.
	pub fn connect(url: &str) -> Result<Self, ChainError> {
		let url = url
			.parse()
			.map_err(|e| ChainError::Rpc(format!("invalid rpc url '{}': {}", url, e)))?;
		let provider = ProviderBuilder::new().on_http(url);
		Ok(Self {
			provider: Arc::new(provider),
		})
	}

	fn convert_block(block: alloy_rpc_types::Block) -> Block {
		let transactions = match block.transactions {
			BlockTransactions::Hashes(hashes) => hashes,
			BlockTransactions::Full(transactions) => {
				transactions.iter().map(|tx| *tx.inner.tx_hash()).collect()
			}
			BlockTransactions::Uncle => Vec::new(),
		};
		Block {
			number: block.header.number,
			hash: block.header.hash,
			transactions,
		}
	}
}

#[async_trait]
impl ChainClient for AlloyChain {
	async fn get_block(&self, block: &BlockRef) -> Result<Block, ChainError> {
		let fetched = match block {
			BlockRef::Number(number) => {
				self.provider
					.get_block_by_number(
						BlockNumberOrTag::Number(*number),
						BlockTransactionsKind::Hashes,
					)
					.await
			}
			BlockRef::Hash(hash) => {
				self.provider
					.get_block_by_hash(*hash, BlockTransactionsKind::Hashes)
					.await
			}
		}
		.map_err(|e| ChainError::Rpc(e.to_string()))?;

		fetched
			.map(Self::convert_block)
			.ok_or_else(|| ChainError::BlockNotFound(block.clone()))
	}

	async fn get_transaction_receipt(
		&self,
		hash: &B256,
	) -> Result<Option<TransactionReceipt>, ChainError> {
		let receipt = self
			.provider
			.get_transaction_receipt(*hash)
			.await
			.map_err(|e| ChainError::Rpc(e.to_string()))?;

		Ok(receipt.map(|receipt| TransactionReceipt {
			transaction_hash: receipt.transaction_hash,
			block_hash: receipt.block_hash.unwrap_or_default(),
			block_number: receipt.block_number.unwrap_or_default(),
			success: receipt.status(),
			logs: receipt
				.inner
				.logs()
				.iter()
				.map(|log| Log {
					address: log.inner.address,
					topics: log.inner.data.topics().to_vec(),
					data: log.inner.data.data.clone(),
					block_hash: log.block_hash.unwrap_or_default(),
					log_index: log.log_index.unwrap_or_default(),
				})
				.collect(),
		}))
	}

	async fn get_transaction_count(&self, address: Address) -> Result<u64, ChainError> {
		self.provider
			.get_transaction_count(address)
			.await
			.map_err(|e| ChainError::Rpc(e.to_string()))
	}

	async fn send_raw_transaction(&self, raw: &[u8]) -> Result<B256, ChainError> {
		let pending = self
			.provider
			.send_raw_transaction(raw)
			.await
			.map_err(|e| ChainError::Broadcast(e.to_string()))?;
		Ok(*pending.tx_hash())
	}

	async fn get_block_number(&self) -> Result<u64, ChainError> {
		self.provider
			.get_block_number()
			.await
			.map_err(|e| ChainError::Rpc(e.to_string()))
	}
}

/// One live WebSocket new-block subscription.
pub struct AlloyBlockSubscription {
	// Keeps the pubsub frontend alive for as long as the stream is polled.
	_provider: Arc<dyn Provider<PubSubFrontend> + Send + Sync>,
	headers: Pin<Box<dyn Stream<Item = alloy_rpc_types::Header> + Send>>,
}

impl AlloyBlockSubscription {
	/// Dials `url` and subscribes to new block headers.
	pub async fn connect(url: String) -> Result<Box<dyn ChainSubscription>, ChainError> {
		let provider = ProviderBuilder::new()
			.on_ws(WsConnect::new(url))
			.await
			.map_err(|e| ChainError::Subscription(e.to_string()))?;
		let subscription = provider
			.subscribe_blocks()
			.await
			.map_err(|e| ChainError::Subscription(e.to_string()))?;
		Ok(Box::new(Self {
			headers: Box::pin(subscription.into_stream()),
			_provider: Arc::new(provider),
		}))
	}
}

#[async_trait]
impl ChainSubscription for AlloyBlockSubscription {
	async fn next_block(&mut self) -> Result<u64, ChainError> {
		self.headers
			.next()
			.await
			.map(|header| header.number)
			.ok_or_else(|| ChainError::Subscription("header stream ended".to_string()))
	}
}

/// Builds the factory the connector uses to (re)establish the WebSocket
/// subscription after every drop.
pub fn ws_subscription_factory(url: String) -> SubscriptionFactory {
	Arc::new(move || {
		let url = url.clone();
		AlloyBlockSubscription::connect(url).boxed()
	})
}
