//! Confirmed-block tracking over a stream of latest-block notifications.

use crate::{ChainClient, ChainError};
use agent_types::{Block, BlockRef};
use futures::future::try_join_all;
use std::sync::{Arc, Mutex};

type BlockListener = Arc<dyn Fn(&Block) + Send + Sync>;

struct TrackerState {
	/// Highest confirmed block published so far. Only ever increases.
	head: Option<Block>,
	listeners: Vec<BlockListener>,
}

/// Converts "latest known block number" notifications into a stream of
/// confirmed blocks.
///
/// A block is confirmed once it has `confirm_depth` descendants. Publication
/// is monotonic, gap-free and exactly-once: every confirmed block reaches
/// every listener exactly once, in strictly increasing block-number order,
/// regardless of how the asynchronous block fetches interleave.
pub struct BlockTracker {
	chain: Arc<dyn ChainClient>,
	confirm_depth: u64,
	state: Mutex<TrackerState>,
}

impl BlockTracker {
	/// Creates an uninitialized tracker; the first injection establishes the
	/// confirmed head.
	pub fn new(chain: Arc<dyn ChainClient>, confirm_depth: u64) -> Self {
		Self {
			chain,
			confirm_depth,
			state: Mutex::new(TrackerState {
				head: None,
				listeners: Vec::new(),
			}),
		}
	}

	/// Registers a durable listener; all listeners receive every confirmed
	/// block. Listeners run on the injecting task and must not block.
	pub fn on_confirmed_block(&self, listener: impl Fn(&Block) + Send + Sync + 'static) {
		self.state
			.lock()
			.expect("tracker lock poisoned")
			.listeners
			.push(Arc::new(listener));
	}

	/// The number of the highest confirmed block published so far.
	pub fn head_number(&self) -> Option<u64> {
		self.state
			.lock()
			.expect("tracker lock poisoned")
			.head
			.as_ref()
			.map(|block| block.number)
	}

	/// Injects a latest-known block number observed on the chain.
	///
	/// Fails with [`ChainError::ConfirmDepthTooShallow`] when the injected
	/// number is not past the confirmed head, which means the confirmation
	/// window cannot uphold its ordering guarantee.
	pub async fn inject(&self, latest: u64) -> Result<(), ChainError> {
		let head = self
			.state
			.lock()
			.expect("tracker lock poisoned")
			.head
			.as_ref()
			.map(|block| block.number);

		// The ordering assertion comes first: a latest not past the head is a
		// violation even when it is also too shallow to confirm anything.
		if let Some(head) = head {
			if latest <= head {
				return Err(ChainError::ConfirmDepthTooShallow { latest, head });
			}
		}

		let Some(candidate) = latest.checked_sub(self.confirm_depth) else {
			// The chain is younger than the confirmation window.
			tracing::debug!(latest, "no block deep enough to confirm yet");
			return Ok(());
		};

		match head {
			None => {
				let block = self.chain.get_block(&BlockRef::Number(candidate)).await?;
				self.publish(vec![block]);
			}
			Some(head) => {
				if candidate > head {
					let fetches = (head + 1..=candidate).map(|number| async move {
						self.chain.get_block(&BlockRef::Number(number)).await
					});
					self.publish(try_join_all(fetches).await?);
				}
			}
		}
		Ok(())
	}

	/// Publishes a batch of freshly confirmed blocks, in increasing order.
	///
	/// The head may have advanced between the snapshot taken by `inject` and
	/// the fetches completing, so the batch is re-filtered against the
	/// current head under the lock. Listener delivery happens under the same
	/// lock, which is what makes the ordering guarantee hold when injections
	/// race.
	fn publish(&self, blocks: Vec<Block>) {
		let mut state = self.state.lock().expect("tracker lock poisoned");
		let confirmed: Vec<Block> = blocks
			.into_iter()
			.filter(|block| match &state.head {
				Some(head) => block.number > head.number,
				None => true,
			})
			.collect();
		if let Some(newest) = confirmed.last() {
			state.head = Some(newest.clone());
			for block in &confirmed {
				tracing::debug!(block = block.number, "block confirmed");
				for listener in &state.listeners {
					listener(block);
				}
			}
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use agent_types::TransactionReceipt;
	use alloy_primitives::{Address, B256, U256};
	use async_trait::async_trait;
	use std::collections::HashMap;
	use std::time::Duration;

	/// Synthesizes blocks on demand, with an optional one-shot fetch latency
	/// per block number (consumed by the first fetch that sees it).
	struct FakeChain {
		delays: Mutex<HashMap<u64, Duration>>,
	}

	impl FakeChain {
		fn new() -> Self {
			Self {
				delays: Mutex::new(HashMap::new()),
			}
		}

		fn with_delay(self, number: u64, delay: Duration) -> Self {
			self.delays.lock().unwrap().insert(number, delay);
			self
		}

		fn block(number: u64) -> Block {
			Block {
				number,
				hash: B256::from(U256::from(number)),
				transactions: Vec::new(),
			}
		}
	}

	#[async_trait]
	impl ChainClient for FakeChain {
		async fn get_block(&self, block: &BlockRef) -> Result<Block, ChainError> {
			match block {
				BlockRef::Number(number) => {
					let delay = self.delays.lock().unwrap().remove(number);
					if let Some(delay) = delay {
						tokio::time::sleep(delay).await;
					}
					Ok(Self::block(*number))
				}
				BlockRef::Hash(_) => Err(ChainError::BlockNotFound(block.clone())),
			}
		}

		async fn get_transaction_receipt(
			&self,
			_hash: &B256,
		) -> Result<Option<TransactionReceipt>, ChainError> {
			Ok(None)
		}

		async fn get_transaction_count(&self, _address: Address) -> Result<u64, ChainError> {
			Ok(0)
		}

		async fn send_raw_transaction(&self, _raw: &[u8]) -> Result<B256, ChainError> {
			Err(ChainError::Broadcast("read-only chain".to_string()))
		}

		async fn get_block_number(&self) -> Result<u64, ChainError> {
			Ok(0)
		}
	}

	fn collecting_tracker(chain: FakeChain, depth: u64) -> (Arc<BlockTracker>, Arc<Mutex<Vec<u64>>>) {
		let tracker = Arc::new(BlockTracker::new(Arc::new(chain), depth));
		let published = Arc::new(Mutex::new(Vec::new()));
		let sink = published.clone();
		tracker.on_confirmed_block(move |block| {
			sink.lock().unwrap().push(block.number);
		});
		(tracker, published)
	}

	#[tokio::test]
	async fn publishes_candidate_then_catches_up_in_order() {
		let (tracker, published) = collecting_tracker(FakeChain::new(), 2);

		tracker.inject(10).await.unwrap();
		assert_eq!(*published.lock().unwrap(), vec![8]);

		tracker.inject(11).await.unwrap();
		assert_eq!(*published.lock().unwrap(), vec![8, 9]);

		tracker.inject(15).await.unwrap();
		assert_eq!(*published.lock().unwrap(), vec![8, 9, 10, 11, 12, 13]);
		assert_eq!(tracker.head_number(), Some(13));
	}

	#[tokio::test]
	async fn rejects_latest_not_past_head() {
		let (tracker, _) = collecting_tracker(FakeChain::new(), 2);

		tracker.inject(10).await.unwrap();
		let violation = tracker.inject(8).await.unwrap_err();
		assert!(matches!(
			violation,
			ChainError::ConfirmDepthTooShallow { latest: 8, head: 8 }
		));
	}

	#[tokio::test]
	async fn rejects_latest_behind_head_even_when_shallower_than_the_window() {
		let (tracker, published) = collecting_tracker(FakeChain::new(), 5);

		tracker.inject(10).await.unwrap();
		assert_eq!(*published.lock().unwrap(), vec![5]);

		// 4 underflows the confirmation window, but it is also behind the
		// head, and that must stay fatal rather than a silent skip.
		let violation = tracker.inject(4).await.unwrap_err();
		assert!(matches!(
			violation,
			ChainError::ConfirmDepthTooShallow { latest: 4, head: 5 }
		));
	}

	#[tokio::test]
	async fn skips_injections_shallower_than_the_window() {
		let (tracker, published) = collecting_tracker(FakeChain::new(), 6);

		tracker.inject(4).await.unwrap();
		assert!(published.lock().unwrap().is_empty());
		assert_eq!(tracker.head_number(), None);
	}

	#[tokio::test(start_paused = true)]
	async fn racing_injections_never_duplicate_or_reorder() {
		// The slow fetch of block 9 lets a later injection publish 9..=11
		// first; the slow batch must then be filtered out entirely.
		let chain = FakeChain::new().with_delay(9, Duration::from_millis(100));
		let (tracker, published) = collecting_tracker(chain, 2);

		tracker.inject(10).await.unwrap();

		let slow = tracker.inject(11); // candidate 9, slow fetch
		let fast = tracker.inject(13); // candidate 11, fast fetch
		let (slow, fast) = tokio::join!(slow, fast);
		slow.unwrap();
		fast.unwrap();

		assert_eq!(*published.lock().unwrap(), vec![8, 9, 10, 11]);
		assert_eq!(tracker.head_number(), Some(11));
	}
}
