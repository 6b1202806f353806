//! The agent orchestrator.
//!
//! [`Agent`] wires the chain access layer, the per-key nonce dispatchers and
//! the client-facing server into one unit. Confirmed blocks flow through a
//! single serial queue that linearizes live event emission with
//! replay-from-checkpoint, so a client resuming from an old checkpoint sees
//! every event exactly once and in order before being handed to the live
//! stream.

use agent_account::TransactionSigner;
use agent_chain::{BlockTracker, ChainClient, ChainError, Connector, SubscriptionFactory};
use agent_nonce::{NonceDispatcher, NonceError};
use agent_sync::{EventBus, SerialQueue};
use agent_types::{
	Block, CallResult, Event, EventId, RawTransactionRequest, TransactionReceipt,
};
use alloy_primitives::Address;
use futures::future::{try_join_all, BoxFuture};
use futures::FutureExt;
use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use thiserror::Error;
use tokio::sync::{mpsc, watch};

pub mod events;
mod replay;
pub mod server;

pub use events::{is_after, is_before, EventFilter};
pub use server::serve;
use server::{ClientHandle, OutboundFrame};

/// Errors surfaced by agent operations.
#[derive(Debug, Error)]
pub enum AgentError {
	/// A chain call failed.
	#[error("chain error: {0}")]
	Chain(#[from] ChainError),
	/// Transaction dispatch failed.
	#[error("transaction dispatch failed: {0}")]
	Nonce(#[from] NonceError),
	/// No dispatcher is configured for the requested sender.
	#[error("no signer registered for {0}")]
	UnknownSigner(Address),
	/// The agent shut down while an operation was pending.
	#[error("agent shut down")]
	Closed,
	/// The server socket failed.
	#[error(transparent)]
	Io(#[from] std::io::Error),
}

type ActionHandler =
	Arc<dyn Fn(Vec<serde_json::Value>) -> BoxFuture<'static, Result<serde_json::Value, String>> + Send + Sync>;

pub(crate) struct AgentInner {
	pub(crate) chain: Arc<dyn ChainClient>,
	pub(crate) connector: Connector,
	pub(crate) tracker: Arc<BlockTracker>,
	pub(crate) dispatchers: HashMap<Address, NonceDispatcher>,
	pub(crate) actions: RwLock<HashMap<String, ActionHandler>>,
	pub(crate) filters: RwLock<Vec<EventFilter>>,
	/// Event name to the handles of connections subscribed to it.
	pub(crate) subscribers: Mutex<HashMap<String, Vec<ClientHandle>>>,
	/// Receipt correlation, keyed by transaction hash.
	pub(crate) receipts: EventBus<TransactionReceipt>,
	/// Linearizes live emission and replay walks.
	pub(crate) queue: SerialQueue,
	/// Confirmed head as of queue processing; replay waits on this.
	pub(crate) head: watch::Sender<Option<u64>>,
	next_client_id: AtomicU64,
}

/// The chain agent: confirmed-event delivery, replay, actions and
/// nonce-managed transaction submission behind one handle.
#[derive(Clone)]
pub struct Agent {
	pub(crate) inner: Arc<AgentInner>,
}

impl Agent {
	/// Builds an agent over `chain`, confirming blocks at `confirm_depth`
	/// and dispatching transactions for each of `signers`.
	///
	/// Must be called from within a tokio runtime.
	pub fn new(
		chain: Arc<dyn ChainClient>,
		confirm_depth: u64,
		signers: Vec<Arc<dyn TransactionSigner>>,
	) -> Self {
		let dispatchers = signers
			.into_iter()
			.map(|signer| {
				let address = signer.address();
				(address, NonceDispatcher::new(chain.clone(), signer))
			})
			.collect();
		let (head, _) = watch::channel(None);

		let inner = Arc::new(AgentInner {
			tracker: Arc::new(BlockTracker::new(chain.clone(), confirm_depth)),
			chain,
			connector: Connector::new(),
			dispatchers,
			actions: RwLock::new(HashMap::new()),
			filters: RwLock::new(Vec::new()),
			subscribers: Mutex::new(HashMap::new()),
			receipts: EventBus::new(|receipt: &TransactionReceipt| {
				receipt.transaction_hash.to_string()
			}),
			queue: SerialQueue::new(),
			head,
			next_client_id: AtomicU64::new(0),
		});
		Self::wire(&inner);
		Self { inner }
	}

	/// Registers the confirmed-block listeners: one feeding the serialized
	/// event pipeline, one correlating receipts for pending sends.
	fn wire(inner: &Arc<AgentInner>) {
		let publisher = inner.clone();
		inner.tracker.on_confirmed_block(move |block| {
			let inner = publisher.clone();
			let block = block.clone();
			let _ = publisher.queue.push(async move {
				inner.publish_block(block).await;
			});
		});

		let correlator = inner.clone();
		inner.tracker.on_confirmed_block(move |block| {
			let inner = correlator.clone();
			let block = block.clone();
			tokio::spawn(async move {
				match inner.block_receipts(&block).await {
					Ok(receipts) => {
						for receipt in receipts {
							inner.receipts.trigger(receipt);
						}
					}
					Err(error) => {
						tracing::warn!(block = block.number, %error, "receipt correlation failed");
					}
				}
			});
		});
	}

	/// Connects the upstream block feed and starts confirming blocks.
	///
	/// The connector keeps the subscription alive indefinitely; an injection
	/// rejected by the tracker means the confirmation depth cannot hold its
	/// ordering guarantee and is logged as an error.
	pub fn start(&self, factory: SubscriptionFactory) {
		let inner = self.inner.clone();
		self.inner.connector.on_new_block(move |number| {
			let inner = inner.clone();
			tokio::spawn(async move {
				if let Err(error) = inner.tracker.inject(number).await {
					tracing::error!(%error, "confirmed-block feed failed");
				}
			});
		});
		self.inner
			.connector
			.connect(self.inner.chain.clone(), factory);
	}

	/// Registers a named action invokable by clients.
	pub fn set_action<F, Fut>(&self, name: impl Into<String>, handler: F)
	where
		F: Fn(Vec<serde_json::Value>) -> Fut + Send + Sync + 'static,
		Fut: Future<Output = Result<serde_json::Value, String>> + Send + 'static,
	{
		let handler: ActionHandler = Arc::new(move |arguments| handler(arguments).boxed());
		self.inner
			.actions
			.write()
			.expect("agent lock poisoned")
			.insert(name.into(), handler);
	}

	/// Registers a log filter producing application events from confirmed
	/// blocks.
	pub fn set_log_transformer(&self, filter: EventFilter) {
		self.inner
			.filters
			.write()
			.expect("agent lock poisoned")
			.push(filter);
	}

	/// Invokes a registered action, wrapping the outcome in the uniform
	/// result shape.
	pub async fn exec(&self, command: &str, arguments: Vec<serde_json::Value>) -> CallResult {
		let handler = self
			.inner
			.actions
			.read()
			.expect("agent lock poisoned")
			.get(command)
			.cloned();
		match handler {
			Some(handler) => match handler(arguments).await {
				Ok(data) => CallResult::ok(data),
				Err(error) => CallResult::err(error),
			},
			None => CallResult::err(format!("action '{}' not found", command)),
		}
	}

	/// Delivers an event to the connections currently subscribed to its
	/// name. Used by action handlers to push synthetic events.
	pub fn emit(&self, event: Event) {
		self.inner.deliver(&event);
	}

	/// Submits a transaction from `from` and waits for its confirmed
	/// receipt.
	///
	/// Resolution takes at least the confirmation depth: the receipt is
	/// correlated on the confirmed-block stream, not fetched eagerly.
	pub async fn send(
		&self,
		from: Address,
		request: RawTransactionRequest,
	) -> Result<TransactionReceipt, AgentError> {
		let dispatcher = self
			.inner
			.dispatchers
			.get(&from)
			.ok_or(AgentError::UnknownSigner(from))?;
		let tx = dispatcher.send(request).await?;
		let receipt = self.inner.receipts.wait_for(tx.hash.to_string());
		receipt.await.map_err(|_| AgentError::Closed)
	}

	/// Handles a client subscription request.
	///
	/// Without a checkpoint the connection is (re)registered for the given
	/// names immediately. With one, delivery starts from the checkpoint:
	/// missed events are replayed in order through the serial queue and the
	/// connection switches to live registration when the walk catches up
	/// with the confirmed head.
	pub(crate) fn subscribe(
		&self,
		client: ClientHandle,
		events: Vec<String>,
		checkpoint: Option<EventId>,
	) {
		client.send_json(&CallResult::ok(serde_json::Value::from(events.clone())));
		match checkpoint {
			None => self.inner.register(&client, &events),
			Some(checkpoint) => replay::schedule(self.inner.clone(), client, events, checkpoint),
		}
	}
}

impl AgentInner {
	/// Creates a handle for a new client connection.
	pub(crate) fn new_client(&self, frames: mpsc::UnboundedSender<OutboundFrame>) -> ClientHandle {
		let id = self.next_client_id.fetch_add(1, Ordering::Relaxed);
		ClientHandle::new(id, frames)
	}

	/// Replaces the client's registrations with `events`, pruning closed
	/// handles along the way.
	pub(crate) fn register(&self, client: &ClientHandle, events: &[String]) {
		let mut subscribers = self.subscribers.lock().expect("agent lock poisoned");
		for handles in subscribers.values_mut() {
			handles.retain(|handle| handle.id() != client.id() && !handle.is_closed());
		}
		for name in events {
			subscribers
				.entry(name.clone())
				.or_default()
				.push(client.clone());
		}
	}

	/// Drops every registration of the client.
	pub(crate) fn disconnect(&self, client: &ClientHandle) {
		let mut subscribers = self.subscribers.lock().expect("agent lock poisoned");
		for handles in subscribers.values_mut() {
			handles.retain(|handle| handle.id() != client.id());
		}
	}

	/// Sends `event` to its subscribers, dropping handles whose connection
	/// is gone.
	pub(crate) fn deliver(&self, event: &Event) {
		let payload = match serde_json::to_string(event) {
			Ok(payload) => payload,
			Err(error) => {
				tracing::warn!(event = %event.event, %error, "event not serializable");
				return;
			}
		};
		let mut subscribers = self.subscribers.lock().expect("agent lock poisoned");
		if let Some(handles) = subscribers.get_mut(&event.event) {
			handles.retain(|handle| handle.send_text(payload.clone()));
		}
	}

	/// Serialized per-block step: advance the head, then decode and deliver
	/// the block's events.
	async fn publish_block(&self, block: Block) {
		self.head.send_replace(Some(block.number));
		match self.events_in_block(&block).await {
			Ok(batch) => {
				for event in batch {
					self.deliver(&event);
				}
			}
			Err(error) => {
				tracing::warn!(block = block.number, %error, "skipping event delivery for block");
			}
		}
	}

	/// Fetches the receipts of every transaction in `block`, in block order.
	pub(crate) async fn block_receipts(
		&self,
		block: &Block,
	) -> Result<Vec<TransactionReceipt>, ChainError> {
		let fetches = block
			.transactions
			.iter()
			.map(|hash| self.chain.get_transaction_receipt(hash));
		Ok(try_join_all(fetches).await?.into_iter().flatten().collect())
	}

	/// Decodes all application events of `block`, in log order.
	pub(crate) async fn events_in_block(&self, block: &Block) -> Result<Vec<Event>, ChainError> {
		let receipts = self.block_receipts(block).await?;
		let filters = self.filters.read().expect("agent lock poisoned");
		let mut batch = Vec::new();
		for log in receipts.iter().flat_map(|receipt| receipt.logs.iter()) {
			for (name, data) in events::log_events(&filters, log) {
				batch.push(Event {
					id: EventId::new(log.block_hash, log.log_index),
					event: name,
					data,
				});
			}
		}
		Ok(batch)
	}
}


#[cfg(test)]
mod tests {
	use super::testing::*;
	use super::*;
	use agent_account::LocalSigner;
	use alloy_primitives::{B256, U256};
	use serde_json::json;
	use std::time::Duration;

	#[tokio::test]
	async fn exec_dispatches_to_registered_actions() {
		let (agent, _) = ping_agent();
		agent.set_action("add", |arguments| async move {
			let sum: i64 = arguments.iter().filter_map(|v| v.as_i64()).sum();
			Ok(json!(sum))
		});

		let result = agent.exec("add", vec![json!(13), json!(14)]).await;
		assert_eq!(result, CallResult::ok(json!(27)));

		let missing = agent.exec("mul", vec![]).await;
		assert_eq!(missing, CallResult::err("action 'mul' not found"));
	}

	#[tokio::test]
	async fn exec_wraps_handler_errors() {
		let (agent, _) = ping_agent();
		agent.set_action("fail", |_| async move { Err("boom".to_string()) });
		assert_eq!(agent.exec("fail", vec![]).await, CallResult::err("boom"));
	}

	#[tokio::test]
	async fn confirmed_logs_reach_subscribed_clients_in_order() {
		let (agent, _) = ping_agent();
		let (client, mut rx) = test_client(&agent);
		agent.subscribe(client, vec!["ping".to_string()], None);

		let ack: CallResult = serde_json::from_str(&next_text(&mut rx).await).unwrap();
		assert_eq!(ack, CallResult::ok(json!(["ping"])));

		// Depth 2: injecting 3 then 5 confirms blocks 1 through 3.
		agent.inner.tracker.inject(3).await.unwrap();
		agent.inner.tracker.inject(5).await.unwrap();

		for number in 1..=3u64 {
			let event: Event = serde_json::from_str(&next_text(&mut rx).await).unwrap();
			assert_eq!(event.event, "ping");
			assert_eq!(event.id, EventId::new(hash(number), 0));
			assert_eq!(event.data, json!({"value": number.to_string()}));
		}
	}

	#[tokio::test]
	async fn events_go_only_to_matching_subscriptions() {
		let (agent, _) = ping_agent();
		let (subscribed, mut sub_rx) = test_client(&agent);
		let (other, mut other_rx) = test_client(&agent);
		agent.subscribe(subscribed, vec!["ping".to_string()], None);
		agent.subscribe(other, vec!["pong".to_string()], None);
		next_text(&mut sub_rx).await;
		next_text(&mut other_rx).await;

		agent.inner.tracker.inject(3).await.unwrap();
		drain(&agent).await;

		let event: Event = serde_json::from_str(&next_text(&mut sub_rx).await).unwrap();
		assert_eq!(event.event, "ping");
		assert!(other_rx.try_recv().is_err());
	}

	#[tokio::test]
	async fn emit_delivers_synthetic_events() {
		let (agent, _) = ping_agent();
		let (client, mut rx) = test_client(&agent);
		agent.subscribe(client, vec!["status".to_string()], None);
		next_text(&mut rx).await;

		agent.emit(Event {
			id: EventId::new(7u64, 0),
			event: "status".to_string(),
			data: json!("ready"),
		});

		let event: Event = serde_json::from_str(&next_text(&mut rx).await).unwrap();
		assert_eq!(event.data, json!("ready"));
	}

	#[tokio::test]
	async fn resubscribing_replaces_previous_registrations() {
		let (agent, _) = ping_agent();
		let (client, mut rx) = test_client(&agent);
		agent.subscribe(client.clone(), vec!["ping".to_string()], None);
		next_text(&mut rx).await;
		agent.subscribe(client, vec!["pong".to_string()], None);
		next_text(&mut rx).await;

		agent.inner.tracker.inject(3).await.unwrap();
		drain(&agent).await;
		assert!(rx.try_recv().is_err());
	}

	#[tokio::test(start_paused = true)]
	async fn send_resolves_with_the_confirmed_receipt() {
		let contract = Address::repeat_byte(0xaa);
		let signer = Arc::new(LocalSigner::random(1));
		let from = signer.address();
		let agent = Agent::new(Arc::new(EventChain::new(contract)), 2, vec![signer]);

		let (hash_tx, hash_rx) = tokio::sync::oneshot::channel::<B256>();
		let hash_tx = Mutex::new(Some(hash_tx));
		agent
			.inner
			.dispatchers
			.get(&from)
			.unwrap()
			.on_tx(move |_, tx| {
				if let Some(hash_tx) = hash_tx.lock().unwrap().take() {
					let _ = hash_tx.send(tx.hash);
				}
			});

		let pending = tokio::spawn({
			let agent = agent.clone();
			async move {
				agent
					.send(
						from,
						RawTransactionRequest {
							to: Some(Address::repeat_byte(0x22)),
							data: None,
							value: U256::ZERO,
							gas_price: 1_000_000_000,
							gas_limit: 21_000,
						},
					)
					.await
			}
		});

		let tx_hash = hash_rx.await.unwrap();
		// Let the sender register its receipt waiter before triggering.
		tokio::time::sleep(Duration::from_millis(1)).await;
		agent.inner.receipts.trigger(TransactionReceipt {
			transaction_hash: tx_hash,
			block_hash: hash(9),
			block_number: 9,
			success: true,
			logs: vec![],
		});

		let receipt = pending.await.unwrap().unwrap();
		assert_eq!(receipt.transaction_hash, tx_hash);
		assert_eq!(receipt.block_number, 9);
	}

	#[tokio::test]
	async fn send_rejects_unknown_signers() {
		let (agent, _) = ping_agent();
		let stranger = Address::repeat_byte(0x99);
		let outcome = agent
			.send(
				stranger,
				RawTransactionRequest {
					to: None,
					data: None,
					value: U256::ZERO,
					gas_price: 0,
					gas_limit: 0,
				},
			)
			.await;
		assert!(matches!(outcome, Err(AgentError::UnknownSigner(a)) if a == stranger));
	}
}
