//! Reconnecting supervisor for the upstream new-block subscription.

use crate::{ChainClient, SubscriptionFactory};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::time::MissedTickBehavior;

/// Delay before retrying after a connection that never became live.
const RECONNECT_DELAY: Duration = Duration::from_secs(5);
/// Interval of the liveness ping once a connection is live.
const PING_INTERVAL: Duration = Duration::from_secs(10);

type BlockListener = Arc<dyn Fn(u64) + Send + Sync>;

/// Owns the live upstream subscription and keeps it alive.
///
/// Every (re)connect builds a fresh transport through the factory and
/// re-establishes the new-block subscription; nothing is assumed to survive
/// a drop. Once live, a periodic no-op chain call doubles as a liveness
/// probe. The supervisor never gives up: it always converges back to a
/// fresh live connection.
#[derive(Clone, Default)]
pub struct Connector {
	listeners: Arc<Mutex<Vec<BlockListener>>>,
}

impl Connector {
	/// Creates a connector with no listeners and no connection.
	pub fn new() -> Self {
		Self::default()
	}

	/// Registers a durable callback invoked with each raw new-block number
	/// the transport delivers.
	pub fn on_new_block(&self, listener: impl Fn(u64) + Send + Sync + 'static) {
		self.listeners
			.lock()
			.expect("connector lock poisoned")
			.push(Arc::new(listener));
	}

	/// Spawns the supervision loop.
	///
	/// `chain` is used for the liveness ping; `factory` builds a fresh
	/// subscription on every attempt.
	pub fn connect(&self, chain: Arc<dyn ChainClient>, factory: SubscriptionFactory) {
		let listeners = self.listeners.clone();
		tokio::spawn(async move {
			loop {
				let mut subscription = match factory().await {
					Ok(subscription) => subscription,
					Err(error) => {
						// Never became live: back off before retrying.
						tracing::warn!(%error, "chain connection failed, retrying");
						tokio::time::sleep(RECONNECT_DELAY).await;
						continue;
					}
				};
				tracing::info!("chain subscription established");

				let mut ping = tokio::time::interval(PING_INTERVAL);
				ping.set_missed_tick_behavior(MissedTickBehavior::Delay);
				// The first tick of an interval fires immediately; consume it
				// so pings are spaced from the moment the connection went live.
				ping.tick().await;

				loop {
					tokio::select! {
						notification = subscription.next_block() => match notification {
							Ok(number) => {
								tracing::debug!(block = number, "new block observed");
								let listeners = listeners
									.lock()
									.expect("connector lock poisoned")
									.clone();
								for listener in listeners {
									listener(number);
								}
							}
							Err(error) => {
								tracing::warn!(%error, "block subscription lost");
								break;
							}
						},
						_ = ping.tick() => {
							if let Err(error) = chain.get_block_number().await {
								tracing::warn!(%error, "liveness ping failed");
								break;
							}
						}
					}
				}
				// Was live: reconnect immediately.
			}
		});
	}
}
