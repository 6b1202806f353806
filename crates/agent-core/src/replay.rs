//! Replay of missed events from a client checkpoint.
//!
//! A reconnecting client hands back the id of the last event it processed.
//! Replay walks the confirmed chain forward from that point, one block per
//! serial-queue job, re-decoding each block's logs and sending the events the
//! client asked for. Because every step re-enqueues its continuation, blocks
//! confirmed in the meantime interleave fairly: a client resuming from a very
//! old checkpoint cannot starve live delivery.

use crate::server::ClientHandle;
use crate::AgentInner;
use agent_types::{BlockRef, EventId};
use futures::future::BoxFuture;
use futures::FutureExt;
use std::sync::Arc;

/// Resolves the checkpoint and queues the first replay step.
///
/// Resolution waits until a confirmed head exists, since there is nothing to
/// compare the checkpoint against before that. An unresolvable checkpoint is
/// not fatal: the client is registered for live delivery and warned about in
/// the log.
pub(crate) fn schedule(
	inner: Arc<AgentInner>,
	client: ClientHandle,
	events: Vec<String>,
	checkpoint: EventId,
) {
	tokio::spawn(async move {
		let mut head = inner.head.subscribe();
		if head.wait_for(Option::is_some).await.is_err() {
			return;
		}

		let start = match inner.chain.get_block(checkpoint.block()).await {
			Ok(block) => block.number,
			Err(error) => {
				tracing::warn!(
					checkpoint = %checkpoint,
					%error,
					"replay checkpoint unresolvable, switching to live delivery"
				);
				inner.register(&client, &events);
				return;
			}
		};

		let first = step(inner.clone(), client, events, start, Some(checkpoint.log_index()));
		let _ = inner.queue.push(first);
	});
}

/// One serialized replay step covering a single block.
///
/// `after_log` is set only for the checkpoint block itself, skipping the
/// events the client already processed. When the step reaches the confirmed
/// head as of its own processing time, the connection is handed to live
/// registration; otherwise the continuation is queued.
fn step(
	inner: Arc<AgentInner>,
	client: ClientHandle,
	events: Vec<String>,
	number: u64,
	after_log: Option<u64>,
) -> BoxFuture<'static, ()> {
	async move {
		if client.is_closed() {
			return;
		}
		let Some(head) = *inner.head.borrow() else {
			inner.register(&client, &events);
			return;
		};

		let replayed = async {
			let block = inner.chain.get_block(&BlockRef::Number(number)).await?;
			inner.events_in_block(&block).await
		};
		match replayed.await {
			Ok(batch) => {
				for event in batch {
					if let Some(seen) = after_log {
						if event.id.log_index() <= seen {
							continue;
						}
					}
					if events.contains(&event.event) {
						client.send_json(&event);
					}
				}
			}
			Err(error) => {
				tracing::warn!(
					block = number,
					%error,
					"replay aborted, switching to live delivery"
				);
				inner.register(&client, &events);
				return;
			}
		}

		if number >= head {
			inner.register(&client, &events);
		} else {
			let next = step(inner.clone(), client, events, number + 1, None);
			let _ = inner.queue.push(next);
		}
	}
	.boxed()
}

#[cfg(test)]
mod tests {
	use crate::testing::*;
	use agent_types::{Event, EventId};
	use serde_json::json;

	#[tokio::test]
	async fn replays_missed_events_then_hands_over_to_live_delivery() {
		let (agent, _) = ping_agent();

		// Depth 2: head ends up at block 3 with blocks 1..=3 confirmed.
		agent.inner.tracker.inject(3).await.unwrap();
		agent.inner.tracker.inject(5).await.unwrap();
		drain(&agent).await;

		// The client saw block 1's only event; resume from there.
		let (client, mut rx) = test_client(&agent);
		agent.subscribe(
			client,
			vec!["ping".to_string()],
			Some(EventId::new(hash(1), 0)),
		);
		next_text(&mut rx).await; // ack

		for number in 2..=3u64 {
			let event: Event = serde_json::from_str(&next_text(&mut rx).await).unwrap();
			assert_eq!(event.id, EventId::new(hash(number), 0));
			assert_eq!(event.data, json!({"value": number.to_string()}));
		}

		// The walk has caught up; new confirmations arrive live.
		agent.inner.tracker.inject(6).await.unwrap();
		let event: Event = serde_json::from_str(&next_text(&mut rx).await).unwrap();
		assert_eq!(event.id, EventId::new(hash(4), 0));
	}

	#[tokio::test]
	async fn replay_skips_checkpoint_block_events_already_seen() {
		let (agent, _) = ping_agent();
		agent.inner.tracker.inject(3).await.unwrap();
		drain(&agent).await;

		// The checkpoint names block 1's only event, so the replay of block 1
		// must produce nothing before the walk hands over to live delivery.
		let (client, mut rx) = test_client(&agent);
		agent.subscribe(
			client,
			vec!["ping".to_string()],
			Some(EventId::new(hash(1), 0)),
		);
		next_text(&mut rx).await; // ack
		drain(&agent).await;
		drain(&agent).await;

		agent.inner.tracker.inject(4).await.unwrap();
		let event: Event = serde_json::from_str(&next_text(&mut rx).await).unwrap();
		assert_eq!(event.id, EventId::new(hash(2), 0));
	}

	#[tokio::test]
	async fn replay_only_sends_requested_event_names() {
		let (agent, _) = ping_agent();
		agent.inner.tracker.inject(4).await.unwrap();
		drain(&agent).await;

		let (client, mut rx) = test_client(&agent);
		agent.subscribe(
			client,
			vec!["other".to_string()],
			Some(EventId::new(hash(1), 0)),
		);
		next_text(&mut rx).await; // ack
		drain(&agent).await;
		drain(&agent).await;
		drain(&agent).await;

		assert!(rx.try_recv().is_err());
	}
}
