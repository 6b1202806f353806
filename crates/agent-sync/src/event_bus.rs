//! Keyed publish/subscribe with durable and one-shot listeners.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::oneshot;

/// How many fired one-shot buckets may accumulate before the map is swept.
const TRASH_CAPACITY: usize = 10;

type Durable<T> = Arc<dyn Fn(&T) + Send + Sync>;
type OneShot<T> = Box<dyn FnOnce(T) + Send>;

struct Inner<T> {
	listeners: HashMap<String, Vec<Durable<T>>>,
	// A fired bucket is left in place as `None` and only swept once enough
	// of them pile up, so triggers stay cheap on hot keys.
	once: HashMap<String, Option<Vec<OneShot<T>>>>,
	trash: usize,
}

/// Generic pub/sub keyed by a classification of the event value.
///
/// Durable listeners registered with [`on`](EventBus::on) observe every
/// matching event; one-shot listeners registered with
/// [`once`](EventBus::once) or [`wait_for`](EventBus::wait_for) observe the
/// next matching event and are then discarded. Used both for routing chain
/// events and for correlating asynchronous transaction results back to
/// callers.
pub struct EventBus<T> {
	classify: Arc<dyn Fn(&T) -> String + Send + Sync>,
	inner: Arc<Mutex<Inner<T>>>,
}

impl<T> Clone for EventBus<T> {
	fn clone(&self) -> Self {
		Self {
			classify: self.classify.clone(),
			inner: self.inner.clone(),
		}
	}
}

impl<T: Clone> EventBus<T> {
	/// Creates a bus that groups events by `classify`.
	pub fn new(classify: impl Fn(&T) -> String + Send + Sync + 'static) -> Self {
		Self {
			classify: Arc::new(classify),
			inner: Arc::new(Mutex::new(Inner {
				listeners: HashMap::new(),
				once: HashMap::new(),
				trash: 0,
			})),
		}
	}

	/// Delivers `event` to every durable listener and every pending one-shot
	/// listener registered for its classification, then discards the
	/// one-shots that fired.
	pub fn trigger(&self, event: T) {
		let kind = (self.classify)(&event);
		let (durable, fired) = {
			let mut inner = self.inner.lock().expect("event bus lock poisoned");
			let durable = inner.listeners.get(&kind).cloned().unwrap_or_default();
			let fired = inner.once.get_mut(&kind).and_then(Option::take);
			if fired.is_some() {
				inner.trash += 1;
				if inner.trash > TRASH_CAPACITY {
					inner.once.retain(|_, bucket| bucket.is_some());
					inner.trash = 0;
				}
			}
			(durable, fired)
		};

		// Listeners run outside the lock so they may re-register.
		for listener in durable {
			listener(&event);
		}
		if let Some(fired) = fired {
			for listener in fired {
				listener(event.clone());
			}
		}
	}

	/// Registers a durable listener for `kind`.
	pub fn on(&self, kind: impl Into<String>, handler: impl Fn(&T) + Send + Sync + 'static) {
		let mut inner = self.inner.lock().expect("event bus lock poisoned");
		inner
			.listeners
			.entry(kind.into())
			.or_default()
			.push(Arc::new(handler));
	}

	/// Registers a listener fired at most once, on the next matching event.
	pub fn once(&self, kind: impl Into<String>, handler: impl FnOnce(T) + Send + 'static) {
		let mut inner = self.inner.lock().expect("event bus lock poisoned");
		inner
			.once
			.entry(kind.into())
			.or_insert_with(|| Some(Vec::new()))
			.get_or_insert_with(Vec::new)
			.push(Box::new(handler));
	}

	/// Returns a receiver resolving with the next event matching `kind`.
	///
	/// The receiver errors if the bus is dropped before a matching event is
	/// triggered.
	pub fn wait_for(&self, kind: impl Into<String>) -> oneshot::Receiver<T>
	where
		T: Send + 'static,
	{
		let (tx, rx) = oneshot::channel();
		self.once(kind, move |event| {
			let _ = tx.send(event);
		});
		rx
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use std::sync::atomic::{AtomicUsize, Ordering};

	#[derive(Debug, Clone, PartialEq)]
	struct Tick {
		kind: String,
		seq: usize,
	}

	fn tick(kind: &str, seq: usize) -> Tick {
		Tick {
			kind: kind.to_string(),
			seq,
		}
	}

	fn bus() -> EventBus<Tick> {
		EventBus::new(|tick: &Tick| tick.kind.clone())
	}

	#[test]
	fn durable_listener_sees_every_matching_event() {
		let bus = bus();
		let seen = Arc::new(AtomicUsize::new(0));
		let counter = seen.clone();
		bus.on("a", move |_| {
			counter.fetch_add(1, Ordering::SeqCst);
		});

		bus.trigger(tick("a", 1));
		bus.trigger(tick("b", 2));
		bus.trigger(tick("a", 3));
		assert_eq!(seen.load(Ordering::SeqCst), 2);
	}

	#[test]
	fn once_fires_at_most_once() {
		let bus = bus();
		let seen = Arc::new(AtomicUsize::new(0));
		let counter = seen.clone();
		bus.once("a", move |_| {
			counter.fetch_add(1, Ordering::SeqCst);
		});

		bus.trigger(tick("a", 1));
		bus.trigger(tick("a", 2));
		assert_eq!(seen.load(Ordering::SeqCst), 1);
	}

	#[tokio::test]
	async fn wait_for_resolves_with_first_matching_trigger() {
		let bus = bus();
		let rx = bus.wait_for("a");

		bus.trigger(tick("b", 1));
		bus.trigger(tick("a", 2));
		bus.trigger(tick("a", 3));

		assert_eq!(rx.await.unwrap(), tick("a", 2));
	}

	#[tokio::test]
	async fn wait_for_errors_when_bus_dropped() {
		let bus = bus();
		let rx = bus.wait_for("never");
		drop(bus);
		assert!(rx.await.is_err());
	}

	#[tokio::test]
	async fn bus_stays_usable_across_sweeps() {
		let bus = bus();
		// Fire well past the sweep threshold, each on a distinct key.
		for seq in 0..50 {
			let key = format!("k{}", seq);
			let rx = bus.wait_for(key.clone());
			bus.trigger(Tick {
				kind: key,
				seq,
			});
			assert_eq!(rx.await.unwrap().seq, seq);
		}
		let rx = bus.wait_for("fresh");
		bus.trigger(tick("fresh", 99));
		assert_eq!(rx.await.unwrap().seq, 99);
	}
}
