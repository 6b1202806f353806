//! Strict FIFO execution of asynchronous jobs.

use futures::future::BoxFuture;
use futures::FutureExt;
use std::future::Future;
use tokio::sync::{mpsc, oneshot};

/// A queue of async jobs run strictly one after another.
///
/// A job does not start until the previous job's future has settled; the
/// queue never reorders or parallelizes. Handles are cheap to clone and a
/// running job may push follow-up jobs onto the same queue, which is how
/// replay continuations interleave fairly with live block processing.
#[derive(Clone)]
pub struct SerialQueue {
	jobs: mpsc::UnboundedSender<BoxFuture<'static, ()>>,
}

impl SerialQueue {
	/// Creates the queue and spawns its worker task.
	///
	/// Must be called from within a tokio runtime.
	pub fn new() -> Self {
		let (jobs, mut feed) = mpsc::unbounded_channel::<BoxFuture<'static, ()>>();
		tokio::spawn(async move {
			while let Some(job) = feed.recv().await {
				job.await;
			}
		});
		Self { jobs }
	}

	/// Enqueues `job` and returns a receiver for its result.
	///
	/// The receiver may be dropped by callers that only care about ordering;
	/// it errors if the queue shuts down before the job runs.
	pub fn push<F>(&self, job: F) -> oneshot::Receiver<F::Output>
	where
		F: Future + Send + 'static,
		F::Output: Send + 'static,
	{
		let (done, result) = oneshot::channel();
		let task = async move {
			let _ = done.send(job.await);
		}
		.boxed();
		// A send failure means the worker is gone; the returned receiver
		// reports that as a RecvError.
		let _ = self.jobs.send(task);
		result
	}
}

impl Default for SerialQueue {
	fn default() -> Self {
		Self::new()
	}
}
