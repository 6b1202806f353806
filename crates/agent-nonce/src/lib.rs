//! Per-key serialization of nonce assignment, signing and broadcast.
//!
//! Concurrently submitted transactions for one key must end up with
//! strictly increasing, non-colliding nonces even when the chain reorgs out
//! from under us. The [`NonceDispatcher`] achieves that by running exactly
//! one resolution at a time per key: signing happens synchronously inside
//! the serialized step, while broadcasting happens optimistically afterwards.
//! Whether a transaction actually landed is deliberately out of scope here;
//! callers correlate receipts on the confirmed-block stream instead.

use agent_account::{AccountError, TransactionSigner};
use agent_chain::{ChainClient, ChainError};
use agent_sync::{EventBus, SerialQueue};
use agent_types::{RawTransactionRequest, SignedTransaction};
use alloy_primitives::Address;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use thiserror::Error;
use uuid::Uuid;

/// Delay before reading the on-chain transaction count, guarding against
/// acting on a stale view right after a reorg.
const REORG_GUARD: Duration = Duration::from_secs(5);

/// Errors reported for a transaction job.
#[derive(Debug, Error)]
pub enum NonceError {
	/// A chain call required for resolution failed.
	#[error("chain error: {0}")]
	Chain(#[from] ChainError),
	/// Signing failed.
	#[error("signing error: {0}")]
	Account(#[from] AccountError),
	/// The job was resolved but reported a failure.
	#[error("transaction job failed: {0}")]
	Job(String),
	/// The dispatcher shut down before the job resolved.
	#[error("dispatcher shut down")]
	Closed,
}

/// Resolution outcome correlated back to callers by job id.
#[derive(Debug, Clone)]
struct JobOutcome {
	job_id: String,
	result: Result<SignedTransaction, String>,
}

type TxListener = Box<dyn Fn(&str, &SignedTransaction) + Send + Sync>;

struct DispatcherInner {
	chain: Arc<dyn ChainClient>,
	signer: Arc<dyn TransactionSigner>,
	/// Next nonce to assign; `None` until the first resolution establishes
	/// it from the chain. Only touched inside the serialized step.
	nonce: Mutex<Option<u64>>,
	/// Pending job ids, FIFO, paired one-to-one with queued jobs.
	job_ids: Mutex<VecDeque<String>>,
	listeners: Mutex<Vec<TxListener>>,
	outcomes: EventBus<JobOutcome>,
	queue: SerialQueue,
	reorg_guard: Duration,
}

/// Serializes outbound transaction construction for one signing key.
#[derive(Clone)]
pub struct NonceDispatcher {
	inner: Arc<DispatcherInner>,
}

impl NonceDispatcher {
	/// Creates a dispatcher for `signer`, broadcasting through `chain`.
	///
	/// Must be called from within a tokio runtime.
	pub fn new(chain: Arc<dyn ChainClient>, signer: Arc<dyn TransactionSigner>) -> Self {
		Self::with_reorg_guard(chain, signer, REORG_GUARD)
	}

	/// As [`new`](Self::new) with an explicit pre-fetch guard delay.
	pub fn with_reorg_guard(
		chain: Arc<dyn ChainClient>,
		signer: Arc<dyn TransactionSigner>,
		reorg_guard: Duration,
	) -> Self {
		Self {
			inner: Arc::new(DispatcherInner {
				chain,
				signer,
				nonce: Mutex::new(None),
				job_ids: Mutex::new(VecDeque::new()),
				listeners: Mutex::new(Vec::new()),
				outcomes: EventBus::new(|outcome: &JobOutcome| outcome.job_id.clone()),
				queue: SerialQueue::new(),
				reorg_guard,
			}),
		}
	}

	/// The address this dispatcher signs for.
	pub fn signer_address(&self) -> Address {
		self.inner.signer.address()
	}

	/// Registers a durable listener for resolved transactions.
	///
	/// Listeners observe `(job_id, signed_tx)` for every successfully signed
	/// job, in strict submission order.
	pub fn on_tx(&self, listener: impl Fn(&str, &SignedTransaction) + Send + Sync + 'static) {
		self.inner
			.listeners
			.lock()
			.expect("dispatcher lock poisoned")
			.push(Box::new(listener));
	}

	/// Enqueues a transaction intent under a caller-chosen job id.
	///
	/// Job id uniqueness within this dispatcher's queue is the caller's
	/// responsibility. The result is reported asynchronously through
	/// [`on_tx`](Self::on_tx) listeners.
	pub fn push(&self, job_id: impl Into<String>, request: RawTransactionRequest) {
		self.inner
			.job_ids
			.lock()
			.expect("dispatcher lock poisoned")
			.push_back(job_id.into());

		let inner = self.inner.clone();
		let _ = self.inner.queue.push(async move {
			let result = inner.resolve(request).await;
			let job_id = inner
				.job_ids
				.lock()
				.expect("dispatcher lock poisoned")
				.pop_front()
				.unwrap_or_default();

			match result {
				Ok(tx) => {
					let listeners = inner.listeners.lock().expect("dispatcher lock poisoned");
					for listener in listeners.iter() {
						listener(&job_id, &tx);
					}
					drop(listeners);
					inner.outcomes.trigger(JobOutcome {
						job_id,
						result: Ok(tx),
					});
				}
				Err(error) => {
					tracing::warn!(job_id = %job_id, %error, "transaction job failed");
					inner.outcomes.trigger(JobOutcome {
						job_id,
						result: Err(error.to_string()),
					});
				}
			}
		});
	}

	/// Submits a transaction intent and waits for the signed result.
	///
	/// The returned transaction has been handed to the node but carries no
	/// receipt guarantee; it may not be queryable yet.
	pub async fn send(&self, request: RawTransactionRequest) -> Result<SignedTransaction, NonceError> {
		let job_id = Uuid::new_v4().to_string();
		// Register the waiter before enqueueing so the outcome cannot race it.
		let outcome = self.inner.outcomes.wait_for(job_id.clone());
		self.push(job_id, request);
		match outcome.await {
			Ok(outcome) => outcome.result.map_err(NonceError::Job),
			Err(_) => Err(NonceError::Closed),
		}
	}
}

impl DispatcherInner {
	/// Resolves one job. Runs inside the serialized step, so at most one
	/// resolution is in flight per dispatcher.
	async fn resolve(&self, request: RawTransactionRequest) -> Result<SignedTransaction, NonceError> {
		let established = *self.nonce.lock().expect("dispatcher lock poisoned");
		match established {
			None => {
				let tx = self.establish_nonce(&request).await?;
				*self.nonce.lock().expect("dispatcher lock poisoned") = Some(tx.nonce + 1);
				Ok(tx)
			}
			Some(nonce) => {
				let tx = self.signer.sign(&request, nonce).await?;
				*self.nonce.lock().expect("dispatcher lock poisoned") = Some(nonce + 1);

				// Steady state broadcasts fire-and-forget: delivery assurance
				// lives in the receipt-correlation layer, not here.
				let chain = self.chain.clone();
				let raw = tx.raw.clone();
				let hash = tx.hash;
				tokio::spawn(async move {
					if let Err(error) = chain.send_raw_transaction(&raw).await {
						tracing::debug!(tx_hash = %hash, %error, "broadcast error ignored");
					}
				});
				Ok(tx)
			}
		}
	}

	/// First-resolution path: fetch the account's transaction count, sign
	/// and broadcast, retrying from scratch on every nonce conflict. There
	/// is deliberately no retry cap; conflicts always resolve once the
	/// competing view settles.
	async fn establish_nonce(
		&self,
		request: &RawTransactionRequest,
	) -> Result<SignedTransaction, NonceError> {
		loop {
			tokio::time::sleep(self.reorg_guard).await;
			let nonce = self
				.chain
				.get_transaction_count(self.signer.address())
				.await?;
			let tx = self.signer.sign(request, nonce).await?;
			match self.chain.send_raw_transaction(&tx.raw).await {
				Ok(_) => return Ok(tx),
				Err(error) if error.is_nonce_conflict() => {
					tracing::debug!(nonce, %error, "nonce conflict, refetching count");
				}
				Err(error) => {
					// Terminal for this job; the signed transaction is still
					// reported so the caller can correlate or resubmit.
					tracing::warn!(tx_hash = %tx.hash, %error, "broadcast failed");
					return Ok(tx);
				}
			}
		}
	}
}
