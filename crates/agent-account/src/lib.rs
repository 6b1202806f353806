//! Signing for outbound transactions.
//!
//! The nonce dispatcher owns *when* a transaction is signed; this crate owns
//! *how*. A [`TransactionSigner`] takes an unsigned intent plus the nonce the
//! dispatcher assigned and produces the broadcast-ready bytes. The only
//! implementation signs legacy transactions with a local private key.

use agent_types::{RawTransactionRequest, SecretString, SignedTransaction};
use alloy_consensus::{SignableTransaction, TxEnvelope, TxLegacy};
use alloy_eips::eip2718::Encodable2718;
use alloy_network::TxSignerSync;
use alloy_primitives::{Address, TxKind};
use alloy_signer_local::PrivateKeySigner;
use async_trait::async_trait;
use thiserror::Error;

/// Errors that can occur during signing operations.
#[derive(Debug, Error)]
pub enum AccountError {
	/// The configured private key is invalid or malformed.
	#[error("invalid key: {0}")]
	InvalidKey(String),
	/// The signing operation itself failed.
	#[error("signing failed: {0}")]
	SigningFailed(String),
}

/// Signs transaction intents for one key.
///
/// Implementations must be cheap to call repeatedly: the dispatcher signs
/// inside its serialized step, so a slow signer stalls the whole queue for
/// its key.
#[async_trait]
pub trait TransactionSigner: Send + Sync {
	/// The address transactions are sent from.
	fn address(&self) -> Address;

	/// Signs `request` with `nonce`, returning the encoded transaction.
	async fn sign(
		&self,
		request: &RawTransactionRequest,
		nonce: u64,
	) -> Result<SignedTransaction, AccountError>;
}

/// Local private-key signer producing legacy transactions.
pub struct LocalSigner {
	signer: PrivateKeySigner,
	chain_id: u64,
}

impl LocalSigner {
	/// Parses a hex private key.
	pub fn from_key(key: &SecretString, chain_id: u64) -> Result<Self, AccountError> {
		let signer: PrivateKeySigner = key
			.with_exposed(|key| key.parse())
			.map_err(|_| AccountError::InvalidKey("private key format".to_string()))?;
		Ok(Self { signer, chain_id })
	}

	/// Generates a throwaway key, used by tests and examples.
	pub fn random(chain_id: u64) -> Self {
		Self {
			signer: PrivateKeySigner::random(),
			chain_id,
		}
	}
}

#[async_trait]
impl TransactionSigner for LocalSigner {
	fn address(&self) -> Address {
		self.signer.address()
	}

	async fn sign(
		&self,
		request: &RawTransactionRequest,
		nonce: u64,
	) -> Result<SignedTransaction, AccountError> {
		let mut tx = TxLegacy {
			chain_id: Some(self.chain_id),
			nonce,
			gas_price: request.gas_price,
			gas_limit: request.gas_limit,
			to: request.to.map(TxKind::Call).unwrap_or(TxKind::Create),
			value: request.value,
			input: request.data.clone().unwrap_or_default(),
		};

		let signature = self
			.signer
			.sign_transaction_sync(&mut tx)
			.map_err(|e| AccountError::SigningFailed(e.to_string()))?;
		let signed = tx.into_signed(signature);
		let hash = *signed.hash();

		let envelope = TxEnvelope::Legacy(signed);
		let mut raw = Vec::new();
		envelope.encode_2718(&mut raw);

		Ok(SignedTransaction {
			nonce,
			hash,
			raw: raw.into(),
		})
	}
}
