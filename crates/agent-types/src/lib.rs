//! Common types module for the chain agent.
//!
//! This module defines the core data types shared by every agent component:
//! transaction intents and signed transactions, confirmed-block chain data,
//! application events with their replay checkpoints, and the wire protocol
//! exchanged with connected clients.

/// Confirmed-block chain data: blocks, receipts and logs.
pub mod chain;
/// Application events and the EventId replay checkpoint codec.
pub mod event;
/// Wire protocol request and response types.
pub mod protocol;
/// Secure string type for private key material.
pub mod secret_string;
/// Transaction intents, signed transactions and submitted jobs.
pub mod transaction;

pub use chain::{Block, BlockRef, Log, TransactionReceipt};
pub use event::{Event, EventId, EventIdError};
pub use protocol::{CallResult, Request};
pub use secret_string::SecretString;
pub use transaction::{RawTransactionRequest, SignedTransaction};
