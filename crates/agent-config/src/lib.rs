//! Configuration for the chain agent.
//!
//! Loads a TOML file describing the server endpoint, the chain connection,
//! the signing keys and the event mappings, and validates it before any
//! component is wired up. Signing keys are wrapped in [`SecretString`] the
//! moment they are parsed and never appear in logs or serialized output.

use agent_types::SecretString;
use alloy_primitives::Address;
use serde::{Deserialize, Serialize};
use std::path::Path;
use thiserror::Error;

/// Errors that can occur during configuration operations.
#[derive(Debug, Error)]
pub enum ConfigError {
	/// Error that occurs during file I/O operations.
	#[error("IO error: {0}")]
	Io(#[from] std::io::Error),
	/// Error that occurs when parsing TOML configuration.
	#[error("Configuration error: {0}")]
	Parse(String),
	/// Error that occurs when configuration validation fails.
	#[error("Validation error: {0}")]
	Validation(String),
}

impl From<toml::de::Error> for ConfigError {
	fn from(err: toml::de::Error) -> Self {
		// Extract just the message without the huge input dump
		ConfigError::Parse(err.message().to_string())
	}
}

/// Main configuration structure for the agent.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
	/// Configuration for the client-facing server.
	pub server: ServerConfig,
	/// Configuration for the chain connection.
	pub chain: ChainConfig,
	/// Signing keys the agent dispatches transactions for.
	#[serde(default)]
	pub signers: Vec<SignerConfig>,
	/// Contract events mapped to application events.
	#[serde(default)]
	pub events: Vec<EventMapping>,
}

/// Configuration for the client-facing server.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
	/// Host address to bind to.
	pub host: String,
	/// Port to listen on.
	pub port: u16,
}

impl ServerConfig {
	/// The address string the server binds to.
	pub fn bind_address(&self) -> String {
		format!("{}:{}", self.host, self.port)
	}
}

/// Configuration for the chain connection.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ChainConfig {
	/// HTTP RPC endpoint, used for reads and broadcasts.
	pub http_url: String,
	/// WebSocket RPC endpoint, used for the new-block subscription.
	pub ws_url: String,
	/// Chain id transactions are signed for.
	pub chain_id: u64,
	/// Number of descendants a block needs before it counts as confirmed.
	/// Defaults to 12 confirmations if not specified.
	#[serde(default = "default_confirm_depth")]
	pub confirm_depth: u64,
}

/// Returns the default confirmation depth.
fn default_confirm_depth() -> u64 {
	12
}

/// One signing key the agent manages a nonce sequence for.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SignerConfig {
	/// Hex-encoded private key.
	pub key: SecretString,
}

/// Maps one contract event to an application event name.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct EventMapping {
	/// Address of the emitting contract.
	pub contract: Address,
	/// Solidity event signature, e.g. `Transfer(address indexed from,
	/// address indexed to, uint256 value)`.
	pub signature: String,
	/// Application event name delivered to subscribers.
	pub event: String,
}

impl Config {
	/// Loads and validates configuration from a TOML file.
	pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
		let content = std::fs::read_to_string(path)?;
		Self::from_toml(&content)
	}

	/// Parses and validates configuration from a TOML string.
	pub fn from_toml(content: &str) -> Result<Self, ConfigError> {
		let config: Config = toml::from_str(content)?;
		config.validate()?;
		Ok(config)
	}

	/// Validates that all required configuration values are properly set.
	fn validate(&self) -> Result<(), ConfigError> {
		if self.server.host.is_empty() {
			return Err(ConfigError::Validation("server.host cannot be empty".into()));
		}
		if self.chain.http_url.is_empty() {
			return Err(ConfigError::Validation(
				"chain.http_url cannot be empty".into(),
			));
		}
		if self.chain.ws_url.is_empty() {
			return Err(ConfigError::Validation(
				"chain.ws_url cannot be empty".into(),
			));
		}
		for (index, signer) in self.signers.iter().enumerate() {
			if signer.key.is_empty() {
				return Err(ConfigError::Validation(format!(
					"signers[{}].key cannot be empty",
					index
				)));
			}
		}
		for mapping in &self.events {
			if mapping.signature.is_empty() || mapping.event.is_empty() {
				return Err(ConfigError::Validation(format!(
					"event mapping for {} needs both a signature and an event name",
					mapping.contract
				)));
			}
		}
		Ok(())
	}
}
