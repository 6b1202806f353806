//! Main entry point for the chain agent service.
//!
//! Loads the TOML configuration, builds the agent with an alloy-backed chain
//! client and one nonce dispatcher per configured key, registers the
//! configured event mappings and serves client connections until interrupted.

use agent_account::{LocalSigner, TransactionSigner};
use agent_chain::implementations::alloy::{ws_subscription_factory, AlloyChain};
use agent_config::Config;
use agent_core::{serve, Agent, EventFilter};
use clap::Parser;
use std::path::PathBuf;
use std::sync::Arc;

/// Command-line arguments for the agent service.
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
	/// Path to configuration file
	#[arg(short, long, default_value = "config.toml")]
	config: PathBuf,

	/// Log level (trace, debug, info, warn, error)
	#[arg(short, long, default_value = "info")]
	log_level: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
	let args = Args::parse();

	// Initialize tracing with env filter
	use tracing_subscriber::{fmt, EnvFilter};
	let env_filter = EnvFilter::try_from_default_env()
		.unwrap_or_else(|_| EnvFilter::new(args.log_level.clone()));
	fmt().with_env_filter(env_filter).init();

	let config = Config::from_file(&args.config)?;
	tracing::info!(path = %args.config.display(), "loaded configuration");

	let agent = build_agent(&config)?;
	agent.start(ws_subscription_factory(config.chain.ws_url.clone()));

	serve(agent, &config.server.bind_address()).await?;
	Ok(())
}

/// Wires the agent from configuration: chain client, signers and the
/// configured event mappings.
fn build_agent(config: &Config) -> Result<Agent, Box<dyn std::error::Error>> {
	let chain = Arc::new(AlloyChain::connect(&config.chain.http_url)?);

	let signers = config
		.signers
		.iter()
		.map(|signer| {
			LocalSigner::from_key(&signer.key, config.chain.chain_id)
				.map(|signer| Arc::new(signer) as Arc<dyn TransactionSigner>)
		})
		.collect::<Result<Vec<_>, _>>()?;
	for signer in &signers {
		tracing::info!(address = %signer.address(), "signer registered");
	}

	let agent = Agent::new(chain, config.chain.confirm_depth, signers);

	for mapping in &config.events {
		let event = alloy_json_abi::Event::parse(&mapping.signature)
			.map_err(|e| format!("invalid event signature '{}': {}", mapping.signature, e))?;
		tracing::info!(
			contract = %mapping.contract,
			event = %mapping.event,
			"event mapping registered"
		);
		agent.set_log_transformer(EventFilter::renamed(
			mapping.contract,
			event,
			mapping.event.clone(),
		));
	}

	Ok(agent)
}
