//! WebSocket server for client connections.
//!
//! Clients connect to the root path and exchange JSON text frames: tagged
//! requests in, uniform `{error, data}` replies and event deliveries out.
//! Each connection gets a writer task fed through an unbounded channel; the
//! [`ClientHandle`] wrapping that channel is what the rest of the agent holds
//! on to, so a dead connection is observable everywhere as a closed channel.

use crate::Agent;
use agent_types::{CallResult, Request};
use axum::extract::ws::{close_code, CloseFrame, Message, WebSocket};
use axum::extract::{State, WebSocketUpgrade};
use axum::response::Response;
use axum::routing::any;
use axum::Router;
use futures::{SinkExt, StreamExt};
use serde::Serialize;
use tokio::net::TcpListener;
use tokio::sync::mpsc;

/// Frame queued for a connection's writer task.
#[derive(Debug)]
pub(crate) enum OutboundFrame {
	Text(String),
	Close { code: u16, reason: &'static str },
}

/// Sending half of one client connection.
#[derive(Clone)]
pub struct ClientHandle {
	id: u64,
	frames: mpsc::UnboundedSender<OutboundFrame>,
}

impl ClientHandle {
	pub(crate) fn new(id: u64, frames: mpsc::UnboundedSender<OutboundFrame>) -> Self {
		Self { id, frames }
	}

	pub(crate) fn id(&self) -> u64 {
		self.id
	}

	/// Queues a text frame; false means the connection is gone.
	pub(crate) fn send_text(&self, text: String) -> bool {
		self.frames.send(OutboundFrame::Text(text)).is_ok()
	}

	pub(crate) fn send_json<T: Serialize>(&self, value: &T) -> bool {
		match serde_json::to_string(value) {
			Ok(text) => self.send_text(text),
			Err(_) => false,
		}
	}

	pub(crate) fn is_closed(&self) -> bool {
		self.frames.is_closed()
	}

	/// Queues a close frame; the writer sends it and shuts down.
	pub(crate) fn close(&self, code: u16, reason: &'static str) {
		let _ = self.frames.send(OutboundFrame::Close { code, reason });
	}
}

/// Binds `bind_address` and serves client connections until failure.
///
/// The only route is a WebSocket upgrade at the root; plain HTTP requests to
/// any other path get a 404.
pub async fn serve(agent: Agent, bind_address: &str) -> Result<(), crate::AgentError> {
	let app = Router::new()
		.route("/", any(upgrade))
		.with_state(agent);

	let listener = TcpListener::bind(bind_address).await?;
	tracing::info!(%bind_address, "agent server listening");
	axum::serve(listener, app).await?;
	Ok(())
}

async fn upgrade(State(agent): State<Agent>, ws: WebSocketUpgrade) -> Response {
	ws.on_upgrade(move |socket| handle_connection(agent, socket))
}

async fn handle_connection(agent: Agent, socket: WebSocket) {
	let (mut sink, mut stream) = socket.split();
	let (frames, mut outbound) = mpsc::unbounded_channel();
	let client = agent.inner.new_client(frames);
	tracing::debug!(client = client.id(), "client connected");

	let writer = tokio::spawn(async move {
		while let Some(frame) = outbound.recv().await {
			match frame {
				OutboundFrame::Text(text) => {
					if sink.send(Message::Text(text.into())).await.is_err() {
						break;
					}
				}
				OutboundFrame::Close { code, reason } => {
					let _ = sink
						.send(Message::Close(Some(CloseFrame {
							code,
							reason: reason.into(),
						})))
						.await;
					break;
				}
			}
		}
	});

	while let Some(frame) = stream.next().await {
		match frame {
			Ok(Message::Text(text)) => handle_request(&agent, &client, text.as_str()).await,
			Ok(Message::Binary(_)) => {
				// Text-only protocol; a binary frame is a protocol violation.
				tracing::warn!(client = client.id(), "binary frame received, closing");
				client.close(close_code::PROTOCOL, "text frames only");
				break;
			}
			Ok(Message::Close(_)) => break,
			Ok(_) => {}
			Err(error) => {
				tracing::debug!(client = client.id(), %error, "connection error");
				break;
			}
		}
	}

	agent.inner.disconnect(&client);
	// Unblocks the writer even while subscriber sets still hold clones.
	client.close(close_code::NORMAL, "");
	let _ = writer.await;
	tracing::debug!(client = client.id(), "client disconnected");
}

/// Dispatches one request frame. Requests on a connection are processed in
/// arrival order; a malformed frame gets an error reply but keeps the
/// connection open.
async fn handle_request(agent: &Agent, client: &ClientHandle, text: &str) {
	match serde_json::from_str::<Request>(text) {
		Ok(Request::ActionRequest { command, arguments }) => {
			let result = agent.exec(&command, arguments).await;
			client.send_json(&result);
		}
		Ok(Request::EventsRequest {
			events,
			last_event_id,
		}) => {
			agent.subscribe(client.clone(), events, last_event_id);
		}
		Err(error) => {
			client.send_json(&CallResult::err(format!("invalid request: {}", error)));
		}
	}
}

#[cfg(test)]
mod tests {
	use super::*;
	use crate::testing::*;
	use serde_json::json;

	#[tokio::test]
	async fn action_requests_get_their_result() {
		let (agent, _) = ping_agent();
		agent.set_action("echo", |arguments| async move {
			Ok(arguments.into_iter().next().unwrap_or(json!(null)))
		});
		let (client, mut rx) = test_client(&agent);

		handle_request(
			&agent,
			&client,
			r#"{"type":"ActionRequest","command":"echo","arguments":["hi"]}"#,
		)
		.await;

		let reply: CallResult = serde_json::from_str(&next_text(&mut rx).await).unwrap();
		assert_eq!(reply, CallResult::ok(json!("hi")));
	}

	#[tokio::test]
	async fn malformed_frames_get_an_error_reply() {
		let (agent, _) = ping_agent();
		let (client, mut rx) = test_client(&agent);

		handle_request(&agent, &client, "not json").await;
		let reply: CallResult = serde_json::from_str(&next_text(&mut rx).await).unwrap();
		assert!(reply.error.unwrap().starts_with("invalid request"));

		handle_request(&agent, &client, r#"{"type":"Bogus"}"#).await;
		let reply: CallResult = serde_json::from_str(&next_text(&mut rx).await).unwrap();
		assert!(reply.error.is_some());
	}

	#[tokio::test]
	async fn events_requests_register_and_ack() {
		let (agent, _) = ping_agent();
		let (client, mut rx) = test_client(&agent);

		handle_request(
			&agent,
			&client,
			r#"{"type":"EventsRequest","events":["ping"],"lastEventId":null}"#,
		)
		.await;

		let ack: CallResult = serde_json::from_str(&next_text(&mut rx).await).unwrap();
		assert_eq!(ack, CallResult::ok(json!(["ping"])));

		agent.inner.tracker.inject(3).await.unwrap();
		let event = next_text(&mut rx).await;
		assert!(event.contains("\"ping\""));
	}
}
