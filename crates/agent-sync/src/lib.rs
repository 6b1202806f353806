//! Concurrency primitives for the chain agent.
//!
//! Everything in the agent is asynchronous tasks multiplexed on the tokio
//! runtime, so ordering between independently-scheduled chains of work is
//! never automatic. The two primitives here enforce it where it matters:
//! [`EventBus`] correlates asynchronous results back to waiting callers, and
//! [`SerialQueue`] forces a set of async jobs into one total order.

mod event_bus;
mod serial_queue;

pub use event_bus::EventBus;
pub use serial_queue::SerialQueue;
