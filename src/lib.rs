//! Real-time gateway core that streams timestamped, multi-channel sample
//! vectors between heterogeneous endpoints at rates from hundreds of Hz to
//! tens of kHz with bounded latency.
//!
//! A gateway process is configured with a set of [nodes](node) (bidirectional
//! endpoints speaking a concrete protocol) and a set of [paths](path)
//! (directed flows that read from one or more source nodes, transform the
//! sample stream through a chain of [hooks](hook), and forward it to one or
//! more destination nodes).
//!
//! ## Example
//!
//! Wire two in-process loopback nodes together and let a path forward
//! samples between them:
//!
//! ```rust
//! use serde_json::json;
//! use sample_gateway::gateway::Gateway;
//!
//! sample_gateway::registry::init();
//!
//! let config = json!({
//!     "nodes": {
//!         "src": { "type": "loopback", "in": { "signals": [
//!             { "name": "voltage", "type": "float" },
//!         ] } },
//!         "dst": { "type": "loopback" },
//!     },
//!     "paths": [
//!         { "in": "src", "out": "dst" },
//!     ],
//! });
//!
//! let mut gw = Gateway::new();
//! gw.parse(&config).unwrap();
//! gw.check().unwrap();
//! gw.prepare().unwrap();
//! gw.start().unwrap();
//! // Samples written to "src" now arrive at "dst".
//! gw.stop().unwrap();
//! ```
//!
//! The hot path never allocates: samples are drawn from per-node
//! [pools](pool) backed by a pluggable [memory type](memory), handed between
//! threads through lock-free [queues](queue) and released by explicit
//! reference counting.

pub mod api;
pub mod error;
mod ffi;
pub mod format;
pub mod gateway;
pub mod hook;
pub mod log;
pub mod mapping;
pub mod memory;
pub mod node;
pub mod path;
pub mod pool;
pub mod queue;
pub mod registry;
pub mod sample;
pub mod signal;
pub mod stats;
pub mod timing;
