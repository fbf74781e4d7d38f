//! Control-plane request handlers.
//!
//! The REST/WebSocket transport is an external collaborator; the core only
//! defines the handler interface and the built-in handlers, discoverable
//! through the plugin registry. Handlers never touch the data plane beyond
//! reading statistics and requesting lifecycle transitions.

use serde_json::{json, Value};

use crate::error::{Error, Result};
use crate::gateway::Gateway;
use crate::registry::ApiFactory;


/// Environment variable counting API-initiated restarts across re-execs.
pub const API_RESTART_COUNT_ENV: &str = "VILLAS_API_RESTART_COUNT";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Method {
    Get,
    Post,
}

/// One control-plane endpoint.
pub trait ApiRequest: Send + Sync {
    fn name(&self) -> &'static str;

    /// Handle a request against the running gateway. Errors map to HTTP
    /// responses by the transport; they never affect the data plane.
    fn handle(&self, gateway: &Gateway, method: Method, body: &Value) -> Result<Value>;
}

fn require(method: Method, expected: Method) -> Result<()> {
    if method == expected {
        Ok(())
    } else {
        Err(Error::InvalidMethod)
    }
}

fn node_arg<'a>(gateway: &'a Gateway, body: &Value) -> Result<&'a std::sync::Arc<crate::node::Node>> {
    let name = body
        .get("node")
        .and_then(Value::as_str)
        .ok_or_else(|| Error::BadRequest("missing 'node'".into()))?;
    gateway
        .nodes()
        .by_name(name)
        .ok_or_else(|| Error::BadRequest(format!("no node '{name}'")))
}

/// `GET /capabilities`: registered plugin names and build identifiers.
struct Capabilities;

impl ApiRequest for Capabilities {
    fn name(&self) -> &'static str {
        "capabilities"
    }

    fn handle(&self, _gateway: &Gateway, method: Method, _body: &Value) -> Result<Value> {
        require(method, Method::Get)?;

        Ok(json!({
            "build": env!("CARGO_PKG_VERSION"),
            "nodes": crate::registry::nodes().map(|f| f.name).collect::<Vec<_>>(),
            "hooks": crate::registry::hooks().map(|f| f.name).collect::<Vec<_>>(),
            "formats": crate::registry::formats().map(|f| f.name).collect::<Vec<_>>(),
            "apis": crate::registry::api_requests().map(|f| f.name).collect::<Vec<_>>(),
        }))
    }
}

/// `GET /nodes`: every node with its state.
struct Nodes;

impl ApiRequest for Nodes {
    fn name(&self) -> &'static str {
        "nodes"
    }

    fn handle(&self, gateway: &Gateway, method: Method, _body: &Value) -> Result<Value> {
        require(method, Method::Get)?;
        Ok(Value::Array(
            gateway.nodes().iter().map(|n| n.to_json()).collect(),
        ))
    }
}

/// `GET /paths`: every path with its state.
struct Paths;

impl ApiRequest for Paths {
    fn name(&self) -> &'static str {
        "paths"
    }

    fn handle(&self, gateway: &Gateway, method: Method, _body: &Value) -> Result<Value> {
        require(method, Method::Get)?;
        Ok(Value::Array(
            gateway.paths().iter().map(|p| p.to_json()).collect(),
        ))
    }
}

/// `POST /node/{name}/{start|stop|pause|resume|restart}`.
struct NodeAction;

impl ApiRequest for NodeAction {
    fn name(&self) -> &'static str {
        "node_action"
    }

    fn handle(&self, gateway: &Gateway, method: Method, body: &Value) -> Result<Value> {
        require(method, Method::Post)?;
        let node = node_arg(gateway, body)?;

        let action = body
            .get("action")
            .and_then(Value::as_str)
            .ok_or_else(|| Error::BadRequest("missing 'action'".into()))?;

        match action {
            "start" => node.start()?,
            "stop" => node.stop()?,
            "pause" => node.pause()?,
            "resume" => node.resume()?,
            "restart" => node.restart()?,
            other => return Err(Error::BadRequest(format!("unknown action '{other}'"))),
        }

        Ok(node.to_json())
    }
}

/// `GET /node/{name}/stats`.
struct NodeStats;

impl ApiRequest for NodeStats {
    fn name(&self) -> &'static str {
        "node_stats"
    }

    fn handle(&self, gateway: &Gateway, method: Method, body: &Value) -> Result<Value> {
        require(method, Method::Get)?;
        Ok(node_arg(gateway, body)?.stats().to_json())
    }
}

/// `POST /node/{name}/stats/reset`.
struct NodeStatsReset;

impl ApiRequest for NodeStatsReset {
    fn name(&self) -> &'static str {
        "node_stats_reset"
    }

    fn handle(&self, gateway: &Gateway, method: Method, body: &Value) -> Result<Value> {
        require(method, Method::Post)?;
        node_arg(gateway, body)?.stats().reset();
        Ok(json!({ "ok": true }))
    }
}

/// `POST /restart`: ask the front-end to re-exec the process. The core only
/// counts the request; the actual exec is the CLI's job.
struct Restart;

impl ApiRequest for Restart {
    fn name(&self) -> &'static str {
        "restart"
    }

    fn handle(&self, _gateway: &Gateway, method: Method, _body: &Value) -> Result<Value> {
        require(method, Method::Post)?;

        let count: u64 = std::env::var(API_RESTART_COUNT_ENV)
            .ok()
            .and_then(|v| v.parse().ok())
            .unwrap_or(0)
            + 1;
        std::env::set_var(API_RESTART_COUNT_ENV, count.to_string());

        Ok(json!({ "restarts": count }))
    }
}

/// `GET /metrics`: Prometheus text exposition of node and path statistics.
struct Metrics;

impl ApiRequest for Metrics {
    fn name(&self) -> &'static str {
        "metrics"
    }

    fn handle(&self, gateway: &Gateway, method: Method, _body: &Value) -> Result<Value> {
        require(method, Method::Get)?;

        use std::fmt::Write;
        use std::sync::atomic::Ordering;

        let mut text = String::new();
        for node in gateway.nodes().iter() {
            let c = &node.stats().counters;
            let name = node.name();
            let _ = writeln!(
                text,
                "gateway_node_reorder_dropped_total{{node=\"{name}\"}} {}",
                c.reorder_dropped.load(Ordering::Relaxed)
            );
            let _ = writeln!(
                text,
                "gateway_node_queue_overrun_total{{node=\"{name}\"}} {}",
                c.queue_overrun.load(Ordering::Relaxed)
            );
            let owd = node
                .stats()
                .get(crate::stats::Metric::Owd, crate::stats::StatType::Mean);
            if owd.is_finite() {
                let _ = writeln!(text, "gateway_node_owd_seconds{{node=\"{name}\"}} {owd}");
            }
        }
        for path in gateway.paths().iter() {
            let _ = writeln!(
                text,
                "gateway_path_skipped_total{{path=\"{}\"}} {}",
                path.name(),
                path.stats().counters.skipped.load(Ordering::Relaxed)
            );
        }

        Ok(Value::String(text))
    }
}

/// Factories for the built-in handlers, consumed by [`registry::init`][crate::registry::init].
pub fn factories() -> Vec<ApiFactory> {
    vec![
        ApiFactory {
            name: "capabilities",
            description: "Registered plugin names and build identifiers",
            make: || Box::new(Capabilities),
        },
        ApiFactory {
            name: "nodes",
            description: "List nodes and their state",
            make: || Box::new(Nodes),
        },
        ApiFactory {
            name: "paths",
            description: "List paths and their state",
            make: || Box::new(Paths),
        },
        ApiFactory {
            name: "node_action",
            description: "Start, stop, pause, resume or restart a node",
            make: || Box::new(NodeAction),
        },
        ApiFactory {
            name: "node_stats",
            description: "Statistics of one node",
            make: || Box::new(NodeStats),
        },
        ApiFactory {
            name: "node_stats_reset",
            description: "Reset statistics of one node",
            make: || Box::new(NodeStatsReset),
        },
        ApiFactory {
            name: "restart",
            description: "Request a process restart from the front-end",
            make: || Box::new(Restart),
        },
        ApiFactory {
            name: "metrics",
            description: "Prometheus text exposition",
            make: || Box::new(Metrics),
        },
    ]
}
