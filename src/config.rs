use std::net::Ipv4Addr;
use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tokio::fs;

use crate::error::ConfigError;

/// Tunables for a single node. Everything has a sensible default; a
/// deployment usually only sets the address. Configuration may be loaded
/// from a JSON file, but chord runtime state is never persisted.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
	/// Address this node is reachable at; also the input to its ring id.
	pub ip: Ipv4Addr,
	/// The deployment-wide protocol port. The wire format carries bare
	/// IPv4 addresses, so every node of one ring listens on the same port.
	#[serde(default = "default_port")]
	pub port: u16,
	/// Milliseconds between maintenance ticks (stabilise + fix-fingers).
	#[serde(default = "default_tick_interval_ms")]
	pub tick_interval_ms: u64,
	/// Milliseconds before an unanswered RPC or undeliverable deferred
	/// frame is garbage-collected.
	#[serde(default = "default_rpc_deadline_ms")]
	pub rpc_deadline_ms: u64,
	/// Hop limit for FindIp discovery broadcasts.
	#[serde(default = "default_find_ip_ttl")]
	pub find_ip_ttl: u32,
	/// Capacity of the inbound frame and command queues.
	#[serde(default = "default_queue_capacity")]
	pub queue_capacity: usize,
}

fn default_port() -> u16 {
	5000
}

fn default_tick_interval_ms() -> u64 {
	1000
}

fn default_rpc_deadline_ms() -> u64 {
	30_000
}

fn default_find_ip_ttl() -> u32 {
	8
}

fn default_queue_capacity() -> usize {
	64
}

impl NodeConfig {
	pub fn new(ip: Ipv4Addr) -> Self {
		NodeConfig {
			ip,
			port: default_port(),
			tick_interval_ms: default_tick_interval_ms(),
			rpc_deadline_ms: default_rpc_deadline_ms(),
			find_ip_ttl: default_find_ip_ttl(),
			queue_capacity: default_queue_capacity(),
		}
	}

	pub async fn from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
		let raw = fs::read_to_string(path).await?;
		Ok(serde_json::from_str(&raw)?)
	}

	pub fn tick_interval(&self) -> Duration {
		Duration::from_millis(self.tick_interval_ms)
	}

	pub fn rpc_deadline(&self) -> Duration {
		Duration::from_millis(self.rpc_deadline_ms)
	}
}
