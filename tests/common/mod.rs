use std::net::Ipv4Addr;

use chord_ring::{ChordNode, Identifier, NodeConfig, NodeHandle, SimNetwork};
use tokio::time::{sleep, Duration};

/// The address of the i-th test node (1-based).
pub fn addr_of(i: u32) -> Ipv4Addr {
	Ipv4Addr::new(10, 0, 0, i as u8)
}

pub fn ring_id_of(i: u32) -> Identifier {
	Identifier::from_address(&addr_of(i))
}

/// Fast maintenance for tests; real deployments tick once a second.
pub fn test_config(ip: Ipv4Addr) -> NodeConfig {
	let mut config = NodeConfig::new(ip);
	config.tick_interval_ms = 50;
	config.rpc_deadline_ms = 5_000;
	config
}

/// Spin up `qty` nodes on one simulated network. The first creates the
/// ring; the rest join through it sequentially.
pub async fn make_nodes(network: &SimNetwork, qty: u32) -> Vec<NodeHandle> {
	let mut handles = Vec::new();
	for i in 1..=qty {
		let ip = addr_of(i);
		let config = test_config(ip);
		let transport = network.endpoint(ip, config.port);
		let node = ChordNode::new(config, transport);
		let (handle, _task) = if i == 1 {
			node.start(None)
		} else {
			node.start(Some(addr_of(1)))
		};
		handles.push(handle);
		// give each node a moment to find its place before the next joins
		sleep(Duration::from_millis(500)).await;
	}
	handles
}

/// Let the ring run maintenance for `secs` of (paused-clock) time.
pub async fn settle(secs: u64) {
	sleep(Duration::from_secs(secs)).await;
}
