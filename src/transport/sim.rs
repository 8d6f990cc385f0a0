//! A deterministic in-memory network for tests and simulations.
//!
//! A [`SimNetwork`] is the shared medium: a routing table from IPv4
//! address to delivery queue. Each node gets its own [`SimTransport`]
//! endpoint with a private id-to-address table, so address discovery
//! behaves exactly as it does over a real network: knowing that a node
//! exists is not the same as knowing where it lives.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::{Arc, Mutex};

use tokio::sync::mpsc::{self, Sender, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use crate::id::Identifier;

use super::Transport;

#[derive(Clone, Default)]
pub struct SimNetwork {
	endpoints: Arc<Mutex<HashMap<Ipv4Addr, UnboundedSender<Vec<u8>>>>>,
}

impl SimNetwork {
	pub fn new() -> Self {
		Self::default()
	}

	/// Attach a new endpoint at `addr`. Frames sent to `addr` queue up
	/// until the endpoint's receiver task is started.
	pub fn endpoint(&self, addr: Ipv4Addr, port: u16) -> SimTransport {
		let (delivery_tx, delivery_rx) = mpsc::unbounded_channel();
		self.endpoints.lock().unwrap().insert(addr, delivery_tx);
		SimTransport {
			local: SocketAddrV4::new(addr, port),
			network: self.clone(),
			peers: Arc::new(Mutex::new(HashMap::new())),
			delivery: Arc::new(Mutex::new(Some(delivery_rx))),
		}
	}

	/// Detach the endpoint at `addr`; subsequent sends to it fail.
	pub fn drop_endpoint(&self, addr: &Ipv4Addr) {
		self.endpoints.lock().unwrap().remove(addr);
	}

	fn deliver(&self, addr: &Ipv4Addr, frame: &[u8]) -> bool {
		let endpoints = self.endpoints.lock().unwrap();
		match endpoints.get(addr) {
			Some(queue) => queue.send(frame.to_vec()).is_ok(),
			None => false,
		}
	}

	fn deliver_all_except(&self, skip: &Ipv4Addr, frame: &[u8]) -> bool {
		let endpoints = self.endpoints.lock().unwrap();
		let mut any = false;
		for (addr, queue) in endpoints.iter() {
			if addr != skip {
				any |= queue.send(frame.to_vec()).is_ok();
			}
		}
		any
	}
}

pub struct SimTransport {
	local: SocketAddrV4,
	network: SimNetwork,
	peers: Arc<Mutex<HashMap<Identifier, SocketAddrV4>>>,
	delivery: Arc<Mutex<Option<UnboundedReceiver<Vec<u8>>>>>,
}

impl SimTransport {
	pub fn local_addr(&self) -> SocketAddrV4 {
		self.local
	}

	/// Pull frames directly instead of forwarding to a node queue. Used
	/// by tests that play the role of a remote peer by hand.
	pub fn take_delivery(&self) -> Option<UnboundedReceiver<Vec<u8>>> {
		self.delivery.lock().unwrap().take()
	}
}

impl Transport for SimTransport {
	fn register_receiver(&self, inbound: Sender<Vec<u8>>) -> JoinHandle<()> {
		let mut delivery = self
			.delivery
			.lock()
			.unwrap()
			.take()
			.expect("receiver registered twice for one endpoint");
		tokio::spawn(async move {
			while let Some(frame) = delivery.recv().await {
				if inbound.send(frame).await.is_err() {
					break;
				}
			}
		})
	}

	fn send(&self, dest: &Identifier, frame: &[u8]) -> bool {
		let addr = match self.peers.lock().unwrap().get(dest) {
			Some(peer) => *peer.ip(),
			None => return false,
		};
		self.network.deliver(&addr, frame)
	}

	fn broadcast(&self, frame: &[u8]) -> bool {
		self.network.deliver_all_except(self.local.ip(), frame)
	}

	fn resolved_address(&self, dest: &Identifier) -> Option<SocketAddrV4> {
		self.peers.lock().unwrap().get(dest).copied()
	}

	fn insert(&self, id: Identifier, addr: Ipv4Addr, port: u16) {
		self.peers.lock().unwrap().insert(id, SocketAddrV4::new(addr, port));
	}

	fn remove(&self, id: &Identifier) {
		self.peers.lock().unwrap().remove(id);
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	#[tokio::test]
	async fn frames_route_by_inserted_address() {
		let network = SimNetwork::new();
		let a = network.endpoint("10.0.0.1".parse().unwrap(), 4000);
		let b = network.endpoint("10.0.0.2".parse().unwrap(), 4000);

		let b_id = Identifier::hash(b"10.0.0.2");
		assert!(!a.send(&b_id, b"hello"), "unknown address must not deliver");

		a.insert(b_id, "10.0.0.2".parse().unwrap(), 4000);
		assert!(a.send(&b_id, b"hello"));

		let mut delivery = b.take_delivery().unwrap();
		assert_eq!(delivery.recv().await.unwrap(), b"hello");
	}

	#[tokio::test]
	async fn broadcast_skips_the_sender() {
		let network = SimNetwork::new();
		let a = network.endpoint("10.0.0.1".parse().unwrap(), 4000);
		let b = network.endpoint("10.0.0.2".parse().unwrap(), 4000);
		let c = network.endpoint("10.0.0.3".parse().unwrap(), 4000);

		assert!(a.broadcast(b"ping"));

		let mut b_rx = b.take_delivery().unwrap();
		let mut c_rx = c.take_delivery().unwrap();
		assert_eq!(b_rx.recv().await.unwrap(), b"ping");
		assert_eq!(c_rx.recv().await.unwrap(), b"ping");

		let mut a_rx = a.take_delivery().unwrap();
		assert!(a_rx.try_recv().is_err(), "sender must not hear its own broadcast");
	}
}
