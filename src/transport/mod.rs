//! The seam between the protocol engine and the outside world.
//!
//! A [`Transport`] moves opaque frames between nodes and keeps the
//! id-to-address resolution table. The node never blocks on it: `send`
//! and `broadcast` only queue bytes, and inbound frames arrive through
//! the channel handed to `register_receiver`. Two implementations ship
//! with the crate: a deterministic in-memory network for tests and a
//! framed TCP transport.

use std::net::{Ipv4Addr, SocketAddrV4};

use tokio::sync::mpsc::Sender;
use tokio::task::JoinHandle;

use crate::id::Identifier;

pub mod sim;
pub mod tcp;

pub use sim::{SimNetwork, SimTransport};
pub use tcp::TcpTransport;

pub trait Transport: Send + Sync + 'static {
	/// Start delivering inbound frames into `inbound`. The returned task
	/// owns the listener; aborting it stops delivery.
	fn register_receiver(&self, inbound: Sender<Vec<u8>>) -> JoinHandle<()>;

	/// Queue a frame for the node with identifier `dest`. Returns false
	/// when the destination's address is unknown or the link is down;
	/// the caller falls back to address discovery, never to an error.
	fn send(&self, dest: &Identifier, frame: &[u8]) -> bool;

	/// Queue a frame for every reachable peer.
	fn broadcast(&self, frame: &[u8]) -> bool;

	/// The network address currently known for `dest`, if any.
	fn resolved_address(&self, dest: &Identifier) -> Option<SocketAddrV4>;

	/// Record that `id` lives at `addr:port`.
	fn insert(&self, id: Identifier, addr: Ipv4Addr, port: u16);

	/// Forget everything known about `id`.
	fn remove(&self, id: &Identifier);
}
