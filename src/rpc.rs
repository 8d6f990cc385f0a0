//! Request/response correlation over the one-way message bus.
//!
//! Outbound RPCs register a completion under a fresh request id; the
//! matching response resolves it exactly once. Unknown, duplicate, or
//! late responses are benign and simply find no entry. Sends whose
//! destination address is still unknown are pre-encoded and parked in
//! the deferred queue until the transport can resolve them; both
//! pending completions and deferred frames expire after a deadline so
//! a peer that never answers cannot leak table entries forever.

use std::collections::HashMap;
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::id::Identifier;
use crate::transport::Transport;
use crate::wire::MessageKind;

struct Pending<C> {
	expect: MessageKind,
	completion: C,
	expires_at: Instant,
}

struct DeferredSend {
	dest: Identifier,
	frame: Vec<u8>,
	expires_at: Instant,
}

/// The pending-RPC table. Generic over the completion token `C`; the
/// node decides what resolving a completion means.
pub struct RpcEngine<C> {
	next_request_id: u32,
	deadline: Duration,
	pending: HashMap<u32, Pending<C>>,
	deferred: Vec<DeferredSend>,
}

impl<C> RpcEngine<C> {
	pub fn new(deadline: Duration) -> Self {
		RpcEngine {
			// zero is reserved as the invalid request id
			next_request_id: 1,
			deadline,
			pending: HashMap::new(),
			deferred: Vec::new(),
		}
	}

	/// Hand out the next request id. Wraps around the u32 space, always
	/// skipping the reserved zero.
	pub fn allocate_request_id(&mut self) -> u32 {
		let id = self.next_request_id;
		self.next_request_id = match self.next_request_id.wrapping_add(1) {
			0 => 1,
			next => next,
		};
		id
	}

	/// Register `completion` to be resolved by a `expect` response
	/// carrying `request_id`.
	pub fn register(&mut self, request_id: u32, expect: MessageKind, completion: C) {
		self.pending.insert(request_id, Pending {
			expect,
			completion,
			expires_at: Instant::now() + self.deadline,
		});
	}

	/// Resolve a response: remove and return the completion iff the
	/// request id is known and the response kind matches what was
	/// registered. Anything else returns None and the caller drops the
	/// response.
	pub fn complete(&mut self, request_id: u32, kind: MessageKind) -> Option<C> {
		match self.pending.get(&request_id) {
			Some(pending) if pending.expect == kind => {}
			Some(pending) => {
				debug!(
					request_id,
					expected = ?pending.expect,
					received = ?kind,
					"response kind mismatch, dropping"
				);
				return None;
			}
			None => return None,
		}
		self.pending.remove(&request_id).map(|p| p.completion)
	}

	/// Park a pre-encoded frame until `dest` becomes resolvable.
	pub fn defer(&mut self, dest: Identifier, frame: Vec<u8>) {
		self.deferred.push(DeferredSend {
			dest,
			frame,
			expires_at: Instant::now() + self.deadline,
		});
	}

	/// Send every parked frame whose destination the transport can now
	/// resolve. Each frame is sent at most once; called once per
	/// maintenance tick and again when a Connect arrives. Returns how
	/// many frames went out.
	pub fn flush_deferred<T: Transport>(&mut self, transport: &T) -> usize {
		let mut sent = 0;
		self.deferred.retain(|deferred| {
			if transport.resolved_address(&deferred.dest).is_none() {
				return true;
			}
			if transport.send(&deferred.dest, &deferred.frame) {
				sent += 1;
				false
			} else {
				// address known but link refused; keep until deadline
				true
			}
		});
		sent
	}

	/// Drop everything past its deadline. Expired completions are
	/// returned so the node can log them; expired deferred frames are
	/// discarded outright.
	pub fn sweep_expired(&mut self, now: Instant) -> Vec<(u32, C)> {
		let expired: Vec<u32> = self
			.pending
			.iter()
			.filter(|(_, p)| p.expires_at <= now)
			.map(|(id, _)| *id)
			.collect();
		let mut swept = Vec::with_capacity(expired.len());
		for request_id in expired {
			if let Some(pending) = self.pending.remove(&request_id) {
				swept.push((request_id, pending.completion));
			}
		}

		let parked = self.deferred.len();
		self.deferred.retain(|d| d.expires_at > now);
		if self.deferred.len() < parked {
			debug!(dropped = parked - self.deferred.len(), "expired deferred frames");
		}

		swept
	}

	pub fn pending_len(&self) -> usize {
		self.pending.len()
	}

	pub fn deferred_len(&self) -> usize {
		self.deferred.len()
	}
}

#[cfg(test)]
mod tests {
	use super::*;

	use std::net::{Ipv4Addr, SocketAddrV4};
	use std::sync::Mutex;

	/// A transport that records outbound frames and resolves only the
	/// identifiers it has been told about.
	#[derive(Default)]
	struct RecordingTransport {
		known: Mutex<HashMap<Identifier, SocketAddrV4>>,
		sent: Mutex<Vec<(Identifier, Vec<u8>)>>,
	}

	impl Transport for RecordingTransport {
		fn register_receiver(
			&self,
			_inbound: tokio::sync::mpsc::Sender<Vec<u8>>,
		) -> tokio::task::JoinHandle<()> {
			tokio::spawn(async {})
		}

		fn send(&self, dest: &Identifier, frame: &[u8]) -> bool {
			if self.known.lock().unwrap().contains_key(dest) {
				self.sent.lock().unwrap().push((*dest, frame.to_vec()));
				true
			} else {
				false
			}
		}

		fn broadcast(&self, _frame: &[u8]) -> bool {
			true
		}

		fn resolved_address(&self, dest: &Identifier) -> Option<SocketAddrV4> {
			self.known.lock().unwrap().get(dest).copied()
		}

		fn insert(&self, id: Identifier, addr: Ipv4Addr, port: u16) {
			self.known.lock().unwrap().insert(id, SocketAddrV4::new(addr, port));
		}

		fn remove(&self, id: &Identifier) {
			self.known.lock().unwrap().remove(id);
		}
	}

	#[test]
	fn request_ids_skip_zero_and_wrap() {
		let mut engine: RpcEngine<()> = RpcEngine::new(Duration::from_secs(30));
		assert_eq!(engine.allocate_request_id(), 1);
		assert_eq!(engine.allocate_request_id(), 2);

		engine.next_request_id = u32::MAX;
		assert_eq!(engine.allocate_request_id(), u32::MAX);
		assert_eq!(engine.allocate_request_id(), 1);
	}

	#[tokio::test]
	async fn completion_resolves_exactly_once() {
		let mut engine: RpcEngine<&'static str> = RpcEngine::new(Duration::from_secs(30));
		engine.register(7, MessageKind::FindSuccessorResponse, "lookup");

		assert_eq!(engine.complete(7, MessageKind::FindSuccessorResponse), Some("lookup"));
		// a duplicate response finds nothing
		assert_eq!(engine.complete(7, MessageKind::FindSuccessorResponse), None);
	}

	#[tokio::test]
	async fn unknown_request_id_is_ignored() {
		let mut engine: RpcEngine<()> = RpcEngine::new(Duration::from_secs(30));
		assert_eq!(engine.complete(41, MessageKind::JoinResponse), None);
	}

	#[tokio::test]
	async fn kind_mismatch_leaves_the_entry_in_place() {
		let mut engine: RpcEngine<u8> = RpcEngine::new(Duration::from_secs(30));
		engine.register(9, MessageKind::GetNeighboursResponse, 1);

		assert_eq!(engine.complete(9, MessageKind::FindSuccessorResponse), None);
		assert_eq!(engine.complete(9, MessageKind::GetNeighboursResponse), Some(1));
	}

	#[tokio::test]
	async fn deferred_send_waits_for_resolution_then_fires_once() {
		let mut engine: RpcEngine<()> = RpcEngine::new(Duration::from_secs(30));
		let transport = RecordingTransport::default();
		let dest = Identifier::hash(b"10.9.9.9");

		engine.defer(dest, vec![1, 2, 3]);
		assert_eq!(engine.flush_deferred(&transport), 0);
		assert_eq!(engine.flush_deferred(&transport), 0);
		assert!(transport.sent.lock().unwrap().is_empty());

		transport.insert(dest, "10.9.9.9".parse().unwrap(), 4000);
		assert_eq!(engine.flush_deferred(&transport), 1);
		assert_eq!(engine.flush_deferred(&transport), 0);

		let sent = transport.sent.lock().unwrap();
		assert_eq!(sent.as_slice(), &[(dest, vec![1, 2, 3])]);
	}

	#[tokio::test(start_paused = true)]
	async fn expired_entries_are_swept() {
		let mut engine: RpcEngine<&'static str> = RpcEngine::new(Duration::from_secs(5));
		engine.register(1, MessageKind::JoinResponse, "join");
		engine.defer(Identifier::hash(b"nowhere"), vec![0]);

		tokio::time::advance(Duration::from_secs(6)).await;
		let swept = engine.sweep_expired(Instant::now());
		assert_eq!(swept, vec![(1, "join")]);
		assert_eq!(engine.pending_len(), 0);
		assert_eq!(engine.deferred_len(), 0);

		// the swept completion is gone for good
		assert_eq!(engine.complete(1, MessageKind::JoinResponse), None);
	}
}
