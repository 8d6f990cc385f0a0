//! Dispatch of decoded inbound messages. Every handler either answers
//! from local state or registers a completion and returns; nothing here
//! waits on the network.

use std::net::Ipv4Addr;

use tracing::{debug, warn};

use crate::id::Identifier;
use crate::transport::Transport;
use crate::wire::{Message, MessageKind};

use super::{ChordNode, Completion, LocalAction, Origin};

impl<T: Transport> ChordNode<T> {
	pub(crate) fn handle_frame(&mut self, frame: Vec<u8>) {
		match Message::decode(&frame) {
			Ok(message) => self.handle_message(message),
			Err(e) => warn!(id = %self.id, error = %e, "dropping malformed frame"),
		}
	}

	fn handle_message(&mut self, message: Message) {
		debug!(id = %self.id, ?message, "processing message");
		match message {
			Message::Join { address, request_id } => {
				self.handle_join(address, request_id);
			}
			Message::JoinResponse { address, request_id } => {
				self.handle_join_response(address, request_id);
			}
			Message::FindSuccessor { query_id, source_id, request_id } => {
				self.find_successor(query_id, Origin::Remote { source: source_id, request_id });
			}
			Message::FindSuccessorResponse { result_id, source_id, result_addr, request_id } => {
				self.handle_find_successor_response(result_id, source_id, result_addr, request_id);
			}
			Message::Notify { node_id } => {
				self.handle_notify(node_id);
			}
			Message::GetNeighbours { source_id, request_id } => {
				self.handle_get_neighbours(source_id, request_id);
			}
			Message::GetNeighboursResponse { predecessor, has_predecessor, request_id, .. } => {
				self.handle_get_neighbours_response(predecessor, has_predecessor, request_id);
			}
			Message::Connect { node_id, address } => {
				self.handle_connect(node_id, address);
			}
			Message::FindIp { target_id, source_id, source_addr, ttl } => {
				self.handle_find_ip(target_id, source_id, source_addr, ttl);
			}
		}
	}

	/// A new node announces itself: learn its address, answer with ours.
	fn handle_join(&mut self, address: Ipv4Addr, request_id: u32) {
		let joiner = Identifier::from_address(&address);
		debug!(id = %self.id, joiner = %joiner, "join request from {address}");
		self.transport.insert(joiner, address, self.config.port);
		let frame = Message::JoinResponse { address: self.addr, request_id }.encode();
		self.send_or_discover(joiner, frame);
	}

	/// Second half of our own join handshake: the member answered, so
	/// ask it who our successor is.
	fn handle_join_response(&mut self, address: Ipv4Addr, request_id: u32) {
		match self.engine.complete(request_id, MessageKind::JoinResponse) {
			Some(Completion::Local(LocalAction::JoinIntroduction(member))) => {
				self.transport.insert(member, address, self.config.port);
				let lookup_id = self.engine.allocate_request_id();
				self.engine.register(
					lookup_id,
					MessageKind::FindSuccessorResponse,
					Completion::Local(LocalAction::JoinSuccessor),
				);
				let frame = Message::FindSuccessor {
					query_id: self.id,
					source_id: self.id,
					request_id: lookup_id,
				}
				.encode();
				self.send_or_discover(member, frame);
			}
			Some(_) => warn!(id = %self.id, request_id, "join response resolved an unrelated completion"),
			None => debug!(id = %self.id, request_id, "unmatched join response dropped"),
		}
	}

	fn handle_find_successor_response(
		&mut self,
		result_id: Identifier,
		source_id: Identifier,
		result_addr: Ipv4Addr,
		request_id: u32,
	) {
		if result_id != self.id && !result_addr.is_unspecified() {
			self.transport.insert(result_id, result_addr, self.config.port);
		}
		match self.engine.complete(request_id, MessageKind::FindSuccessorResponse) {
			Some(Completion::Chained { requester, request_id: original }) => {
				// relay onward; the answer was never for us
				let frame = Message::FindSuccessorResponse {
					result_id,
					source_id: self.id,
					result_addr,
					request_id: original,
				}
				.encode();
				self.send_or_discover(requester, frame);
			}
			Some(Completion::Local(action)) => self.complete_local(action, result_id, result_addr),
			None => {
				debug!(id = %self.id, request_id, from = %source_id, "unmatched find-successor response dropped");
			}
		}
	}

	/// The sender believes it precedes us. Adopt it if we have no
	/// predecessor yet, or if it sits strictly between the current
	/// predecessor and us.
	fn handle_notify(&mut self, candidate: Identifier) {
		if candidate == self.id {
			return;
		}
		match &self.predecessor {
			Some(predecessor) if !candidate.in_open(predecessor, &self.id) => {
				// current predecessor is at least as close
			}
			_ => {
				debug!(id = %self.id, predecessor = %candidate, "adopting predecessor");
				self.predecessor = Some(candidate);
			}
		}
	}

	fn handle_get_neighbours(&mut self, source_id: Identifier, request_id: u32) {
		let frame = Message::GetNeighboursResponse {
			successor: self.successor,
			predecessor: self.predecessor.unwrap_or_else(Identifier::zero),
			source_id: self.id,
			has_predecessor: self.predecessor.is_some(),
			request_id,
		}
		.encode();
		self.send_or_discover(source_id, frame);
	}

	/// Completion of a stabilise round: maybe adopt the successor's
	/// predecessor as a closer successor, then notify whoever our
	/// successor now is.
	fn handle_get_neighbours_response(
		&mut self,
		predecessor: Identifier,
		has_predecessor: bool,
		request_id: u32,
	) {
		match self.engine.complete(request_id, MessageKind::GetNeighboursResponse) {
			Some(Completion::Local(LocalAction::StabiliseNeighbours)) => {
				self.adopt_successor_candidate(has_predecessor.then_some(predecessor));
				self.notify_successor();
			}
			Some(_) => warn!(id = %self.id, request_id, "neighbour response resolved an unrelated completion"),
			None => debug!(id = %self.id, request_id, "unmatched neighbour response dropped"),
		}
	}

	/// Direct answer to one of our FindIp broadcasts.
	fn handle_connect(&mut self, node_id: Identifier, address: Ipv4Addr) {
		if node_id == self.id || address.is_unspecified() {
			return;
		}
		debug!(id = %self.id, node = %node_id, "learned address {address}");
		self.transport.insert(node_id, address, self.config.port);
		// anything parked for this node can go out right away
		self.engine.flush_deferred(&self.transport);
	}

	/// Somebody is looking for an address. Answer directly when we can,
	/// otherwise keep the broadcast moving until its ttl runs out.
	fn handle_find_ip(
		&mut self,
		target_id: Identifier,
		source_id: Identifier,
		source_addr: Ipv4Addr,
		ttl: u32,
	) {
		if source_id == self.id || source_addr.is_unspecified() {
			return;
		}
		// the requester told us where it lives; remember that first so
		// the answer (or anything else) can reach it
		self.transport.insert(source_id, source_addr, self.config.port);

		if target_id == self.id {
			let frame = Message::Connect { node_id: self.id, address: self.addr }.encode();
			self.transport.send(&source_id, &frame);
		} else if let Some(known) = self.transport.resolved_address(&target_id) {
			let frame = Message::Connect { node_id: target_id, address: *known.ip() }.encode();
			self.transport.send(&source_id, &frame);
		} else if ttl > 1 {
			let frame = Message::FindIp {
				target_id,
				source_id,
				source_addr,
				ttl: ttl - 1,
			}
			.encode();
			self.transport.broadcast(&frame);
		}
		// ttl exhausted: the search dies here
	}
}
