//! The periodic maintenance step: exactly one stabilise and one
//! finger refresh per tick, plus the deferred-send flush and the
//! pending-RPC deadline sweep.

use tokio::time::Instant;
use tracing::{info, warn};

use crate::id::Identifier;
use crate::transport::Transport;
use crate::wire::{Message, MessageKind};

use super::{ChordNode, Completion, LocalAction, Origin};

impl<T: Transport> ChordNode<T> {
	pub(crate) fn on_tick(&mut self) {
		self.stabilise();
		self.fix_fingers();
		self.engine.flush_deferred(&self.transport);
		for (request_id, _completion) in self.engine.sweep_expired(Instant::now()) {
			// dropping the completion closes any local caller's channel
			warn!(id = %self.id, request_id, "pending rpc expired without a response");
		}
	}

	/// Ask the successor for its neighbours; its predecessor may turn
	/// out to be a closer successor for us. A singleton evaluates the
	/// same rule against local state, which is how the first joiner
	/// gets adopted.
	pub(crate) fn stabilise(&mut self) {
		if self.successor == self.id {
			let candidate = self.predecessor;
			self.adopt_successor_candidate(candidate);
			self.notify_successor();
			return;
		}

		let request_id = self.engine.allocate_request_id();
		self.engine.register(
			request_id,
			MessageKind::GetNeighboursResponse,
			Completion::Local(LocalAction::StabiliseNeighbours),
		);
		let frame = Message::GetNeighbours { source_id: self.id, request_id }.encode();
		self.send_or_discover(self.successor, frame);
	}

	/// The successor-adoption half of stabilise: a reported predecessor
	/// strictly inside (us, successor) is closer than what we have.
	pub(crate) fn adopt_successor_candidate(&mut self, candidate: Option<Identifier>) {
		if let Some(candidate) = candidate {
			if candidate.in_open(&self.id, &self.successor) {
				info!(id = %self.id, successor = %candidate, "adopting closer successor");
				self.successor = candidate;
			}
		}
	}

	/// Tell the successor we believe we precede it. Skipped by a
	/// singleton; there is nobody to tell.
	pub(crate) fn notify_successor(&mut self) {
		if self.successor == self.id {
			return;
		}
		let frame = Message::Notify { node_id: self.id }.encode();
		self.send_or_discover(self.successor, frame);
	}

	/// Refresh one finger per tick: look up the successor of the
	/// entry's interval end and store the answer when it arrives.
	pub(crate) fn fix_fingers(&mut self) {
		let (index, target) = self.fingers.next_refresh_target();
		self.find_successor(target, Origin::Local(LocalAction::FingerRefresh(index)));
	}
}
