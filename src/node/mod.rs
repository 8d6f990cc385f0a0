//! The chord node itself: identity, neighbours, finger table, and the
//! single-writer processor loop that owns all of them.
//!
//! There is no explicit membership state machine; membership is implicit
//! in (predecessor, successor). A fresh node is a singleton ring whose
//! successor is itself. Handlers never block on the network: they answer
//! from local state or register a completion with the
//! [`RpcEngine`](crate::rpc::RpcEngine) and return.

use std::net::Ipv4Addr;

use tokio::sync::mpsc::{channel, Receiver, Sender};
use tokio::sync::oneshot;
use tokio::task::JoinHandle;
use tokio::time::{interval, MissedTickBehavior};
use tracing::{debug, info, warn};

use crate::config::NodeConfig;
use crate::error::NodeError;
use crate::finger_table::FingerTable;
use crate::id::Identifier;
use crate::rpc::RpcEngine;
use crate::transport::Transport;
use crate::wire::{Message, MessageKind};

mod handlers;
mod maintenance;

/// What resolving a pending response means to this node.
pub(crate) enum Completion {
	/// Deliver the result to local state or a local caller.
	Local(LocalAction),
	/// We forwarded someone else's lookup: relay the result onward under
	/// the requester's own correlation id. The local node keeps nothing.
	Chained {
		requester: Identifier,
		request_id: u32,
	},
}

pub(crate) enum LocalAction {
	/// An API caller is waiting on this lookup.
	Lookup(oneshot::Sender<(Identifier, Ipv4Addr)>),
	/// Store the result into finger table entry `index`.
	FingerRefresh(usize),
	/// A join handshake: the member we contacted answers with its
	/// canonical address, then we ask it for our successor.
	JoinIntroduction(Identifier),
	/// The join lookup resolved: adopt the result as successor.
	JoinSuccessor,
	/// A stabilise round: the successor reported its neighbours.
	StabiliseNeighbours,
}

/// Where a find-successor request came from, which decides where the
/// answer goes.
pub(crate) enum Origin {
	Remote {
		source: Identifier,
		request_id: u32,
	},
	Local(LocalAction),
}

/// Requests an owner of a [`NodeHandle`] can make of the processor.
pub enum Command {
	Lookup {
		target: Identifier,
		respond_to: oneshot::Sender<(Identifier, Ipv4Addr)>,
	},
	Join {
		known: Ipv4Addr,
	},
	Neighbours {
		respond_to: oneshot::Sender<(Option<Identifier>, Identifier)>,
	},
	NodeId {
		respond_to: oneshot::Sender<(Identifier, Ipv4Addr)>,
	},
	Shutdown,
}

/// A chord node. Created with [`ChordNode::new`], then consumed by
/// [`ChordNode::start`], which spawns the processor task and returns a
/// [`NodeHandle`] for talking to it.
pub struct ChordNode<T: Transport> {
	// Core data
	id: Identifier,
	addr: Ipv4Addr,
	config: NodeConfig,
	predecessor: Option<Identifier>,
	successor: Identifier,
	fingers: FingerTable,

	// Request correlation and the outside world
	engine: RpcEngine<Completion>,
	transport: T,

	// Work queues
	frames_rx: Receiver<Vec<u8>>,
	frames_tx: Sender<Vec<u8>>,
	commands_rx: Receiver<Command>,
	commands_tx: Sender<Command>,
}

impl<T: Transport> ChordNode<T> {
	pub fn new(config: NodeConfig, transport: T) -> Self {
		let id = Identifier::from_address(&config.ip);
		let (frames_tx, frames_rx) = channel(config.queue_capacity);
		let (commands_tx, commands_rx) = channel(config.queue_capacity);
		ChordNode {
			// Core data
			id,
			addr: config.ip,
			predecessor: None,
			successor: id,
			fingers: FingerTable::new(id),

			engine: RpcEngine::new(config.rpc_deadline()),
			transport,
			config,

			// Work queues
			frames_rx,
			frames_tx,
			commands_rx,
			commands_tx,
		}
	}

	pub fn id(&self) -> Identifier {
		self.id
	}

	/// A handle for the processor; may be taken before or after start.
	pub fn handle(&self) -> NodeHandle {
		NodeHandle { commands: self.commands_tx.clone() }
	}

	/// Start a brand new singleton ring.
	pub fn create(config: NodeConfig, transport: T) -> (NodeHandle, JoinHandle<()>) {
		Self::new(config, transport).start(None)
	}

	/// Start the processor task. With `join_target` set, the node joins
	/// the ring that address belongs to; otherwise it creates one.
	pub fn start(self, join_target: Option<Ipv4Addr>) -> (NodeHandle, JoinHandle<()>) {
		let handle = self.handle();
		let receiver_task = self.transport.register_receiver(self.frames_tx.clone());
		let processor = tokio::spawn(async move {
			self.run(join_target).await;
			receiver_task.abort();
		});
		(handle, processor)
	}

	async fn run(mut self, join_target: Option<Ipv4Addr>) {
		info!(id = %self.id, addr = %self.addr, "node starting");
		if let Some(known) = join_target {
			self.begin_join(known);
		}

		let mut ticker = interval(self.config.tick_interval());
		ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
		// consume the interval's immediate first fire so a fresh node
		// does not stabilise before its join handshake is even out
		ticker.tick().await;

		loop {
			tokio::select! {
				maybe_frame = self.frames_rx.recv() => match maybe_frame {
					Some(frame) => self.handle_frame(frame),
					None => break,
				},
				maybe_command = self.commands_rx.recv() => match maybe_command {
					Some(Command::Shutdown) => {
						self.drain();
						break;
					}
					Some(command) => self.handle_command(command),
					None => break,
				},
				_ = ticker.tick() => self.on_tick(),
			}
		}
		info!(id = %self.id, "processor terminating");
	}

	/// Stop accepting work, then run down whatever was already queued.
	/// Responses arriving after this go nowhere and harm nothing.
	fn drain(&mut self) {
		self.frames_rx.close();
		self.commands_rx.close();
		while let Ok(frame) = self.frames_rx.try_recv() {
			self.handle_frame(frame);
		}
		while let Ok(command) = self.commands_rx.try_recv() {
			if !matches!(command, Command::Shutdown) {
				self.handle_command(command);
			}
		}
	}

	fn handle_command(&mut self, command: Command) {
		match command {
			Command::Lookup { target, respond_to } => {
				self.find_successor(target, Origin::Local(LocalAction::Lookup(respond_to)));
			}
			Command::Join { known } => self.begin_join(known),
			Command::Neighbours { respond_to } => {
				let _ = respond_to.send((self.predecessor, self.successor));
			}
			Command::NodeId { respond_to } => {
				let _ = respond_to.send((self.id, self.addr));
			}
			// intercepted by the run loop
			Command::Shutdown => {}
		}
	}

	/// Open the join handshake with a known member of an existing ring.
	fn begin_join(&mut self, known: Ipv4Addr) {
		// a (re)join always forgets any stale predecessor
		self.predecessor = None;
		let member = Identifier::from_address(&known);
		self.transport.insert(member, known, self.config.port);

		let request_id = self.engine.allocate_request_id();
		self.engine.register(
			request_id,
			MessageKind::JoinResponse,
			Completion::Local(LocalAction::JoinIntroduction(member)),
		);
		let frame = Message::Join { address: self.addr, request_id }.encode();
		info!(id = %self.id, member = %member, "joining ring via {known}");
		self.send_or_discover(member, frame);
	}

	/// The recursive lookup at the heart of the protocol. Resolves
	/// immediately when the target falls to our successor, otherwise
	/// forwards one hop closer and leaves a completion behind.
	pub(crate) fn find_successor(&mut self, target: Identifier, origin: Origin) {
		if target.in_left_open(&self.id, &self.successor) {
			let successor = self.successor;
			self.deliver(origin, successor);
			return;
		}

		let hop = self.fingers.closest_preceding(&target);
		if hop == self.id {
			// no finger precedes the target; our successor is the best answer
			let successor = self.successor;
			self.deliver(origin, successor);
			return;
		}

		let hop_request_id = self.engine.allocate_request_id();
		let completion = match origin {
			Origin::Remote { source, request_id } => Completion::Chained { requester: source, request_id },
			Origin::Local(action) => Completion::Local(action),
		};
		self.engine.register(hop_request_id, MessageKind::FindSuccessorResponse, completion);
		let frame = Message::FindSuccessor {
			query_id: target,
			source_id: self.id,
			request_id: hop_request_id,
		}
		.encode();
		self.send_or_discover(hop, frame);
	}

	/// Route a resolved lookup result back to wherever it was wanted.
	fn deliver(&mut self, origin: Origin, result: Identifier) {
		let result_addr = self.address_of(&result);
		match origin {
			Origin::Remote { source, request_id } => {
				let frame = Message::FindSuccessorResponse {
					result_id: result,
					source_id: self.id,
					result_addr,
					request_id,
				}
				.encode();
				self.send_or_discover(source, frame);
			}
			Origin::Local(action) => self.complete_local(action, result, result_addr),
		}
	}

	pub(crate) fn complete_local(&mut self, action: LocalAction, result: Identifier, result_addr: Ipv4Addr) {
		match action {
			LocalAction::Lookup(respond_to) => {
				let _ = respond_to.send((result, result_addr));
			}
			LocalAction::FingerRefresh(index) => {
				self.fingers.update(index, result);
			}
			LocalAction::JoinSuccessor => {
				info!(id = %self.id, successor = %result, "joined ring");
				self.successor = result;
				// one immediate stabilise pass, per the join procedure
				self.stabilise();
			}
			LocalAction::JoinIntroduction(_) | LocalAction::StabiliseNeighbours => {
				warn!(id = %self.id, "completion does not take a lookup result; dropping");
			}
		}
	}

	/// Best known address for `id`, `0.0.0.0` when there is none.
	fn address_of(&self, id: &Identifier) -> Ipv4Addr {
		if *id == self.id {
			self.addr
		} else {
			self.transport
				.resolved_address(id)
				.map(|sock| *sock.ip())
				.unwrap_or(Ipv4Addr::UNSPECIFIED)
		}
	}

	/// Send now when the destination resolves, otherwise kick off
	/// address discovery and park the frame until it does. A failed
	/// send is never surfaced as an error.
	pub(crate) fn send_or_discover(&mut self, dest: Identifier, frame: Vec<u8>) {
		if self.transport.resolved_address(&dest).is_some() && self.transport.send(&dest, &frame) {
			return;
		}
		debug!(id = %self.id, dest = %dest, "destination unresolved, deferring send");
		self.find_ip(&dest);
		self.engine.defer(dest, frame);
	}

	/// Broadcast a TTL-bounded request for the address of `target`.
	pub(crate) fn find_ip(&mut self, target: &Identifier) {
		let frame = Message::FindIp {
			target_id: *target,
			source_id: self.id,
			source_addr: self.addr,
			ttl: self.config.find_ip_ttl,
		}
		.encode();
		self.transport.broadcast(&frame);
	}
}

/// A cheaply clonable handle to a running node's processor.
#[derive(Clone)]
pub struct NodeHandle {
	commands: Sender<Command>,
}

impl NodeHandle {
	/// Resolve the node responsible for `target`. Fails if the node
	/// shuts down or abandons the lookup at its RPC deadline.
	pub async fn lookup(&self, target: Identifier) -> Result<(Identifier, Ipv4Addr), NodeError> {
		let (respond_to, response) = oneshot::channel();
		self.commands
			.send(Command::Lookup { target, respond_to })
			.await
			.map_err(|_| NodeError::Shutdown)?;
		response.await.map_err(|_| NodeError::LookupFailed)
	}

	/// Ask the node to join the ring that `known` belongs to.
	pub async fn join(&self, known: Ipv4Addr) -> Result<(), NodeError> {
		self.commands
			.send(Command::Join { known })
			.await
			.map_err(|_| NodeError::Shutdown)
	}

	/// The node's current (predecessor, successor) pair.
	pub async fn neighbours(&self) -> Result<(Option<Identifier>, Identifier), NodeError> {
		let (respond_to, response) = oneshot::channel();
		self.commands
			.send(Command::Neighbours { respond_to })
			.await
			.map_err(|_| NodeError::Shutdown)?;
		response.await.map_err(|_| NodeError::Shutdown)
	}

	/// The node's own identifier and address.
	pub async fn node_id(&self) -> Result<(Identifier, Ipv4Addr), NodeError> {
		let (respond_to, response) = oneshot::channel();
		self.commands
			.send(Command::NodeId { respond_to })
			.await
			.map_err(|_| NodeError::Shutdown)?;
		response.await.map_err(|_| NodeError::Shutdown)
	}

	/// Stop the processor: no new work is accepted, queued work is
	/// drained, then the task exits.
	pub async fn shutdown(&self) {
		let _ = self.commands.send(Command::Shutdown).await;
	}
}
