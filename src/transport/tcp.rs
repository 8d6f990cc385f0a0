//! Framed TCP transport.
//!
//! A listener task accepts inbound connections and reassembles frames
//! (fixed 8-byte header, then the declared payload) into the node's
//! work queue. Outbound traffic uses one lazily-connected writer task
//! per peer, fed through an unbounded channel so `send` never blocks
//! the processor loop. Connections are one-way: replies travel over the
//! peer's own outbound connection, which is what gives the bus its
//! one-way message semantics.

use std::collections::HashMap;
use std::net::{Ipv4Addr, SocketAddrV4};
use std::sync::{Arc, Mutex};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::mpsc::{self, Sender, UnboundedSender};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::id::Identifier;
use crate::wire::{declared_frame_len, HEADER_LEN};

use super::Transport;

struct PeerLink {
	addr: SocketAddrV4,
	writer: Option<UnboundedSender<Vec<u8>>>,
}

pub struct TcpTransport {
	listen_addr: SocketAddrV4,
	peers: Arc<Mutex<HashMap<Identifier, PeerLink>>>,
}

impl TcpTransport {
	pub fn new(listen_addr: SocketAddrV4) -> Self {
		TcpTransport {
			listen_addr,
			peers: Arc::new(Mutex::new(HashMap::new())),
		}
	}

	/// Queue a frame on the writer for `link`, connecting first if no
	/// live connection exists. Returns false only when a fresh writer
	/// could not be set up.
	fn queue_frame(link: &mut PeerLink, frame: &[u8]) -> bool {
		if let Some(writer) = &link.writer {
			if writer.send(frame.to_vec()).is_ok() {
				return true;
			}
			// connection task has died; reconnect below
			link.writer = None;
		}

		let (writer_tx, mut writer_rx) = mpsc::unbounded_channel::<Vec<u8>>();
		let addr = link.addr;
		tokio::spawn(async move {
			let mut stream = match TcpStream::connect(addr).await {
				Ok(stream) => stream,
				Err(e) => {
					warn!("failed to connect to {addr}: {e}");
					return;
				}
			};
			while let Some(frame) = writer_rx.recv().await {
				if let Err(e) = stream.write_all(&frame).await {
					warn!("write to {addr} failed: {e}");
					break;
				}
			}
		});

		let queued = writer_tx.send(frame.to_vec()).is_ok();
		link.writer = Some(writer_tx);
		queued
	}
}

impl Transport for TcpTransport {
	fn register_receiver(&self, inbound: Sender<Vec<u8>>) -> JoinHandle<()> {
		let listen_addr = self.listen_addr;
		tokio::spawn(async move {
			let listener = match TcpListener::bind(listen_addr).await {
				Ok(listener) => listener,
				Err(e) => {
					warn!("failed to bind {listen_addr}: {e}");
					return;
				}
			};
			info!("listening on {listen_addr}");
			loop {
				match listener.accept().await {
					Ok((stream, peer)) => {
						debug!("accepted connection from {peer}");
						tokio::spawn(read_frames(stream, inbound.clone()));
					}
					Err(e) => {
						warn!("accept failed: {e}");
					}
				}
			}
		})
	}

	fn send(&self, dest: &Identifier, frame: &[u8]) -> bool {
		let mut peers = self.peers.lock().unwrap();
		match peers.get_mut(dest) {
			Some(link) => Self::queue_frame(link, frame),
			None => false,
		}
	}

	fn broadcast(&self, frame: &[u8]) -> bool {
		let mut peers = self.peers.lock().unwrap();
		let mut any = false;
		for link in peers.values_mut() {
			any |= Self::queue_frame(link, frame);
		}
		any
	}

	fn resolved_address(&self, dest: &Identifier) -> Option<SocketAddrV4> {
		self.peers.lock().unwrap().get(dest).map(|link| link.addr)
	}

	fn insert(&self, id: Identifier, addr: Ipv4Addr, port: u16) {
		let mut peers = self.peers.lock().unwrap();
		let entry = peers.entry(id).or_insert(PeerLink {
			addr: SocketAddrV4::new(addr, port),
			writer: None,
		});
		// a moved peer gets a fresh connection on the next send
		if entry.addr != SocketAddrV4::new(addr, port) {
			entry.addr = SocketAddrV4::new(addr, port);
			entry.writer = None;
		}
	}

	fn remove(&self, id: &Identifier) {
		self.peers.lock().unwrap().remove(id);
	}
}

/// Reassemble length-prefixed frames from `stream` into `inbound` until
/// the peer hangs up.
async fn read_frames(mut stream: TcpStream, inbound: Sender<Vec<u8>>) {
	loop {
		let mut frame = vec![0u8; HEADER_LEN];
		if stream.read_exact(&mut frame).await.is_err() {
			break;
		}
		let total = match declared_frame_len(&frame) {
			Some(total) => total,
			None => break,
		};
		frame.resize(total, 0);
		if stream.read_exact(&mut frame[HEADER_LEN..]).await.is_err() {
			debug!("connection closed mid-frame");
			break;
		}
		if inbound.send(frame).await.is_err() {
			break;
		}
	}
}
