//! The inter-node wire format.
//!
//! Every frame is `version (2B) | kind (4B) | payload length (2B) | payload`,
//! all scalars big-endian regardless of host byte order. The framing layout
//! is the compatibility contract between nodes; the in-memory shape of
//! [`Message`] is not. A receiver validates the version, the kind, and the
//! declared payload length against both the kind's fixed payload size and
//! the actual buffer before touching any field.

use std::net::Ipv4Addr;

use bytes::{Buf, BufMut, BytesMut};

use crate::error::WireError;
use crate::id::{Identifier, ID_BYTES};

/// The only protocol version currently spoken.
pub const PROTOCOL_VERSION: u16 = 0x0001;

/// Size of the fixed frame header: version + kind + payload length.
pub const HEADER_LEN: usize = 8;

const ADDR_LEN: usize = 4;
const REQUEST_ID_LEN: usize = 4;

/// Frame type tags. Values are grouped in blocks: 0x000000xx for ring
/// membership, 0x000002xx for chord routing and maintenance, 0x000003xx
/// for address discovery.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u32)]
pub enum MessageKind {
	Join = 0x0000_0001,
	JoinResponse = 0x0000_0002,

	FindSuccessor = 0x0000_0201,
	FindSuccessorResponse = 0x0000_0202,
	Notify = 0x0000_0203,
	GetNeighbours = 0x0000_0204,
	GetNeighboursResponse = 0x0000_0205,

	Connect = 0x0000_0301,
	FindIp = 0x0000_0302,
}

impl MessageKind {
	fn from_u32(value: u32) -> Option<MessageKind> {
		match value {
			0x0000_0001 => Some(MessageKind::Join),
			0x0000_0002 => Some(MessageKind::JoinResponse),
			0x0000_0201 => Some(MessageKind::FindSuccessor),
			0x0000_0202 => Some(MessageKind::FindSuccessorResponse),
			0x0000_0203 => Some(MessageKind::Notify),
			0x0000_0204 => Some(MessageKind::GetNeighbours),
			0x0000_0205 => Some(MessageKind::GetNeighboursResponse),
			0x0000_0301 => Some(MessageKind::Connect),
			0x0000_0302 => Some(MessageKind::FindIp),
			_ => None,
		}
	}

	/// Every kind has a fixed payload size.
	fn payload_len(&self) -> usize {
		match self {
			MessageKind::Join => ADDR_LEN + REQUEST_ID_LEN,
			MessageKind::JoinResponse => ADDR_LEN + REQUEST_ID_LEN,
			MessageKind::FindSuccessor => 2 * ID_BYTES + REQUEST_ID_LEN,
			MessageKind::FindSuccessorResponse => 2 * ID_BYTES + ADDR_LEN + REQUEST_ID_LEN,
			MessageKind::Notify => ID_BYTES,
			MessageKind::GetNeighbours => ID_BYTES + REQUEST_ID_LEN,
			MessageKind::GetNeighboursResponse => 3 * ID_BYTES + 1 + REQUEST_ID_LEN,
			MessageKind::Connect => ID_BYTES + ADDR_LEN,
			MessageKind::FindIp => 2 * ID_BYTES + ADDR_LEN + 4,
		}
	}
}

/// A decoded inter-node message. `request_id` fields are opaque
/// correlation tokens, unrelated to the identifier space; zero is
/// reserved and never allocated. Addresses are IPv4 with `0.0.0.0`
/// standing in for "unknown".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
	/// A joining node announces its own address to a known member.
	Join { address: Ipv4Addr, request_id: u32 },
	/// The member answers with its own canonical address.
	JoinResponse { address: Ipv4Addr, request_id: u32 },

	/// Who is the successor of `query_id`? `source_id` receives the answer.
	FindSuccessor {
		query_id: Identifier,
		source_id: Identifier,
		request_id: u32,
	},
	FindSuccessorResponse {
		result_id: Identifier,
		source_id: Identifier,
		result_addr: Ipv4Addr,
		request_id: u32,
	},
	/// The sender believes it is the receiver's predecessor.
	Notify { node_id: Identifier },
	GetNeighbours { source_id: Identifier, request_id: u32 },
	GetNeighboursResponse {
		successor: Identifier,
		predecessor: Identifier,
		source_id: Identifier,
		has_predecessor: bool,
		request_id: u32,
	},

	/// Direct answer to a FindIp broadcast: `node_id` lives at `address`.
	Connect { node_id: Identifier, address: Ipv4Addr },
	/// TTL-bounded broadcast looking for the address of `target_id`.
	FindIp {
		target_id: Identifier,
		source_id: Identifier,
		source_addr: Ipv4Addr,
		ttl: u32,
	},
}

impl Message {
	pub fn kind(&self) -> MessageKind {
		match self {
			Message::Join { .. } => MessageKind::Join,
			Message::JoinResponse { .. } => MessageKind::JoinResponse,
			Message::FindSuccessor { .. } => MessageKind::FindSuccessor,
			Message::FindSuccessorResponse { .. } => MessageKind::FindSuccessorResponse,
			Message::Notify { .. } => MessageKind::Notify,
			Message::GetNeighbours { .. } => MessageKind::GetNeighbours,
			Message::GetNeighboursResponse { .. } => MessageKind::GetNeighboursResponse,
			Message::Connect { .. } => MessageKind::Connect,
			Message::FindIp { .. } => MessageKind::FindIp,
		}
	}

	/// Encode into a fresh frame: header then payload, all big-endian.
	pub fn encode(&self) -> Vec<u8> {
		let kind = self.kind();
		let payload_len = kind.payload_len();
		let mut buf = BytesMut::with_capacity(HEADER_LEN + payload_len);

		buf.put_u16(PROTOCOL_VERSION);
		buf.put_u32(kind as u32);
		buf.put_u16(payload_len as u16);

		match self {
			Message::Join { address, request_id }
			| Message::JoinResponse { address, request_id } => {
				put_addr(&mut buf, address);
				buf.put_u32(*request_id);
			}
			Message::FindSuccessor { query_id, source_id, request_id } => {
				put_id(&mut buf, query_id);
				put_id(&mut buf, source_id);
				buf.put_u32(*request_id);
			}
			Message::FindSuccessorResponse { result_id, source_id, result_addr, request_id } => {
				put_id(&mut buf, result_id);
				put_id(&mut buf, source_id);
				put_addr(&mut buf, result_addr);
				buf.put_u32(*request_id);
			}
			Message::Notify { node_id } => {
				put_id(&mut buf, node_id);
			}
			Message::GetNeighbours { source_id, request_id } => {
				put_id(&mut buf, source_id);
				buf.put_u32(*request_id);
			}
			Message::GetNeighboursResponse {
				successor,
				predecessor,
				source_id,
				has_predecessor,
				request_id,
			} => {
				put_id(&mut buf, successor);
				put_id(&mut buf, predecessor);
				put_id(&mut buf, source_id);
				buf.put_u8(*has_predecessor as u8);
				buf.put_u32(*request_id);
			}
			Message::Connect { node_id, address } => {
				put_id(&mut buf, node_id);
				put_addr(&mut buf, address);
			}
			Message::FindIp { target_id, source_id, source_addr, ttl } => {
				put_id(&mut buf, target_id);
				put_id(&mut buf, source_id);
				put_addr(&mut buf, source_addr);
				buf.put_u32(*ttl);
			}
		}

		buf.to_vec()
	}

	/// Decode a complete frame. Malformed input is an error value, never
	/// a panic; the dispatch loop logs and drops it.
	pub fn decode(frame: &[u8]) -> Result<Message, WireError> {
		if frame.len() < HEADER_LEN {
			return Err(WireError::Truncated { needed: HEADER_LEN, actual: frame.len() });
		}

		let mut buf = frame;
		let version = buf.get_u16();
		if version != PROTOCOL_VERSION {
			return Err(WireError::UnsupportedVersion(version));
		}

		let raw_kind = buf.get_u32();
		let kind = MessageKind::from_u32(raw_kind).ok_or(WireError::UnknownKind(raw_kind))?;

		let declared = buf.get_u16() as usize;
		let required = kind.payload_len();
		let actual = buf.remaining();
		if declared != required || actual != required {
			return Err(WireError::PayloadLength { kind, declared, required, actual });
		}

		let message = match kind {
			MessageKind::Join => Message::Join {
				address: get_addr(&mut buf),
				request_id: buf.get_u32(),
			},
			MessageKind::JoinResponse => Message::JoinResponse {
				address: get_addr(&mut buf),
				request_id: buf.get_u32(),
			},
			MessageKind::FindSuccessor => Message::FindSuccessor {
				query_id: get_id(&mut buf),
				source_id: get_id(&mut buf),
				request_id: buf.get_u32(),
			},
			MessageKind::FindSuccessorResponse => Message::FindSuccessorResponse {
				result_id: get_id(&mut buf),
				source_id: get_id(&mut buf),
				result_addr: get_addr(&mut buf),
				request_id: buf.get_u32(),
			},
			MessageKind::Notify => Message::Notify { node_id: get_id(&mut buf) },
			MessageKind::GetNeighbours => Message::GetNeighbours {
				source_id: get_id(&mut buf),
				request_id: buf.get_u32(),
			},
			MessageKind::GetNeighboursResponse => Message::GetNeighboursResponse {
				successor: get_id(&mut buf),
				predecessor: get_id(&mut buf),
				source_id: get_id(&mut buf),
				has_predecessor: buf.get_u8() != 0,
				request_id: buf.get_u32(),
			},
			MessageKind::Connect => Message::Connect {
				node_id: get_id(&mut buf),
				address: get_addr(&mut buf),
			},
			MessageKind::FindIp => Message::FindIp {
				target_id: get_id(&mut buf),
				source_id: get_id(&mut buf),
				source_addr: get_addr(&mut buf),
				ttl: buf.get_u32(),
			},
		};

		Ok(message)
	}
}

/// Total frame length declared by a header, for stream reassembly.
/// Returns None until a full header is available.
pub fn declared_frame_len(buf: &[u8]) -> Option<usize> {
	if buf.len() < HEADER_LEN {
		return None;
	}
	let payload_len = u16::from_be_bytes([buf[6], buf[7]]) as usize;
	Some(HEADER_LEN + payload_len)
}

fn put_id(buf: &mut BytesMut, id: &Identifier) {
	buf.put_slice(id.as_bytes());
}

fn get_id(buf: &mut &[u8]) -> Identifier {
	let mut bytes = [0u8; ID_BYTES];
	buf.copy_to_slice(&mut bytes);
	Identifier::from_bytes(bytes)
}

fn put_addr(buf: &mut BytesMut, addr: &Ipv4Addr) {
	buf.put_u32(u32::from(*addr));
}

fn get_addr(buf: &mut &[u8]) -> Ipv4Addr {
	Ipv4Addr::from(buf.get_u32())
}
