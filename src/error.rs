use std::net::Ipv4Addr;

use thiserror::Error;

use crate::wire::MessageKind;

/// Errors produced while decoding a raw frame received off the wire.
/// These are always protocol-benign: the dispatch loop logs and drops
/// the offending frame.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum WireError {
	#[error("frame too short: need at least {needed} bytes, buffer holds {actual}")]
	Truncated { needed: usize, actual: usize },

	#[error("unsupported protocol version {0:#06x}")]
	UnsupportedVersion(u16),

	#[error("unknown message kind {0:#010x}")]
	UnknownKind(u32),

	#[error("{kind:?}: header declares {declared} payload bytes, kind requires {required}, buffer holds {actual}")]
	PayloadLength {
		kind: MessageKind,
		declared: usize,
		required: usize,
		actual: usize,
	},
}

/// Errors surfaced through the public [`NodeHandle`](crate::node::NodeHandle) API.
#[derive(Error, Debug)]
pub enum NodeError {
	#[error("node processor has shut down")]
	Shutdown,

	#[error("lookup abandoned before a response arrived")]
	LookupFailed,

	#[error("join via {0} produced no response")]
	JoinFailed(Ipv4Addr),
}

/// Errors from loading a [`NodeConfig`](crate::config::NodeConfig) file.
#[derive(Error, Debug)]
pub enum ConfigError {
	#[error("failed to read config file: {0}")]
	Io(#[from] std::io::Error),

	#[error("failed to parse config file: {0}")]
	Parse(#[from] serde_json::Error),
}
