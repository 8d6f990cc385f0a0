//! A peer-to-peer node implementing the Chord ring protocol.
//!
//! Each node occupies a point on a 160-bit identifier circle, keeps a
//! successor/predecessor pair plus a 160-entry finger table of shortcut
//! pointers, and cooperatively resolves "who owns identifier K" in
//! O(log N) hops while membership churns underneath it. All mutable
//! state belongs to one processor task per node; the network is reached
//! only through the [`transport::Transport`] seam, so the same engine
//! runs over TCP or the in-memory test network.

pub mod config;
pub mod error;
pub mod finger_table;
pub mod id;
pub mod node;
pub mod rpc;
pub mod transport;
pub mod wire;

pub use config::NodeConfig;
pub use id::Identifier;
pub use node::{ChordNode, NodeHandle};
pub use transport::{SimNetwork, SimTransport, TcpTransport, Transport};

/// A chord node wired to the TCP transport.
pub type TcpNode = ChordNode<TcpTransport>;

/// A chord node wired to the in-memory simulator.
pub type SimNode = ChordNode<SimTransport>;
