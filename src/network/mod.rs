// Network module
//
// Peer synchronization: the peer set, the protocol run against it, the
// client used to reach peers and the JSON payloads they exchange.

pub mod client;
pub mod peers;
pub mod wire;

#[cfg(test)]
pub mod mock;

pub use client::{HttpPeerClient, PeerClient, PeerError};
pub use peers::PeerSet;
pub use wire::{ChainExport, PeerList, WireError};
