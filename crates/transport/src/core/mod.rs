//! The main concepts of this mod are:
//!
//! The [ConnectionInterface](transport::ConnectionInterface) trait defines how to
//! make a webrtc handshake with a remote peer and then send data channel messages
//! to it. See the [transport] module.
//!
//! The [TransportInterface](transport::TransportInterface) trait should be
//! implemented for each Transport of Connection implementation. See the
//! [transport] module.
//!
//! The [TransportCallback](callback::TransportCallback) trait is used to let the
//! user handle the events of a connection, including connection state changes,
//! incoming data channel messages and discovered ICE candidates. See the
//! [callback] module.

pub mod callback;
pub mod pool;
pub mod transport;
