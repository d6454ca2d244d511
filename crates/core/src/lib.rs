#![warn(missing_docs)]
#![doc = include_str!("../README.md")]
pub mod consts;
pub mod crypto;
pub mod encryption;
pub mod error;
pub mod health;
pub mod keys;
pub mod message;
pub mod messenger;
pub mod peer_id;
pub mod peers;
pub mod presence;
pub mod session;
pub mod signaling;
pub mod store;
#[cfg(test)]
mod tests;
