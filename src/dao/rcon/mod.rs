//! Client side of the Source remote-console protocol.

/// Authenticated link with response correlation.
pub mod client;
/// Packet framing.
pub mod codec;
/// Client errors.
pub mod error;
/// Scripted console server for tests.
#[cfg(test)]
pub mod testing;

pub use self::{
    client::RconClient,
    error::{RconError, RconResult},
};
