//! Signaling for publisher sessions.
//!
//! Only WHIP is supported: a single non-trickle POST of the gathered offer.

pub mod whip_client;

pub use whip_client::*;
