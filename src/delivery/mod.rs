/// Push delivery subsystem
///
/// Turns durably-stored notifications into frames pushed over long-lived
/// connections. The tick-based path in the registry is the delivery
/// guarantee of record; the instant path is an optimization.
pub mod client;
pub mod frames;
pub mod registry;

pub use client::{Backoff, StreamClient};
pub use frames::PushFrame;
pub use registry::{DeliveryRegistry, SubscriberId};
