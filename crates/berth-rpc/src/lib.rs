//! berth-rpc: the persistent channel between Berth components.
//!
//! One TCP connection carries two message shapes:
//!
//! - **call/ack**: the caller sends a named operation with a payload and
//!   receives exactly one acknowledgement carrying either data or an error.
//! - **subscription**: the caller subscribes to a named channel and receives
//!   zero or more pushed events, plus stream-level errors on a side channel,
//!   until it unsubscribes or disconnects.
//!
//! Frames are newline-delimited JSON (see [`frame`]). There is no
//! operation-level timeout and no retry: a stalled peer stalls the caller,
//! and a dropped connection rejects every pending call. The client dials
//! again on the next call after a drop.

pub mod client;
pub mod error;
pub mod frame;
pub mod server;

pub use client::{RpcClient, Subscription};
pub use error::{RpcError, RpcResult};
pub use frame::Frame;
pub use server::{EventSink, RpcServer};
