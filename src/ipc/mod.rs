//! TCP+msgpack transport between front-end windows and the bridge.
//!
//! Length-prefixed msgpack framing; see [`codec`] for the frame layout.

pub mod codec;
pub mod server;

pub use server::IpcServer;
