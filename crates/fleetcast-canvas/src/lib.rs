//! Shared canvas engine for Fleetcast.
//!
//! Every display in the fleet shows the same 16x16 picture. The picture
//! is three bitmask layers (red, green, blue), one `u16` per row, plus a
//! sequence number that moves forward on every accepted pixel batch.
//!
//! - [`Canvas`]: the plain value. Mutated through `&mut self`.
//! - [`SharedCanvas`]: a `Canvas` behind a `tokio::sync::RwLock`, the form
//!   the coordinator shares between delivery tasks.
//!
//! The canvas is never persisted; devices hold their own copy and resync
//! with a full frame when they reconnect.

mod canvas;
mod shared;

pub use canvas::Canvas;
pub use shared::SharedCanvas;
