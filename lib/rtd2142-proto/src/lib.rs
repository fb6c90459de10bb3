//! ISP register protocol engine for the Realtek RTD2142 DisplayPort MST hub.
//!
//! This crate covers bus discovery, the raw I²C transport, the register
//! layer (direct and indirect addressing plus deadline-bounded polling),
//! the DDC/CI and ISP mode controller, the flash interface, and dual-bank
//! bookkeeping. It knows nothing about plugin hosts, quirk databases, or
//! firmware file formats — see the `rtd2142-device` crate for the layer
//! that wires this into a device lifecycle.

pub mod bank;
pub mod error;
pub mod flash;
pub mod locate;
pub mod mode;
pub mod progress;
pub mod registers;
pub mod transport;

#[cfg(any(test, feature = "mock"))]
pub mod mock;

pub use error::{Error, Result};
pub use locate::{locate_bus, I2cBus};
pub use progress::{NullProgress, Phase, Progress};
pub use transport::{Bus, I2cTransport, HUB_ADDRESS};
