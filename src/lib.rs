// Author: Lukas Bower
// Purpose: Crate root for the e1000 driver and its packet pumps.

//! Intel 8254x ("e1000") packet path.
//!
//! The crate is split along the path a frame takes:
//!
//! - [`drivers::e1000`] owns the register window and both descriptor rings.
//! - [`net::output`] moves transmit requests from the stack onto the
//!   transmit ring without copying.
//! - [`net::input`] moves received frames into pages lent to the stack.
//! - [`ipc`] defines the page-passing messages between them, and [`sched`]
//!   the cooperative retry loop both pumps use.
//!
//! Platform services sit behind [`hal::Hardware`]. Host builds also get
//! [`host`], a simulated platform and device used by the demo binary and the
//! tests.
#![deny(unsafe_code)]
#![deny(unsafe_op_in_unsafe_fn)]
#![warn(missing_docs)]

pub mod config;
pub mod drivers;
pub mod hal;
pub mod ipc;
pub mod net;
pub mod sched;

#[cfg(any(feature = "test-support", not(target_os = "none")))]
pub mod host;

pub use config::{ConfigError, E1000Config, PumpConfig};
pub use drivers::e1000::{AttachError, MacAddress, E1000};
