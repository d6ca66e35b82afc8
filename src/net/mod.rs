// Author: Lukas Bower

//! Packet pumps between the e1000 driver and the network stack.
//!
//! The output pump drains transmit requests from the stack into the
//! transmit ring. The input pump drains the receive ring into pages it
//! hands to the stack. Both are cooperative loops that only suspend at
//! explicit yields.

pub mod fault;
pub mod input;
pub mod output;

pub use fault::{abort, PumpFault};
pub use input::{InputPump, InputStats};
pub use output::{OutputPump, OutputStats};
