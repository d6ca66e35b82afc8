// Author: Lukas Bower
// Purpose: Fatal pump conditions and the termination path.

//! Fatal faults.
//!
//! Transient conditions (a full transmit ring, an empty receive ring, a
//! peer that is not receiving) are retried inside the pumps and never reach
//! this module. Everything here ends the pump process.

use log::error;
use thiserror::Error;

use crate::drivers::e1000::rx::RxError;
use crate::drivers::e1000::tx::TxError;
use crate::ipc::{IpcError, ProtocolError};
use crate::sched::RetryExhausted;

/// Conditions that terminate a pump.
#[derive(Debug, Error)]
pub enum PumpFault {
    /// A message broke the protocol.
    #[error("protocol violation: {0}")]
    Protocol(#[from] ProtocolError),
    /// The message transport failed.
    #[error("ipc failure: {0}")]
    Ipc(#[from] IpcError),
    /// The receive ring reported an unrecoverable condition.
    #[error("receive fault: {0}")]
    Rx(#[from] RxError),
    /// The transmit ring rejected a buffer outright.
    #[error("transmit fault: {0}")]
    Tx(#[from] TxError),
    /// A transient condition outlasted the retry budget.
    #[error("{what} stalled: {source}")]
    Stalled {
        /// What was being waited for.
        what: &'static str,
        /// Retry accounting.
        source: RetryExhausted,
    },
}

impl PumpFault {
    /// Wraps an exhausted retry.
    pub fn stalled(what: &'static str) -> impl FnOnce(RetryExhausted) -> Self {
        move |source| Self::Stalled { what, source }
    }
}

/// Logs `fault` and terminates the calling pump.
///
/// Pumps run as separate processes; the supervisor that spawned them is
/// responsible for restarting one that dies here.
pub fn abort(pump: &str, fault: &PumpFault) -> ! {
    error!("[{pump}] fatal: {fault}");
    panic!("{pump}: {fault}");
}
