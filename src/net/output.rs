// Author: Lukas Bower
// Purpose: Output pump moving transmit requests from the stack onto the TX ring.

//! Output pump.
//!
//! Each request lends one page (or a vector of page pieces) to the pump.
//! Frames are posted straight from the lent pages; the transmit ring pins
//! each page through its slot binding, so the pump can drop the grant as
//! soon as every frame of the request is posted.

use core::task::Poll;

use cohesix_net_constants::{MAX_BATCH_PACKETS, NSREQ_INPUT};
use log::{debug, trace};

use super::fault::PumpFault;
use crate::config::PumpConfig;
use crate::drivers::e1000::tx::{TxBuffer, TxError};
use crate::drivers::e1000::E1000;
use crate::hal::RegisterIo;
use crate::ipc::{IoVec, IpcEndpoint, NetRequest, ProtocolError};
use crate::sched::{retry_with_yield, Yielder};

/// Output pump counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct OutputStats {
    /// Requests served.
    pub requests: u64,
    /// Frames posted.
    pub packets: u64,
    /// Batched requests served.
    pub batches: u64,
    /// `Busy` results seen while posting.
    pub busy: u64,
}

/// Serves transmit requests.
#[derive(Debug)]
pub struct OutputPump {
    config: PumpConfig,
    stats: OutputStats,
}

impl OutputPump {
    /// New pump.
    pub fn new(config: PumpConfig) -> Self {
        Self {
            config,
            stats: OutputStats::default(),
        }
    }

    /// Counters.
    #[must_use]
    pub fn stats(&self) -> OutputStats {
        self.stats
    }

    /// Serves at most one pending request.
    ///
    /// Returns the number of frames posted, or `None` when no request was
    /// waiting.
    pub fn serve_one<R, I, Y>(
        &mut self,
        nic: &mut E1000<R>,
        ipc: &mut I,
        yielder: &mut Y,
    ) -> Result<Option<usize>, PumpFault>
    where
        R: RegisterIo,
        I: IpcEndpoint + ?Sized,
        Y: Yielder + ?Sized,
    {
        let Some(envelope) = ipc.try_recv()? else {
            return Ok(None);
        };
        let from = envelope.from;
        let posted = match NetRequest::decode(envelope)? {
            NetRequest::Input(_) => {
                return Err(ProtocolError::UnexpectedRequest(NSREQ_INPUT).into());
            }
            NetRequest::Output(page) => {
                let buffer = page.tx_buffer()?;
                self.post(nic, yielder, &buffer)?;
                drop(page);
                1
            }
            NetRequest::OutputBatch(vectors) => {
                let posted = self.post_batch(nic, yielder, &vectors)?;
                self.stats.batches += 1;
                drop(vectors);
                posted
            }
        };
        self.stats.requests += 1;
        debug!("[output] served {from}: {posted} frame(s)");
        Ok(Some(posted))
    }

    /// Serves requests until a fatal fault, which is returned.
    pub fn run<R, I, Y>(&mut self, nic: &mut E1000<R>, ipc: &mut I, yielder: &mut Y) -> PumpFault
    where
        R: RegisterIo,
        I: IpcEndpoint + ?Sized,
        Y: Yielder + ?Sized,
    {
        loop {
            match self.serve_one(nic, ipc, yielder) {
                Ok(Some(_)) => {}
                Ok(None) => {
                    nic.reclaim_tx();
                    yielder.yield_now();
                }
                Err(fault) => return fault,
            }
        }
    }

    fn post_batch<R, Y>(
        &mut self,
        nic: &mut E1000<R>,
        yielder: &mut Y,
        vectors: &[IoVec],
    ) -> Result<usize, PumpFault>
    where
        R: RegisterIo,
        Y: Yielder + ?Sized,
    {
        // Validate every piece before posting any of them.
        let mut buffers: heapless::Vec<TxBuffer, MAX_BATCH_PACKETS> = heapless::Vec::new();
        for vector in vectors {
            let buffer = vector.tx_buffer()?;
            if buffers.push(buffer).is_err() {
                return Err(ProtocolError::BadLength(vectors.len() as i64).into());
            }
        }
        for buffer in &buffers {
            self.post(nic, yielder, buffer)?;
        }
        Ok(buffers.len())
    }

    fn post<R, Y>(&mut self, nic: &mut E1000<R>, yielder: &mut Y, buffer: &TxBuffer) -> Result<(), PumpFault>
    where
        R: RegisterIo,
        Y: Yielder + ?Sized,
    {
        let mut waits = 0u64;
        let outcome = retry_with_yield(self.config.retry, yielder, || match nic.transmit(buffer) {
            Err(TxError::Busy) => {
                waits += 1;
                Poll::Pending
            }
            other => Poll::Ready(other),
        });
        self.stats.busy += waits;
        outcome.map_err(PumpFault::stalled("transmit ring"))??;
        self.stats.packets += 1;
        trace!("[output] posted {} bytes at {:#x}", buffer.len(), buffer.paddr());
        Ok(())
    }
}
