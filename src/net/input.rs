// Author: Lukas Bower
// Purpose: Input pump delivering received frames to the stack.

//! Input pump.
//!
//! Received frames are copied into a small rotation of pages owned by the
//! pump and lent to the stack with `PRESENT | USER`. The stack may read a
//! page for a while after the message, so a page is reused only once the
//! stack has dropped its reference to it.

use core::task::Poll;

use cohesix_net_constants::{NSREQ_INPUT, PACKET_HEADER_LEN};
use log::{debug, trace};

use super::fault::PumpFault;
use crate::config::{ConfigError, PumpConfig};
use crate::drivers::e1000::E1000;
use crate::hal::{PageRef, RegisterIo};
use crate::ipc::{IpcEndpoint, IpcError, PageGrant, PagePerm, Transfer};
use crate::sched::{retry_with_yield, Yielder};

/// Input pump counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct InputStats {
    /// Frames delivered to the stack.
    pub delivered: u64,
    /// Bytes delivered.
    pub bytes: u64,
    /// Polls that found the ring empty.
    pub empty_polls: u64,
    /// Yields spent waiting for the stack to drop a page.
    pub page_waits: u64,
    /// Yields spent waiting for the stack to receive.
    pub send_waits: u64,
}

/// Moves frames from the receive ring to the stack.
#[derive(Debug)]
pub struct InputPump {
    config: PumpConfig,
    pages: Vec<PageRef>,
    next: usize,
    stats: InputStats,
}

impl InputPump {
    /// Builds the pump over `pages`, which must number `config.input_pages`.
    pub fn new(config: PumpConfig, pages: Vec<PageRef>) -> Result<Self, ConfigError> {
        config.validate()?;
        if pages.len() != config.input_pages {
            return Err(ConfigError::InputPages(pages.len()));
        }
        Ok(Self {
            config,
            pages,
            next: 0,
            stats: InputStats::default(),
        })
    }

    /// Counters.
    #[must_use]
    pub fn stats(&self) -> InputStats {
        self.stats
    }

    /// Page the next frame will be written to.
    #[must_use]
    pub fn next_page(&self) -> &PageRef {
        &self.pages[self.next]
    }

    /// Delivers at most one frame.
    ///
    /// Returns `false` when the receive ring was empty. After a delivery the
    /// pump yields once so the stack can run.
    pub fn step<R, I, Y>(
        &mut self,
        nic: &mut E1000<R>,
        ipc: &mut I,
        yielder: &mut Y,
    ) -> Result<bool, PumpFault>
    where
        R: RegisterIo,
        I: IpcEndpoint + ?Sized,
        Y: Yielder + ?Sized,
    {
        if !nic.rx_ready() {
            self.stats.empty_polls += 1;
            return Ok(false);
        }
        let page = &self.pages[self.next];

        let mut page_waits = 0u64;
        let reusable = retry_with_yield(self.config.retry, yielder, || {
            if page.is_exclusive() {
                Poll::Ready(())
            } else {
                page_waits += 1;
                Poll::Pending
            }
        });
        self.stats.page_waits += page_waits;
        reusable.map_err(PumpFault::stalled("input page"))?;

        let Some(len) = nic.receive_into_page(page, PACKET_HEADER_LEN)? else {
            self.stats.empty_polls += 1;
            return Ok(false);
        };
        page.write_u32(0, len as u32);

        let ns = self.config.ns_env;
        let mut send_waits = 0u64;
        let sent = retry_with_yield(self.config.retry, yielder, || {
            let grant = PageGrant::new(page.clone(), PagePerm::PRESENT | PagePerm::USER);
            match ipc.send(ns, NSREQ_INPUT, Transfer::Page(grant)) {
                Err(IpcError::NotReceiving(_)) => {
                    send_waits += 1;
                    Poll::Pending
                }
                other => Poll::Ready(other),
            }
        });
        self.stats.send_waits += send_waits;
        sent.map_err(PumpFault::stalled("network server"))??;

        trace!("[input] delivered {len} bytes via page {:#x}", page.paddr());
        self.stats.delivered += 1;
        self.stats.bytes += len as u64;
        self.next = (self.next + 1) % self.pages.len();
        yielder.yield_now();
        Ok(true)
    }

    /// Delivers frames until a fatal fault, which is returned.
    pub fn run<R, I, Y>(&mut self, nic: &mut E1000<R>, ipc: &mut I, yielder: &mut Y) -> PumpFault
    where
        R: RegisterIo,
        I: IpcEndpoint + ?Sized,
        Y: Yielder + ?Sized,
    {
        debug!(
            "[input] serving {} with {} pages",
            self.config.ns_env,
            self.pages.len()
        );
        loop {
            match self.step(nic, ipc, yielder) {
                Ok(true) => {}
                Ok(false) => yielder.yield_now(),
                Err(fault) => return fault,
            }
        }
    }
}
