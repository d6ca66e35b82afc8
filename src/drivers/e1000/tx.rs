// Author: Lukas Bower
// Purpose: Transmit descriptor ring with zero-copy page bindings.

//! Transmit ring.
//!
//! Buffers are never copied. Each posted slot keeps a [`PageRef`] to the
//! sender's page until hardware reports the slot done and the slot is either
//! reused or reclaimed; dropping that reference is the release.

use cohesix_net_constants::MAX_PACKET_LEN;
use log::{debug, trace, warn};
use thiserror::Error;

use super::desc::{DescriptorTable, TxCommand, TxDescriptor, TxStatus};
use super::regs::{Register, Registers};
use crate::hal::{dma_wmb, PageRef, RegisterIo};

/// Errors returned by [`TxRing::enqueue`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum TxError {
    /// The slot at the tail is still owned by hardware. Retry later.
    #[error("transmit ring full")]
    Busy,
    /// The buffer can never be sent as described.
    #[error("invalid transmit buffer: {0}")]
    InvalidBuffer(&'static str),
}

/// A run of bytes inside a borrowed page, ready to post.
#[derive(Clone, Debug)]
pub struct TxBuffer {
    page: PageRef,
    offset: usize,
    len: usize,
}

impl TxBuffer {
    /// Describes `len` bytes starting `offset` bytes into `page`.
    pub fn new(page: PageRef, offset: usize, len: usize) -> Result<Self, TxError> {
        if len == 0 {
            return Err(TxError::InvalidBuffer("zero-length buffer"));
        }
        if len > MAX_PACKET_LEN {
            return Err(TxError::InvalidBuffer("buffer exceeds maximum frame length"));
        }
        let in_page = offset.checked_add(len).is_some_and(|end| end <= page.len());
        if !in_page {
            return Err(TxError::InvalidBuffer("buffer crosses the end of its page"));
        }
        Ok(Self { page, offset, len })
    }

    /// Physical address of the first byte: page base plus intra-page offset.
    #[must_use]
    pub fn paddr(&self) -> u64 {
        self.page.paddr() + self.offset as u64
    }

    /// Length in bytes.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// Never true; zero-length buffers are rejected at construction.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Offset within the page.
    #[must_use]
    pub fn offset(&self) -> usize {
        self.offset
    }

    /// Page backing the buffer.
    #[must_use]
    pub fn page(&self) -> &PageRef {
        &self.page
    }
}

/// Transmit counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TxStats {
    /// Descriptors posted.
    pub posted: u64,
    /// Descriptors posted with EOP set.
    pub packets: u64,
    /// `Busy` results returned.
    pub busy: u64,
    /// Page bindings released.
    pub released: u64,
    /// Frames reported with excess or late collisions.
    pub collisions: u64,
    /// Frames reported with a transmit underrun.
    pub underruns: u64,
}

/// Transmit descriptor ring.
#[derive(Debug)]
pub struct TxRing {
    table: DescriptorTable,
    bindings: Vec<Option<PageRef>>,
    tail: usize,
    stats: TxStats,
}

impl TxRing {
    /// Builds the ring over `table`, marking every slot done so the first
    /// pass through the ring finds them free.
    pub fn new(table: DescriptorTable) -> Self {
        let done = TxDescriptor {
            status: TxStatus::DD,
            ..TxDescriptor::default()
        };
        for idx in 0..table.len() {
            table.write_tx(idx, &done);
        }
        let bindings = (0..table.len()).map(|_| None).collect();
        Self {
            table,
            bindings,
            tail: 0,
            stats: TxStats::default(),
        }
    }

    /// Programs base, length, head and tail registers.
    pub fn program<R: RegisterIo>(&self, regs: &Registers<R>) {
        let base = self.table.paddr();
        regs.write(Register::Tdbal, base as u32);
        regs.write(Register::Tdbah, (base >> 32) as u32);
        regs.write(Register::Tdlen, self.table.byte_len());
        regs.write(Register::Tdh, 0);
        regs.write(Register::Tdt, 0);
    }

    /// Number of descriptors.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.table.len()
    }

    /// Next slot software will post to.
    #[must_use]
    pub fn tail(&self) -> usize {
        self.tail
    }

    /// Counters.
    #[must_use]
    pub fn stats(&self) -> TxStats {
        self.stats
    }

    /// Page currently bound to `slot`, if any.
    #[must_use]
    pub fn binding(&self, slot: usize) -> Option<&PageRef> {
        self.bindings.get(slot).and_then(Option::as_ref)
    }

    /// Number of slots holding a page binding.
    #[must_use]
    pub fn bound_slots(&self) -> usize {
        self.bindings.iter().filter(|slot| slot.is_some()).count()
    }

    /// Descriptor currently stored in `slot`.
    #[must_use]
    pub fn descriptor(&self, slot: usize) -> TxDescriptor {
        self.table.read_tx(slot)
    }

    /// Slots that can be posted right now without returning `Busy`.
    #[must_use]
    pub fn free_slots(&self) -> usize {
        let cap = self.capacity();
        (0..cap)
            .map(|step| (self.tail + step) % cap)
            .take_while(|slot| self.table.tx_status(*slot).contains(TxStatus::DD))
            .count()
    }

    /// Posts `buffer` at the tail and hands the slot to hardware.
    ///
    /// Returns [`TxError::Busy`] without side effects when the tail slot has
    /// not been written back yet.
    pub fn enqueue<R: RegisterIo>(
        &mut self,
        regs: &Registers<R>,
        buffer: &TxBuffer,
        end_of_packet: bool,
    ) -> Result<(), TxError> {
        let slot = self.tail;
        if !self.table.tx_status(slot).contains(TxStatus::DD) {
            self.stats.busy += 1;
            trace!("[tx] slot {slot} still owned by hardware");
            return Err(TxError::Busy);
        }

        self.release(slot);

        let mut cmd = TxCommand::RS | TxCommand::IDE;
        if end_of_packet {
            cmd |= TxCommand::EOP;
        }
        let desc = TxDescriptor {
            addr: buffer.paddr(),
            length: buffer.len() as u16,
            cmd,
            status: TxStatus::empty(),
            ..TxDescriptor::default()
        };
        self.table.write_tx(slot, &desc);
        self.bindings[slot] = Some(buffer.page().clone());

        self.tail = (slot + 1) % self.capacity();
        dma_wmb();
        regs.write(Register::Tdt, self.tail as u32);

        self.stats.posted += 1;
        if end_of_packet {
            self.stats.packets += 1;
        }
        trace!(
            "[tx] posted slot={slot} paddr={:#x} len={} eop={end_of_packet}",
            desc.addr,
            desc.length
        );
        Ok(())
    }

    /// Posts one frame split across `fragments`, EOP on the last only.
    ///
    /// Either every fragment is posted or none is: if the ring cannot take
    /// them all right now the call returns `Busy` and touches nothing.
    pub fn enqueue_fragments<R: RegisterIo>(
        &mut self,
        regs: &Registers<R>,
        fragments: &[TxBuffer],
    ) -> Result<(), TxError> {
        let Some(last) = fragments.len().checked_sub(1) else {
            return Ok(());
        };
        if fragments.len() > self.capacity() {
            return Err(TxError::InvalidBuffer("more fragments than ring slots"));
        }
        let total: usize = fragments.iter().map(TxBuffer::len).sum();
        if total > MAX_PACKET_LEN {
            return Err(TxError::InvalidBuffer("fragments exceed maximum frame length"));
        }
        if self.free_slots() < fragments.len() {
            self.stats.busy += 1;
            return Err(TxError::Busy);
        }
        for (idx, fragment) in fragments.iter().enumerate() {
            self.enqueue(regs, fragment, idx == last)?;
        }
        Ok(())
    }

    /// Releases bindings of every slot hardware has finished with.
    ///
    /// Returns the number of pages released.
    pub fn reclaim(&mut self) -> usize {
        let mut released = 0;
        for slot in 0..self.capacity() {
            if self.bindings[slot].is_some() && self.table.tx_status(slot).contains(TxStatus::DD) {
                self.release(slot);
                released += 1;
            }
        }
        if released > 0 {
            debug!("[tx] reclaimed {released} completed slots");
        }
        released
    }

    fn release(&mut self, slot: usize) {
        let Some(page) = self.bindings[slot].take() else {
            return;
        };
        let status = self.table.tx_status(slot);
        if status.intersects(TxStatus::EC | TxStatus::LC) {
            self.stats.collisions += 1;
            warn!("[tx] slot {slot} reported collisions status={status:?}");
        }
        if status.contains(TxStatus::TU) {
            self.stats.underruns += 1;
            warn!("[tx] slot {slot} reported underrun");
        }
        self.stats.released += 1;
        trace!("[tx] released slot={slot} page={:#x}", page.paddr());
        drop(page);
    }
}
