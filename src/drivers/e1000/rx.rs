// Author: Lukas Bower
// Purpose: Receive descriptor ring over a preallocated buffer pool.

//! Receive ring.
//!
//! Every slot owns one page from a pool allocated at attach. The page's
//! physical address is written into the descriptor once and never changes;
//! returning a slot to hardware only clears the fields hardware writes back.

use core::ops::Deref;

use cohesix_net_constants::RX_BUFFER_LEN;
use log::{debug, trace, warn};
use thiserror::Error;

use super::desc::{DescriptorTable, RxDescriptor, RxErrors, RxStatus};
use super::regs::{Register, Registers};
use crate::hal::{dma_rmb, dma_wmb, DmaFrame, PageRef, RegisterIo};

/// Receive failures that leave the ring in a state the caller cannot fix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum RxError {
    /// Hardware completed a buffer that does not end a frame.
    #[error("slot {slot}: frame spans more than one receive buffer")]
    FragmentedFrame {
        /// Offending slot.
        slot: usize,
    },
    /// Hardware reported more bytes than the buffer holds.
    #[error("slot {slot}: reported length {len} exceeds {capacity}-byte buffer")]
    LengthOverflow {
        /// Offending slot.
        slot: usize,
        /// Length from the descriptor.
        len: usize,
        /// Size of the receive buffer.
        capacity: usize,
    },
    /// The caller's destination cannot hold the frame.
    #[error("destination holds {provided} bytes, frame needs {needed}")]
    BufferTooSmall {
        /// Frame length.
        needed: usize,
        /// Space offered by the caller.
        provided: usize,
    },
}

/// A received frame copied out of the ring.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RxPacket {
    data: heapless::Vec<u8, RX_BUFFER_LEN>,
}

impl RxPacket {
    /// Frame bytes.
    #[must_use]
    pub fn as_slice(&self) -> &[u8] {
        &self.data
    }
}

impl Deref for RxPacket {
    type Target = [u8];

    fn deref(&self) -> &[u8] {
        &self.data
    }
}

/// Receive counters.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct RxStats {
    /// Frames delivered.
    pub packets: u64,
    /// Bytes delivered.
    pub bytes: u64,
    /// Frames dropped because hardware flagged a receive error.
    pub dropped_errors: u64,
}

/// Receive descriptor ring.
#[derive(Debug)]
pub struct RxRing {
    table: DescriptorTable,
    buffers: Vec<PageRef>,
    cursor: usize,
    stats: RxStats,
}

impl RxRing {
    /// Binds one pool page to each descriptor in `table`.
    pub fn new(table: DescriptorTable, buffers: Vec<PageRef>) -> Self {
        assert_eq!(
            buffers.len(),
            table.len(),
            "receive pool must hold one page per descriptor"
        );
        for (slot, buffer) in buffers.iter().enumerate() {
            assert!(
                buffer.len() >= RX_BUFFER_LEN,
                "receive buffer {slot} smaller than {RX_BUFFER_LEN} bytes"
            );
            buffer.fill(0, buffer.len(), 0);
            table.write_rx(
                slot,
                &RxDescriptor {
                    addr: buffer.paddr(),
                    ..RxDescriptor::default()
                },
            );
        }
        Self {
            table,
            buffers,
            cursor: 0,
            stats: RxStats::default(),
        }
    }

    /// Programs base, length, head and tail registers. Every slot but the
    /// one before head is handed to hardware.
    pub fn program<R: RegisterIo>(&self, regs: &Registers<R>) {
        let base = self.table.paddr();
        regs.write(Register::Rdbal, base as u32);
        regs.write(Register::Rdbah, (base >> 32) as u32);
        regs.write(Register::Rdlen, self.table.byte_len());
        regs.write(Register::Rdh, 0);
        regs.write(Register::Rdt, (self.capacity() - 1) as u32);
    }

    /// Number of descriptors.
    #[must_use]
    pub fn capacity(&self) -> usize {
        self.table.len()
    }

    /// Next slot software will inspect.
    #[must_use]
    pub fn cursor(&self) -> usize {
        self.cursor
    }

    /// Counters.
    #[must_use]
    pub fn stats(&self) -> RxStats {
        self.stats
    }

    /// Pool page bound to `slot`.
    #[must_use]
    pub fn buffer(&self, slot: usize) -> &PageRef {
        &self.buffers[slot]
    }

    /// Descriptor currently stored in `slot`.
    #[must_use]
    pub fn descriptor(&self, slot: usize) -> RxDescriptor {
        self.table.read_rx(slot)
    }

    /// True when hardware has written back the slot at the cursor. Reads the
    /// status byte only.
    #[must_use]
    pub fn ready(&self) -> bool {
        self.table.rx_status(self.cursor).contains(RxStatus::DD)
    }

    /// Returns the next frame, or `None` when hardware has not completed the
    /// slot at the cursor. An empty poll touches neither memory nor registers.
    pub fn poll<R: RegisterIo>(&mut self, regs: &Registers<R>) -> Result<Option<RxPacket>, RxError> {
        self.next_frame(regs, |frame, len| {
            let mut data = heapless::Vec::new();
            data.resize(len, 0).map_err(|_| RxError::BufferTooSmall {
                needed: len,
                provided: RX_BUFFER_LEN,
            })?;
            frame.read_bytes(0, &mut data);
            Ok(RxPacket { data })
        })
    }

    /// Copies the next frame into `dst` and returns its length.
    pub fn poll_into<R: RegisterIo>(
        &mut self,
        regs: &Registers<R>,
        dst: &mut [u8],
    ) -> Result<Option<usize>, RxError> {
        self.next_frame(regs, |frame, len| {
            let provided = dst.len();
            let Some(dst) = dst.get_mut(..len) else {
                return Err(RxError::BufferTooSmall {
                    needed: len,
                    provided,
                });
            };
            frame.read_bytes(0, dst);
            Ok(len)
        })
    }

    /// Copies the next frame into `page` starting at `offset` and returns
    /// its length.
    pub fn poll_into_page<R: RegisterIo>(
        &mut self,
        regs: &Registers<R>,
        page: &PageRef,
        offset: usize,
    ) -> Result<Option<usize>, RxError> {
        self.next_frame(regs, |frame, len| {
            let provided = page.len().saturating_sub(offset);
            if provided < len {
                return Err(RxError::BufferTooSmall {
                    needed: len,
                    provided,
                });
            }
            page.copy_from(offset, frame, 0, len);
            Ok(len)
        })
    }

    fn next_frame<R, T, F>(&mut self, regs: &Registers<R>, deliver: F) -> Result<Option<T>, RxError>
    where
        R: RegisterIo,
        F: FnOnce(&DmaFrame, usize) -> Result<T, RxError>,
    {
        let mut skipped = 0;
        let (slot, len) = loop {
            let slot = self.cursor;
            if !self.ready() {
                return Ok(None);
            }
            dma_rmb();
            let desc = self.table.read_rx(slot);
            if !desc.status.contains(RxStatus::EOP) {
                return Err(RxError::FragmentedFrame { slot });
            }
            if desc.errors.intersects(RxErrors::FRAME_ERRORS) {
                self.stats.dropped_errors += 1;
                warn!(
                    "[rx] dropping frame slot={slot} len={} errors={:?}",
                    desc.length, desc.errors
                );
                self.recycle(regs, slot);
                skipped += 1;
                if skipped == self.capacity() {
                    return Ok(None);
                }
                continue;
            }
            let len = usize::from(desc.length);
            let capacity = RX_BUFFER_LEN;
            if len > capacity {
                return Err(RxError::LengthOverflow {
                    slot,
                    len,
                    capacity,
                });
            }
            break (slot, len);
        };

        let delivered = deliver(&self.buffers[slot], len)?;
        self.recycle(regs, slot);
        self.stats.packets += 1;
        self.stats.bytes += len as u64;
        trace!("[rx] delivered slot={slot} len={len}");
        Ok(Some(delivered))
    }

    fn recycle<R: RegisterIo>(&mut self, regs: &Registers<R>, slot: usize) {
        let desc = RxDescriptor {
            addr: self.buffers[slot].paddr(),
            ..RxDescriptor::default()
        };
        self.table.write_rx(slot, &desc);
        dma_wmb();
        regs.write(Register::Rdt, slot as u32);
        self.cursor = (slot + 1) % self.capacity();
        if self.cursor == 0 {
            debug!("[rx] cursor wrapped after {} frames", self.stats.packets + 1);
        }
    }
}

#[cfg(test)]
mod tests {
    use core::cell::RefCell;

    use cohesix_net_constants::PAGE_SIZE;

    use super::*;

    #[derive(Default)]
    struct WriteLog(RefCell<Vec<(usize, u32)>>);

    impl RegisterIo for WriteLog {
        fn read32(&self, _offset: usize) -> u32 {
            0
        }

        fn write32(&self, offset: usize, value: u32) {
            self.0.borrow_mut().push((offset, value));
        }
    }

    fn page(paddr: u64) -> PageRef {
        PageRef::new(DmaFrame::alloc_zeroed(paddr, PAGE_SIZE).unwrap())
    }

    fn ring(len: usize) -> RxRing {
        let buffers = (0..len).map(|idx| page(0x100_0000 + idx as u64 * 0x1000)).collect();
        RxRing::new(DescriptorTable::new(page(0x2000), len), buffers)
    }

    fn complete(ring: &RxRing, slot: usize, bytes: &[u8], status: RxStatus, errors: RxErrors) {
        ring.buffer(slot).write_bytes(0, bytes);
        let mut desc = ring.descriptor(slot);
        desc.length = bytes.len() as u16;
        desc.status = status;
        desc.errors = errors;
        ring.table.write_rx(slot, &desc);
    }

    #[test]
    fn init_binds_pool_and_programs_tail() {
        let ring = ring(8);
        let regs = Registers::new(WriteLog::default());
        ring.program(&regs);
        for slot in 0..8 {
            assert_eq!(ring.descriptor(slot).addr, ring.buffer(slot).paddr());
        }
        let writes = regs.io().0.borrow();
        assert!(writes.contains(&(Register::Rdlen.offset(), 128)));
        assert!(writes.contains(&(Register::Rdh.offset(), 0)));
        assert!(writes.contains(&(Register::Rdt.offset(), 7)));
    }

    #[test]
    fn empty_poll_has_no_side_effects() {
        let mut ring = ring(8);
        let regs = Registers::new(WriteLog::default());
        assert!(!ring.ready());
        assert_eq!(ring.poll(&regs), Ok(None));
        let mut dst = [0u8; 64];
        assert_eq!(ring.poll_into(&regs, &mut dst), Ok(None));
        assert_eq!(ring.cursor(), 0);
        assert!(regs.io().0.borrow().is_empty());
    }

    #[test]
    fn delivers_exact_bytes_and_recycles_slot() {
        let mut ring = ring(8);
        let regs = Registers::new(WriteLog::default());
        complete(&ring, 0, b"hello frame", RxStatus::DD | RxStatus::EOP, RxErrors::empty());
        assert!(ring.ready());
        assert!(regs.io().0.borrow().is_empty());

        let packet = ring.poll(&regs).unwrap().unwrap();
        assert_eq!(packet.as_slice(), b"hello frame");
        assert_eq!(ring.cursor(), 1);

        let desc = ring.descriptor(0);
        assert!(desc.status.is_empty());
        assert_eq!(desc.length, 0);
        assert_eq!(desc.addr, ring.buffer(0).paddr());
        assert_eq!(*regs.io().0.borrow(), vec![(Register::Rdt.offset(), 0)]);

        assert!(!ring.ready());
        assert_eq!(ring.poll(&regs), Ok(None));
    }

    #[test]
    fn errored_frames_are_dropped_and_skipped() {
        let mut ring = ring(8);
        let regs = Registers::new(WriteLog::default());
        complete(&ring, 0, b"bad", RxStatus::DD | RxStatus::EOP, RxErrors::CE);
        complete(&ring, 1, b"good", RxStatus::DD | RxStatus::EOP, RxErrors::empty());

        let mut dst = [0u8; 16];
        assert_eq!(ring.poll_into(&regs, &mut dst), Ok(Some(4)));
        assert_eq!(&dst[..4], b"good");
        assert_eq!(ring.stats().dropped_errors, 1);
        assert_eq!(ring.stats().packets, 1);
        assert_eq!(ring.cursor(), 2);
    }

    #[test]
    fn missing_eop_is_fatal() {
        let mut ring = ring(8);
        let regs = Registers::new(WriteLog::default());
        complete(&ring, 0, b"part", RxStatus::DD, RxErrors::empty());
        assert_eq!(ring.poll(&regs), Err(RxError::FragmentedFrame { slot: 0 }));
        assert_eq!(ring.cursor(), 0);
    }

    #[test]
    fn oversized_length_is_fatal() {
        let mut ring = ring(8);
        let regs = Registers::new(WriteLog::default());
        let mut desc = ring.descriptor(0);
        desc.length = (RX_BUFFER_LEN + 1) as u16;
        desc.status = RxStatus::DD | RxStatus::EOP;
        ring.table.write_rx(0, &desc);
        assert!(matches!(
            ring.poll(&regs),
            Err(RxError::LengthOverflow { slot: 0, .. })
        ));
    }

    #[test]
    fn small_destination_is_reported_without_consuming() {
        let mut ring = ring(8);
        let regs = Registers::new(WriteLog::default());
        complete(&ring, 0, &[7u8; 100], RxStatus::DD | RxStatus::EOP, RxErrors::empty());
        let mut dst = [0u8; 10];
        assert_eq!(
            ring.poll_into(&regs, &mut dst),
            Err(RxError::BufferTooSmall {
                needed: 100,
                provided: 10
            })
        );
        assert_eq!(ring.cursor(), 0);
    }

    #[test]
    fn copies_into_page_at_offset() {
        let mut ring = ring(8);
        let regs = Registers::new(WriteLog::default());
        complete(&ring, 0, b"payload", RxStatus::DD | RxStatus::EOP, RxErrors::empty());
        let dst = page(0x900_0000);
        assert_eq!(ring.poll_into_page(&regs, &dst, 4), Ok(Some(7)));
        let mut out = [0u8; 7];
        dst.read_bytes(4, &mut out);
        assert_eq!(&out, b"payload");
    }

    #[test]
    fn cursor_wraps_to_zero() {
        let mut ring = ring(8);
        let regs = Registers::new(WriteLog::default());
        for round in 0..2u8 {
            for slot in 0..8 {
                complete(&ring, slot, &[round, slot as u8], RxStatus::DD | RxStatus::EOP, RxErrors::empty());
                let packet = ring.poll(&regs).unwrap().unwrap();
                assert_eq!(packet.as_slice(), &[round, slot as u8]);
            }
            assert_eq!(ring.cursor(), 0);
        }
    }
}
