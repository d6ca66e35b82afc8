// Author: Lukas Bower
// Purpose: DMA-visible pages and the reference-counted handle that pins them.

//! DMA frames and page references.
//!
//! A [`DmaFrame`] is a run of memory the device can address by physical
//! address. A [`PageRef`] is a counted reference to one frame: cloning it
//! pins the page, dropping it releases the pin. The transmit ring keeps a
//! `PageRef` per bound slot, so a borrowed page stays resident until the
//! slot is reused and is released exactly once when the handle is dropped.
#![allow(unsafe_code)]

use core::fmt;
use core::ops::Deref;
use core::ptr::{self, NonNull};
use core::sync::atomic::{fence, Ordering};
use std::alloc::{self, Layout};
use std::sync::{Arc, Weak};

use cohesix_net_constants::PAGE_SIZE;

/// Orders descriptor writes before the doorbell write that publishes them.
#[inline(always)]
pub fn dma_wmb() {
    fence(Ordering::Release);
    #[cfg(target_arch = "aarch64")]
    unsafe {
        core::arch::asm!("dmb oshst", options(nostack, preserves_flags));
    }
}

/// Orders the descriptor-done read before reads of the buffer it describes.
#[inline(always)]
pub fn dma_rmb() {
    fence(Ordering::Acquire);
    #[cfg(target_arch = "aarch64")]
    unsafe {
        core::arch::asm!("dmb oshld", options(nostack, preserves_flags));
    }
}

/// Memory the device reaches by physical address.
///
/// All accessors are volatile and bounds checked; multi-byte values are
/// little-endian, matching the device's descriptor layout.
pub struct DmaFrame {
    paddr: u64,
    vaddr: NonNull<u8>,
    len: usize,
    heap: Option<Layout>,
}

impl DmaFrame {
    /// Wraps memory mapped by the platform.
    ///
    /// # Safety
    /// `vaddr` must map `len` bytes at physical address `paddr` for the
    /// lifetime of the frame, and the platform must keep the pages resident.
    pub unsafe fn from_raw(paddr: u64, vaddr: NonNull<u8>, len: usize) -> Self {
        Self {
            paddr,
            vaddr,
            len,
            heap: None,
        }
    }

    /// Allocates a zero-filled, page-aligned frame from the host heap and
    /// labels it with `paddr`. Used by host-side platforms.
    #[must_use]
    pub fn alloc_zeroed(paddr: u64, len: usize) -> Option<Self> {
        if len == 0 {
            return None;
        }
        let layout = Layout::from_size_align(len, PAGE_SIZE).ok()?;
        // SAFETY: layout has non-zero size.
        let raw = unsafe { alloc::alloc_zeroed(layout) };
        let vaddr = NonNull::new(raw)?;
        Some(Self {
            paddr,
            vaddr,
            len,
            heap: Some(layout),
        })
    }

    /// Physical base address seen by the device.
    #[must_use]
    pub const fn paddr(&self) -> u64 {
        self.paddr
    }

    /// Length of the frame in bytes.
    #[must_use]
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true for a zero-length frame.
    #[must_use]
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn span(&self, offset: usize, len: usize) -> *mut u8 {
        let in_bounds = offset
            .checked_add(len)
            .is_some_and(|end| end <= self.len);
        assert!(
            in_bounds,
            "dma access {offset:#x}+{len} outside {}-byte frame at {:#x}",
            self.len, self.paddr
        );
        // SAFETY: bounds checked above.
        unsafe { self.vaddr.as_ptr().add(offset) }
    }

    /// Copies `dst.len()` bytes starting at `offset` out of the frame.
    pub fn read_bytes(&self, offset: usize, dst: &mut [u8]) {
        let base = self.span(offset, dst.len());
        for (idx, byte) in dst.iter_mut().enumerate() {
            // SAFETY: `span` validated the whole range.
            *byte = unsafe { ptr::read_volatile(base.add(idx)) };
        }
    }

    /// Copies `src` into the frame starting at `offset`.
    pub fn write_bytes(&self, offset: usize, src: &[u8]) {
        let base = self.span(offset, src.len());
        for (idx, byte) in src.iter().enumerate() {
            // SAFETY: `span` validated the whole range.
            unsafe { ptr::write_volatile(base.add(idx), *byte) };
        }
    }

    /// Sets `len` bytes starting at `offset` to `value`.
    pub fn fill(&self, offset: usize, len: usize, value: u8) {
        let base = self.span(offset, len);
        for idx in 0..len {
            // SAFETY: `span` validated the whole range.
            unsafe { ptr::write_volatile(base.add(idx), value) };
        }
    }

    /// Copies `len` bytes from `src` at `src_offset` into this frame at `dst_offset`.
    pub fn copy_from(&self, dst_offset: usize, src: &DmaFrame, src_offset: usize, len: usize) {
        let dst_base = self.span(dst_offset, len);
        let src_base = src.span(src_offset, len);
        for idx in 0..len {
            // SAFETY: both ranges validated; byte-wise copy tolerates overlap.
            unsafe {
                let byte = ptr::read_volatile(src_base.add(idx));
                ptr::write_volatile(dst_base.add(idx), byte);
            }
        }
    }

    /// Reads one byte.
    #[must_use]
    pub fn read_u8(&self, offset: usize) -> u8 {
        let ptr = self.span(offset, 1);
        // SAFETY: bounds checked by `span`.
        unsafe { ptr::read_volatile(ptr) }
    }

    /// Writes one byte.
    pub fn write_u8(&self, offset: usize, value: u8) {
        let ptr = self.span(offset, 1);
        // SAFETY: bounds checked by `span`.
        unsafe { ptr::write_volatile(ptr, value) }
    }

    /// Reads a little-endian `u16`.
    #[must_use]
    pub fn read_u16(&self, offset: usize) -> u16 {
        let mut raw = [0u8; 2];
        self.read_bytes(offset, &mut raw);
        u16::from_le_bytes(raw)
    }

    /// Writes a little-endian `u16`.
    pub fn write_u16(&self, offset: usize, value: u16) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    /// Reads a little-endian `u32`.
    #[must_use]
    pub fn read_u32(&self, offset: usize) -> u32 {
        let mut raw = [0u8; 4];
        self.read_bytes(offset, &mut raw);
        u32::from_le_bytes(raw)
    }

    /// Writes a little-endian `u32`.
    pub fn write_u32(&self, offset: usize, value: u32) {
        self.write_bytes(offset, &value.to_le_bytes());
    }

    /// Reads a little-endian `u64`.
    #[must_use]
    pub fn read_u64(&self, offset: usize) -> u64 {
        let mut raw = [0u8; 8];
        self.read_bytes(offset, &mut raw);
        u64::from_le_bytes(raw)
    }

    /// Writes a little-endian `u64`.
    pub fn write_u64(&self, offset: usize, value: u64) {
        self.write_bytes(offset, &value.to_le_bytes());
    }
}

impl Drop for DmaFrame {
    fn drop(&mut self) {
        if let Some(layout) = self.heap.take() {
            // SAFETY: allocated in `alloc_zeroed` with this exact layout.
            unsafe { alloc::dealloc(self.vaddr.as_ptr(), layout) };
        }
    }
}

impl fmt::Debug for DmaFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DmaFrame")
            .field("paddr", &format_args!("{:#x}", self.paddr))
            .field("len", &self.len)
            .finish()
    }
}

// SAFETY: a frame owns its allocation outright and carries no thread-bound
// state, so moving it between threads is sound.
unsafe impl Send for DmaFrame {}
// SAFETY: shared access only goes through volatile byte and word accessors.
// Callers must not write a byte range while another thread reads or writes
// it; see the contract on `PageRef`.
unsafe impl Sync for DmaFrame {}

/// Counted reference to a DMA page.
///
/// Each live `PageRef` is one pin. The page is released back to its owner
/// when the last reference is dropped.
///
/// Pins may be cloned across threads, but the bytes are not locked. At most
/// one holder writes a given range at a time, and nobody reads that range
/// while it is written. The driver and both pumps meet this by running on a
/// single cooperative thread and by lending a page to the stack only after
/// its last write; [`PageRef::is_exclusive`] is how a lender knows the
/// borrower is done.
#[derive(Clone)]
pub struct PageRef(Arc<DmaFrame>);

impl PageRef {
    /// Takes ownership of `frame` and returns the first reference to it.
    #[must_use]
    pub fn new(frame: DmaFrame) -> Self {
        Self(Arc::new(frame))
    }

    /// Number of live references (pins) to the page.
    #[must_use]
    pub fn ref_count(&self) -> usize {
        Arc::strong_count(&self.0)
    }

    /// True when this handle is the only reference left.
    #[must_use]
    pub fn is_exclusive(&self) -> bool {
        self.ref_count() == 1
    }

    /// True when both handles refer to the same page.
    #[must_use]
    pub fn same_page(&self, other: &PageRef) -> bool {
        Arc::ptr_eq(&self.0, &other.0)
    }

    /// Non-pinning handle used by bookkeeping that must not keep pages alive.
    #[must_use]
    pub fn downgrade(&self) -> WeakPageRef {
        WeakPageRef(Arc::downgrade(&self.0))
    }
}

impl Deref for PageRef {
    type Target = DmaFrame;

    fn deref(&self) -> &DmaFrame {
        &self.0
    }
}

impl fmt::Debug for PageRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageRef")
            .field("paddr", &format_args!("{:#x}", self.0.paddr))
            .field("refs", &self.ref_count())
            .finish()
    }
}

/// Non-pinning page handle.
#[derive(Clone, Debug)]
pub struct WeakPageRef(Weak<DmaFrame>);

impl WeakPageRef {
    /// Re-pins the page if it is still alive.
    #[must_use]
    pub fn upgrade(&self) -> Option<PageRef> {
        self.0.upgrade().map(PageRef)
    }
}
