// Author: Lukas Bower
//! MMIO register window and the access trait the driver is written against.
#![allow(unsafe_code)]

use core::ptr::{self, NonNull};

/// 32-bit register access at byte offsets within a device window.
///
/// Every call is one device access. Implementations must not cache, merge or
/// reorder accesses: writes such as TDT are actions, not storage.
pub trait RegisterIo {
    /// Reads the 32-bit register at `offset`.
    fn read32(&self, offset: usize) -> u32;

    /// Writes `value` to the 32-bit register at `offset`.
    fn write32(&self, offset: usize, value: u32);
}

impl<T: RegisterIo + ?Sized> RegisterIo for &T {
    fn read32(&self, offset: usize) -> u32 {
        (**self).read32(offset)
    }

    fn write32(&self, offset: usize, value: u32) {
        (**self).write32(offset, value);
    }
}

/// Describes a mapped MMIO window backed by device memory.
#[derive(Debug)]
pub struct MmioRegion {
    paddr: u64,
    vaddr: NonNull<u8>,
    len: usize,
}

impl MmioRegion {
    /// Wraps an already-mapped device window.
    ///
    /// # Safety
    /// `vaddr` must map `len` bytes of device memory, uncached, for the
    /// lifetime of the returned value, and nothing else may alias it.
    pub unsafe fn from_raw(paddr: u64, vaddr: NonNull<u8>, len: usize) -> Self {
        Self { paddr, vaddr, len }
    }

    /// Returns the physical base address of the mapping.
    pub const fn paddr(&self) -> u64 {
        self.paddr
    }

    /// Returns the length of the mapping in bytes.
    pub const fn len(&self) -> usize {
        self.len
    }

    /// Returns true when the mapping is empty.
    pub const fn is_empty(&self) -> bool {
        self.len == 0
    }

    fn reg_ptr(&self, offset: usize) -> *mut u32 {
        assert!(
            offset % 4 == 0 && offset + 4 <= self.len,
            "mmio offset {offset:#x} outside {:#x}-byte window",
            self.len
        );
        // SAFETY: bounds checked above; the window is mapped for `len` bytes.
        unsafe { self.vaddr.as_ptr().add(offset).cast::<u32>() }
    }
}

impl RegisterIo for MmioRegion {
    #[inline(always)]
    fn read32(&self, offset: usize) -> u32 {
        let ptr = self.reg_ptr(offset);
        // SAFETY: `reg_ptr` yields an aligned pointer inside the mapped window.
        unsafe { ptr::read_volatile(ptr) }
    }

    #[inline(always)]
    fn write32(&self, offset: usize, value: u32) {
        let ptr = self.reg_ptr(offset);
        // SAFETY: `reg_ptr` yields an aligned pointer inside the mapped window.
        unsafe { ptr::write_volatile(ptr, value) }
    }
}

// SAFETY: the region is owned by a single driver instance; accesses are volatile.
unsafe impl Send for MmioRegion {}
