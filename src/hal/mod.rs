// Author: Lukas Bower
// Purpose: Hardware seam between the e1000 driver and the platform layer.

//! Lightweight hardware abstraction used to decouple the e1000 driver from the
//! platform that enumerates PCI, maps device memory and hands out DMA pages.
//!
//! The abstraction intentionally exposes only the operations the driver
//! depends on at attach time. Everything after attach goes through
//! [`RegisterIo`] and [`PageRef`].

use core::fmt;

pub mod dma;
pub mod mmio;

pub use dma::{dma_rmb, dma_wmb, DmaFrame, PageRef, WeakPageRef};
pub use mmio::{MmioRegion, RegisterIo};

/// PCI function handed to the driver by platform enumeration.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct PciFunction {
    /// Bus number.
    pub bus: u8,
    /// Device number on the bus.
    pub device: u8,
    /// Function number within the device.
    pub function: u8,
    /// Vendor identifier from configuration space.
    pub vendor_id: u16,
    /// Device identifier from configuration space.
    pub device_id: u16,
    /// Physical base of the memory BAR holding the register file.
    pub bar0_base: u64,
    /// Length of the memory BAR in bytes.
    pub bar0_len: usize,
    /// Legacy interrupt line assigned by firmware.
    pub irq_line: u8,
}

impl fmt::Display for PciFunction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{:02x}:{:02x}.{} [{:04x}:{:04x}]",
            self.bus, self.device, self.function, self.vendor_id, self.device_id
        )
    }
}

/// Trait implemented by platform layers able to host the e1000 driver.
pub trait Hardware {
    /// Error type emitted by the platform.
    type Error: fmt::Display + fmt::Debug;

    /// Register window returned by [`Hardware::map_mmio`].
    type Registers: RegisterIo;

    /// Enables memory decoding and bus mastering for the function.
    fn enable_pci_function(&mut self, func: &PciFunction) -> Result<(), Self::Error>;

    /// Maps `len` bytes of device memory at `paddr` into the driver's address space.
    fn map_mmio(&mut self, paddr: u64, len: usize) -> Result<Self::Registers, Self::Error>;

    /// Allocates one zero-filled, pinned, DMA-capable page.
    fn alloc_dma_page(&mut self) -> Result<PageRef, Self::Error>;

    /// Routes the device interrupt line through the platform interrupt controller.
    fn route_irq(&mut self, line: u8) -> Result<(), Self::Error>;
}
