// Author: Lukas Bower
// Purpose: Host-side platform used by the demo binary and the test suite.

//! Host simulation.
//!
//! [`HostHal`] implements [`Hardware`] on top of heap pages labelled with
//! fake physical addresses and a [`SimE1000`] sitting behind BAR0. Pages it
//! allocates are registered in a shared [`PhysMemory`] so the simulated
//! device can follow descriptor addresses.

pub mod ipc;
pub mod memory;
pub mod sim;

use cohesix_net_constants::PAGE_SIZE;
use log::debug;
use thiserror::Error;

pub use ipc::{IpcBus, LoopbackIpc};
pub use memory::PhysMemory;
pub use sim::{SimE1000, SimRegisters};

use crate::drivers::e1000::{MacAddress, INTEL_VENDOR_ID};
use crate::hal::{DmaFrame, Hardware, PageRef, PciFunction};
use crate::sched::Yielder;

/// Physical base of the simulated device's BAR0.
pub const SIM_BAR0_BASE: u64 = 0xfebc_0000;
/// Length of the simulated BAR0.
pub const SIM_BAR0_LEN: usize = 0x2_0000;
/// Interrupt line of the simulated device.
pub const SIM_IRQ_LINE: u8 = 11;
/// First physical address handed out for DMA pages.
pub const SIM_DMA_BASE: u64 = 0x0010_0000;

/// Host platform failures.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HostError {
    /// The configured page budget is used up.
    #[error("dma page budget of {limit} pages exhausted")]
    OutOfPages {
        /// Page budget.
        limit: usize,
    },
    /// The host allocator refused a page.
    #[error("host allocator returned no memory")]
    OutOfMemory,
    /// No device decodes the requested window.
    #[error("no device at {paddr:#x}+{len:#x}")]
    NoDevice {
        /// Requested base.
        paddr: u64,
        /// Requested length.
        len: usize,
    },
    /// A device access hit an address with no live page behind it.
    #[error("dma to unmapped address {paddr:#x}")]
    Unmapped {
        /// Faulting address.
        paddr: u64,
    },
    /// A device access ran past the end of a page.
    #[error("dma of {len} bytes at {paddr:#x} crosses a page boundary")]
    CrossesPage {
        /// Start address.
        paddr: u64,
        /// Access length.
        len: usize,
    },
    /// Injected frame does not fit a receive buffer.
    #[error("frame of {len} bytes exceeds the receive buffer")]
    FrameTooLong {
        /// Frame length.
        len: usize,
    },
    /// The receiver is not programmed or not enabled.
    #[error("receiver disabled")]
    ReceiverDisabled,
    /// Every receive slot is full; the frame was missed.
    #[error("receive ring full")]
    RxRingFull,
}

/// Simulated platform hosting one e1000.
#[derive(Debug)]
pub struct HostHal {
    memory: PhysMemory,
    sim: SimE1000,
    next_paddr: u64,
    allocated: usize,
    page_limit: Option<usize>,
    enabled: Vec<PciFunction>,
    routed_irqs: Vec<u8>,
}

impl HostHal {
    /// Platform whose device latches the QEMU default MAC.
    pub fn new() -> Self {
        Self::with_mac(MacAddress::QEMU_DEFAULT)
    }

    /// Platform whose device latches `mac`.
    pub fn with_mac(mac: MacAddress) -> Self {
        let memory = PhysMemory::new();
        let sim = SimE1000::new(memory.clone(), mac);
        Self {
            memory,
            sim,
            next_paddr: SIM_DMA_BASE,
            allocated: 0,
            page_limit: None,
            enabled: Vec::new(),
            routed_irqs: Vec::new(),
        }
    }

    /// Caps the number of DMA pages the platform will hand out.
    #[must_use]
    pub fn with_page_limit(mut self, limit: usize) -> Self {
        self.page_limit = Some(limit);
        self
    }

    /// PCI function describing the simulated device.
    pub fn pci_function(&self) -> PciFunction {
        PciFunction {
            bus: 0,
            device: 3,
            function: 0,
            vendor_id: INTEL_VENDOR_ID,
            device_id: 0x100E,
            bar0_base: SIM_BAR0_BASE,
            bar0_len: SIM_BAR0_LEN,
            irq_line: SIM_IRQ_LINE,
        }
    }

    /// Handle to the simulated device.
    pub fn sim(&self) -> &SimE1000 {
        &self.sim
    }

    /// DMA-visible memory.
    pub fn memory(&self) -> &PhysMemory {
        &self.memory
    }

    /// Pages allocated so far.
    pub fn allocated_pages(&self) -> usize {
        self.allocated
    }

    /// Functions enabled through [`Hardware::enable_pci_function`].
    pub fn enabled_functions(&self) -> &[PciFunction] {
        &self.enabled
    }

    /// Lines routed through [`Hardware::route_irq`].
    pub fn routed_irqs(&self) -> &[u8] {
        &self.routed_irqs
    }

    /// Allocates a zeroed page the simulated device can reach.
    pub fn alloc_page(&mut self) -> Result<PageRef, HostError> {
        if let Some(limit) = self.page_limit {
            if self.allocated >= limit {
                return Err(HostError::OutOfPages { limit });
            }
        }
        let frame = DmaFrame::alloc_zeroed(self.next_paddr, PAGE_SIZE).ok_or(HostError::OutOfMemory)?;
        let page = PageRef::new(frame);
        self.memory.register(&page);
        self.next_paddr += PAGE_SIZE as u64;
        self.allocated += 1;
        Ok(page)
    }
}

impl Default for HostHal {
    fn default() -> Self {
        Self::new()
    }
}

impl Hardware for HostHal {
    type Error = HostError;
    type Registers = SimRegisters;

    fn enable_pci_function(&mut self, func: &PciFunction) -> Result<(), HostError> {
        debug!("[host] enabling {func}");
        self.enabled.push(*func);
        Ok(())
    }

    fn map_mmio(&mut self, paddr: u64, len: usize) -> Result<SimRegisters, HostError> {
        if paddr != SIM_BAR0_BASE || len > SIM_BAR0_LEN {
            return Err(HostError::NoDevice { paddr, len });
        }
        Ok(self.sim.registers())
    }

    fn alloc_dma_page(&mut self) -> Result<PageRef, HostError> {
        self.alloc_page()
    }

    fn route_irq(&mut self, line: u8) -> Result<(), HostError> {
        self.routed_irqs.push(line);
        Ok(())
    }
}

/// Yields the OS thread.
#[derive(Clone, Copy, Debug, Default)]
pub struct ThreadYield;

impl Yielder for ThreadYield {
    fn yield_now(&mut self) {
        std::thread::yield_now();
    }
}
