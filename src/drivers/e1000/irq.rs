// Author: Lukas Bower
// Purpose: Interrupt cause decoding for the e1000 pumps.

//! Interrupt/poll bridge.
//!
//! Interrupt causes are hints: they tell a pump which ring is worth looking
//! at, but the descriptor rings stay authoritative and a pump that polls
//! without interrupts sees the same packets.

use bitflags::bitflags;
use log::{debug, info};

use super::regs::{Register, Registers};
use crate::hal::RegisterIo;

bitflags! {
    /// Bits shared by ICR, IMS and IMC.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct IrqCause: u32 {
        /// Transmit descriptor written back.
        const TXDW = 1 << 0;
        /// Transmit queue empty.
        const TXQE = 1 << 1;
        /// Link status change.
        const LSC = 1 << 2;
        /// Receive sequence error.
        const RXSEQ = 1 << 3;
        /// Receive descriptor minimum threshold reached.
        const RXDMT0 = 1 << 4;
        /// Receiver overrun.
        const RXO = 1 << 6;
        /// Receiver timer interrupt.
        const RXT0 = 1 << 7;
    }
}

impl IrqCause {
    /// Causes enabled at attach unless configured otherwise.
    pub const DEFAULT_MASK: IrqCause = IrqCause::from_bits_retain(
        IrqCause::TXDW.bits()
            | IrqCause::LSC.bits()
            | IrqCause::RXDMT0.bits()
            | IrqCause::RXO.bits()
            | IrqCause::RXT0.bits(),
    );
}

/// Which parts of the device are worth servicing.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct WorkHint {
    /// Transmit slots have completed and can be reclaimed.
    pub tx_reclaimable: bool,
    /// Frames are probably waiting in the receive ring.
    pub rx_ready: bool,
    /// Link state changed.
    pub link_changed: bool,
}

impl WorkHint {
    /// Decodes a cause word.
    #[must_use]
    pub fn from_causes(causes: IrqCause) -> Self {
        Self {
            tx_reclaimable: causes.intersects(IrqCause::TXDW | IrqCause::TXQE),
            rx_ready: causes.intersects(IrqCause::RXDMT0 | IrqCause::RXT0 | IrqCause::RXO),
            link_changed: causes.contains(IrqCause::LSC),
        }
    }

    /// True when nothing was signalled.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        !(self.tx_reclaimable || self.rx_ready || self.link_changed)
    }
}

/// Reads and masks device interrupts.
#[derive(Debug)]
pub struct IrqBridge {
    mask: IrqCause,
    serviced: u64,
}

impl IrqBridge {
    /// Bridge with every cause masked.
    pub const fn new() -> Self {
        Self {
            mask: IrqCause::empty(),
            serviced: 0,
        }
    }

    /// Unmasks `mask`.
    pub fn enable<R: RegisterIo>(&mut self, regs: &Registers<R>, mask: IrqCause) {
        regs.write(Register::Ims, mask.bits());
        self.mask |= mask;
        debug!("[e1000] interrupts enabled mask={:?}", self.mask);
    }

    /// Masks every cause.
    pub fn disable<R: RegisterIo>(&mut self, regs: &Registers<R>) {
        regs.write(Register::Imc, u32::MAX);
        self.mask = IrqCause::empty();
    }

    /// Currently unmasked causes.
    #[must_use]
    pub fn mask(&self) -> IrqCause {
        self.mask
    }

    /// Number of non-idle service calls.
    #[must_use]
    pub fn serviced(&self) -> u64 {
        self.serviced
    }

    /// Reads ICR, which clears it, and decodes the pending causes.
    pub fn service<R: RegisterIo>(&mut self, regs: &Registers<R>) -> WorkHint {
        let causes = IrqCause::from_bits_truncate(regs.read(Register::Icr));
        let hint = WorkHint::from_causes(causes);
        if !hint.is_idle() {
            self.serviced += 1;
        }
        if causes.contains(IrqCause::RXO) {
            debug!("[e1000] receiver overrun reported");
        }
        if hint.link_changed {
            info!("[e1000] link status changed");
        }
        hint
    }
}

impl Default for IrqBridge {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use core::cell::Cell;

    use super::*;

    struct Icr {
        pending: Cell<u32>,
        last_write: Cell<Option<(usize, u32)>>,
    }

    impl RegisterIo for Icr {
        fn read32(&self, offset: usize) -> u32 {
            if offset == Register::Icr.offset() {
                self.pending.replace(0)
            } else {
                0
            }
        }

        fn write32(&self, offset: usize, value: u32) {
            self.last_write.set(Some((offset, value)));
        }
    }

    fn regs(pending: u32) -> Registers<Icr> {
        Registers::new(Icr {
            pending: Cell::new(pending),
            last_write: Cell::new(None),
        })
    }

    #[test]
    fn service_decodes_and_clears() {
        let regs = regs((IrqCause::TXDW | IrqCause::RXT0).bits());
        let mut bridge = IrqBridge::new();
        let hint = bridge.service(&regs);
        assert!(hint.tx_reclaimable);
        assert!(hint.rx_ready);
        assert!(!hint.link_changed);
        assert!(bridge.service(&regs).is_idle());
        assert_eq!(bridge.serviced(), 1);
    }

    #[test]
    fn enable_and_disable_write_mask_registers() {
        let regs = regs(0);
        let mut bridge = IrqBridge::new();
        bridge.enable(&regs, IrqCause::DEFAULT_MASK);
        assert_eq!(
            regs.io().last_write.get(),
            Some((Register::Ims.offset(), IrqCause::DEFAULT_MASK.bits()))
        );
        bridge.disable(&regs);
        assert_eq!(
            regs.io().last_write.get(),
            Some((Register::Imc.offset(), u32::MAX))
        );
        assert!(bridge.mask().is_empty());
    }
}
