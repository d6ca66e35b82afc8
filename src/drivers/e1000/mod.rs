// Author: Lukas Bower

//! Intel 8254x ("e1000") driver.
//!
//! The driver owns one transmit ring and one receive ring in legacy
//! descriptor mode with fixed 2 KiB receive buffers. It is constructed once
//! by [`E1000::attach`] and then lent by `&mut` to whichever pump needs it;
//! there is no global instance.

pub mod desc;
pub mod irq;
pub mod regs;
pub mod rx;
pub mod tx;

use core::fmt;

use log::{debug, info, warn};
use thiserror::Error;

use self::desc::DescriptorTable;
use self::irq::{IrqBridge, WorkHint};
use self::regs::{Register, Registers};
use self::rx::{RxError, RxPacket, RxRing};
use self::tx::{TxBuffer, TxError, TxRing};
use crate::config::{ConfigError, E1000Config};
use crate::hal::{Hardware, PageRef, PciFunction, RegisterIo};

/// PCI vendor identifier for Intel.
pub const INTEL_VENDOR_ID: u16 = 0x8086;

/// Device identifiers handled by this driver: 82540EM desktop, 82545EM
/// copper and the 82540EP-compatible mobile part.
pub const SUPPORTED_DEVICE_IDS: [u16; 3] = [0x100E, 0x100F, 0x1015];

/// Ethernet hardware address.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct MacAddress(pub [u8; 6]);

impl MacAddress {
    /// Address QEMU assigns to its first emulated NIC.
    pub const QEMU_DEFAULT: MacAddress = MacAddress([0x52, 0x54, 0x00, 0x12, 0x34, 0x56]);

    /// Decodes a RAL/RAH pair. Returns `None` unless Address Valid is set.
    #[must_use]
    pub fn from_registers(ral: u32, rah: u32) -> Option<Self> {
        if rah & regs::RAH_AV == 0 {
            return None;
        }
        let low = ral.to_le_bytes();
        let high = rah.to_le_bytes();
        Some(Self([low[0], low[1], low[2], low[3], high[0], high[1]]))
    }

    /// Encodes the address as a RAL/RAH pair with Address Valid set.
    #[must_use]
    pub fn to_registers(self) -> (u32, u32) {
        let [a, b, c, d, e, f] = self.0;
        let ral = u32::from_le_bytes([a, b, c, d]);
        let rah = u32::from_le_bytes([e, f, 0, 0]) | regs::RAH_AV;
        (ral, rah)
    }
}

impl fmt::Display for MacAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let [a, b, c, d, e, g] = self.0;
        write!(f, "{a:02x}:{b:02x}:{c:02x}:{d:02x}:{e:02x}:{g:02x}")
    }
}

/// Errors raised while bringing the device up.
#[derive(Debug, Error)]
pub enum AttachError {
    /// The PCI function is not an e1000 this driver knows.
    #[error("unsupported pci function {0}")]
    Unsupported(PciFunction),
    /// The supplied configuration was rejected.
    #[error("invalid configuration: {0}")]
    Config(#[from] ConfigError),
    /// The platform failed one of the attach steps.
    #[error("platform failure during {stage}: {detail}")]
    Platform {
        /// Attach step that failed.
        stage: &'static str,
        /// Platform error text.
        detail: String,
    },
    /// BAR0 does not cover the register file.
    #[error("bar0 of {len:#x} bytes does not cover the register file")]
    MmioTooSmall {
        /// BAR0 length reported by enumeration.
        len: usize,
    },
    /// No MAC address was configured and none was latched from the EEPROM.
    #[error("no valid mac address in RAL0/RAH0")]
    NoMacAddress,
}

fn platform<E: fmt::Display>(stage: &'static str) -> impl FnOnce(E) -> AttachError {
    move |err| AttachError::Platform {
        stage,
        detail: err.to_string(),
    }
}

/// An attached e1000.
#[derive(Debug)]
pub struct E1000<R> {
    regs: Registers<R>,
    tx: TxRing,
    rx: RxRing,
    irq: IrqBridge,
    mac: MacAddress,
    pci: PciFunction,
}

impl<R: RegisterIo> E1000<R> {
    /// True when `pci` names a device this driver handles.
    #[must_use]
    pub fn supports(pci: &PciFunction) -> bool {
        pci.vendor_id == INTEL_VENDOR_ID && SUPPORTED_DEVICE_IDS.contains(&pci.device_id)
    }

    /// Brings up the device described by `pci`.
    ///
    /// Enables the function, maps its registers, programs the receive
    /// address, clears the multicast table, builds both rings and enables
    /// transmit, receive and the configured interrupt causes.
    pub fn attach<H>(hal: &mut H, pci: PciFunction, config: &E1000Config) -> Result<Self, AttachError>
    where
        H: Hardware<Registers = R>,
    {
        if !Self::supports(&pci) {
            warn!("[e1000] refusing pci function {pci}");
            return Err(AttachError::Unsupported(pci));
        }
        config.validate()?;
        info!("[e1000] attaching {pci} bar0={:#x}", pci.bar0_base);

        hal.enable_pci_function(&pci)
            .map_err(platform("pci enable"))?;
        if pci.bar0_len < regs::REGISTER_WINDOW_LEN {
            return Err(AttachError::MmioTooSmall { len: pci.bar0_len });
        }
        let io = hal
            .map_mmio(pci.bar0_base, pci.bar0_len)
            .map_err(platform("mmio map"))?;
        let regs = Registers::new(io);

        let mut irq = IrqBridge::new();
        irq.disable(&regs);

        let mac = Self::setup_mac(&regs, config.mac)?;
        for index in 0..regs::MTA_ENTRIES {
            regs.write_mta(index, 0);
        }

        let tx = Self::setup_tx(hal, &regs, config)?;
        let rx = Self::setup_rx(hal, &regs, config)?;

        regs.set_bits(Register::Ctrl, regs::CTRL_SLU);

        hal.route_irq(pci.irq_line)
            .map_err(platform("irq routing"))?;
        irq.enable(&regs, config.irq_mask);

        info!(
            "[e1000] up mac={mac} tx_slots={} rx_slots={} irq={}",
            tx.capacity(),
            rx.capacity(),
            pci.irq_line
        );
        Ok(Self {
            regs,
            tx,
            rx,
            irq,
            mac,
            pci,
        })
    }

    fn setup_mac(regs: &Registers<R>, configured: Option<MacAddress>) -> Result<MacAddress, AttachError> {
        if let Some(mac) = configured {
            let (ral, rah) = mac.to_registers();
            regs.write(Register::Ral0, ral);
            regs.write(Register::Rah0, rah);
            debug!("[e1000] programmed mac {mac}");
            return Ok(mac);
        }
        let latched = MacAddress::from_registers(regs.read(Register::Ral0), regs.read(Register::Rah0));
        let mac = latched.ok_or(AttachError::NoMacAddress)?;
        debug!("[e1000] using eeprom mac {mac}");
        Ok(mac)
    }

    fn setup_tx<H>(hal: &mut H, regs: &Registers<R>, config: &E1000Config) -> Result<TxRing, AttachError>
    where
        H: Hardware<Registers = R>,
    {
        let page = hal.alloc_dma_page().map_err(platform("tx ring allocation"))?;
        let ring = TxRing::new(DescriptorTable::new(page, config.tx_ring_len));
        ring.program(regs);
        regs.write(
            Register::Tctl,
            regs::TCTL_EN | regs::TCTL_PSP | regs::TCTL_CT | regs::TCTL_COLD,
        );
        regs.write(Register::Tipg, regs::TIPG_DEFAULT);
        regs.write(Register::Tidv, u32::from(config.tx_interrupt_delay));
        Ok(ring)
    }

    fn setup_rx<H>(hal: &mut H, regs: &Registers<R>, config: &E1000Config) -> Result<RxRing, AttachError>
    where
        H: Hardware<Registers = R>,
    {
        let page = hal.alloc_dma_page().map_err(platform("rx ring allocation"))?;
        let table = DescriptorTable::new(page, config.rx_ring_len);
        let buffers = (0..config.rx_ring_len)
            .map(|_| hal.alloc_dma_page().map_err(platform("rx buffer allocation")))
            .collect::<Result<Vec<PageRef>, _>>()?;
        let ring = RxRing::new(table, buffers);
        ring.program(regs);
        regs.write(
            Register::Rsrpd,
            u32::from(config.rx_small_packet_threshold) & regs::RSRPD_SIZE_MASK,
        );
        regs.write(
            Register::Rctl,
            regs::RCTL_EN
                | regs::RCTL_LBM_NONE
                | regs::RCTL_RDMTS_HALF
                | regs::RCTL_BAM
                | regs::RCTL_BSIZE_2048
                | regs::RCTL_SECRC,
        );
        Ok(ring)
    }

    /// Hardware address in use.
    #[must_use]
    pub fn mac(&self) -> MacAddress {
        self.mac
    }

    /// PCI function the driver is bound to.
    #[must_use]
    pub fn pci(&self) -> &PciFunction {
        &self.pci
    }

    /// Register window.
    #[must_use]
    pub fn registers(&self) -> &Registers<R> {
        &self.regs
    }

    /// Transmit ring.
    #[must_use]
    pub fn tx(&self) -> &TxRing {
        &self.tx
    }

    /// Receive ring.
    #[must_use]
    pub fn rx(&self) -> &RxRing {
        &self.rx
    }

    /// Interrupt bridge.
    #[must_use]
    pub fn irq(&self) -> &IrqBridge {
        &self.irq
    }

    /// True when STATUS reports link up.
    #[must_use]
    pub fn link_up(&self) -> bool {
        self.regs.read(Register::Status) & regs::STATUS_LU != 0
    }

    /// Posts one complete frame.
    pub fn transmit(&mut self, buffer: &TxBuffer) -> Result<(), TxError> {
        self.tx.enqueue(&self.regs, buffer, true)
    }

    /// Posts one frame split across `fragments`, all or nothing.
    pub fn transmit_fragments(&mut self, fragments: &[TxBuffer]) -> Result<(), TxError> {
        self.tx.enqueue_fragments(&self.regs, fragments)
    }

    /// Releases pages of completed transmit slots.
    pub fn reclaim_tx(&mut self) -> usize {
        self.tx.reclaim()
    }

    /// Next received frame, copied out.
    pub fn receive(&mut self) -> Result<Option<RxPacket>, RxError> {
        self.rx.poll(&self.regs)
    }

    /// Whether a received frame (or an errored slot) waits at the cursor.
    #[must_use]
    pub fn rx_ready(&self) -> bool {
        self.rx.ready()
    }

    /// Next received frame copied into `dst`.
    pub fn receive_into(&mut self, dst: &mut [u8]) -> Result<Option<usize>, RxError> {
        self.rx.poll_into(&self.regs, dst)
    }

    /// Next received frame copied into `page` at `offset`.
    pub fn receive_into_page(&mut self, page: &PageRef, offset: usize) -> Result<Option<usize>, RxError> {
        self.rx.poll_into_page(&self.regs, page, offset)
    }

    /// Reads pending interrupt causes and reclaims transmit slots when the
    /// device reports write-backs.
    pub fn service_interrupts(&mut self) -> WorkHint {
        let hint = self.irq.service(&self.regs);
        if hint.tx_reclaimable {
            self.tx.reclaim();
        }
        if hint.link_changed {
            info!("[e1000] link {}", if self.link_up() { "up" } else { "down" });
        }
        hint
    }
}
