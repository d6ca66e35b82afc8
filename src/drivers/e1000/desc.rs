// Author: Lukas Bower
// Purpose: Legacy transmit/receive descriptor formats and the tables holding them.

//! Legacy-mode descriptors.
//!
//! Both formats are 16 bytes, little-endian and packed. They are encoded
//! field by field with explicit offsets rather than by casting structs, so the
//! layout is byte-exact on every target.

use bitflags::bitflags;
use static_assertions::const_assert_eq;

use crate::hal::PageRef;

/// Size of one descriptor in bytes.
pub const DESC_SIZE: usize = 16;

/// Descriptor ring length (TDLEN/RDLEN) must be a multiple of this.
pub const RING_ALIGN_BYTES: usize = 128;

const ADDR: usize = 0;
const LENGTH: usize = 8;
const TX_CSO: usize = 10;
const TX_CMD: usize = 11;
const TX_STATUS: usize = 12;
const TX_CSS: usize = 13;
const RX_CHECKSUM: usize = 10;
const RX_STATUS: usize = 12;
const RX_ERRORS: usize = 13;
const SPECIAL: usize = 14;

#[allow(dead_code)]
#[repr(C, packed)]
struct TxWire {
    addr: u64,
    length: u16,
    cso: u8,
    cmd: u8,
    status: u8,
    css: u8,
    special: u16,
}

#[allow(dead_code)]
#[repr(C, packed)]
struct RxWire {
    addr: u64,
    length: u16,
    checksum: u16,
    status: u8,
    errors: u8,
    special: u16,
}

const_assert_eq!(core::mem::size_of::<TxWire>(), DESC_SIZE);
const_assert_eq!(core::mem::size_of::<RxWire>(), DESC_SIZE);
const_assert_eq!(core::mem::offset_of!(TxWire, cmd), TX_CMD);
const_assert_eq!(core::mem::offset_of!(TxWire, status), TX_STATUS);
const_assert_eq!(core::mem::offset_of!(TxWire, special), SPECIAL);
const_assert_eq!(core::mem::offset_of!(RxWire, status), RX_STATUS);
const_assert_eq!(core::mem::offset_of!(RxWire, errors), RX_ERRORS);

bitflags! {
    /// Transmit command bits.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct TxCommand: u8 {
        /// End Of Packet: last descriptor of a frame.
        const EOP = 1 << 0;
        /// Insert FCS.
        const IFCS = 1 << 1;
        /// Insert Checksum.
        const IC = 1 << 2;
        /// Report Status: write back DD when done.
        const RS = 1 << 3;
        /// Report Packet Sent.
        const RPS = 1 << 4;
        /// Descriptor extension; always clear in legacy mode.
        const DEXT = 1 << 5;
        /// VLAN Packet Enable.
        const VLE = 1 << 6;
        /// Interrupt Delay Enable.
        const IDE = 1 << 7;
    }
}

bitflags! {
    /// Transmit status bits written back by hardware.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct TxStatus: u8 {
        /// Descriptor Done.
        const DD = 1 << 0;
        /// Excess Collisions.
        const EC = 1 << 1;
        /// Late Collision.
        const LC = 1 << 2;
        /// Transmit Underrun.
        const TU = 1 << 3;
    }
}

bitflags! {
    /// Receive status bits written back by hardware.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct RxStatus: u8 {
        /// Descriptor Done.
        const DD = 1 << 0;
        /// End Of Packet.
        const EOP = 1 << 1;
        /// Ignore Checksum Indication.
        const IXSM = 1 << 2;
        /// Packet is 802.1Q.
        const VP = 1 << 3;
        /// TCP checksum calculated.
        const TCPCS = 1 << 5;
        /// IP checksum calculated.
        const IPCS = 1 << 6;
        /// Passed in-exact filter.
        const PIF = 1 << 7;
    }
}

bitflags! {
    /// Receive error bits written back by hardware.
    #[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
    pub struct RxErrors: u8 {
        /// CRC or alignment error.
        const CE = 1 << 0;
        /// Symbol error.
        const SE = 1 << 1;
        /// Sequence error.
        const SEQ = 1 << 2;
        /// Carrier extension error.
        const CXE = 1 << 4;
        /// TCP/UDP checksum error.
        const TCPE = 1 << 5;
        /// IP checksum error.
        const IPE = 1 << 6;
        /// RX data error.
        const RXE = 1 << 7;
    }
}

impl RxErrors {
    /// Errors that make the frame unusable. Checksum errors are only
    /// reported when offload is enabled, which this driver never does.
    pub const FRAME_ERRORS: RxErrors = RxErrors::from_bits_retain(
        RxErrors::CE.bits()
            | RxErrors::SE.bits()
            | RxErrors::SEQ.bits()
            | RxErrors::CXE.bits()
            | RxErrors::RXE.bits(),
    );
}

/// Legacy transmit descriptor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TxDescriptor {
    /// Physical address of the buffer.
    pub addr: u64,
    /// Bytes to send from the buffer.
    pub length: u16,
    /// Checksum offset (unused).
    pub cso: u8,
    /// Command bits.
    pub cmd: TxCommand,
    /// Status bits.
    pub status: TxStatus,
    /// Checksum start (unused).
    pub css: u8,
    /// VLAN tag field (unused).
    pub special: u16,
}

impl TxDescriptor {
    /// Encodes into the 16-byte wire layout.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; DESC_SIZE] {
        let mut raw = [0u8; DESC_SIZE];
        raw[ADDR..ADDR + 8].copy_from_slice(&self.addr.to_le_bytes());
        raw[LENGTH..LENGTH + 2].copy_from_slice(&self.length.to_le_bytes());
        raw[TX_CSO] = self.cso;
        raw[TX_CMD] = self.cmd.bits();
        raw[TX_STATUS] = self.status.bits();
        raw[TX_CSS] = self.css;
        raw[SPECIAL..SPECIAL + 2].copy_from_slice(&self.special.to_le_bytes());
        raw
    }

    /// Decodes from the 16-byte wire layout; unknown bits are kept.
    #[must_use]
    pub fn from_bytes(raw: &[u8; DESC_SIZE]) -> Self {
        Self {
            addr: u64::from_le_bytes(array(raw, ADDR)),
            length: u16::from_le_bytes(array(raw, LENGTH)),
            cso: raw[TX_CSO],
            cmd: TxCommand::from_bits_retain(raw[TX_CMD]),
            status: TxStatus::from_bits_retain(raw[TX_STATUS]),
            css: raw[TX_CSS],
            special: u16::from_le_bytes(array(raw, SPECIAL)),
        }
    }
}

/// Legacy receive descriptor.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct RxDescriptor {
    /// Physical address of the receive buffer; fixed after init.
    pub addr: u64,
    /// Bytes written by hardware.
    pub length: u16,
    /// Packet checksum (unused).
    pub checksum: u16,
    /// Status bits.
    pub status: RxStatus,
    /// Error bits.
    pub errors: RxErrors,
    /// VLAN tag field (unused).
    pub special: u16,
}

impl RxDescriptor {
    /// Encodes into the 16-byte wire layout.
    #[must_use]
    pub fn to_bytes(&self) -> [u8; DESC_SIZE] {
        let mut raw = [0u8; DESC_SIZE];
        raw[ADDR..ADDR + 8].copy_from_slice(&self.addr.to_le_bytes());
        raw[LENGTH..LENGTH + 2].copy_from_slice(&self.length.to_le_bytes());
        raw[RX_CHECKSUM..RX_CHECKSUM + 2].copy_from_slice(&self.checksum.to_le_bytes());
        raw[RX_STATUS] = self.status.bits();
        raw[RX_ERRORS] = self.errors.bits();
        raw[SPECIAL..SPECIAL + 2].copy_from_slice(&self.special.to_le_bytes());
        raw
    }

    /// Decodes from the 16-byte wire layout; unknown bits are kept.
    #[must_use]
    pub fn from_bytes(raw: &[u8; DESC_SIZE]) -> Self {
        Self {
            addr: u64::from_le_bytes(array(raw, ADDR)),
            length: u16::from_le_bytes(array(raw, LENGTH)),
            checksum: u16::from_le_bytes(array(raw, RX_CHECKSUM)),
            status: RxStatus::from_bits_retain(raw[RX_STATUS]),
            errors: RxErrors::from_bits_retain(raw[RX_ERRORS]),
            special: u16::from_le_bytes(array(raw, SPECIAL)),
        }
    }
}

fn array<const N: usize>(raw: &[u8; DESC_SIZE], offset: usize) -> [u8; N] {
    let mut out = [0u8; N];
    out.copy_from_slice(&raw[offset..offset + N]);
    out
}

/// Descriptor array living in one DMA page.
#[derive(Debug)]
pub struct DescriptorTable {
    page: PageRef,
    len: usize,
}

impl DescriptorTable {
    /// Places `len` descriptors at the start of `page` and zeroes them.
    ///
    /// Callers validate `len` against the page size beforehand.
    pub fn new(page: PageRef, len: usize) -> Self {
        assert!(
            len * DESC_SIZE <= page.len(),
            "{len} descriptors do not fit a {}-byte page",
            page.len()
        );
        page.fill(0, len * DESC_SIZE, 0);
        Self { page, len }
    }

    /// Physical address programmed into the base registers.
    #[must_use]
    pub fn paddr(&self) -> u64 {
        self.page.paddr()
    }

    /// Number of descriptors.
    #[must_use]
    pub fn len(&self) -> usize {
        self.len
    }

    /// True for an empty table.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Ring size in bytes, as programmed into TDLEN/RDLEN.
    #[must_use]
    pub fn byte_len(&self) -> u32 {
        (self.len * DESC_SIZE) as u32
    }

    fn base(&self, idx: usize) -> usize {
        assert!(idx < self.len, "descriptor {idx} outside {}-entry ring", self.len);
        idx * DESC_SIZE
    }

    fn read_raw(&self, idx: usize) -> [u8; DESC_SIZE] {
        let mut raw = [0u8; DESC_SIZE];
        self.page.read_bytes(self.base(idx), &mut raw);
        raw
    }

    /// Reads transmit descriptor `idx`.
    #[must_use]
    pub fn read_tx(&self, idx: usize) -> TxDescriptor {
        TxDescriptor::from_bytes(&self.read_raw(idx))
    }

    /// Writes transmit descriptor `idx`.
    pub fn write_tx(&self, idx: usize, desc: &TxDescriptor) {
        self.page.write_bytes(self.base(idx), &desc.to_bytes());
    }

    /// Reads only the status byte of transmit descriptor `idx`.
    #[must_use]
    pub fn tx_status(&self, idx: usize) -> TxStatus {
        TxStatus::from_bits_retain(self.page.read_u8(self.base(idx) + TX_STATUS))
    }

    /// Reads receive descriptor `idx`.
    #[must_use]
    pub fn read_rx(&self, idx: usize) -> RxDescriptor {
        RxDescriptor::from_bytes(&self.read_raw(idx))
    }

    /// Writes receive descriptor `idx`.
    pub fn write_rx(&self, idx: usize, desc: &RxDescriptor) {
        self.page.write_bytes(self.base(idx), &desc.to_bytes());
    }

    /// Reads only the status byte of receive descriptor `idx`.
    #[must_use]
    pub fn rx_status(&self, idx: usize) -> RxStatus {
        RxStatus::from_bits_retain(self.page.read_u8(self.base(idx) + RX_STATUS))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::hal::DmaFrame;
    use cohesix_net_constants::PAGE_SIZE;

    #[test]
    fn tx_layout_is_byte_exact() {
        let desc = TxDescriptor {
            addr: 0x0000_0001_2345_6000,
            length: 60,
            cmd: TxCommand::RS | TxCommand::EOP,
            status: TxStatus::DD,
            ..TxDescriptor::default()
        };
        let raw = desc.to_bytes();
        assert_eq!(&raw[0..8], &[0x00, 0x60, 0x45, 0x23, 0x01, 0, 0, 0]);
        assert_eq!(&raw[8..10], &[60, 0]);
        assert_eq!(raw[11], 0b0000_1001);
        assert_eq!(raw[12], 0b0000_0001);
        assert_eq!(TxDescriptor::from_bytes(&raw), desc);
    }

    #[test]
    fn rx_layout_is_byte_exact() {
        let mut raw = [0u8; DESC_SIZE];
        raw[0..8].copy_from_slice(&0x4000u64.to_le_bytes());
        raw[8] = 0xea;
        raw[9] = 0x05;
        raw[12] = 0b11;
        raw[13] = 0x01;
        let desc = RxDescriptor::from_bytes(&raw);
        assert_eq!(desc.addr, 0x4000);
        assert_eq!(desc.length, 1514);
        assert!(desc.status.contains(RxStatus::DD | RxStatus::EOP));
        assert_eq!(desc.errors, RxErrors::CE);
        assert!(desc.errors.intersects(RxErrors::FRAME_ERRORS));
    }

    #[test]
    fn table_status_reads_track_full_descriptor() {
        let page = PageRef::new(DmaFrame::alloc_zeroed(0x8000, PAGE_SIZE).unwrap());
        let table = DescriptorTable::new(page, 16);
        assert_eq!(table.byte_len(), 256);
        assert_eq!(table.byte_len() as usize % RING_ALIGN_BYTES, 0);

        let desc = TxDescriptor {
            status: TxStatus::DD | TxStatus::LC,
            ..TxDescriptor::default()
        };
        table.write_tx(5, &desc);
        assert_eq!(table.tx_status(5), TxStatus::DD | TxStatus::LC);
        assert!(table.tx_status(4).is_empty());
        assert_eq!(table.read_tx(5), desc);
    }

    #[test]
    #[should_panic(expected = "outside")]
    fn table_rejects_out_of_ring_index() {
        let page = PageRef::new(DmaFrame::alloc_zeroed(0x8000, PAGE_SIZE).unwrap());
        let table = DescriptorTable::new(page, 8);
        let _ = table.read_rx(8);
    }
}
