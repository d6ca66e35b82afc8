// Author: Lukas Bower
// Purpose: Typed register file for the 8254x MAC.

//! Register map and bit layouts used by the driver.
//!
//! Offsets are bytes from the start of BAR0. Only the registers listed in
//! [`Register`] are ever touched; the gaps between them are left alone.

use crate::hal::RegisterIo;

/// Registers the driver accesses.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Register {
    /// Device Control.
    Ctrl = 0x00000,
    /// Device Status.
    Status = 0x00008,
    /// Interrupt Cause Read (read-to-clear).
    Icr = 0x000C0,
    /// Interrupt Mask Set/Read.
    Ims = 0x000D0,
    /// Interrupt Mask Clear.
    Imc = 0x000D8,
    /// Receive Control.
    Rctl = 0x00100,
    /// Transmit Control.
    Tctl = 0x00400,
    /// Transmit Inter-Packet Gap.
    Tipg = 0x00410,
    /// Receive Descriptor Base Address Low.
    Rdbal = 0x02800,
    /// Receive Descriptor Base Address High.
    Rdbah = 0x02804,
    /// Receive Descriptor Length.
    Rdlen = 0x02808,
    /// Receive Descriptor Head.
    Rdh = 0x02810,
    /// Receive Descriptor Tail.
    Rdt = 0x02818,
    /// Receive Small Packet Detect.
    Rsrpd = 0x02C00,
    /// Transmit Descriptor Base Address Low.
    Tdbal = 0x03800,
    /// Transmit Descriptor Base Address High.
    Tdbah = 0x03804,
    /// Transmit Descriptor Length.
    Tdlen = 0x03808,
    /// Transmit Descriptor Head.
    Tdh = 0x03810,
    /// Transmit Descriptor Tail.
    Tdt = 0x03818,
    /// Transmit Interrupt Delay Value.
    Tidv = 0x03820,
    /// First entry of the Multicast Table Array.
    Mta = 0x05200,
    /// Receive Address Low, entry 0.
    Ral0 = 0x05400,
    /// Receive Address High, entry 0.
    Rah0 = 0x05404,
}

impl Register {
    /// Every register in the map, in offset order.
    pub const ALL: [Register; 23] = [
        Self::Ctrl,
        Self::Status,
        Self::Icr,
        Self::Ims,
        Self::Imc,
        Self::Rctl,
        Self::Tctl,
        Self::Tipg,
        Self::Rdbal,
        Self::Rdbah,
        Self::Rdlen,
        Self::Rdh,
        Self::Rdt,
        Self::Rsrpd,
        Self::Tdbal,
        Self::Tdbah,
        Self::Tdlen,
        Self::Tdh,
        Self::Tdt,
        Self::Tidv,
        Self::Mta,
        Self::Ral0,
        Self::Rah0,
    ];

    /// Byte offset from BAR0.
    #[must_use]
    pub const fn offset(self) -> usize {
        self as usize
    }

    /// Datasheet mnemonic.
    #[must_use]
    pub const fn name(self) -> &'static str {
        match self {
            Self::Ctrl => "CTRL",
            Self::Status => "STATUS",
            Self::Icr => "ICR",
            Self::Ims => "IMS",
            Self::Imc => "IMC",
            Self::Rctl => "RCTL",
            Self::Tctl => "TCTL",
            Self::Tipg => "TIPG",
            Self::Rdbal => "RDBAL",
            Self::Rdbah => "RDBAH",
            Self::Rdlen => "RDLEN",
            Self::Rdh => "RDH",
            Self::Rdt => "RDT",
            Self::Rsrpd => "RSRPD",
            Self::Tdbal => "TDBAL",
            Self::Tdbah => "TDBAH",
            Self::Tdlen => "TDLEN",
            Self::Tdh => "TDH",
            Self::Tdt => "TDT",
            Self::Tidv => "TIDV",
            Self::Mta => "MTA",
            Self::Ral0 => "RAL0",
            Self::Rah0 => "RAH0",
        }
    }
}

/// Entries in the Multicast Table Array.
pub const MTA_ENTRIES: usize = 128;

/// Smallest BAR0 window that covers every register in [`Register`].
pub const REGISTER_WINDOW_LEN: usize = Register::Rah0.offset() + 4;

/// CTRL: Set Link Up.
pub const CTRL_SLU: u32 = 1 << 6;

/// STATUS: Link Up.
pub const STATUS_LU: u32 = 1 << 1;

/// RCTL: Receiver Enable.
pub const RCTL_EN: u32 = 1 << 1;
/// RCTL: Unicast Promiscuous Enable.
pub const RCTL_UPE: u32 = 1 << 3;
/// RCTL: Multicast Promiscuous Enable.
pub const RCTL_MPE: u32 = 1 << 4;
/// RCTL: Long Packet Enable.
pub const RCTL_LPE: u32 = 1 << 5;
/// RCTL: loopback mode field (00 = normal operation).
pub const RCTL_LBM_NONE: u32 = 0b00 << 6;
/// RCTL: descriptor minimum threshold at half the ring.
pub const RCTL_RDMTS_HALF: u32 = 0b00 << 8;
/// RCTL: Broadcast Accept Mode.
pub const RCTL_BAM: u32 = 1 << 15;
/// RCTL: buffer size field for 2048-byte buffers (BSEX clear).
pub const RCTL_BSIZE_2048: u32 = 0b00 << 16;
/// RCTL: Strip Ethernet CRC.
pub const RCTL_SECRC: u32 = 1 << 26;

/// TCTL: Transmit Enable.
pub const TCTL_EN: u32 = 1 << 1;
/// TCTL: Pad Short Packets.
pub const TCTL_PSP: u32 = 1 << 3;
/// TCTL: Collision Threshold field shift.
pub const TCTL_CT_SHIFT: u32 = 4;
/// TCTL: Collision Distance field shift.
pub const TCTL_COLD_SHIFT: u32 = 12;
/// TCTL: Collision Threshold setup value.
pub const TCTL_CT: u32 = 0x10 << TCTL_CT_SHIFT;
/// TCTL: Collision Distance setup value (full duplex).
pub const TCTL_COLD: u32 = 0x40 << TCTL_COLD_SHIFT;

/// TIPG: transmit gap field shift.
pub const TIPG_IPGT_SHIFT: u32 = 0;
/// TIPG: receive gap 1 field shift.
pub const TIPG_IPGR1_SHIFT: u32 = 10;
/// TIPG: receive gap 2 field shift.
pub const TIPG_IPGR2_SHIFT: u32 = 20;
/// TIPG setup value.
///
/// IPGR1 is 2/3 of the effective IPGR2 once the six MAC clocks the hardware
/// adds are counted, which is what IEEE 802.3 compliance asks for.
pub const TIPG_DEFAULT: u32 =
    (10 << TIPG_IPGT_SHIFT) | (8 << TIPG_IPGR1_SHIFT) | (20 << TIPG_IPGR2_SHIFT);

/// RAH: Address Valid.
pub const RAH_AV: u32 = 1 << 31;

/// RSRPD: small packet size field mask.
pub const RSRPD_SIZE_MASK: u32 = 0x0fff;

/// Typed view over the device register window.
#[derive(Debug)]
pub struct Registers<R> {
    io: R,
}

impl<R: RegisterIo> Registers<R> {
    /// Wraps a mapped register window.
    pub fn new(io: R) -> Self {
        Self { io }
    }

    /// Reads `reg`.
    #[inline]
    pub fn read(&self, reg: Register) -> u32 {
        self.io.read32(reg.offset())
    }

    /// Writes `value` to `reg`.
    #[inline]
    pub fn write(&self, reg: Register, value: u32) {
        self.io.write32(reg.offset(), value);
    }

    /// Read-modify-write that sets `mask` in `reg`.
    pub fn set_bits(&self, reg: Register, mask: u32) {
        let value = self.read(reg);
        self.write(reg, value | mask);
    }

    /// Read-modify-write that clears `mask` in `reg`.
    pub fn clear_bits(&self, reg: Register, mask: u32) {
        let value = self.read(reg);
        self.write(reg, value & !mask);
    }

    /// Writes entry `index` of the Multicast Table Array.
    pub fn write_mta(&self, index: usize, value: u32) {
        assert!(index < MTA_ENTRIES, "mta index {index} out of range");
        self.io.write32(Register::Mta.offset() + index * 4, value);
    }

    /// Underlying register window.
    pub fn io(&self) -> &R {
        &self.io
    }
}
