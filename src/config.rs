// Author: Lukas Bower
// Purpose: Attach-time and pump configuration.

//! Configuration for the driver and the packet pumps.

use cohesix_net_constants::{PAGE_SIZE, RX_RING_LEN, TX_RING_LEN};
use thiserror::Error;

use crate::drivers::e1000::desc::{DESC_SIZE, RING_ALIGN_BYTES};
use crate::drivers::e1000::irq::IrqCause;
use crate::drivers::e1000::regs::RSRPD_SIZE_MASK;
use crate::drivers::e1000::MacAddress;
use crate::ipc::EnvId;
use crate::sched::RetryBudget;

/// Pages in the input pump's rotation unless configured otherwise.
pub const DEFAULT_INPUT_PAGES: usize = 4;
/// Largest input page rotation accepted.
pub const MAX_INPUT_PAGES: usize = 64;
/// Process the pumps address when none is configured.
pub const DEFAULT_NS_ENV: EnvId = EnvId(0x1001);

/// Rejected configuration values.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum ConfigError {
    /// Ring size in bytes is zero, not a multiple of 128, or larger than a page.
    #[error("{ring} ring of {len} descriptors is not a valid ring size")]
    RingLength {
        /// Which ring.
        ring: &'static str,
        /// Requested descriptor count.
        len: usize,
    },
    /// The small packet threshold does not fit RSRPD.
    #[error("small packet threshold {0} exceeds RSRPD range")]
    SmallPacketThreshold(u16),
    /// The input page rotation is empty or too large.
    #[error("input pump page count {0} outside 1..={max}", max = MAX_INPUT_PAGES)]
    InputPages(usize),
}

/// Driver settings applied at attach.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct E1000Config {
    /// Transmit descriptors.
    pub tx_ring_len: usize,
    /// Receive descriptors; one pool page is allocated per descriptor.
    pub rx_ring_len: usize,
    /// TIDV value in 1.024 µs units.
    pub tx_interrupt_delay: u16,
    /// RSRPD value in bytes; zero disables small packet detection.
    pub rx_small_packet_threshold: u16,
    /// Address programmed into RAL0/RAH0. `None` keeps the address the
    /// EEPROM latched.
    pub mac: Option<MacAddress>,
    /// Interrupt causes unmasked at the end of attach.
    pub irq_mask: IrqCause,
}

impl E1000Config {
    /// Construct a configuration using the default constants.
    pub const fn default() -> Self {
        Self {
            tx_ring_len: TX_RING_LEN,
            rx_ring_len: RX_RING_LEN,
            tx_interrupt_delay: 0,
            rx_small_packet_threshold: 0,
            mac: None,
            irq_mask: IrqCause::DEFAULT_MASK,
        }
    }

    /// Checks every value against hardware limits.
    pub fn validate(&self) -> Result<(), ConfigError> {
        check_ring("transmit", self.tx_ring_len)?;
        check_ring("receive", self.rx_ring_len)?;
        if u32::from(self.rx_small_packet_threshold) > RSRPD_SIZE_MASK {
            return Err(ConfigError::SmallPacketThreshold(
                self.rx_small_packet_threshold,
            ));
        }
        Ok(())
    }
}

fn check_ring(ring: &'static str, len: usize) -> Result<(), ConfigError> {
    match len.checked_mul(DESC_SIZE) {
        Some(bytes) if len > 0 && bytes % RING_ALIGN_BYTES == 0 && bytes <= PAGE_SIZE => Ok(()),
        _ => Err(ConfigError::RingLength { ring, len }),
    }
}

/// Settings shared by the input and output pumps.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PumpConfig {
    /// Network server the input pump delivers to and the output pump serves.
    pub ns_env: EnvId,
    /// Budget for retrying a full transmit ring or a peer that is not receiving.
    pub retry: RetryBudget,
    /// Pages the input pump rotates through.
    pub input_pages: usize,
}

impl PumpConfig {
    /// Construct a configuration using the default constants.
    pub const fn default() -> Self {
        Self {
            ns_env: DEFAULT_NS_ENV,
            retry: RetryBudget::Unbounded,
            input_pages: DEFAULT_INPUT_PAGES,
        }
    }

    /// Checks the page rotation size.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.input_pages == 0 || self.input_pages > MAX_INPUT_PAGES {
            return Err(ConfigError::InputPages(self.input_pages));
        }
        Ok(())
    }
}
