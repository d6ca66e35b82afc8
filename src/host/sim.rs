// Author: Lukas Bower
// Purpose: Register-level simulation of an 82540EM for host builds and tests.

//! Simulated e1000.
//!
//! The model keeps a register file, follows the descriptor rings through
//! [`PhysMemory`] and moves frames only when a test or the demo binary asks
//! it to: [`SimE1000::process_tx`] plays the transmit DMA engine and
//! [`SimE1000::inject_rx`] plays the wire.

use std::collections::BTreeMap;
use std::sync::Arc;

use cohesix_net_constants::RX_BUFFER_LEN;
use log::trace;
use spin::Mutex;

use super::memory::PhysMemory;
use super::HostError;
use crate::drivers::e1000::desc::{
    RxDescriptor, RxErrors, RxStatus, TxCommand, TxDescriptor, TxStatus, DESC_SIZE,
};
use crate::drivers::e1000::irq::IrqCause;
use crate::drivers::e1000::regs::{Register, RCTL_EN, STATUS_LU, TCTL_EN};
use crate::drivers::e1000::MacAddress;
use crate::hal::RegisterIo;

#[derive(Debug)]
struct SimState {
    regs: BTreeMap<usize, u32>,
    writes: Vec<(usize, u32)>,
    icr: u32,
    ims: u32,
    tx_head: usize,
    tx_pending: usize,
    rx_head: usize,
    partial: Vec<u8>,
    transmitted: Vec<Vec<u8>>,
    rx_missed: u64,
}

impl SimState {
    fn reg(&self, reg: Register) -> u32 {
        self.regs.get(&reg.offset()).copied().unwrap_or(0)
    }

    fn set_reg(&mut self, reg: Register, value: u32) {
        self.regs.insert(reg.offset(), value);
    }

    fn ring(&self, lo: Register, hi: Register, len: Register) -> (u64, usize) {
        let base = u64::from(self.reg(lo)) | (u64::from(self.reg(hi)) << 32);
        (base, self.reg(len) as usize / DESC_SIZE)
    }
}

/// Handle to a simulated device. Clones share the device.
#[derive(Clone, Debug)]
pub struct SimE1000 {
    state: Arc<Mutex<SimState>>,
    memory: PhysMemory,
}

impl SimE1000 {
    /// Device with link up and `mac` latched in RAL0/RAH0, as if loaded from
    /// the EEPROM.
    pub fn new(memory: PhysMemory, mac: MacAddress) -> Self {
        let mut regs = BTreeMap::new();
        let (ral, rah) = mac.to_registers();
        regs.insert(Register::Ral0.offset(), ral);
        regs.insert(Register::Rah0.offset(), rah);
        regs.insert(Register::Status.offset(), STATUS_LU);
        let state = SimState {
            regs,
            writes: Vec::new(),
            icr: 0,
            ims: 0,
            tx_head: 0,
            tx_pending: 0,
            rx_head: 0,
            partial: Vec::new(),
            transmitted: Vec::new(),
            rx_missed: 0,
        };
        Self {
            state: Arc::new(Mutex::new(state)),
            memory,
        }
    }

    /// Register window handed to the driver.
    pub fn registers(&self) -> SimRegisters {
        SimRegisters {
            state: Arc::clone(&self.state),
        }
    }

    /// Current value of `reg` without access side effects.
    pub fn register(&self, reg: Register) -> u32 {
        let state = self.state.lock();
        match reg {
            Register::Icr => state.icr,
            Register::Ims => state.ims,
            _ => state.reg(reg),
        }
    }

    /// Driver writes to `reg` recorded so far.
    pub fn register_writes(&self, reg: Register) -> usize {
        self.state
            .lock()
            .writes
            .iter()
            .filter(|(offset, _)| *offset == reg.offset())
            .count()
    }

    /// Every driver write recorded so far, in order.
    pub fn write_log(&self) -> Vec<(usize, u32)> {
        self.state.lock().writes.clone()
    }

    /// Forgets recorded writes.
    pub fn clear_write_log(&self) {
        self.state.lock().writes.clear();
    }

    /// Posted transmit descriptors the DMA engine has not fetched yet.
    pub fn tx_pending(&self) -> usize {
        self.state.lock().tx_pending
    }

    /// Transmit head as the hardware sees it.
    pub fn tx_head(&self) -> usize {
        self.state.lock().tx_head
    }

    /// Receive head as the hardware sees it.
    pub fn rx_head(&self) -> usize {
        self.state.lock().rx_head
    }

    /// Frames dropped because the receive ring was full.
    pub fn rx_missed(&self) -> u64 {
        self.state.lock().rx_missed
    }

    /// Latches interrupt causes.
    pub fn raise(&self, causes: IrqCause) {
        self.state.lock().icr |= causes.bits();
    }

    /// Fetches up to `max` posted transmit descriptors, gathers their bytes
    /// and writes DD back. Returns the number of descriptors completed.
    pub fn process_tx(&self, max: usize) -> Result<usize, HostError> {
        let mut state = self.state.lock();
        if state.reg(Register::Tctl) & TCTL_EN == 0 {
            return Ok(0);
        }
        let (base, len) = state.ring(Register::Tdbal, Register::Tdbah, Register::Tdlen);
        if len == 0 {
            return Ok(0);
        }
        let mut done = 0;
        while state.tx_pending > 0 && done < max {
            let slot = state.tx_head;
            let desc_addr = base + (slot * DESC_SIZE) as u64;
            let mut raw = [0u8; DESC_SIZE];
            self.memory.read(desc_addr, &mut raw)?;
            let mut desc = TxDescriptor::from_bytes(&raw);

            let mut bytes = vec![0u8; usize::from(desc.length)];
            self.memory.read(desc.addr, &mut bytes)?;
            state.partial.extend_from_slice(&bytes);
            if desc.cmd.contains(TxCommand::EOP) {
                let frame = std::mem::take(&mut state.partial);
                trace!("[sim] transmitted {} bytes from slot {slot}", frame.len());
                state.transmitted.push(frame);
            }
            if desc.cmd.contains(TxCommand::RS) {
                desc.status = TxStatus::DD;
                self.memory.write(desc_addr, &desc.to_bytes())?;
            }

            state.tx_head = (slot + 1) % len;
            state.tx_pending -= 1;
            let head = state.tx_head as u32;
            state.set_reg(Register::Tdh, head);
            done += 1;
        }
        if done > 0 {
            state.icr |= IrqCause::TXDW.bits();
            if state.tx_pending == 0 {
                state.icr |= IrqCause::TXQE.bits();
            }
        }
        Ok(done)
    }

    /// Frames completed by [`process_tx`](Self::process_tx) since the last call.
    pub fn take_transmitted(&self) -> Vec<Vec<u8>> {
        std::mem::take(&mut self.state.lock().transmitted)
    }

    /// Delivers `frame` from the wire into the next receive slot.
    pub fn inject_rx(&self, frame: &[u8]) -> Result<(), HostError> {
        self.inject_rx_with_errors(frame, RxErrors::empty())
    }

    /// Delivers `frame` with `errors` reported in its descriptor.
    pub fn inject_rx_with_errors(&self, frame: &[u8], errors: RxErrors) -> Result<(), HostError> {
        if frame.len() > RX_BUFFER_LEN {
            return Err(HostError::FrameTooLong { len: frame.len() });
        }
        let mut state = self.state.lock();
        let (base, len) = state.ring(Register::Rdbal, Register::Rdbah, Register::Rdlen);
        if len == 0 || state.reg(Register::Rctl) & RCTL_EN == 0 {
            return Err(HostError::ReceiverDisabled);
        }
        let tail = state.reg(Register::Rdt) as usize % len;
        let slot = state.rx_head;
        if slot == tail {
            state.rx_missed += 1;
            state.icr |= IrqCause::RXO.bits();
            return Err(HostError::RxRingFull);
        }

        let desc_addr = base + (slot * DESC_SIZE) as u64;
        let mut raw = [0u8; DESC_SIZE];
        self.memory.read(desc_addr, &mut raw)?;
        let mut desc = RxDescriptor::from_bytes(&raw);
        self.memory.write(desc.addr, frame)?;
        desc.length = frame.len() as u16;
        desc.errors = errors;
        desc.status = RxStatus::DD | RxStatus::EOP;
        self.memory.write(desc_addr, &desc.to_bytes())?;

        state.rx_head = (slot + 1) % len;
        let head = state.rx_head as u32;
        state.set_reg(Register::Rdh, head);
        state.icr |= IrqCause::RXT0.bits();
        trace!("[sim] received {} bytes into slot {slot}", frame.len());
        Ok(())
    }

    /// Address latched in RAL0/RAH0, if valid.
    pub fn mac(&self) -> Option<MacAddress> {
        let state = self.state.lock();
        MacAddress::from_registers(state.reg(Register::Ral0), state.reg(Register::Rah0))
    }
}

/// Register window of a [`SimE1000`].
#[derive(Clone, Debug)]
pub struct SimRegisters {
    state: Arc<Mutex<SimState>>,
}

impl RegisterIo for SimRegisters {
    fn read32(&self, offset: usize) -> u32 {
        let mut state = self.state.lock();
        if offset == Register::Icr.offset() {
            return std::mem::take(&mut state.icr);
        }
        if offset == Register::Ims.offset() {
            return state.ims;
        }
        state.regs.get(&offset).copied().unwrap_or(0)
    }

    fn write32(&self, offset: usize, value: u32) {
        let mut state = self.state.lock();
        state.writes.push((offset, value));
        if offset == Register::Ims.offset() {
            state.ims |= value;
        } else if offset == Register::Imc.offset() {
            state.ims &= !value;
        } else if offset == Register::Icr.offset() {
            state.icr &= !value;
        } else if offset == Register::Tdt.offset() {
            // Slots between the old and new tail now belong to the DMA engine.
            let len = state.reg(Register::Tdlen) as usize / DESC_SIZE;
            if len > 0 {
                let old = state.reg(Register::Tdt) as usize % len;
                let new = value as usize % len;
                state.tx_pending = (state.tx_pending + (new + len - old) % len).min(len);
            }
            state.set_reg(Register::Tdt, value);
        } else {
            state.regs.insert(offset, value);
        }
    }
}
