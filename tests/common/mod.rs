// Author: Lukas Bower
// Purpose: Shared fixtures for the host-simulation integration tests.
#![allow(dead_code)]

use cohesix_e1000::config::E1000Config;
use cohesix_e1000::hal::PageRef;
use cohesix_e1000::host::{HostHal, SimE1000, SimRegisters};
use cohesix_e1000::ipc::{PageGrant, PagePerm};
use cohesix_e1000::E1000;
use cohesix_net_constants::PACKET_HEADER_LEN;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

pub fn attach() -> (HostHal, SimE1000, E1000<SimRegisters>) {
    attach_with(&E1000Config::default())
}

pub fn attach_with(config: &E1000Config) -> (HostHal, SimE1000, E1000<SimRegisters>) {
    init_logging();
    let mut hal = HostHal::new();
    let pci = hal.pci_function();
    let nic = E1000::attach(&mut hal, pci, config).expect("attach");
    let sim = hal.sim().clone();
    (hal, sim, nic)
}

/// Ethernet-looking frame whose bytes identify `seq`.
pub fn frame(seq: u8, len: usize) -> Vec<u8> {
    (0..len).map(|idx| seq.wrapping_add(idx as u8)).collect()
}

/// Page laid out as `len` header plus `bytes`.
pub fn packet_page(hal: &mut HostHal, bytes: &[u8]) -> PageRef {
    let page = hal.alloc_page().expect("page");
    page.write_u32(0, bytes.len() as u32);
    page.write_bytes(PACKET_HEADER_LEN, bytes);
    page
}

pub fn present(page: &PageRef) -> PageGrant {
    PageGrant::new(page.clone(), PagePerm::PRESENT | PagePerm::USER)
}
