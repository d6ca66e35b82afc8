// Author: Lukas Bower

//! Host demo: attaches the driver to the simulated e1000 and pushes a few
//! frames through both pumps.

use std::error::Error;

use cohesix_e1000::config::{E1000Config, PumpConfig};
use cohesix_e1000::host::{HostHal, IpcBus, ThreadYield};
use cohesix_e1000::ipc::{EnvId, IpcEndpoint, PageGrant, PagePerm, Transfer};
use cohesix_e1000::net::{InputPump, OutputPump};
use cohesix_e1000::sched::RetryBudget;
use cohesix_e1000::E1000;
use cohesix_net_constants::{NSREQ_OUTPUT, PACKET_HEADER_LEN};
use log::info;

const STACK_ENV: EnvId = EnvId(0x1001);
const OUTPUT_ENV: EnvId = EnvId(0x1002);
const INPUT_ENV: EnvId = EnvId(0x1003);

fn main() {
    env_logger::init();
    if let Err(err) = run() {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

fn run() -> Result<(), Box<dyn Error>> {
    let mut hal = HostHal::new();
    let pci = hal.pci_function();
    let mut nic = E1000::attach(&mut hal, pci, &E1000Config::default())?;
    let sim = hal.sim().clone();
    info!("[demo] attached {pci} mac={}", nic.mac());

    let pump_config = PumpConfig {
        ns_env: STACK_ENV,
        retry: RetryBudget::Attempts(64),
        ..PumpConfig::default()
    };
    let bus = IpcBus::new();
    let mut stack = bus.endpoint(STACK_ENV);
    let mut output_ipc = bus.endpoint(OUTPUT_ENV);
    let mut input_ipc = bus.endpoint(INPUT_ENV);
    let mut yielder = ThreadYield;

    // Stack -> output pump -> wire.
    let mut output = OutputPump::new(pump_config);
    for seq in 0..3u8 {
        let page = hal.alloc_page()?;
        let frame = [0xffu8, 0xff, 0xff, 0xff, 0xff, 0xff, seq, 0x08, 0x06];
        page.write_bytes(PACKET_HEADER_LEN, &frame);
        page.write_u32(0, frame.len() as u32);
        let grant = PageGrant::new(page, PagePerm::PRESENT | PagePerm::USER);
        stack.send(OUTPUT_ENV, NSREQ_OUTPUT, Transfer::Page(grant))?;
        output.serve_one(&mut nic, &mut output_ipc, &mut yielder)?;
    }
    sim.process_tx(usize::MAX)?;
    for frame in sim.take_transmitted() {
        info!("[demo] wire <- {} bytes {:02x?}", frame.len(), frame);
    }
    nic.service_interrupts();

    // Wire -> input pump -> stack.
    let pages = (0..pump_config.input_pages)
        .map(|_| hal.alloc_page())
        .collect::<Result<Vec<_>, _>>()?;
    let mut input = InputPump::new(pump_config, pages)?;
    sim.inject_rx(b"\x52\x54\x00\x12\x34\x56 inbound")?;
    while input.step(&mut nic, &mut input_ipc, &mut yielder)? {}
    while let Some(envelope) = stack.try_recv()? {
        if let Transfer::Page(grant) = envelope.transfer {
            let len = grant.page.read_u32(0) as usize;
            info!("[demo] stack <- {len} bytes from {}", envelope.from);
        }
    }

    info!(
        "[demo] output={:?} input={:?} tx={:?} rx={:?}",
        output.stats(),
        input.stats(),
        nic.tx().stats(),
        nic.rx().stats()
    );
    Ok(())
}
