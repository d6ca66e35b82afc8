// Author: Lukas Bower
// Purpose: Output pump request handling, batching and fatal protocol faults.

mod common;

use cohesix_e1000::config::PumpConfig;
use cohesix_e1000::drivers::e1000::desc::TxCommand;
use cohesix_e1000::drivers::e1000::tx::TxBuffer;
use cohesix_e1000::host::{IpcBus, LoopbackIpc};
use cohesix_e1000::ipc::{
    EnvId, IoVec, IpcEndpoint, PageGrant, PagePerm, ProtocolError, Transfer,
};
use cohesix_e1000::net::{abort, OutputPump, PumpFault};
use cohesix_e1000::sched::RetryBudget;
use cohesix_net_constants::{NSREQ_INPUT, NSREQ_OUTPUT, NSREQ_OUTPUT_BATCH, PACKET_HEADER_LEN};
use serial_test::serial;

const STACK: EnvId = EnvId(0x1001);
const OUTPUT: EnvId = EnvId(0x1002);

fn endpoints() -> (LoopbackIpc, LoopbackIpc) {
    let bus = IpcBus::new();
    (bus.endpoint(STACK), bus.endpoint(OUTPUT))
}

fn pump(retry: RetryBudget) -> OutputPump {
    OutputPump::new(PumpConfig {
        ns_env: STACK,
        retry,
        ..PumpConfig::default()
    })
}

#[test]
#[serial]
fn single_request_is_posted_zero_copy_and_grant_released() {
    let (mut hal, sim, mut nic) = common::attach();
    let (mut stack, mut ipc) = endpoints();
    let bytes = common::frame(0x42, 98);
    let page = common::packet_page(&mut hal, &bytes);

    stack
        .send(OUTPUT, NSREQ_OUTPUT, Transfer::Page(common::present(&page)))
        .unwrap();
    assert_eq!(page.ref_count(), 2);

    let mut pump = pump(RetryBudget::Attempts(4));
    let served = pump.serve_one(&mut nic, &mut ipc, &mut || {}).unwrap();
    assert_eq!(served, Some(1));

    // Grant dropped; only the ring binding still pins the page.
    assert_eq!(page.ref_count(), 2);
    assert!(nic.tx().binding(0).unwrap().same_page(&page));
    assert_eq!(
        nic.tx().descriptor(0).addr,
        page.paddr() + PACKET_HEADER_LEN as u64
    );

    sim.process_tx(usize::MAX).unwrap();
    assert_eq!(sim.take_transmitted(), vec![bytes]);
    assert_eq!(pump.serve_one(&mut nic, &mut ipc, &mut || {}).unwrap(), None);
}

#[test]
#[serial]
fn batch_posts_every_packet_before_releasing_grants() {
    let (mut hal, sim, mut nic) = common::attach();
    let (mut stack, mut ipc) = endpoints();

    // Fill the ring so every batch packet has to wait for hardware.
    let filler = common::packet_page(&mut hal, &common::frame(0, 60));
    for _ in 0..16 {
        nic.transmit(&TxBuffer::new(filler.clone(), PACKET_HEADER_LEN, 60).unwrap())
            .unwrap();
    }
    let pages: Vec<_> = (1..=5u8)
        .map(|seq| common::packet_page(&mut hal, &common::frame(seq, 70)))
        .collect();
    let mut vectors = heapless::Vec::new();
    for page in &pages {
        let iov = IoVec {
            grant: common::present(page),
            offset: PACKET_HEADER_LEN,
            len: 70,
        };
        assert!(vectors.push(iov).is_ok());
    }
    stack
        .send(OUTPUT, NSREQ_OUTPUT_BATCH, Transfer::Vector(vectors))
        .unwrap();

    let mut pump = pump(RetryBudget::Attempts(8));
    let mut observed = Vec::new();
    let hw = sim.clone();
    let mut yielder = || {
        // Every page is still held by its grant while the batch is in flight.
        observed.push(pages.iter().all(|page| page.ref_count() >= 3));
        hw.process_tx(1).unwrap();
    };
    let served = pump.serve_one(&mut nic, &mut ipc, &mut yielder).unwrap();
    assert_eq!(served, Some(5));
    assert_eq!(observed.len(), 5);
    assert!(observed.iter().all(|held| *held));

    for page in &pages {
        assert_eq!(page.ref_count(), 2, "grant released after all posts");
    }
    for slot in 0..5 {
        assert!(nic.tx().descriptor(slot).cmd.contains(TxCommand::EOP));
    }
    sim.process_tx(usize::MAX).unwrap();
    let wire = sim.take_transmitted();
    let tail: Vec<_> = wire.iter().rev().take(5).rev().cloned().collect();
    let expected: Vec<_> = (1..=5u8).map(|seq| common::frame(seq, 70)).collect();
    assert_eq!(tail, expected);
    assert_eq!(pump.stats().batches, 1);
    assert_eq!(pump.stats().packets, 5);
}

#[test]
#[serial]
fn missing_presence_flag_is_a_protocol_fault() {
    let (mut hal, _sim, mut nic) = common::attach();
    let (mut stack, mut ipc) = endpoints();
    let page = common::packet_page(&mut hal, &common::frame(1, 60));
    stack
        .send(
            OUTPUT,
            NSREQ_OUTPUT,
            Transfer::Page(PageGrant::new(page.clone(), PagePerm::USER)),
        )
        .unwrap();

    let fault = pump(RetryBudget::Unbounded).run(&mut nic, &mut ipc, &mut || {});
    assert!(matches!(
        fault,
        PumpFault::Protocol(ProtocolError::MissingBuffer)
    ));
    assert_eq!(nic.tx().bound_slots(), 0);
}

#[test]
#[serial]
#[should_panic(expected = "protocol violation")]
fn missing_presence_flag_terminates_the_pump() {
    let (_hal, _sim, mut nic) = common::attach();
    let (mut stack, mut ipc) = endpoints();
    stack.send(OUTPUT, NSREQ_OUTPUT, Transfer::None).unwrap();
    let fault = pump(RetryBudget::Unbounded).run(&mut nic, &mut ipc, &mut || {});
    abort("output", &fault);
}

#[test]
#[serial]
fn input_requests_are_unexpected() {
    let (mut hal, _sim, mut nic) = common::attach();
    let (mut stack, mut ipc) = endpoints();
    let page = common::packet_page(&mut hal, &common::frame(1, 60));
    stack
        .send(OUTPUT, NSREQ_INPUT, Transfer::Page(common::present(&page)))
        .unwrap();
    let fault = pump(RetryBudget::Unbounded).run(&mut nic, &mut ipc, &mut || {});
    assert!(matches!(
        fault,
        PumpFault::Protocol(ProtocolError::UnexpectedRequest(NSREQ_INPUT))
    ));
}

#[test]
#[serial]
fn bad_length_header_is_fatal() {
    let (mut hal, _sim, mut nic) = common::attach();
    let (mut stack, mut ipc) = endpoints();
    let page = common::packet_page(&mut hal, &common::frame(1, 60));
    page.write_u32(0, 4000);
    stack
        .send(OUTPUT, NSREQ_OUTPUT, Transfer::Page(common::present(&page)))
        .unwrap();
    let fault = pump(RetryBudget::Unbounded).run(&mut nic, &mut ipc, &mut || {});
    assert!(matches!(
        fault,
        PumpFault::Protocol(ProtocolError::BadLength(4000))
    ));
}

#[test]
#[serial]
fn stalled_hardware_exhausts_a_bounded_budget() {
    let (mut hal, _sim, mut nic) = common::attach();
    let (mut stack, mut ipc) = endpoints();
    let filler = common::packet_page(&mut hal, &common::frame(0, 60));
    for _ in 0..16 {
        nic.transmit(&TxBuffer::new(filler.clone(), PACKET_HEADER_LEN, 60).unwrap())
            .unwrap();
    }
    let page = common::packet_page(&mut hal, &common::frame(1, 60));
    stack
        .send(OUTPUT, NSREQ_OUTPUT, Transfer::Page(common::present(&page)))
        .unwrap();

    let mut yields = 0;
    let mut pump = pump(RetryBudget::Attempts(5));
    let err = pump
        .serve_one(&mut nic, &mut ipc, &mut || yields += 1)
        .unwrap_err();
    assert!(matches!(err, PumpFault::Stalled { what: "transmit ring", .. }));
    assert_eq!(yields, 4);
    assert_eq!(pump.stats().busy, 5);
    assert!(page.is_exclusive(), "grant dropped with the failed request");
}
