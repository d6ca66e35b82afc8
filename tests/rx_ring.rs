// Author: Lukas Bower
// Purpose: Receive ring delivery, recycling and wraparound on the simulated device.

mod common;

use cohesix_e1000::drivers::e1000::desc::RxErrors;
use cohesix_e1000::drivers::e1000::regs::Register;
use cohesix_e1000::drivers::e1000::rx::RxError;
use cohesix_e1000::host::HostError;
use serial_test::serial;

#[test]
#[serial]
fn idle_poll_has_no_side_effects() {
    let (_hal, sim, mut nic) = common::attach();
    sim.clear_write_log();
    for _ in 0..5 {
        assert_eq!(nic.receive(), Ok(None));
        assert_eq!(nic.receive_into(&mut [0u8; 2048]), Ok(None));
    }
    assert_eq!(nic.rx().cursor(), 0);
    assert!(sim.write_log().is_empty());
    assert_eq!(sim.register(Register::Rdt), 127);
}

#[test]
#[serial]
fn delivers_exact_bytes_once() {
    let (_hal, sim, mut nic) = common::attach();
    let bytes = common::frame(3, 342);
    sim.inject_rx(&bytes).unwrap();

    let mut dst = [0u8; 2048];
    assert_eq!(nic.receive_into(&mut dst), Ok(Some(342)));
    assert_eq!(&dst[..342], bytes.as_slice());
    assert_eq!(sim.register(Register::Rdt), 0);
    assert_eq!(nic.rx().cursor(), 1);

    assert_eq!(nic.receive_into(&mut dst), Ok(None));
    assert_eq!(nic.rx().stats().packets, 1);
}

#[test]
#[serial]
fn cursor_wraps_across_many_laps() {
    let (_hal, sim, mut nic) = common::attach();
    for lap in 0..3usize {
        for slot in 0..128usize {
            let bytes = common::frame((lap * 128 + slot) as u8, 60 + slot);
            sim.inject_rx(&bytes).unwrap();
            let packet = nic.receive().unwrap().expect("frame");
            assert_eq!(packet.as_slice(), bytes.as_slice());
        }
        assert_eq!(nic.rx().cursor(), 0);
    }
    assert_eq!(nic.rx().stats().packets, 3 * 128);
    assert_eq!(sim.rx_missed(), 0);
}

#[test]
#[serial]
fn ring_holds_one_slot_back_from_hardware() {
    let (_hal, sim, mut nic) = common::attach();
    for seq in 0..127u8 {
        sim.inject_rx(&common::frame(seq, 64)).unwrap();
    }
    assert_eq!(sim.inject_rx(&common::frame(200, 64)), Err(HostError::RxRingFull));
    assert_eq!(sim.rx_missed(), 1);

    let first = nic.receive().unwrap().unwrap();
    assert_eq!(first.as_slice(), common::frame(0, 64).as_slice());
    sim.inject_rx(&common::frame(201, 64)).unwrap();

    let mut delivered = 1;
    while nic.receive().unwrap().is_some() {
        delivered += 1;
    }
    assert_eq!(delivered, 128);
}

#[test]
#[serial]
fn errored_frames_are_dropped_and_counted() {
    let (_hal, sim, mut nic) = common::attach();
    sim.inject_rx_with_errors(&common::frame(1, 64), RxErrors::CE).unwrap();
    sim.inject_rx_with_errors(&common::frame(2, 64), RxErrors::RXE).unwrap();
    sim.inject_rx(&common::frame(3, 64)).unwrap();

    let packet = nic.receive().unwrap().unwrap();
    assert_eq!(packet.as_slice(), common::frame(3, 64).as_slice());
    assert_eq!(nic.rx().stats().dropped_errors, 2);
    assert_eq!(nic.rx().cursor(), 3);
    assert_eq!(sim.register(Register::Rdt), 2);
}

#[test]
#[serial]
fn undersized_destination_is_fatal_and_keeps_the_frame() {
    let (_hal, sim, mut nic) = common::attach();
    sim.inject_rx(&common::frame(5, 600)).unwrap();
    let err = nic.receive_into(&mut [0u8; 100]).unwrap_err();
    assert_eq!(
        err,
        RxError::BufferTooSmall {
            needed: 600,
            provided: 100
        }
    );
    assert_eq!(nic.rx().cursor(), 0);
}

#[test]
#[serial]
fn receive_interrupt_hints_rx_ready() {
    let (_hal, sim, mut nic) = common::attach();
    sim.inject_rx(&common::frame(7, 64)).unwrap();
    let hint = nic.service_interrupts();
    assert!(hint.rx_ready);
    assert!(!hint.tx_reclaimable);
    assert!(nic.receive().unwrap().is_some());
}
