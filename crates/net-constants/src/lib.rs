// Copyright © 2025 Lukas Bower
// SPDX-License-Identifier: Apache-2.0
// Purpose: Defines the net-constants library and public module surface.
// Author: Lukas Bower

#![no_std]
#![deny(unsafe_code)]
#![deny(missing_docs)]

//! Shared networking constants for the e1000 driver and the network-server
//! pumps that talk to it.

/// Platform page size; every DMA buffer and IPC page is one page.
pub const PAGE_SIZE: usize = 4096;

/// Largest Ethernet frame (without FCS) accepted for transmit.
pub const MAX_PACKET_LEN: usize = 1518;

/// Bytes reserved at the head of an IPC packet page for the length word.
pub const PACKET_HEADER_LEN: usize = 4;

/// Upper bound on packets carried by one batched output request.
pub const MAX_BATCH_PACKETS: usize = 16;

/// Default number of transmit descriptors.
pub const TX_RING_LEN: usize = 16;

/// Default number of receive descriptors.
pub const RX_RING_LEN: usize = 128;

/// Receive buffer size programmed into RCTL.BSIZE.
pub const RX_BUFFER_LEN: usize = 2048;

/// IPC request code: received packet delivered to the network server.
pub const NSREQ_INPUT: u32 = 10;

/// IPC request code: single packet to transmit.
pub const NSREQ_OUTPUT: u32 = 11;

/// IPC request code: vector of up to [`MAX_BATCH_PACKETS`] packets to transmit.
pub const NSREQ_OUTPUT_BATCH: u32 = 12;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn packet_fits_in_ipc_page() {
        assert!(PACKET_HEADER_LEN + MAX_PACKET_LEN <= PAGE_SIZE);
        assert!(MAX_PACKET_LEN <= RX_BUFFER_LEN);
    }

    #[test]
    fn request_codes_are_distinct() {
        assert_ne!(NSREQ_INPUT, NSREQ_OUTPUT);
        assert_ne!(NSREQ_OUTPUT, NSREQ_OUTPUT_BATCH);
        assert_ne!(NSREQ_INPUT, NSREQ_OUTPUT_BATCH);
    }
}
