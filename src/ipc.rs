// Author: Lukas Bower
// Purpose: Page-passing message protocol between the pumps and the network stack.

//! Cross-process messages.
//!
//! A message is a 32-bit request code plus an optional page transfer. Packet
//! pages carry a little-endian `i32` length at offset 0 followed by the frame
//! bytes at [`PACKET_HEADER_LEN`]. Batched output carries up to
//! [`MAX_BATCH_PACKETS`] `(page, offset, len)` vectors instead of one page.

use core::fmt;

use bitflags::bitflags;
use cohesix_net_constants::{
    MAX_BATCH_PACKETS, MAX_PACKET_LEN, NSREQ_INPUT, NSREQ_OUTPUT, NSREQ_OUTPUT_BATCH,
    PACKET_HEADER_LEN,
};
use thiserror::Error;

use crate::drivers::e1000::tx::TxBuffer;
use crate::hal::PageRef;

/// Process identifier used to address messages.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct EnvId(pub u32);

impl fmt::Display for EnvId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "env{:08x}", self.0)
    }
}

bitflags! {
    /// Permissions attached to a transferred page.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct PagePerm: u32 {
        /// The page is mapped.
        const PRESENT = 1 << 0;
        /// The receiver may write it.
        const WRITE = 1 << 1;
        /// The receiver's user mode may access it.
        const USER = 1 << 2;
    }
}

/// A page lent across a message together with its permissions.
#[derive(Clone, Debug)]
pub struct PageGrant {
    /// The lent page; holding it pins the page.
    pub page: PageRef,
    /// Permissions the sender attached.
    pub perm: PagePerm,
}

impl PageGrant {
    /// Grants `page` with `perm`.
    pub fn new(page: PageRef, perm: PagePerm) -> Self {
        Self { page, perm }
    }

    /// True when the sender marked the page present.
    #[must_use]
    pub fn is_present(&self) -> bool {
        self.perm.contains(PagePerm::PRESENT)
    }
}

/// One packet of a batched output request.
#[derive(Clone, Debug)]
pub struct IoVec {
    /// Page holding the packet.
    pub grant: PageGrant,
    /// Offset of the first packet byte.
    pub offset: usize,
    /// Packet length.
    pub len: usize,
}

impl IoVec {
    /// Transmit buffer covering this vector.
    pub fn tx_buffer(&self) -> Result<TxBuffer, ProtocolError> {
        TxBuffer::new(self.grant.page.clone(), self.offset, self.len)
            .map_err(|_| ProtocolError::BadLength(self.len as i64))
    }
}

/// Page payload of a message.
#[derive(Clone, Debug, Default)]
pub enum Transfer {
    /// No page.
    #[default]
    None,
    /// One page.
    Page(PageGrant),
    /// A bounded vector of packet pieces.
    Vector(heapless::Vec<IoVec, MAX_BATCH_PACKETS>),
}

/// A received message.
#[derive(Clone, Debug)]
pub struct Envelope {
    /// Sender.
    pub from: EnvId,
    /// Request code.
    pub value: u32,
    /// Attached pages.
    pub transfer: Transfer,
}

/// Transport failures.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum IpcError {
    /// The target is not blocked in receive; try again later.
    #[error("{0} is not receiving")]
    NotReceiving(EnvId),
    /// The endpoint is gone.
    #[error("ipc endpoint closed")]
    Closed,
}

/// Message endpoint of one process.
pub trait IpcEndpoint {
    /// Returns the next pending message without blocking.
    fn try_recv(&mut self) -> Result<Option<Envelope>, IpcError>;

    /// Sends `value` and `transfer` to `to`.
    ///
    /// Returns [`IpcError::NotReceiving`] when the peer is not ready, in
    /// which case the transfer is dropped and the caller keeps its own
    /// reference to any page it lent.
    fn send(&mut self, to: EnvId, value: u32, transfer: Transfer) -> Result<(), IpcError>;
}

impl<T: IpcEndpoint + ?Sized> IpcEndpoint for &mut T {
    fn try_recv(&mut self) -> Result<Option<Envelope>, IpcError> {
        (**self).try_recv()
    }

    fn send(&mut self, to: EnvId, value: u32, transfer: Transfer) -> Result<(), IpcError> {
        (**self).send(to, value, transfer)
    }
}

/// Message contents the pumps refuse to act on.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
pub enum ProtocolError {
    /// A page was expected but none arrived, or it was not present.
    #[error("request carries no present page")]
    MissingBuffer,
    /// The request code is not part of the protocol.
    #[error("unknown request code {0}")]
    UnknownRequest(u32),
    /// A known request arrived at a process that does not serve it.
    #[error("unexpected request code {0}")]
    UnexpectedRequest(u32),
    /// The request carried the wrong kind of transfer.
    #[error("request code {0} carries the wrong transfer kind")]
    WrongTransfer(u32),
    /// The packet length is outside `1..=MAX_PACKET_LEN` or overflows its page.
    #[error("invalid packet length {0}")]
    BadLength(i64),
}

/// A present page laid out as `len` header plus frame bytes.
#[derive(Clone, Debug)]
pub struct PacketPage {
    grant: PageGrant,
}

impl PacketPage {
    /// Accepts `grant` if it is present.
    pub fn from_grant(grant: PageGrant) -> Result<Self, ProtocolError> {
        if !grant.is_present() {
            return Err(ProtocolError::MissingBuffer);
        }
        Ok(Self { grant })
    }

    /// The underlying grant.
    #[must_use]
    pub fn grant(&self) -> &PageGrant {
        &self.grant
    }

    /// Gives the grant back.
    #[must_use]
    pub fn into_grant(self) -> PageGrant {
        self.grant
    }

    /// Reads and validates the length header.
    pub fn packet_len(&self) -> Result<usize, ProtocolError> {
        let raw = self.grant.page.read_u32(0) as i32;
        let len = usize::try_from(raw).map_err(|_| ProtocolError::BadLength(i64::from(raw)))?;
        let fits = PACKET_HEADER_LEN + len <= self.grant.page.len();
        if len == 0 || len > MAX_PACKET_LEN || !fits {
            return Err(ProtocolError::BadLength(i64::from(raw)));
        }
        Ok(len)
    }

    /// Writes the length header.
    pub fn set_packet_len(&self, len: usize) {
        self.grant.page.write_u32(0, len as u32);
    }

    /// Frame bytes as a transmit buffer, without copying.
    pub fn tx_buffer(&self) -> Result<TxBuffer, ProtocolError> {
        let len = self.packet_len()?;
        TxBuffer::new(self.grant.page.clone(), PACKET_HEADER_LEN, len)
            .map_err(|_| ProtocolError::BadLength(len as i64))
    }

    /// Copies the frame bytes out.
    pub fn read_packet(&self, dst: &mut [u8]) -> Result<usize, ProtocolError> {
        let len = self.packet_len()?;
        let dst = dst
            .get_mut(..len)
            .ok_or(ProtocolError::BadLength(len as i64))?;
        self.grant.page.read_bytes(PACKET_HEADER_LEN, dst);
        Ok(len)
    }
}

/// Requests understood by the network server and the pumps.
#[derive(Clone, Debug)]
pub enum NetRequest {
    /// A received frame travelling from the input pump to the stack.
    Input(PacketPage),
    /// A frame to transmit.
    Output(PacketPage),
    /// Several independent frames to transmit.
    OutputBatch(heapless::Vec<IoVec, MAX_BATCH_PACKETS>),
}

impl NetRequest {
    /// Request code on the wire.
    #[must_use]
    pub fn code(&self) -> u32 {
        match self {
            Self::Input(_) => NSREQ_INPUT,
            Self::Output(_) => NSREQ_OUTPUT,
            Self::OutputBatch(_) => NSREQ_OUTPUT_BATCH,
        }
    }

    /// Decodes a message, validating the transfer it carries.
    pub fn decode(envelope: Envelope) -> Result<Self, ProtocolError> {
        let code = envelope.value;
        match (code, envelope.transfer) {
            (NSREQ_INPUT | NSREQ_OUTPUT | NSREQ_OUTPUT_BATCH, Transfer::None) => {
                Err(ProtocolError::MissingBuffer)
            }
            (NSREQ_INPUT, Transfer::Page(grant)) => PacketPage::from_grant(grant).map(Self::Input),
            (NSREQ_OUTPUT, Transfer::Page(grant)) => {
                PacketPage::from_grant(grant).map(Self::Output)
            }
            (NSREQ_OUTPUT_BATCH, Transfer::Vector(vectors)) => {
                if vectors.is_empty() || vectors.iter().any(|v| !v.grant.is_present()) {
                    return Err(ProtocolError::MissingBuffer);
                }
                Ok(Self::OutputBatch(vectors))
            }
            (NSREQ_INPUT | NSREQ_OUTPUT | NSREQ_OUTPUT_BATCH, _) => {
                Err(ProtocolError::WrongTransfer(code))
            }
            (other, _) => Err(ProtocolError::UnknownRequest(other)),
        }
    }

    /// Splits the request into its code and transfer for sending.
    #[must_use]
    pub fn encode(self) -> (u32, Transfer) {
        let code = self.code();
        let transfer = match self {
            Self::Input(page) | Self::Output(page) => Transfer::Page(page.into_grant()),
            Self::OutputBatch(vectors) => Transfer::Vector(vectors),
        };
        (code, transfer)
    }
}

#[cfg(test)]
mod tests {
    use cohesix_net_constants::PAGE_SIZE;

    use super::*;
    use crate::hal::DmaFrame;

    fn grant(perm: PagePerm) -> PageGrant {
        PageGrant::new(
            PageRef::new(DmaFrame::alloc_zeroed(0x7000, PAGE_SIZE).unwrap()),
            perm,
        )
    }

    fn envelope(value: u32, transfer: Transfer) -> Envelope {
        Envelope {
            from: EnvId(0x1001),
            value,
            transfer,
        }
    }

    #[test]
    fn packet_page_header_round_trip() {
        let page = PacketPage::from_grant(grant(PagePerm::PRESENT | PagePerm::USER)).unwrap();
        page.grant().page.write_bytes(PACKET_HEADER_LEN, b"abc");
        page.set_packet_len(3);
        assert_eq!(page.packet_len(), Ok(3));
        let buffer = page.tx_buffer().unwrap();
        assert_eq!(buffer.offset(), PACKET_HEADER_LEN);
        assert_eq!(buffer.len(), 3);
        let mut out = [0u8; 8];
        assert_eq!(page.read_packet(&mut out), Ok(3));
        assert_eq!(&out[..3], b"abc");
    }

    #[test]
    fn bad_lengths_are_rejected() {
        let page = PacketPage::from_grant(grant(PagePerm::PRESENT)).unwrap();
        page.grant().page.write_u32(0, (-1i32) as u32);
        assert_eq!(page.packet_len(), Err(ProtocolError::BadLength(-1)));
        page.set_packet_len(0);
        assert!(page.packet_len().is_err());
        page.set_packet_len(MAX_PACKET_LEN + 1);
        assert!(page.tx_buffer().is_err());
    }

    #[test]
    fn decode_requires_present_page() {
        let err = NetRequest::decode(envelope(NSREQ_OUTPUT, Transfer::Page(grant(PagePerm::USER))))
            .unwrap_err();
        assert_eq!(err, ProtocolError::MissingBuffer);
        let err = NetRequest::decode(envelope(NSREQ_OUTPUT, Transfer::None)).unwrap_err();
        assert_eq!(err, ProtocolError::MissingBuffer);
    }

    #[test]
    fn decode_classifies_codes() {
        let present = PagePerm::PRESENT | PagePerm::USER;
        let req = NetRequest::decode(envelope(NSREQ_INPUT, Transfer::Page(grant(present)))).unwrap();
        assert_eq!(req.code(), NSREQ_INPUT);
        assert!(matches!(
            NetRequest::decode(envelope(99, Transfer::Page(grant(present)))),
            Err(ProtocolError::UnknownRequest(99))
        ));
        assert!(matches!(
            NetRequest::decode(envelope(NSREQ_OUTPUT_BATCH, Transfer::Page(grant(present)))),
            Err(ProtocolError::WrongTransfer(NSREQ_OUTPUT_BATCH))
        ));
    }

    #[test]
    fn batch_decode_checks_every_vector() {
        let mut vectors = heapless::Vec::new();
        for perm in [PagePerm::PRESENT, PagePerm::USER] {
            let iov = IoVec {
                grant: grant(perm),
                offset: 0,
                len: 60,
            };
            assert!(vectors.push(iov).is_ok());
        }
        assert!(matches!(
            NetRequest::decode(envelope(NSREQ_OUTPUT_BATCH, Transfer::Vector(vectors))),
            Err(ProtocolError::MissingBuffer)
        ));
    }

    #[test]
    fn encode_returns_code_and_page() {
        let page = PacketPage::from_grant(grant(PagePerm::PRESENT)).unwrap();
        let (code, transfer) = NetRequest::Output(page).encode();
        assert_eq!(code, NSREQ_OUTPUT);
        assert!(matches!(transfer, Transfer::Page(_)));
    }
}
