// Author: Lukas Bower
// Purpose: In-process message bus standing in for kernel IPC on host builds.

//! Loopback IPC.
//!
//! Every endpoint has an unbounded FIFO mailbox. A process can be marked as
//! not receiving, in which case sends to it fail with
//! [`IpcError::NotReceiving`] and the transfer is dropped, mirroring a
//! kernel that only delivers to a process blocked in receive.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Arc;

use log::trace;
use spin::Mutex;

use crate::ipc::{EnvId, Envelope, IpcEndpoint, IpcError, Transfer};

#[derive(Debug)]
struct Mailbox {
    queue: VecDeque<Envelope>,
    receiving: bool,
}

/// Shared bus connecting [`LoopbackIpc`] endpoints.
#[derive(Clone, Debug, Default)]
pub struct IpcBus {
    mailboxes: Arc<Mutex<BTreeMap<EnvId, Mailbox>>>,
}

impl IpcBus {
    /// Empty bus.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers `env` and returns its endpoint.
    pub fn endpoint(&self, env: EnvId) -> LoopbackIpc {
        self.mailboxes.lock().entry(env).or_insert_with(|| Mailbox {
            queue: VecDeque::new(),
            receiving: true,
        });
        LoopbackIpc {
            env,
            bus: self.clone(),
        }
    }

    /// Controls whether sends to `env` are accepted.
    pub fn set_receiving(&self, env: EnvId, receiving: bool) {
        if let Some(mailbox) = self.mailboxes.lock().get_mut(&env) {
            mailbox.receiving = receiving;
        }
    }

    /// Messages waiting for `env`.
    pub fn pending(&self, env: EnvId) -> usize {
        self.mailboxes
            .lock()
            .get(&env)
            .map_or(0, |mailbox| mailbox.queue.len())
    }

    /// Removes and returns every message waiting for `env`.
    pub fn drain(&self, env: EnvId) -> Vec<Envelope> {
        self.mailboxes
            .lock()
            .get_mut(&env)
            .map(|mailbox| mailbox.queue.drain(..).collect())
            .unwrap_or_default()
    }

    fn deliver(&self, envelope: Envelope, to: EnvId) -> Result<(), IpcError> {
        let mut mailboxes = self.mailboxes.lock();
        let mailbox = mailboxes.get_mut(&to).ok_or(IpcError::Closed)?;
        if !mailbox.receiving {
            return Err(IpcError::NotReceiving(to));
        }
        trace!("[ipc] {} -> {to} value={}", envelope.from, envelope.value);
        mailbox.queue.push_back(envelope);
        Ok(())
    }

    fn take(&self, env: EnvId) -> Result<Option<Envelope>, IpcError> {
        let mut mailboxes = self.mailboxes.lock();
        let mailbox = mailboxes.get_mut(&env).ok_or(IpcError::Closed)?;
        Ok(mailbox.queue.pop_front())
    }
}

/// Endpoint of one simulated process.
#[derive(Clone, Debug)]
pub struct LoopbackIpc {
    env: EnvId,
    bus: IpcBus,
}

impl LoopbackIpc {
    /// Identity of this endpoint.
    pub fn env(&self) -> EnvId {
        self.env
    }
}

impl IpcEndpoint for LoopbackIpc {
    fn try_recv(&mut self) -> Result<Option<Envelope>, IpcError> {
        self.bus.take(self.env)
    }

    fn send(&mut self, to: EnvId, value: u32, transfer: Transfer) -> Result<(), IpcError> {
        let envelope = Envelope {
            from: self.env,
            value,
            transfer,
        };
        self.bus.deliver(envelope, to)
    }
}
