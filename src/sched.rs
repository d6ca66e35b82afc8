// Author: Lukas Bower
// Purpose: Cooperative yield and retry primitives used by the packet pumps.

//! Cooperative scheduling seam.
//!
//! Pumps run as single-threaded processes that give up the CPU only at
//! explicit [`Yielder::yield_now`] calls. [`retry_with_yield`] wraps the
//! "try, yield, try again" loop both pumps need around ring operations.

use core::task::Poll;

use thiserror::Error;

/// Gives up the processor to other runnable processes.
pub trait Yielder {
    /// Yields once.
    fn yield_now(&mut self);
}

impl<F: FnMut()> Yielder for F {
    fn yield_now(&mut self) {
        self()
    }
}

/// Yielder that only hints the CPU; used where no scheduler is present.
#[derive(Clone, Copy, Debug, Default)]
pub struct SpinYield;

impl Yielder for SpinYield {
    fn yield_now(&mut self) {
        core::hint::spin_loop();
    }
}

/// How many times a transient condition is retried.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum RetryBudget {
    /// Retry until the operation completes.
    Unbounded,
    /// Give up after this many attempts.
    Attempts(u32),
}

impl RetryBudget {
    fn allows(self, attempts: u32) -> bool {
        match self {
            Self::Unbounded => true,
            Self::Attempts(limit) => attempts < limit,
        }
    }
}

/// The retry budget ran out before the operation completed.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Error)]
#[error("operation still pending after {attempts} attempts")]
pub struct RetryExhausted {
    /// Attempts made.
    pub attempts: u32,
}

/// Polls `op` until it is ready, yielding between attempts.
///
/// No yield happens after the final attempt or after a ready result.
pub fn retry_with_yield<T, Y, F>(
    budget: RetryBudget,
    yielder: &mut Y,
    mut op: F,
) -> Result<T, RetryExhausted>
where
    Y: Yielder + ?Sized,
    F: FnMut() -> Poll<T>,
{
    let mut attempts: u32 = 0;
    loop {
        attempts = attempts.saturating_add(1);
        if let Poll::Ready(value) = op() {
            return Ok(value);
        }
        if !budget.allows(attempts) {
            return Err(RetryExhausted { attempts });
        }
        yielder.yield_now();
    }
}
