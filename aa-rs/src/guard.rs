//! One-shot latches for account deployment and ERC-20 paymaster approval.
//!
//! A latch moves `Open -> InFlight -> Done`. Exactly one caller wins the
//! `Open -> InFlight` transition and receives a [`Slot`]; everyone else either
//! sees `Done` or waits for the slot holder to finish. Dropping a slot without
//! completing it reopens the latch so the next caller can try again.

use crate::error::{AccountError, Result};
use std::sync::atomic::{AtomicU8, Ordering};
use tokio::sync::Notify;
use tokio_util::sync::CancellationToken;

const OPEN: u8 = 0;
const IN_FLIGHT: u8 = 1;
const DONE: u8 = 2;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LatchState {
    Open,
    InFlight,
    Done,
}

/// Deployment view of a [`LatchState`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DeploymentState {
    NotDeployed,
    Deploying,
    Deployed,
}

impl From<LatchState> for DeploymentState {
    fn from(s: LatchState) -> Self {
        match s {
            LatchState::Open => DeploymentState::NotDeployed,
            LatchState::InFlight => DeploymentState::Deploying,
            LatchState::Done => DeploymentState::Deployed,
        }
    }
}

#[derive(Debug)]
pub struct Latch {
    state: AtomicU8,
    notify: Notify,
}

#[derive(Debug)]
pub enum TryAcquire<'a> {
    Acquired(Slot<'a>),
    InFlight,
    Done,
}

impl Default for Latch {
    fn default() -> Self {
        Self::new(false)
    }
}

impl Latch {
    pub fn new(done: bool) -> Self {
        Self {
            state: AtomicU8::new(if done { DONE } else { OPEN }),
            notify: Notify::new(),
        }
    }

    pub fn state(&self) -> LatchState {
        match self.state.load(Ordering::Acquire) {
            OPEN => LatchState::Open,
            IN_FLIGHT => LatchState::InFlight,
            _ => LatchState::Done,
        }
    }

    pub fn is_done(&self) -> bool {
        self.state() == LatchState::Done
    }

    /// Marks the latch done from the outside (e.g. code observed on chain).
    /// A slot still in flight keeps running; completing it is harmless.
    pub fn mark_done(&self) {
        self.state.store(DONE, Ordering::Release);
        self.notify.notify_waiters();
    }

    pub fn try_acquire(&self) -> TryAcquire<'_> {
        match self
            .state
            .compare_exchange(OPEN, IN_FLIGHT, Ordering::AcqRel, Ordering::Acquire)
        {
            Ok(_) => TryAcquire::Acquired(Slot {
                latch: self,
                completed: false,
            }),
            Err(IN_FLIGHT) => TryAcquire::InFlight,
            Err(_) => TryAcquire::Done,
        }
    }

    /// Waits until no slot is in flight and returns the state at that point.
    /// Fails with [`AccountError::Canceled`] once `cancel` fires.
    pub async fn settled(&self, cancel: &CancellationToken) -> Result<LatchState> {
        loop {
            let notified = self.notify.notified();
            tokio::pin!(notified);
            // register before re-reading the state so a release between the
            // load and the await is not missed
            notified.as_mut().enable();
            let state = self.state();
            if state != LatchState::InFlight {
                return Ok(state);
            }
            tokio::select! {
                _ = cancel.cancelled() => return Err(AccountError::Canceled),
                _ = &mut notified => {}
            }
        }
    }

    /// Returns a slot if this caller should do the work, or `None` once the
    /// work is done. Waits while another caller holds the slot.
    pub async fn acquire(&self, cancel: &CancellationToken) -> Result<Option<Slot<'_>>> {
        loop {
            match self.try_acquire() {
                TryAcquire::Acquired(slot) => return Ok(Some(slot)),
                TryAcquire::Done => return Ok(None),
                TryAcquire::InFlight => {
                    self.settled(cancel).await?;
                }
            }
        }
    }

    fn release(&self, to: u8) {
        // only the slot holder moves the latch out of InFlight; an external
        // mark_done must not be undone
        let _ = self
            .state
            .compare_exchange(IN_FLIGHT, to, Ordering::AcqRel, Ordering::Acquire);
        self.notify.notify_waiters();
    }
}

/// Exclusive right to perform the guarded work.
#[derive(Debug)]
pub struct Slot<'a> {
    latch: &'a Latch,
    completed: bool,
}

impl Slot<'_> {
    pub fn complete(mut self) {
        self.completed = true;
        self.latch.release(DONE);
    }
}

impl Drop for Slot<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.latch.release(OPEN);
        }
    }
}
