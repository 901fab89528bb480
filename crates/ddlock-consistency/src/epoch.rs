//! Leader epoch fencing
//!
//! `EpochGuard` holds the epoch of the current leadership term (or none when
//! this process is not leader). Every mutating operation validates its epoch
//! before starting and commits its registry changes through the guard, which
//! holds a read lock across the mutation so a concurrent step-down can never
//! interleave between the check and the write.
//!
//! `EpochToken` is the cooperative cancellation handle threaded through a
//! broadcast: it can be polled, awaited, or used to commit.

use std::sync::Arc;

use ddlock_api::LeaderEpoch;
use ddlock_common::LockError;
use parking_lot::RwLock;
use tokio::sync::watch;
use tracing::{info, warn};

#[derive(Debug, Default, Clone, Copy)]
struct Leadership {
    current: Option<LeaderEpoch>,
    highest: Option<LeaderEpoch>,
}

pub struct EpochGuard {
    state: RwLock<Leadership>,
    tx: watch::Sender<Option<LeaderEpoch>>,
}

impl Default for EpochGuard {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for EpochGuard {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpochGuard")
            .field("current", &self.current())
            .finish()
    }
}

fn describe(epoch: Option<LeaderEpoch>) -> String {
    epoch.map_or_else(|| "none".to_string(), |e| e.to_string())
}

impl EpochGuard {
    pub fn new() -> Self {
        let (tx, _) = watch::channel(None);
        Self {
            state: RwLock::new(Leadership::default()),
            tx,
        }
    }

    pub fn current(&self) -> Option<LeaderEpoch> {
        self.state.read().current
    }

    pub fn is_leader(&self) -> bool {
        self.current().is_some()
    }

    /// Install the epoch of a new leadership term.
    ///
    /// The epoch must be newer than every epoch installed before.
    pub fn become_leader(&self, epoch: LeaderEpoch) -> Result<(), LockError> {
        let mut state = self.state.write();
        if let Some(highest) = state.highest
            && epoch <= highest
        {
            warn!(epoch = %epoch, highest = %highest, "Refusing to install non-increasing leader epoch");
            return Err(LockError::EpochStale {
                requested: epoch.to_string(),
                current: highest.to_string(),
            });
        }
        state.current = Some(epoch);
        state.highest = Some(epoch);
        self.tx.send_replace(Some(epoch));
        info!(epoch = %epoch, "Became object lock leader");
        Ok(())
    }

    /// Revoke leadership; returns the epoch that ended
    pub fn step_down(&self) -> Option<LeaderEpoch> {
        let mut state = self.state.write();
        let previous = state.current.take();
        self.tx.send_replace(None);
        if let Some(epoch) = previous {
            info!(epoch = %epoch, "Stepped down as object lock leader");
        }
        previous
    }

    /// Check that `epoch` is the current leadership epoch
    pub fn validate(&self, epoch: LeaderEpoch) -> Result<(), LockError> {
        Self::check(&self.state.read(), epoch)
    }

    fn check(state: &Leadership, epoch: LeaderEpoch) -> Result<(), LockError> {
        if state.current == Some(epoch) {
            Ok(())
        } else {
            Err(LockError::EpochStale {
                requested: epoch.to_string(),
                current: describe(state.current),
            })
        }
    }

    /// Run `f` only if `epoch` is still current, holding off step-down meanwhile
    pub fn commit<R>(&self, epoch: LeaderEpoch, f: impl FnOnce() -> R) -> Result<R, LockError> {
        let state = self.state.read();
        Self::check(&state, epoch)?;
        Ok(f())
    }

    /// Validate `epoch` and hand out a cancellation token bound to it
    pub fn token(self: &Arc<Self>, epoch: LeaderEpoch) -> Result<EpochToken, LockError> {
        self.validate(epoch)?;
        Ok(EpochToken {
            epoch,
            guard: self.clone(),
            rx: self.tx.subscribe(),
        })
    }
}

/// Cancellation token for work started under one leader epoch
#[derive(Clone)]
pub struct EpochToken {
    epoch: LeaderEpoch,
    guard: Arc<EpochGuard>,
    rx: watch::Receiver<Option<LeaderEpoch>>,
}

impl std::fmt::Debug for EpochToken {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EpochToken")
            .field("epoch", &self.epoch)
            .field("valid", &self.is_valid())
            .finish()
    }
}

impl EpochToken {
    pub fn epoch(&self) -> LeaderEpoch {
        self.epoch
    }

    pub fn is_valid(&self) -> bool {
        self.guard.validate(self.epoch).is_ok()
    }

    pub fn validate(&self) -> Result<(), LockError> {
        self.guard.validate(self.epoch)
    }

    pub fn commit<R>(&self, f: impl FnOnce() -> R) -> Result<R, LockError> {
        self.guard.commit(self.epoch, f)
    }

    /// Resolves once the epoch this token was issued for is no longer current
    pub async fn cancelled(&mut self) {
        let epoch = self.epoch;
        // The guard owns the sender, and the token owns the guard
        let _ = self.rx.wait_for(|current| *current != Some(epoch)).await;
    }

    /// The stale-epoch error to report for this token
    pub fn stale_error(&self) -> LockError {
        LockError::EpochStale {
            requested: self.epoch.to_string(),
            current: describe(self.guard.current()),
        }
    }
}
