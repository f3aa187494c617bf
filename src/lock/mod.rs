//! Advisory single-attempt exclusion for timestep generation.
//!
//! The flag is stored in the market state rather than held in memory, so a lock held by a process
//! that then dies stays held. Nothing here will clear it automatically: whether the interrupted
//! advance finished writing is unknown, and the operator has to decide.
use anyhow::Result;
use log::{debug, error};

use crate::store::MarketStore;

pub struct GenerationLock<'a> {
    store: &'a dyn MarketStore,
}

impl<'a> GenerationLock<'a> {
    pub fn new(store: &'a dyn MarketStore) -> Self {
        Self { store }
    }

    /// Returns `false` without waiting if another caller holds the lock.
    pub fn try_acquire(&self) -> Result<bool> {
        let acquired = self.store.try_lock_generation()?;
        if acquired {
            debug!("LOCK: Acquired generation lock");
        } else {
            debug!("LOCK: Generation lock already held");
        }
        Ok(acquired)
    }

    /// Safe to call whether or not the lock is held.
    pub fn release(&self) -> Result<()> {
        self.store.set_generation_lock(false)?;
        debug!("LOCK: Released generation lock");
        Ok(())
    }

    pub fn is_held(&self) -> Result<bool> {
        self.store.is_generation_locked()
    }

    /// Acquire and hand back a guard that releases on drop, `None` if the lock is already held.
    pub fn guard(self) -> Result<Option<LockGuard<'a>>> {
        if self.try_acquire()? {
            Ok(Some(LockGuard { lock: self }))
        } else {
            Ok(None)
        }
    }
}

/// Releases the generation lock when dropped, whichever way the holder exits.
pub struct LockGuard<'a> {
    lock: GenerationLock<'a>,
}

impl Drop for LockGuard<'_> {
    fn drop(&mut self) {
        if let Err(e) = self.lock.release() {
            error!(
                "LOCK: Failed to release generation lock, market will stay locked until cleared: {:#}",
                e
            );
        }
    }
}
