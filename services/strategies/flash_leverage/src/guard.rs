//! One operation in flight per (asset, pool) scope
//!
//! A second `initiate()` for a held scope fails fast instead of waiting: a queued
//! request would be sized against a balance that the first operation is about to change.

use ethers::types::Address;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::Arc;

use crate::error::{LeverageError, Result};

#[derive(Debug, Default)]
pub struct InFlightRegistry {
    active: Mutex<HashSet<(Address, Address)>>,
}

impl InFlightRegistry {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn try_acquire(self: &Arc<Self>, asset: Address, pool: Address) -> Result<InFlightGuard> {
        let mut active = self.active.lock();
        if !active.insert((asset, pool)) {
            return Err(LeverageError::OperationInFlight { asset, pool });
        }
        Ok(InFlightGuard {
            registry: Arc::clone(self),
            scope: (asset, pool),
        })
    }

    pub fn is_held(&self, asset: Address, pool: Address) -> bool {
        self.active.lock().contains(&(asset, pool))
    }
}

/// Releases the scope on drop, on every exit path.
#[derive(Debug)]
pub struct InFlightGuard {
    registry: Arc<InFlightRegistry>,
    scope: (Address, Address),
}

impl Drop for InFlightGuard {
    fn drop(&mut self) {
        self.registry.active.lock().remove(&self.scope);
    }
}
