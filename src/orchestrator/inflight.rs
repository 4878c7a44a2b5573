//! Per-(term, locale) in-flight coordination.
//!
//! A mutex-guarded map of reference-counted slots. Each slot owns an async gate;
//! holding the gate means owning the computation for that key. Later arrivals
//! queue on the gate and, once they get it, can read the spectral signals the
//! previous holder left behind. The slot disappears when its last user drops.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use tokio::sync::OwnedMutexGuard;

use crate::spectral::SpectralSignals;

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct InFlightKey {
    pub term: String,
    pub locale: String,
}

impl InFlightKey {
    pub fn new(term: impl Into<String>, locale: impl Into<String>) -> Self {
        Self {
            term: term.into(),
            locale: locale.into(),
        }
    }
}

/// Signals computed for one context set, keyed by its fingerprint.
#[derive(Debug, Clone, PartialEq)]
pub struct CachedSignals {
    pub fingerprint: String,
    pub signals: SpectralSignals,
}

type Gate = Arc<tokio::sync::Mutex<Option<CachedSignals>>>;

#[derive(Debug)]
struct Slot {
    refs: usize,
    gate: Gate,
}

type Slots = Arc<Mutex<HashMap<InFlightKey, Slot>>>;

#[derive(Debug, Clone, Default)]
pub struct InFlightMap {
    slots: Slots,
}

/// Releases one reference on drop, removing the slot at zero. Created before
/// waiting on the gate so a cancelled waiter still gives its reference back.
#[derive(Debug)]
struct Ticket {
    slots: Slots,
    key: InFlightKey,
}

impl Drop for Ticket {
    fn drop(&mut self) {
        let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(slot) = slots.get_mut(&self.key) {
            slot.refs = slot.refs.saturating_sub(1);
            if slot.refs == 0 {
                slots.remove(&self.key);
            }
        }
    }
}

/// Exclusive ownership of a key's computation.
#[derive(Debug)]
pub struct InFlightGuard {
    // field order: the gate is released before the reference
    held: OwnedMutexGuard<Option<CachedSignals>>,
    _ticket: Ticket,
}

impl InFlightGuard {
    /// Signals left by the previous holder, if they match `fingerprint`.
    pub fn cached(&self, fingerprint: &str) -> Option<SpectralSignals> {
        self.held
            .as_ref()
            .filter(|c| c.fingerprint == fingerprint)
            .map(|c| c.signals)
    }

    pub fn store(&mut self, fingerprint: String, signals: SpectralSignals) {
        *self.held = Some(CachedSignals {
            fingerprint,
            signals,
        });
    }
}

impl InFlightMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until this caller owns `key`.
    pub async fn acquire(&self, key: InFlightKey) -> InFlightGuard {
        let gate = {
            let mut slots = self.slots.lock().unwrap_or_else(|p| p.into_inner());
            let slot = slots.entry(key.clone()).or_insert_with(|| Slot {
                refs: 0,
                gate: Arc::new(tokio::sync::Mutex::new(None)),
            });
            slot.refs += 1;
            Arc::clone(&slot.gate)
        };
        let ticket = Ticket {
            slots: Arc::clone(&self.slots),
            key,
        };
        let held = gate.lock_owned().await;
        InFlightGuard {
            held,
            _ticket: ticket,
        }
    }

    /// Number of keys with at least one holder or waiter.
    pub fn len(&self) -> usize {
        self.slots.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Holders plus waiters for `key`.
    #[cfg(test)]
    pub fn refs(&self, key: &InFlightKey) -> usize {
        self.slots
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .get(key)
            .map_or(0, |s| s.refs)
    }
}
