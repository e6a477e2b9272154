// ── Lazily constructed shared dispatcher ──

use std::sync::{Mutex, PoisonError};

use tracing::debug;

use super::EventDispatcher;
use crate::config::SyncConfig;

enum Slot {
    Empty,
    Live(EventDispatcher),
    Destroyed,
}

/// Holds at most one dispatcher for processes that want a shared
/// instance. The dispatcher is built on first access; once destroyed the
/// cell stays empty for good.
pub struct DispatcherCell {
    config: SyncConfig,
    slot: Mutex<Slot>,
}

impl DispatcherCell {
    pub fn new(config: SyncConfig) -> Self {
        Self {
            config,
            slot: Mutex::new(Slot::Empty),
        }
    }

    /// The shared dispatcher, building it on first call. `None` after
    /// [`destroy`](Self::destroy).
    pub fn get_or_init(&self) -> Option<EventDispatcher> {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match &*slot {
            Slot::Live(dispatcher) => Some(dispatcher.clone()),
            Slot::Destroyed => None,
            Slot::Empty => {
                let dispatcher = EventDispatcher::new(self.config.clone());
                *slot = Slot::Live(dispatcher.clone());
                debug!("shared event dispatcher created");
                Some(dispatcher)
            }
        }
    }

    /// The shared dispatcher if it has been built and not destroyed.
    pub fn get(&self) -> Option<EventDispatcher> {
        match &*self.slot.lock().unwrap_or_else(PoisonError::into_inner) {
            Slot::Live(dispatcher) => Some(dispatcher.clone()),
            Slot::Empty | Slot::Destroyed => None,
        }
    }

    /// Shut the dispatcher down and seal the cell. Returns `false` if it
    /// was already destroyed.
    pub fn destroy(&self) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        match std::mem::replace(&mut *slot, Slot::Destroyed) {
            Slot::Live(dispatcher) => {
                dispatcher.shutdown();
                true
            }
            Slot::Empty => true,
            Slot::Destroyed => false,
        }
    }

    pub fn is_destroyed(&self) -> bool {
        matches!(
            *self.slot.lock().unwrap_or_else(PoisonError::into_inner),
            Slot::Destroyed
        )
    }
}
