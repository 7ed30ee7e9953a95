// Copyright (c) 2025 - Cowboy AI, Inc.
//! Listener - Subscription handles
//!
//! A `Listener` detaches its callback from the stream when it is dropped or
//! when [`Listener::unlisten`] is called, whichever comes first. Listeners
//! returned to users also pin the retention set of the stream they observe,
//! so the whole upstream chain stays alive for as long as the listener does.

use std::fmt;

use super::keep_alive::KeepAlive;

type Unlisten = Box<dyn FnOnce() + Send>;

/// Unsubscribe token returned by `listen`
pub struct Listener {
    unlisten: Option<Unlisten>,
    retained: Option<KeepAlive>,
}

impl fmt::Debug for Listener {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Listener")
            .field("active", &self.is_active())
            .finish()
    }
}

impl Listener {
    pub(crate) fn new(unlisten: impl FnOnce() + Send + 'static) -> Self {
        Self {
            unlisten: Some(Box::new(unlisten)),
            retained: None,
        }
    }

    /// Keep `keep_alive` reachable until this listener is dropped
    pub(crate) fn retaining(mut self, keep_alive: KeepAlive) -> Self {
        self.retained = Some(keep_alive);
        self
    }

    /// True until the callback has been detached
    pub fn is_active(&self) -> bool {
        self.unlisten.is_some()
    }

    /// Detach the callback now
    pub fn unlisten(mut self) {
        self.detach();
    }

    fn detach(&mut self) {
        if let Some(unlisten) = self.unlisten.take() {
            unlisten();
        }
    }
}

impl Drop for Listener {
    fn drop(&mut self) {
        // Detach before the retention set is released.
        self.detach();
    }
}
