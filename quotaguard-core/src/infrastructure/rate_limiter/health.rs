//! Distributed store health state
//!
//! `Available → Unavailable` on any distributed operation failure.
//! `Unavailable → Available` only when the store client reports a new
//! connection; a single successful call never flips it back.

use tokio::sync::watch;

use super::types::StoreHealth;

#[derive(Debug)]
pub struct StoreHealthTracker {
    state: watch::Sender<StoreHealth>,
}

impl StoreHealthTracker {
    pub fn new(initial: StoreHealth) -> Self {
        let (state, _) = watch::channel(initial);
        Self { state }
    }

    pub fn current(&self) -> StoreHealth {
        *self.state.borrow()
    }

    pub fn is_available(&self) -> bool {
        self.current() == StoreHealth::Available
    }

    /// Returns `true` if this call performed the transition
    pub fn mark_unavailable(&self) -> bool {
        self.state.send_if_modified(|health| {
            if *health == StoreHealth::Available {
                *health = StoreHealth::Unavailable;
                true
            } else {
                false
            }
        })
    }

    /// Returns `true` if this call performed the transition
    pub fn mark_available(&self) -> bool {
        self.state.send_if_modified(|health| {
            if *health == StoreHealth::Unavailable {
                *health = StoreHealth::Available;
                true
            } else {
                false
            }
        })
    }

    /// Watch transitions, e.g. to wait for recovery in tests
    pub fn subscribe(&self) -> watch::Receiver<StoreHealth> {
        self.state.subscribe()
    }
}
