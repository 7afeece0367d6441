//! Origin arbitration.
//!
//! Every source emits a state per tick, including idle ones, so an inactive
//! player would repeatedly clear an active player's presence. The arbiter
//! gives the presence a single owner at a time: the first origin to emit a
//! non-empty state holds it until its own states go empty.

use tracing::debug;

use crate::state::ViewingState;

#[derive(Debug, Default)]
pub struct OriginArbiter {
    owner: Option<String>,
}

impl OriginArbiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Admit or drop one incoming state. Admitted states come back with the
    /// origin tag stripped, alongside the origin that produced them.
    pub fn admit(&mut self, mut state: ViewingState) -> Option<(ViewingState, String)> {
        let Some(origin) = state.origin.take() else {
            debug!("Dropping state without an origin");
            return None;
        };

        if self.owner.is_none() && !state.is_empty() {
            debug!(origin = %origin, "Origin claimed presence");
            self.owner = Some(origin.clone());
        }

        if self.owner.as_deref() != Some(origin.as_str()) {
            return None;
        }

        Some((state, origin))
    }

    /// Give up ownership. Called by the consumer once the presence clears.
    pub fn release(&mut self) {
        if let Some(origin) = self.owner.take() {
            debug!(origin = %origin, "Origin released presence");
        }
    }

    pub fn owner(&self) -> Option<&str> {
        self.owner.as_deref()
    }
}
