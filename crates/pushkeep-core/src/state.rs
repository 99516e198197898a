//! Per-subscription lifecycle state machine.
//!
//! ```text
//! Unregistered → PermissionPending → Subscribing → Active
//!                       ↓                  ↓          ↓   ↘
//!                    Denied              Error    Renewing  Unsubscribing
//!                                          ↑       ↓    ↓        ↓
//!                                          └──── Error  Active  Unregistered
//! ```
//!
//! `Denied` is terminal: only the OS settings can lift it. `Error` accepts a
//! new explicit trigger (back to `Subscribing`), never an automatic retry.
//! An `Active` page whose permission was reset goes back through
//! `PermissionPending`.

use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SubscriptionState {
    #[default]
    Unregistered,
    PermissionPending,
    Denied,
    Subscribing,
    Active,
    Renewing,
    Unsubscribing,
    Error,
}

impl SubscriptionState {
    #[must_use]
    pub const fn as_str(&self) -> &'static str {
        match self {
            Self::Unregistered => "unregistered",
            Self::PermissionPending => "permission_pending",
            Self::Denied => "denied",
            Self::Subscribing => "subscribing",
            Self::Active => "active",
            Self::Renewing => "renewing",
            Self::Unsubscribing => "unsubscribing",
            Self::Error => "error",
        }
    }

    #[must_use]
    pub const fn is_terminal(&self) -> bool {
        matches!(self, Self::Denied)
    }

    /// Whether a move from `self` to `next` is legal.
    #[must_use]
    pub fn can_transition_to(&self, next: Self) -> bool {
        use SubscriptionState::{
            Active, Denied, Error, PermissionPending, Renewing, Subscribing, Unregistered,
            Unsubscribing,
        };
        matches!(
            (self, next),
            (Unregistered, PermissionPending)
                | (PermissionPending, Denied | Subscribing | Error)
                | (Subscribing, Active | Error)
                | (Active, PermissionPending | Renewing | Unsubscribing | Subscribing)
                | (Renewing, Active | Error)
                | (Unsubscribing, Unregistered | Error)
                | (Error, PermissionPending | Subscribing | Active | Unsubscribing)
        )
    }
}

impl std::fmt::Display for SubscriptionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Rejected lifecycle transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq, thiserror::Error)]
#[error("illegal transition {from} -> {to}")]
pub struct TransitionError {
    pub from: SubscriptionState,
    pub to: SubscriptionState,
}

/// State holder that enforces the transition table.
#[derive(Debug, Clone, Default)]
pub struct Lifecycle {
    state: SubscriptionState,
    history: Vec<SubscriptionState>,
}

impl Lifecycle {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn state(&self) -> SubscriptionState {
        self.state
    }

    /// States visited so far, oldest first (excluding the current one).
    #[must_use]
    pub fn history(&self) -> &[SubscriptionState] {
        &self.history
    }

    pub fn transition(&mut self, next: SubscriptionState) -> Result<(), TransitionError> {
        if !self.state.can_transition_to(next) {
            return Err(TransitionError {
                from: self.state,
                to: next,
            });
        }
        tracing::debug!(from = %self.state, to = %next, "subscription state transition");
        self.history.push(self.state);
        self.state = next;
        Ok(())
    }

    /// Overwrite the state from an authoritative observation (a renewal
    /// broadcast, a reload that finds a live subscription).
    pub fn observe(&mut self, observed: SubscriptionState) {
        if observed != self.state {
            self.history.push(self.state);
            self.state = observed;
        }
    }
}
