//! Explicit finite-state-machine contract.
//!
//! Every lifecycle status (inquiry, buyer quotation, sample tracking, bulk
//! tracking, seller lane, payment status) implements this trait. Allowed
//! transitions are data inside one `transition` function, so guards are not
//! scattered as status comparisons across the command handlers.

use crate::error::DomainResult;

pub trait StateMachine: Copy + Eq + core::fmt::Debug + Sized {
    type Trigger: Copy + core::fmt::Debug;

    /// Next state for `trigger`, or `InvalidState` if the trigger is not
    /// accepted from `self`.
    fn transition(self, trigger: Self::Trigger) -> DomainResult<Self>;

    fn can(self, trigger: Self::Trigger) -> bool {
        self.transition(trigger).is_ok()
    }
}

/// Builds the standard rejection for a trigger that `state` does not accept.
pub fn rejected<S: core::fmt::Debug, T: core::fmt::Debug>(state: S, trigger: T) -> crate::DomainError {
    crate::DomainError::invalid_state(format!("{trigger:?} is not allowed from {state:?}"))
}
