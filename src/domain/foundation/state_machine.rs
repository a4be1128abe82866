//! State machine trait for status enums.

use super::ValidationError;

/// Trait for status enums that represent state machines.
///
/// Implementors list their legal edges; `transition_to` then rejects
/// everything else.
///
/// ```ignore
/// let next = SubscriptionStatus::Active.transition_to(SubscriptionStatus::PastDue)?;
/// ```
pub trait StateMachine: Sized + Copy + PartialEq + std::fmt::Debug {
    /// Returns true if transition from self to target is valid.
    fn can_transition_to(&self, target: &Self) -> bool;

    /// Returns all valid target states from current state.
    fn valid_transitions(&self) -> Vec<Self>;

    /// Performs transition with validation, returning error if invalid.
    fn transition_to(&self, target: Self) -> Result<Self, ValidationError> {
        if self.can_transition_to(&target) {
            Ok(target)
        } else {
            Err(ValidationError::invalid_format(
                "state_transition",
                format!("Cannot transition from {:?} to {:?}", self, target),
            ))
        }
    }

    /// Checks if current state is terminal (no valid outgoing transitions).
    fn is_terminal(&self) -> bool {
        self.valid_transitions().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    enum Delivery {
        Received,
        Applied,
        Rejected,
    }

    impl StateMachine for Delivery {
        fn can_transition_to(&self, target: &Self) -> bool {
            self.valid_transitions().contains(target)
        }

        fn valid_transitions(&self) -> Vec<Self> {
            match self {
                Delivery::Received => vec![Delivery::Applied, Delivery::Rejected],
                Delivery::Applied | Delivery::Rejected => vec![],
            }
        }
    }

    #[test]
    fn transition_to_succeeds_for_listed_edge() {
        assert_eq!(
            Delivery::Received.transition_to(Delivery::Applied),
            Ok(Delivery::Applied)
        );
    }

    #[test]
    fn transition_to_reports_both_states_on_failure() {
        let err = Delivery::Applied
            .transition_to(Delivery::Rejected)
            .unwrap_err();
        let text = err.to_string();
        assert!(text.contains("Applied"));
        assert!(text.contains("Rejected"));
    }

    #[test]
    fn terminal_states_have_no_edges() {
        assert!(Delivery::Applied.is_terminal());
        assert!(Delivery::Rejected.is_terminal());
        assert!(!Delivery::Received.is_terminal());
    }
}
