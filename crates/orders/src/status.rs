//! Order status lifecycle and the legal-transition table.

use serde::{Deserialize, Serialize};

/// Order status lifecycle.
///
/// `Pending → {Processing} → {Completed | Canceled}`. `Processing` is
/// optional: synchronous card charges may jump straight from `Pending` to a
/// terminal status.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum OrderStatus {
    Pending,
    Processing,
    Completed,
    Canceled,
}

impl OrderStatus {
    /// Terminal statuses accept no further transitions.
    pub fn is_terminal(&self) -> bool {
        matches!(self, OrderStatus::Completed | OrderStatus::Canceled)
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            OrderStatus::Pending => "pending",
            OrderStatus::Processing => "processing",
            OrderStatus::Completed => "completed",
            OrderStatus::Canceled => "canceled",
        }
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Last reported state of the charge itself, kept alongside the order
/// status for client display and audit.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PaymentStatus {
    Pending,
    Paid,
    Declined,
    Expired,
    Refunded,
    Canceled,
}

impl PaymentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            PaymentStatus::Pending => "pending",
            PaymentStatus::Paid => "paid",
            PaymentStatus::Declined => "declined",
            PaymentStatus::Expired => "expired",
            PaymentStatus::Refunded => "refunded",
            PaymentStatus::Canceled => "canceled",
        }
    }
}

impl core::fmt::Display for PaymentStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Edge set of the state machine.
///
/// Everything not listed here is illegal; same-state deliveries are
/// duplicates, decided separately by [`plan_transition`].
pub fn transition_allowed(from: OrderStatus, to: OrderStatus) -> bool {
    use OrderStatus::*;
    matches!(
        (from, to),
        (Pending, Processing)
            | (Pending, Completed)
            | (Pending, Canceled)
            | (Processing, Completed)
            | (Processing, Canceled)
    )
}

/// Outcome of planning one transition against the current status.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub enum TransitionDecision {
    /// Edge is legal: write the new status.
    Apply,
    /// Target equals the current status: a re-delivered confirmation. No
    /// state change, recorded for audit.
    Duplicate,
    /// Edge is not in the table (typically an out-of-order event against a
    /// terminal order). No state change, recorded for audit.
    Illegal,
}

/// Pure decision function for one delivery. Stores call this inside their
/// per-order critical section so two racing writers cannot both apply.
pub fn plan_transition(current: OrderStatus, target: OrderStatus) -> TransitionDecision {
    if current == target {
        TransitionDecision::Duplicate
    } else if transition_allowed(current, target) {
        TransitionDecision::Apply
    } else {
        TransitionDecision::Illegal
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn table_matches_lifecycle() {
        use OrderStatus::*;
        assert!(transition_allowed(Pending, Processing));
        assert!(transition_allowed(Pending, Completed));
        assert!(transition_allowed(Pending, Canceled));
        assert!(transition_allowed(Processing, Completed));
        assert!(transition_allowed(Processing, Canceled));

        assert!(!transition_allowed(Processing, Pending));
        assert!(!transition_allowed(Completed, Pending));
        assert!(!transition_allowed(Completed, Canceled));
        assert!(!transition_allowed(Canceled, Completed));
        assert!(!transition_allowed(Canceled, Processing));
    }

    #[test]
    fn terminal_statuses_accept_nothing() {
        use OrderStatus::*;
        for terminal in [Completed, Canceled] {
            for target in [Pending, Processing, Completed, Canceled] {
                let decision = plan_transition(terminal, target);
                if target == terminal {
                    assert_eq!(decision, TransitionDecision::Duplicate);
                } else {
                    assert_eq!(decision, TransitionDecision::Illegal);
                }
            }
        }
    }

    #[test]
    fn re_delivery_is_duplicate_not_illegal() {
        assert_eq!(
            plan_transition(OrderStatus::Processing, OrderStatus::Processing),
            TransitionDecision::Duplicate
        );
    }

    fn any_status() -> impl Strategy<Value = OrderStatus> {
        prop_oneof![
            Just(OrderStatus::Pending),
            Just(OrderStatus::Processing),
            Just(OrderStatus::Completed),
            Just(OrderStatus::Canceled),
        ]
    }

    proptest! {
        /// Property: replaying any random delivery sequence through
        /// `plan_transition` yields a path whose applied edges are all in the
        /// table, and once a terminal status is reached it never changes.
        #[test]
        fn applied_path_is_always_legal(targets in prop::collection::vec(any_status(), 0..40)) {
            let mut current = OrderStatus::Pending;
            for target in targets {
                match plan_transition(current, target) {
                    TransitionDecision::Apply => {
                        prop_assert!(transition_allowed(current, target));
                        prop_assert!(!current.is_terminal());
                        current = target;
                    }
                    TransitionDecision::Duplicate => prop_assert_eq!(current, target),
                    TransitionDecision::Illegal => prop_assert!(!transition_allowed(current, target)),
                }
            }
        }
    }
}
