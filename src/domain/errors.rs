use thiserror::Error;

/// Errors raised by the market feed and other streaming inputs.
#[derive(Debug, Error)]
pub enum FeedError {
    #[error("Connection lost: {reason}")]
    ConnectionLost { reason: String },

    #[error("Heartbeat missed {missed} times, forcing reconnect")]
    HeartbeatMissed { missed: u32 },
}

/// Ways an oracle answer can violate the planner contract.
#[derive(Debug, Error)]
pub enum PlanViolation {
    #[error("Plan does not match the contract schema: {reason}")]
    Malformed { reason: String },

    #[error("Scenario probabilities sum to {sum}, expected 100")]
    ProbabilitiesNotNormalized { sum: i64 },

    #[error("Only {count} invalidation rule(s), at least 2 required")]
    MissingInvalidations { count: usize },

    #[error("Unknown suggested action: {action}")]
    UnknownAction { action: String },

    #[error("Disclosures list is empty")]
    MissingDisclosures,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn violation_messages_carry_context() {
        let v = PlanViolation::ProbabilitiesNotNormalized { sum: 95 };
        assert!(v.to_string().contains("95"));

        let v = PlanViolation::MissingInvalidations { count: 1 };
        assert!(v.to_string().contains('1'));
    }

    #[test]
    fn feed_error_formatting() {
        let e = FeedError::HeartbeatMissed { missed: 2 };
        assert!(e.to_string().contains('2'));
    }
}
