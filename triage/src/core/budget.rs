//! Shared time budget helpers for bounded oracle invocations.

use std::time::{Duration, Instant};

/// Return the remaining time budget until `deadline`, or `None` once it has passed.
pub fn remaining_budget(deadline: Instant) -> Option<Duration> {
    let remaining = deadline
        .checked_duration_since(Instant::now())
        .unwrap_or(Duration::from_secs(0));
    (!remaining.is_zero()).then_some(remaining)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn future_deadline_has_budget() {
        let remaining = remaining_budget(Instant::now() + Duration::from_secs(60));
        assert!(remaining.is_some_and(|d| d > Duration::from_secs(50)));
    }

    #[test]
    fn past_deadline_is_exhausted() {
        assert_eq!(remaining_budget(Instant::now()), None);
    }
}
