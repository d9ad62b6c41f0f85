//! Property-based tests for deadline extension

use proptest::prelude::*;
use std::time::Duration;
use tokio::time::Instant;

use sonos_mute::extend_deadline;

const MUTE_LENGTH: Duration = Duration::from_secs(30);
const MAX_MUTE_LENGTH: Duration = Duration::from_secs(9 * 60 + 59);

// ============================================================================
// Test Helpers
// ============================================================================

/// Strategy for the gaps between toggles, in milliseconds
fn toggle_gaps_strategy() -> impl Strategy<Value = Vec<u64>> {
    prop::collection::vec(0u64..45_000, 1..60)
}

// ============================================================================
// Properties
// ============================================================================

proptest! {
    #![proptest_config(ProptestConfig::with_cases(200))]

    /// Toggling while muted never moves the deadline earlier and never past
    /// the maximum from the moment of the toggle
    #[test]
    fn prop_extension_is_monotone_and_capped(gaps in toggle_gaps_strategy()) {
        let start = Instant::now();
        let mut now = start;
        let mut deadline = start + MUTE_LENGTH;

        for gap in gaps {
            now += Duration::from_millis(gap);
            if now >= deadline {
                // The cycle would have ended; a toggle starts a fresh one
                deadline = now + MUTE_LENGTH;
                continue;
            }

            let extended = extend_deadline(deadline, now, MUTE_LENGTH, MAX_MUTE_LENGTH);
            prop_assert!(extended >= deadline);
            prop_assert!(extended <= now + MAX_MUTE_LENGTH);
            deadline = extended;
        }
    }

    /// An extension adds exactly one mute length unless the cap applies
    #[test]
    fn prop_extension_adds_one_length_below_cap(
        remaining_ms in 1u64..(9 * 60 + 29) * 1000,
    ) {
        let now = Instant::now();
        let deadline = now + Duration::from_millis(remaining_ms);

        let extended = extend_deadline(deadline, now, MUTE_LENGTH, MAX_MUTE_LENGTH);
        prop_assert_eq!(extended, deadline + MUTE_LENGTH);
    }

    /// Near the cap the deadline lands exactly on it
    #[test]
    fn prop_extension_saturates_at_cap(
        remaining_ms in (9 * 60 + 29) * 1000u64..=(9 * 60 + 59) * 1000,
    ) {
        let now = Instant::now();
        let deadline = now + Duration::from_millis(remaining_ms);

        let extended = extend_deadline(deadline, now, MUTE_LENGTH, MAX_MUTE_LENGTH);
        prop_assert_eq!(extended, now + MAX_MUTE_LENGTH);
    }
}
