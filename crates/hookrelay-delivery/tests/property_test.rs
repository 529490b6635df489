//! Property-based tests for retry scheduling.

use std::time::Duration;

use chrono::{TimeZone, Utc};
use hookrelay_delivery::retry::{default_backoff_table, BackoffStrategy, RetryDecision, RetryPolicy};
use proptest::prelude::*;

fn backoff_strategy() -> impl Strategy<Value = BackoffStrategy> {
    prop_oneof![
        (5u64..=3600).prop_map(|secs| BackoffStrategy::Fixed(Duration::from_secs(secs))),
        Just(BackoffStrategy::Table(default_backoff_table())),
        prop::collection::vec(1u64..86_400, 1..6).prop_map(|mut secs| {
            secs.sort_unstable();
            BackoffStrategy::Table(secs.into_iter().map(Duration::from_secs).collect())
        }),
    ]
}

proptest! {
    #[test]
    fn never_retries_past_the_limit(
        retry_limit in 0u32..=10,
        attempts in 1u32..30,
        backoff in backoff_strategy(),
    ) {
        let policy = RetryPolicy { retry_limit, backoff };
        let failed_at = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();

        match policy.decide(attempts, failed_at) {
            RetryDecision::Retry { next_attempt_at } => {
                prop_assert!(attempts <= retry_limit);
                prop_assert!(next_attempt_at > failed_at);
            },
            RetryDecision::GiveUp { .. } => prop_assert!(attempts > retry_limit),
        }
    }

    #[test]
    fn total_attempts_are_bounded_by_limit_plus_one(retry_limit in 0u32..=10) {
        let policy = RetryPolicy { retry_limit, backoff: BackoffStrategy::default() };
        let mut now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut attempts = 0;

        loop {
            attempts += 1;
            match policy.decide(attempts, now) {
                RetryDecision::Retry { next_attempt_at } => now = next_attempt_at,
                RetryDecision::GiveUp { .. } => break,
            }
        }

        prop_assert_eq!(attempts, retry_limit + 1);
    }

    #[test]
    fn sorted_table_delays_never_decrease(backoff in backoff_strategy(), attempts in 1u32..20) {
        let policy = RetryPolicy { retry_limit: 10, backoff };

        prop_assert!(policy.delay_for(attempts + 1) >= policy.delay_for(attempts));
    }
}
