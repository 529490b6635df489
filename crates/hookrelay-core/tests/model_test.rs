//! Property-based tests for the event state machine and due-event rules.

use chrono::{Duration, TimeZone, Utc};
use hookrelay_core::models::{EventId, EventStatus, NewEvent, SubscriptionId};
use proptest::prelude::*;

fn status_strategy() -> impl Strategy<Value = EventStatus> {
    prop::sample::select(EventStatus::ALL.to_vec())
}

proptest! {
    #[test]
    fn terminal_states_only_leave_through_manual_reset(
        from in status_strategy(),
        to in status_strategy(),
    ) {
        if from.is_terminal() && from.can_transition_to(to) {
            prop_assert_eq!(from, EventStatus::Failed);
            prop_assert_eq!(to, EventStatus::Pending);
        }
    }

    #[test]
    fn nothing_reaches_delivered_without_an_attempt(from in status_strategy()) {
        if from.can_transition_to(EventStatus::Delivered) {
            prop_assert_eq!(from, EventStatus::Retrying);
        }
    }

    #[test]
    fn terminal_events_are_never_due(
        status in status_strategy(),
        offset_secs in -86_400i64..86_400,
        attempts in 0i32..12,
    ) {
        let now = Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap();
        let mut event = NewEvent::new(
            SubscriptionId::new(),
            "order.paid",
            serde_json::json!({"order": 1}),
            now - Duration::hours(1),
        )
        .into_event(EventId::new());
        event.status = status;
        event.attempts = attempts;
        event.next_retry_at = Some(now + Duration::seconds(offset_secs));

        let due = event.is_due(now);

        match status {
            EventStatus::Delivered | EventStatus::Failed => prop_assert!(!due),
            EventStatus::Pending => prop_assert!(due),
            EventStatus::Retrying => prop_assert_eq!(due, offset_secs <= 0),
        }
    }
}

#[test]
fn retrying_without_schedule_is_not_due() {
    let now = Utc::now();
    let mut event = NewEvent::new(SubscriptionId::new(), "a.b", serde_json::json!({}), now)
        .into_event(EventId::new());
    event.status = EventStatus::Retrying;
    event.next_retry_at = None;

    assert!(!event.is_due(now));
}

#[test]
fn new_events_start_pending_with_no_attempts() {
    let event = NewEvent::new(SubscriptionId::new(), "a.b", serde_json::json!({}), Utc::now())
        .into_event(EventId::new());

    assert_eq!(event.status, EventStatus::Pending);
    assert_eq!(event.attempts, 0);
    assert!(event.last_attempt_at.is_none());
    assert!(event.next_retry_at.is_none());
}
