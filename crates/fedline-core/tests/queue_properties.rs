//! Property-based tests for MessageQueue
//!
//! These tests verify the release-order invariants of the dual queue for
//! arbitrary mixes of receive-order and timestamped traffic.

use std::sync::Arc;

use bytes::Bytes;
use fedline_core::{
    HandlerError, IncomingHandler, MessageQueue, SharedTimeStatus, TimeStatus, TriState,
};
use fedline_proto::{Category, Message};
use proptest::prelude::*;

struct Discard;

impl IncomingHandler for Discard {
    fn process(&self, _message: Message) -> Result<(), HandlerError> {
        Ok(())
    }
}

fn queue(status: TimeStatus) -> (MessageQueue, SharedTimeStatus) {
    let time = SharedTimeStatus::new(status);
    (MessageQueue::new(Arc::new(time.clone()), Arc::new(Discard)), time)
}

fn category() -> impl Strategy<Value = Category> {
    prop_oneof![
        Just(Category::Reflection),
        Just(Category::Interaction),
        Just(Category::Discovery),
        Just(Category::Delete),
        Just(Category::Other),
    ]
}

/// (timestamp, category) pairs; `None` means receive order
fn traffic() -> impl Strategy<Value = Vec<(Option<f64>, Category)>> {
    prop::collection::vec((prop::option::of(0.0f64..100.0), category()), 0..64)
}

fn build(index: usize, timestamp: Option<f64>, category: Category) -> Message {
    let source = index as u32 + 1;
    match timestamp {
        Some(time) => Message::timestamped(source, time, category, Bytes::new()),
        None => Message::receive_order(source, category, Bytes::new()),
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(100))]

    /// Property: Everything offered to an unconstrained federate is polled
    /// back exactly once
    #[test]
    fn prop_offer_poll_conservation(traffic in traffic()) {
        let (queue, _) = queue(TimeStatus::default());

        for (i, (timestamp, category)) in traffic.iter().enumerate() {
            prop_assert!(queue.offer(build(i, *timestamp, *category)));
        }
        prop_assert_eq!(queue.len(), traffic.len());

        let mut polled = 0;
        while queue.poll().is_some() {
            polled += 1;
        }

        prop_assert_eq!(polled, traffic.len());
        prop_assert!(queue.is_empty());
    }

    /// Property: A constrained federate with an outstanding advance and a
    /// finite LBTS releases RO plus the TSO entries up to the lower bound;
    /// everything else stays queued, and nothing is lost or duplicated
    #[test]
    fn prop_constrained_offer_poll_conservation(
        traffic in traffic(),
        requested in 0.0f64..100.0,
        lbts in 0.0f64..100.0,
    ) {
        let (queue, time) = queue(TimeStatus::constrained());
        time.update(|status| status.advance_requested(requested));
        time.set_federation_lbts(lbts);
        let bound = requested.min(lbts);

        for (i, (timestamp, category)) in traffic.iter().enumerate() {
            prop_assert!(queue.offer(build(i, *timestamp, *category)));
        }

        let polled: Vec<Message> = std::iter::from_fn(|| queue.poll()).collect();
        let releasable =
            traffic.iter().filter(|(timestamp, _)| timestamp.is_none_or(|t| t <= bound)).count();
        prop_assert_eq!(polled.len(), releasable);
        prop_assert!(polled.iter().all(|m| m.timestamp.is_none_or(|t| t <= bound)));
        prop_assert_eq!(queue.len(), traffic.len() - releasable);

        let remaining = queue.flush(f64::INFINITY);
        let mut sources: Vec<u32> = polled.iter().chain(&remaining).map(|m| m.source).collect();
        sources.sort_unstable();
        let expected: Vec<u32> = (1..=traffic.len() as u32).collect();
        prop_assert_eq!(sources, expected);
    }

    /// Property: Under identical gating, RO releases in arrival order
    #[test]
    fn prop_receive_order_is_fifo(traffic in traffic()) {
        let (queue, _) = queue(TimeStatus::default());

        for (i, (timestamp, category)) in traffic.iter().enumerate() {
            queue.offer(build(i, *timestamp, *category));
        }

        let sources: Vec<u32> = std::iter::from_fn(|| queue.poll()).map(|m| m.source).collect();
        let expected: Vec<u32> = (1..=traffic.len() as u32).collect();
        prop_assert_eq!(sources, expected);
    }

    /// Property: With LBTS and requested time unbounded, TSO releases in
    /// non-decreasing timestamp order and equal timestamps keep arrival order
    #[test]
    fn prop_tso_releases_in_time_order(
        times in prop::collection::vec(0u8..16, 0..64)
    ) {
        let (queue, time) = queue(TimeStatus::constrained());
        time.update(|status| status.advance_requested(f64::INFINITY));

        for (i, t) in times.iter().enumerate() {
            queue.offer(build(i, Some(f64::from(*t)), Category::Reflection));
        }

        let released: Vec<(f64, u32)> = std::iter::from_fn(|| queue.poll())
            .map(|m| (m.timestamp.unwrap_or_default(), m.source))
            .collect();

        prop_assert_eq!(released.len(), times.len());
        for pair in released.windows(2) {
            let (earlier, later) = (pair[0], pair[1]);
            prop_assert!(earlier.0 <= later.0);
            if earlier.0 == later.0 {
                prop_assert!(earlier.1 < later.1);
            }
        }
    }

    /// Property: A time-advance grant is released after every ordinary
    /// message carrying the same timestamp
    #[test]
    fn prop_grant_sorts_last_at_its_time(
        before in 0usize..8,
        after in 0usize..8,
        grant_time in 0u8..10
    ) {
        let (queue, _) = queue(TimeStatus::constrained());
        let grant_time = f64::from(grant_time);

        for i in 0..before {
            queue.offer(build(i, Some(grant_time), Category::Interaction));
        }
        queue.offer(Message::time_advance_grant(0, grant_time));
        for i in before..before + after {
            queue.offer(build(i, Some(grant_time), Category::Interaction));
        }

        let flushed = queue.flush(grant_time);
        prop_assert_eq!(flushed.len(), before + after + 1);
        prop_assert!(flushed.last().is_some_and(Message::is_time_advance_grant));
    }

    /// Property: Becoming unconstrained moves TSO into RO without loss and
    /// strips every timestamp
    #[test]
    fn prop_became_unconstrained_conserves(traffic in traffic()) {
        let (queue, time) = queue(TimeStatus::constrained());
        for (i, (timestamp, category)) in traffic.iter().enumerate() {
            queue.offer(build(i, *timestamp, *category));
        }

        time.update(|status| status.constrained = TriState::Off);
        queue.became_unconstrained();

        prop_assert_eq!(queue.peek_tso_time(), None);
        let released: Vec<Message> = std::iter::from_fn(|| queue.poll()).collect();
        prop_assert_eq!(released.len(), traffic.len());
        prop_assert!(released.iter().all(|m| m.timestamp.is_none()));
    }

    /// Property: Snapshot and restore reproduce the same release sequence
    #[test]
    fn prop_snapshot_restore_preserves_release(traffic in traffic()) {
        let (original, time) = queue(TimeStatus::constrained());
        time.update(|status| status.advance_requested(f64::INFINITY));
        for (i, (timestamp, category)) in traffic.iter().enumerate() {
            original.offer(build(i, *timestamp, *category));
        }

        let (restored, restored_time) = queue(TimeStatus::constrained());
        restored_time.update(|status| status.advance_requested(f64::INFINITY));
        restored.restore(original.snapshot());

        let a: Vec<u32> = std::iter::from_fn(|| original.poll()).map(|m| m.source).collect();
        let b: Vec<u32> = std::iter::from_fn(|| restored.poll()).map(|m| m.source).collect();
        prop_assert_eq!(a, b);
    }
}
