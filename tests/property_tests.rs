//! Property-based tests. Host-only: proptest does not build for the
//! espidf target.
#![cfg(not(target_os = "espidf"))]

use proptest::prelude::*;

use flexnode::clock::MonotonicMs;
use flexnode::scheduler::id::{self, GpioKind, IntervalKind, TimerId};
use flexnode::scheduler::queue::{NextDue, TimerQueue};
use flexnode::scheduler::rules::next_deadline;

fn arb_timer_id() -> impl Strategy<Value = TimerId> {
    prop_oneof![
        prop::sample::select(&IntervalKind::ALL[..]).prop_map(TimerId::Interval),
        (any::<u8>(), any::<u8>())
            .prop_map(|(device, param)| TimerId::PluginTask { device, param }),
        (any::<u8>(), any::<u8>())
            .prop_map(|(device, param)| TimerId::PluginOnly { device, param }),
        any::<u8>().prop_map(|task| TimerId::TaskDevice { task }),
        (
            prop::sample::select(&[GpioKind::Internal, GpioKind::Mcp23017, GpioKind::Pcf8574][..]),
            any::<u8>(),
            0u8..=1,
        )
            .prop_map(|(expander, pin, value)| TimerId::Gpio { expander, pin, value }),
        any::<u8>().prop_map(|index| TimerId::Rules { index }),
        Just(TimerId::SystemEvent),
        any::<u8>().prop_map(|reason| TimerId::RebootMarker { reason }),
    ]
}

proptest! {
    /// Packing an id and unpacking it always yields the same id.
    #[test]
    fn packed_id_roundtrips(timer_id in arb_timer_id()) {
        let raw = id::encode(timer_id);
        prop_assert_eq!(id::decode(raw), Some(timer_id));
        // Category survives in the high bits regardless of sub-key.
        prop_assert_eq!((raw >> 28) as u8, timer_id.category() as u8);
    }

    /// Distinct ids never collide in packed form.
    #[test]
    fn distinct_ids_pack_distinctly(a in arb_timer_id(), b in arb_timer_id()) {
        if a != b {
            prop_assert_ne!(id::encode(a), id::encode(b));
        }
    }

    /// The human rendering never panics, valid id or not.
    #[test]
    fn human_rendering_is_total(raw in any::<u32>()) {
        prop_assert!(!id::decode_for_humans(raw).is_empty());
    }

    /// Wrap-safe ordering: within half the counter range, `plus_ms`
    /// always moves forward and `delta_ms` reports the exact offset.
    #[test]
    fn wrapping_comparison_is_consistent(base in any::<u32>(), offset in 0u32..0x7FFF_FFFF) {
        let a = MonotonicMs(base);
        let b = a.plus_ms(offset);
        prop_assert_eq!(b.delta_ms(a), offset as i32);
        prop_assert_eq!(a.delta_ms(b), -(offset as i32));
        prop_assert!(b.has_reached(a));
        prop_assert_eq!(a.has_reached(b), offset == 0);
        prop_assert_eq!(a.until(b), offset);
    }

    /// Whatever the insertion order, the queue pops in wrap-safe
    /// deadline order and holds at most one entry per id.
    #[test]
    fn queue_pops_sorted_and_deduplicated(
        base in any::<u32>(),
        entries in prop::collection::vec((any::<u8>(), 0u32..1_000_000), 1..40),
    ) {
        let mut q = TimerQueue::new(100);
        let mut unique = std::collections::HashSet::new();
        for &(index, offset) in &entries {
            q.schedule(TimerId::Rules { index }, MonotonicMs(base).plus_ms(offset));
            unique.insert(index);
        }
        prop_assert_eq!(q.len(), unique.len());

        let now = MonotonicMs(base).plus_ms(1_000_000);
        let mut prev: Option<MonotonicMs> = None;
        let mut popped = 0;
        while let NextDue::Due { deadline, .. } = q.next_due(now) {
            if let Some(p) = prev {
                prop_assert!(deadline.delta_ms(p) >= 0, "deadlines out of order");
            }
            prev = Some(deadline);
            popped += 1;
        }
        prop_assert_eq!(popped, unique.len());
        prop_assert!(q.is_empty());
    }

    /// Drift-free re-arm: while the handler stays within the slack, the
    /// next deadline is exactly one interval past the previous target;
    /// beyond it, the timer resynchronises to one interval past `now`.
    #[test]
    fn rearm_is_on_grid_or_resynced(
        target in any::<u32>(),
        lateness in 0u32..10_000,
        interval in 1u32..100_000,
    ) {
        let prev = MonotonicMs(target);
        let now = prev.plus_ms(lateness);
        let next = next_deadline(prev, now, interval, 1);
        if lateness <= interval.saturating_mul(2) {
            prop_assert_eq!(next, prev.plus_ms(interval));
        } else {
            prop_assert_eq!(next, now.plus_ms(interval));
        }
        // Either way the deadline is in the future or on the grid just behind.
        prop_assert!(next.delta_ms(now) >= -(interval.saturating_mul(1) as i32));
    }
}
