//! Ordering key for the global simulation event queue.

use crate::NodeIndex;
use std::time::Duration;
use triad_core::{Event, EventPriority};

/// Total order over queued events: delivery time first, then priority
/// (internal consequences before timers before network input), then node,
/// then insertion sequence as the final tiebreak.
///
/// The sequence component makes every key unique, so the queue can be a
/// plain `BTreeMap` and removal-by-key (timer cancellation) is exact.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub struct EventKey {
    /// Delivery time.
    pub time: Duration,
    /// Priority class of the queued event.
    pub priority: EventPriority,
    /// The node the event is addressed to.
    pub node: NodeIndex,
    /// Insertion sequence number.
    pub seq: u64,
}

impl EventKey {
    /// Build a key for an event addressed to `node` at `time`.
    pub fn new(time: Duration, event: &Event, node: NodeIndex, seq: u64) -> Self {
        Self {
            time,
            priority: event.priority(),
            node,
            seq,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ordering_time_then_priority() {
        let t1 = Duration::from_millis(10);
        let t2 = Duration::from_millis(20);
        let timer = Event::LedgerSyncTick;
        let network = Event::StatusRequestReceived {
            from: triad_types::ValidatorId(0),
        };

        let a = EventKey::new(t1, &network, 0, 5);
        let b = EventKey::new(t2, &timer, 0, 1);
        assert!(a < b, "earlier time wins regardless of priority");

        let c = EventKey::new(t1, &timer, 0, 9);
        assert!(c < a, "at equal times, timers precede network input");

        let d = EventKey::new(t1, &network, 0, 6);
        assert!(a < d, "sequence breaks remaining ties");
    }
}
