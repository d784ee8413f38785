//! Three-level strict-priority FIFO queue.

use std::collections::VecDeque;

use parking_lot::Mutex;

use crate::priority::Priority;
use crate::request::RequestLifecycle;

struct Lanes {
    high: VecDeque<RequestLifecycle>,
    normal: VecDeque<RequestLifecycle>,
    dropable: VecDeque<RequestLifecycle>,
}

/// Three FIFO lanes, one per [`Priority`], drained in strict priority order.
///
/// `High` always drains before `Normal`, which always drains before
/// `Dropable` -- sustained `Normal` traffic starving `Dropable` work is
/// acceptable and intended. Within a single lane, ordering is FIFO.
///
/// Waking the dispatcher when work arrives is the caller's job (see
/// `Inner::enqueue`'s `dispatch_notify`) -- this type is just the three
/// lanes and their lock.
pub(crate) struct PriorityQueue {
    lanes: Mutex<Lanes>,
}

impl PriorityQueue {
    pub(crate) fn new() -> Self {
        Self {
            lanes: Mutex::new(Lanes {
                high: VecDeque::new(),
                normal: VecDeque::new(),
                dropable: VecDeque::new(),
            }),
        }
    }

    /// Append to the tail of `request`'s priority lane.
    pub(crate) fn push(&self, request: RequestLifecycle) {
        let mut lanes = self.lanes.lock();
        match request.priority {
            Priority::High => lanes.high.push_back(request),
            Priority::Normal => lanes.normal.push_back(request),
            Priority::Dropable => lanes.dropable.push_back(request),
        }
    }

    /// Pop the head of the highest-priority non-empty lane, if any.
    pub(crate) fn pop(&self) -> Option<RequestLifecycle> {
        let mut lanes = self.lanes.lock();
        lanes
            .high
            .pop_front()
            .or_else(|| lanes.normal.pop_front())
            .or_else(|| lanes.dropable.pop_front())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::request::Responder;
    use bytes::Bytes;
    use http::Method;
    use tokio::sync::oneshot;

    fn dummy(priority: Priority) -> RequestLifecycle {
        let (tx, _rx) = oneshot::channel();
        RequestLifecycle::new(
            Method::GET,
            "/".to_string(),
            Bytes::new(),
            Vec::new(),
            priority,
            0,
            Responder::Oneshot(tx),
        )
    }

    #[test]
    fn pops_in_strict_priority_order() {
        let q = PriorityQueue::new();
        q.push(dummy(Priority::Dropable));
        q.push(dummy(Priority::Normal));
        q.push(dummy(Priority::High));

        assert_eq!(q.pop().unwrap().priority, Priority::High);
        assert_eq!(q.pop().unwrap().priority, Priority::Normal);
        assert_eq!(q.pop().unwrap().priority, Priority::Dropable);
        assert!(q.pop().is_none());
    }

    #[test]
    fn fifo_within_a_single_lane() {
        let q = PriorityQueue::new();
        for _ in 0..3 {
            q.push(dummy(Priority::Normal));
        }
        assert_eq!(q.pop().unwrap().key_tail, "/");
        assert_eq!(q.pop().unwrap().key_tail, "/");
        assert_eq!(q.pop().unwrap().key_tail, "/");
    }
}
