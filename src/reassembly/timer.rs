// Expiration list threaded through flow records.
//
// Flows are appended at creation and the timeout delta is constant at each
// insert, so the list stays sorted by expiration; the sweep only ever pops
// the front. All operations are O(1).

use slotmap::SlotMap;

use super::flow::{Flow, FlowKey};

#[derive(Debug, Default)]
pub(crate) struct TimerQueue {
    head: Option<FlowKey>,
    tail: Option<FlowKey>,
}

impl TimerQueue {
    /// The flow expiring soonest, if any.
    pub(crate) fn front(&self) -> Option<FlowKey> {
        self.head
    }

    pub(crate) fn push_back(&mut self, flows: &mut SlotMap<FlowKey, Flow>, key: FlowKey) {
        flows[key].timer_prev = self.tail;
        flows[key].timer_next = None;
        match self.tail {
            Some(t) => flows[t].timer_next = Some(key),
            None => self.head = Some(key),
        }
        self.tail = Some(key);
    }

    pub(crate) fn unlink(&mut self, flows: &mut SlotMap<FlowKey, Flow>, key: FlowKey) {
        let prev = flows[key].timer_prev;
        let next = flows[key].timer_next;
        match prev {
            Some(p) => flows[p].timer_next = next,
            None => self.head = next,
        }
        match next {
            Some(n) => flows[n].timer_prev = prev,
            None => self.tail = prev,
        }
        flows[key].timer_prev = None;
        flows[key].timer_next = None;
    }
}
