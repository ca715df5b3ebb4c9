use std::collections::VecDeque;

use crate::config::{BaseType, Tick};
use crate::nvme::{IoOp, NvmeStatus};
use crate::timer::SlotTag;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestState {
    /// Waiting for the front end to pick it up.
    Submitted,
    /// Slice operations are in flight.
    Transferring,
    Completed(NvmeStatus),
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Request {
    pub hid: BaseType,
    pub op: IoOp,
    pub blkaddr: u64,
    pub nblks: u32,
    pub request_time: Tick,
    pub state: RequestState,
    pub slot: SlotTag,
    pub remaining_slices: BaseType,
}

impl Request {
    pub fn new(hid: BaseType, op: IoOp, blkaddr: u64, nblks: u32, request_time: Tick) -> Self {
        Request {
            hid,
            op,
            blkaddr,
            nblks,
            request_time,
            state: RequestState::Submitted,
            slot: 0,
            remaining_slices: 0,
        }
    }

    pub fn status(&self) -> Option<NvmeStatus> {
        match self.state {
            RequestState::Completed(status) => Some(status),
            _ => None,
        }
    }
}

/// Slot pool for outstanding host requests with a fixed maximum depth.
#[derive(Debug)]
pub struct RequestQueue {
    slots: Vec<Option<Request>>,
    free: VecDeque<SlotTag>,
    submitted: VecDeque<SlotTag>,
    completed: VecDeque<SlotTag>,
}

impl RequestQueue {
    pub fn new(depth: BaseType) -> Self {
        RequestQueue {
            slots: vec![None; depth],
            free: (0..depth as SlotTag).collect(),
            submitted: VecDeque::new(),
            completed: VecDeque::new(),
        }
    }

    pub fn depth(&self) -> BaseType {
        self.slots.len()
    }

    pub fn outstanding(&self) -> BaseType {
        self.slots.len() - self.free.len()
    }

    pub fn is_full(&self) -> bool {
        self.free.is_empty()
    }

    /// Take a slot for `req`, or hand it back when every slot is in use.
    pub fn try_submit(&mut self, mut req: Request) -> Result<SlotTag, Request> {
        let Some(slot) = self.free.pop_front() else {
            return Err(req);
        };
        req.slot = slot;
        req.state = RequestState::Submitted;
        self.slots[slot as usize] = Some(req);
        self.submitted.push_back(slot);
        Ok(slot)
    }

    pub fn next_submitted(&mut self) -> Option<SlotTag> {
        self.submitted.pop_front()
    }

    pub fn get(&self, slot: SlotTag) -> Option<&Request> {
        self.slots.get(slot as usize).and_then(|s| s.as_ref())
    }

    pub fn get_mut(&mut self, slot: SlotTag) -> Option<&mut Request> {
        self.slots.get_mut(slot as usize).and_then(|s| s.as_mut())
    }

    pub fn complete(&mut self, slot: SlotTag, status: NvmeStatus) {
        let req = self
            .get_mut(slot)
            .unwrap_or_else(|| panic!("completion for empty request slot {}", slot));
        assert!(req.status().is_none(), "request slot {} completed twice", slot);
        req.state = RequestState::Completed(status);
        self.completed.push_back(slot);
    }

    /// Count one finished slice; completes the request with the last one.
    pub fn slice_done(&mut self, slot: SlotTag) {
        let req = self
            .get_mut(slot)
            .unwrap_or_else(|| panic!("slice finished for empty request slot {}", slot));
        assert!(req.remaining_slices > 0, "request slot {} has no slices in flight", slot);
        req.remaining_slices -= 1;
        if req.remaining_slices == 0 {
            self.complete(slot, NvmeStatus::Success);
        }
    }

    /// Hand back the oldest completed request and release its slot.
    pub fn pop_completed(&mut self) -> Option<Request> {
        let slot = self.completed.pop_front()?;
        let req = self.slots[slot as usize].take();
        self.free.push_back(slot);
        req
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(blkaddr: u64) -> Request {
        Request::new(0, IoOp::Write, blkaddr, 1, 0)
    }

    #[test]
    fn throttles_at_depth_without_dropping() {
        let mut q = RequestQueue::new(2);
        assert_eq!(q.try_submit(req(0)), Ok(0));
        assert_eq!(q.try_submit(req(1)), Ok(1));
        assert!(q.is_full());

        let back = q.try_submit(req(2)).unwrap_err();
        assert_eq!(back.blkaddr, 2);
        assert_eq!(q.outstanding(), 2);
    }

    #[test]
    fn slot_is_reused_after_completion_is_reported() {
        let mut q = RequestQueue::new(1);
        let slot = q.try_submit(req(0)).unwrap();
        assert_eq!(q.next_submitted(), Some(slot));

        q.complete(slot, NvmeStatus::LbaRange);
        // completed but not yet reported still occupies the slot
        assert!(q.is_full());

        let done = q.pop_completed().unwrap();
        assert_eq!(done.status(), Some(NvmeStatus::LbaRange));
        assert_eq!(q.outstanding(), 0);
        assert_eq!(q.try_submit(req(1)), Ok(slot));
    }

    #[test]
    fn last_slice_completes_request() {
        let mut q = RequestQueue::new(4);
        let slot = q.try_submit(req(0)).unwrap();
        if let Some(r) = q.get_mut(slot) {
            r.state = RequestState::Transferring;
            r.remaining_slices = 2;
        }

        q.slice_done(slot);
        assert!(q.pop_completed().is_none());
        q.slice_done(slot);
        assert_eq!(q.pop_completed().unwrap().status(), Some(NvmeStatus::Success));
    }

    #[test]
    #[should_panic(expected = "completed twice")]
    fn double_completion_panics() {
        let mut q = RequestQueue::new(1);
        let slot = q.try_submit(req(0)).unwrap();
        q.complete(slot, NvmeStatus::Success);
        q.complete(slot, NvmeStatus::Success);
    }
}
