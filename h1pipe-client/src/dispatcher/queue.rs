//! Ordered arena of requests with two cursors.
//!
//! ```text
//!   completed      running          pending
//! [ ... None ... | r r r r ...... | p p p p ... ]
//!                ^ running_idx    ^ pending_idx
//! ```
//!
//! Everything before `running_idx` has finished and is `None`. Records
//! between the cursors are on the wire, oldest first. Records from
//! `pending_idx` on are waiting to be written.

use tokio::time::Instant;

use super::record::{RequestId, RequestRecord};
use crate::ClientError;

const COMPACT_THRESHOLD: usize = 256;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum Segment {
    Running,
    Pending,
}

#[derive(Debug, Default)]
pub(crate) struct PipelineQueue {
    slots: Vec<Option<RequestRecord>>,
    running_idx: usize,
    pending_idx: usize,
}

impl PipelineQueue {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    pub(crate) fn push(&mut self, record: RequestRecord) {
        self.slots.push(Some(record));
    }

    pub(crate) fn size(&self) -> usize {
        self.slots.len() - self.running_idx
    }

    pub(crate) fn running(&self) -> usize {
        self.pending_idx - self.running_idx
    }

    pub(crate) fn pending(&self) -> usize {
        self.slots.len() - self.pending_idx
    }

    pub(crate) fn head_running(&self) -> Option<&RequestRecord> {
        if self.running() == 0 {
            return None;
        }
        self.slots.get(self.running_idx)?.as_ref()
    }

    pub(crate) fn head_running_mut(&mut self) -> Option<&mut RequestRecord> {
        if self.running() == 0 {
            return None;
        }
        self.slots.get_mut(self.running_idx)?.as_mut()
    }

    pub(crate) fn head_pending(&self) -> Option<&RequestRecord> {
        self.slots.get(self.pending_idx)?.as_ref()
    }

    pub(crate) fn head_pending_mut(&mut self) -> Option<&mut RequestRecord> {
        self.slots.get_mut(self.pending_idx)?.as_mut()
    }

    /// The head pending record was written to the socket.
    pub(crate) fn mark_written(&mut self) {
        debug_assert!(self.pending() > 0);
        self.pending_idx += 1;
    }

    pub(crate) fn remove_head_pending(&mut self) -> Option<RequestRecord> {
        if self.pending() == 0 {
            return None;
        }
        self.slots.remove(self.pending_idx)
    }

    /// The oldest running request finished.
    pub(crate) fn complete_head(&mut self) -> Option<RequestRecord> {
        if self.running() == 0 {
            return None;
        }
        let record = self.slots[self.running_idx].take();
        self.running_idx += 1;
        record
    }

    /// Drop the completed prefix once it grows past the threshold.
    pub(crate) fn compact(&mut self) {
        if self.running_idx > COMPACT_THRESHOLD {
            self.slots.drain(..self.running_idx);
            self.pending_idx -= self.running_idx;
            self.running_idx = 0;
        }
    }

    pub(crate) fn reset_if_drained(&mut self) {
        if self.size() == 0 {
            self.slots.clear();
            self.running_idx = 0;
            self.pending_idx = 0;
        }
    }

    /// The socket closed with requests in flight.
    ///
    /// Moves running records back to pending, ahead of what was already
    /// pending. Unless `keep_head` is set, the head running record is taken
    /// out for the caller to fail. Only idempotent requests are ever
    /// pipelined behind another, so the requeued ones are safe to retry.
    pub(crate) fn requeue_running(&mut self, keep_head: bool) -> Option<RequestRecord> {
        let head = if keep_head { None } else { self.complete_head() };
        self.slots.drain(..self.running_idx);
        self.running_idx = 0;
        self.pending_idx = 0;
        head
    }

    pub(crate) fn drain_pending(&mut self) -> Vec<RequestRecord> {
        self.slots.drain(self.pending_idx..).flatten().collect()
    }

    /// Every record not yet completed.
    pub(crate) fn drain_all(&mut self) -> Vec<RequestRecord> {
        let records = self.slots.drain(self.running_idx..).flatten().collect();
        self.pending_idx = self.running_idx;
        records
    }

    /// Fail leading pending records that target `servername`.
    pub(crate) fn fail_pending_for(&mut self, servername: Option<&str>, err: &ClientError) {
        while self
            .head_pending()
            .is_some_and(|record| record.servername.as_deref() == servername)
        {
            if let Some(mut record) = self.remove_head_pending() {
                record.fail(err.clone());
            }
        }
    }

    pub(crate) fn locate(&self, id: RequestId) -> Option<Segment> {
        let index = self.slots[self.running_idx..]
            .iter()
            .position(|slot| slot.as_ref().is_some_and(|r| r.id == id))?
            + self.running_idx;
        if index < self.pending_idx {
            Some(Segment::Running)
        } else {
            Some(Segment::Pending)
        }
    }

    pub(crate) fn find_mut(&mut self, id: RequestId) -> Option<&mut RequestRecord> {
        self.slots[self.running_idx..]
            .iter_mut()
            .flatten()
            .find(|record| record.id == id)
    }

    pub(crate) fn earliest_deadline(&self) -> Option<Instant> {
        self.slots[self.running_idx..]
            .iter()
            .flatten()
            .filter_map(RequestRecord::live_deadline)
            .min()
    }

    /// Apply `f` to every live record, with `true` for running ones.
    pub(crate) fn for_each_live(&mut self, mut f: impl FnMut(&mut RequestRecord, bool)) {
        let pending_idx = self.pending_idx;
        for (index, slot) in self.slots.iter_mut().enumerate().skip(self.running_idx) {
            if let Some(record) = slot {
                f(record, index < pending_idx);
            }
        }
    }
}
