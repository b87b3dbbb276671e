//! Wait queue of shards asking to identify
//!
//! Priority requests (rank 0) always dequeue before normal requests
//! (rank 10). Within a rank, requests dequeue in arrival order.

use crate::protocol::ShardId;
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::time::Instant;

/// Queue rank of priority requests (re-identifies)
pub const PRIORITY_RANK: u8 = 0;

/// Queue rank of normal requests
pub const NORMAL_RANK: u8 = 10;

/// A pending request to identify
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ConnectionRequest {
    pub shard_id: ShardId,
    pub priority: bool,
    pub enqueue_time: Instant,
}

impl ConnectionRequest {
    pub fn new(shard_id: ShardId, priority: bool, enqueue_time: Instant) -> Self {
        Self {
            shard_id,
            priority,
            enqueue_time,
        }
    }

    /// Queue rank; lower ranks dequeue first
    pub fn rank(&self) -> u8 {
        if self.priority {
            PRIORITY_RANK
        } else {
            NORMAL_RANK
        }
    }
}

/// Heap key. Field order is the ordering: rank, then arrival sequence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
struct QueueKey {
    rank: u8,
    seq: u64,
    shard_id: ShardId,
}

#[derive(Debug)]
struct Member {
    seq: u64,
    request: ConnectionRequest,
}

/// Priority queue with O(1) membership checks.
///
/// Removal is lazy: removed shards leave a stale heap key behind which is
/// skipped on pop because its sequence number no longer matches.
#[derive(Debug, Default)]
pub struct WaitQueue {
    heap: BinaryHeap<Reverse<QueueKey>>,
    members: HashMap<ShardId, Member>,
    next_seq: u64,
}

impl WaitQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Enqueue a request. Returns false if the shard is already queued.
    pub fn push(&mut self, request: ConnectionRequest) -> bool {
        if self.members.contains_key(&request.shard_id) {
            return false;
        }

        let seq = self.next_seq;
        self.next_seq += 1;

        self.heap.push(Reverse(QueueKey {
            rank: request.rank(),
            seq,
            shard_id: request.shard_id,
        }));
        self.members.insert(request.shard_id, Member { seq, request });
        true
    }

    /// Dequeue the lowest (rank, arrival) request
    pub fn pop(&mut self) -> Option<ConnectionRequest> {
        while let Some(Reverse(key)) = self.heap.pop() {
            let live = self
                .members
                .get(&key.shard_id)
                .is_some_and(|member| member.seq == key.seq);

            if live {
                return self.members.remove(&key.shard_id).map(|m| m.request);
            }
        }
        None
    }

    /// Remove a shard's request wherever it sits in the queue
    pub fn remove(&mut self, shard_id: ShardId) -> Option<ConnectionRequest> {
        let removed = self.members.remove(&shard_id).map(|m| m.request);

        // Compact once stale keys dominate the heap
        if removed.is_some() && self.heap.len() > 2 * self.members.len() + 16 {
            let members = &self.members;
            self.heap.retain(|Reverse(key)| {
                members
                    .get(&key.shard_id)
                    .is_some_and(|member| member.seq == key.seq)
            });
        }

        removed
    }

    pub fn contains(&self, shard_id: ShardId) -> bool {
        self.members.contains_key(&shard_id)
    }

    pub fn len(&self) -> usize {
        self.members.len()
    }

    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn req(shard_id: ShardId, priority: bool) -> ConnectionRequest {
        ConnectionRequest::new(shard_id, priority, Instant::now())
    }

    fn drain(queue: &mut WaitQueue) -> Vec<ShardId> {
        std::iter::from_fn(|| queue.pop().map(|r| r.shard_id)).collect()
    }

    #[test]
    fn priority_before_normal_regardless_of_arrival() {
        let mut queue = WaitQueue::new();
        queue.push(req(5, false));
        queue.push(req(6, true));
        queue.push(req(7, false));

        assert_eq!(drain(&mut queue), vec![6, 5, 7]);
    }

    #[test]
    fn same_rank_is_arrival_order_not_shard_order() {
        let mut queue = WaitQueue::new();
        queue.push(req(9, false));
        queue.push(req(2, false));
        queue.push(req(4, true));
        queue.push(req(1, true));

        assert_eq!(drain(&mut queue), vec![4, 1, 9, 2]);
    }

    #[test]
    fn duplicate_push_is_rejected() {
        let mut queue = WaitQueue::new();
        assert!(queue.push(req(3, false)));
        assert!(!queue.push(req(3, true)));
        assert_eq!(queue.len(), 1);

        // The original request keeps its rank
        assert!(!queue.pop().unwrap().priority);
        assert!(queue.is_empty());
    }

    #[test]
    fn removed_shard_is_skipped() {
        let mut queue = WaitQueue::new();
        queue.push(req(1, false));
        queue.push(req(2, false));
        queue.push(req(3, false));

        assert_eq!(queue.remove(2).map(|r| r.shard_id), Some(2));
        assert!(!queue.contains(2));
        assert_eq!(queue.len(), 2);
        assert_eq!(drain(&mut queue), vec![1, 3]);
    }

    #[test]
    fn requeued_shard_takes_its_new_position() {
        let mut queue = WaitQueue::new();
        queue.push(req(1, false));
        queue.push(req(2, false));
        queue.remove(1);
        queue.push(req(1, false));

        assert_eq!(drain(&mut queue), vec![2, 1]);
    }

    #[test]
    fn compaction_keeps_live_entries() {
        let mut queue = WaitQueue::new();
        for shard in 0..100 {
            queue.push(req(shard, false));
        }
        for shard in 0..95 {
            queue.remove(shard);
        }

        assert_eq!(queue.len(), 5);
        assert_eq!(drain(&mut queue), vec![95, 96, 97, 98, 99]);
    }
}
