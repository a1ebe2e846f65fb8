//! Bounded FIFO channels.
//!
//! Each channel carries a buffer of declared capacity plus FIFO queues of
//! pending senders and receivers. Capacity 0 is a synchronous rendezvous:
//! a send needs a simultaneous receive and vice versa.

use std::collections::VecDeque;

use ahash::AHashMap;
use serde::{Deserialize, Serialize};

use crate::{task::TaskId, types::Type, value::Value};

/// Unique identifier for a channel in the store.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct ChannelId(u32);

impl ChannelId {
    pub fn new(index: usize) -> Self {
        Self(u32::try_from(index).expect("channel store overflow"))
    }

    #[inline]
    pub fn index(self) -> usize {
        self.0 as usize
    }

    #[inline]
    pub fn raw(self) -> u32 {
        self.0
    }
}

/// Outcome of a non-suspending send attempt.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) enum SendAttempt {
    /// Value delivered directly to a pending receiver or buffered.
    Accepted,
    /// Buffer full and no pending receiver; caller must suspend or give up.
    WouldBlock,
}

/// One channel: bounded buffer plus pending sender/receiver bookkeeping.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub(crate) struct Channel {
    capacity: usize,
    element_type: Option<Type>,
    queue: VecDeque<Value>,
    /// Tasks suspended in `send`, oldest first, with the values they carry.
    pending_senders: VecDeque<(TaskId, Value)>,
    /// Tasks suspended in `recv`, oldest first.
    pending_receivers: VecDeque<TaskId>,
    /// Values handed directly to a suspended receiver, keyed by task.
    ///
    /// A sender that finds a pending receiver resolves it by depositing here;
    /// the receiver's drive loop picks the value up on its next turn.
    handoff: AHashMap<TaskId, Value>,
    closed: bool,
}

impl Channel {
    fn new(capacity: usize, element_type: Option<Type>) -> Self {
        Self {
            capacity,
            element_type,
            queue: VecDeque::new(),
            pending_senders: VecDeque::new(),
            pending_receivers: VecDeque::new(),
            handoff: AHashMap::new(),
            closed: false,
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn element_type(&self) -> Option<&Type> {
        self.element_type.as_ref()
    }

    pub fn is_closed(&self) -> bool {
        self.closed
    }

    pub fn close(&mut self) {
        self.closed = true;
    }

    /// Attempts a send without suspending.
    ///
    /// A pending receiver is resolved directly before the buffer is
    /// considered.
    pub fn try_send(&mut self, value: Value) -> (SendAttempt, Option<Value>) {
        if let Some(receiver) = self.pending_receivers.pop_front() {
            self.handoff.insert(receiver, value);
            return (SendAttempt::Accepted, None);
        }
        if self.queue.len() < self.capacity {
            self.queue.push_back(value);
            return (SendAttempt::Accepted, None);
        }
        (SendAttempt::WouldBlock, Some(value))
    }

    /// Attempts a receive without suspending.
    ///
    /// Draining the buffer head wakes the oldest pending sender (its value
    /// moves into the freed buffer slot), preserving FIFO across the
    /// buffered/suspended boundary.
    pub fn try_recv(&mut self) -> Option<Value> {
        if let Some(value) = self.queue.pop_front() {
            if let Some((_, queued)) = self.pending_senders.pop_front() {
                self.queue.push_back(queued);
            }
            return Some(value);
        }
        // Rendezvous path: no buffer, take directly from the oldest sender.
        if let Some((_, value)) = self.pending_senders.pop_front() {
            return Some(value);
        }
        None
    }

    /// Registers `task` as a suspended sender carrying `value`.
    pub fn park_sender(&mut self, task: TaskId, value: Value) {
        self.pending_senders.push_back((task, value));
    }

    /// Returns true while `task` still has a parked send in flight.
    pub fn sender_parked(&self, task: TaskId) -> bool {
        self.pending_senders.iter().any(|(t, _)| *t == task)
    }

    /// Registers `task` as a suspended receiver.
    pub fn park_receiver(&mut self, task: TaskId) {
        self.pending_receivers.push_back(task);
    }

    /// Takes a value deposited for `task` by a direct handoff, if any.
    pub fn take_handoff(&mut self, task: TaskId) -> Option<Value> {
        self.handoff.remove(&task)
    }

    /// Removes `task` from the pending receiver queue (timeout/cancel path).
    pub fn unpark_receiver(&mut self, task: TaskId) {
        self.pending_receivers.retain(|t| *t != task);
    }

    /// Number of buffered values.
    pub fn len(&self) -> usize {
        self.queue.len()
    }
}

/// All channels allocated during one evaluation.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub(crate) struct ChannelStore {
    channels: Vec<Channel>,
}

impl ChannelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Allocates a channel with the given capacity and element type.
    pub fn create(&mut self, capacity: usize, element_type: Option<Type>) -> ChannelId {
        let id = ChannelId::new(self.channels.len());
        self.channels.push(Channel::new(capacity, element_type));
        id
    }

    pub fn get(&self, id: ChannelId) -> &Channel {
        &self.channels[id.index()]
    }

    pub fn get_mut(&mut self, id: ChannelId) -> &mut Channel {
        &mut self.channels[id.index()]
    }

    /// Closes every channel; sends observed afterwards fail. Best-effort
    /// cleanup when an evaluation winds down with live handles.
    pub fn close_all(&mut self) {
        for channel in &mut self.channels {
            channel.close();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn buffered_send_then_recv_is_fifo() {
        let mut store = ChannelStore::new();
        let id = store.create(2, None);
        let ch = store.get_mut(id);
        assert_eq!(ch.try_send(Value::Int(1)).0, SendAttempt::Accepted);
        assert_eq!(ch.try_send(Value::Int(2)).0, SendAttempt::Accepted);
        let (attempt, returned) = ch.try_send(Value::Int(3));
        assert_eq!(attempt, SendAttempt::WouldBlock);
        assert_eq!(returned, Some(Value::Int(3)));
        assert_eq!(ch.try_recv(), Some(Value::Int(1)));
        assert_eq!(ch.try_recv(), Some(Value::Int(2)));
        assert_eq!(ch.try_recv(), None);
    }

    #[test]
    fn draining_wakes_oldest_parked_sender() {
        let mut store = ChannelStore::new();
        let id = store.create(1, None);
        let ch = store.get_mut(id);
        assert_eq!(ch.try_send(Value::Int(1)).0, SendAttempt::Accepted);
        ch.park_sender(TaskId::new(7), Value::Int(2));
        // Receiving 1 frees a slot; the parked value moves into the buffer.
        assert_eq!(ch.try_recv(), Some(Value::Int(1)));
        assert!(!ch.sender_parked(TaskId::new(7)));
        assert_eq!(ch.try_recv(), Some(Value::Int(2)));
    }

    #[test]
    fn rendezvous_hands_off_between_parked_peers() {
        let mut store = ChannelStore::new();
        let id = store.create(0, None);
        let receiver = TaskId::new(3);
        let ch = store.get_mut(id);
        // Receiver parks first; a later send resolves it directly.
        ch.park_receiver(receiver);
        assert_eq!(ch.try_send(Value::Int(9)).0, SendAttempt::Accepted);
        assert_eq!(ch.take_handoff(receiver), Some(Value::Int(9)));

        // Sender parks first; a later recv takes its value.
        ch.park_sender(TaskId::new(4), Value::Int(10));
        assert_eq!(ch.try_recv(), Some(Value::Int(10)));
    }
}
