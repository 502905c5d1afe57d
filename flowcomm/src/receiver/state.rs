//
//! Copyright 2020 Alibaba Group Holding Limited.
//!
//! Licensed under the Apache License, Version 2.0 (the "License");
//! you may not use this file except in compliance with the License.
//! You may obtain a copy of the License at
//!
//! http://www.apache.org/licenses/LICENSE-2.0
//!
//! Unless required by applicable law or agreed to in writing, software
//! distributed under the License is distributed on an "AS IS" BASIS,
//! WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
//! See the License for the specific language governing permissions and
//! limitations under the License.


use std::collections::VecDeque;

use nohash_hasher::IntMap;

use super::PeerSet;
use crate::message::{Incoming, MessageFlags, Payload};
use crate::TaskId;

pub(crate) enum Slot<T> {
    Data(Payload<T>),
    /// End of a window of the source, streaming only;
    Sync,
    /// Barrier of the window the source is in, streaming only;
    Barrier(Vec<u8>),
}

/// Everything a final receiver keeps for one local target.
pub(crate) struct TargetState<T> {
    pub target: TaskId,
    /// Indexed by source position in the plan;
    pub queues: Vec<VecDeque<Slot<T>>>,
    /// Positions of the finished sources, batch only;
    pub finished: PeerSet,
    pub done: bool,
    /// Latest barrier seen, handed to `sync`;
    pub barrier: Option<Vec<u8>>,
}

impl<T> TargetState<T> {
    fn new(target: TaskId, sources: usize) -> Self {
        TargetState {
            target,
            queues: (0..sources).map(|_| VecDeque::new()).collect(),
            finished: PeerSet::empty(),
            done: false,
            barrier: None,
        }
    }

    #[inline]
    pub fn all_finished(&self) -> bool {
        self.finished.len() == self.queues.len()
    }

    #[inline]
    pub fn drained(&self) -> bool {
        self.queues.iter().all(|q| q.is_empty())
    }

    /// Every source has data queued or finished;
    pub fn round_ready(&self) -> bool {
        self.queues
            .iter()
            .enumerate()
            .all(|(i, q)| !q.is_empty() || self.finished.contains(i as TaskId))
    }

    /// Take the barriers at the head of every queue, they belong to the current window;
    fn absorb_barriers(&mut self) {
        for q in self.queues.iter_mut() {
            while let Some(Slot::Barrier(_)) = q.front() {
                if let Some(Slot::Barrier(b)) = q.pop_front() {
                    self.barrier = Some(b);
                }
            }
        }
    }

    /// Every source has something queued, and at least one of them data of the
    /// current window;
    pub fn window_round_ready(&self) -> bool {
        self.queues.iter().all(|q| !q.is_empty())
            && self
                .queues
                .iter()
                .any(|q| matches!(q.front(), Some(Slot::Data(_))))
    }

    /// Every source reached the end of the current window;
    pub fn window_closed(&self) -> bool {
        self.queues
            .iter()
            .all(|q| matches!(q.front(), Some(Slot::Sync)))
    }

    /// Consume the end markers of the window, returns the barrier to sync with;
    /// barriers queued behind the markers go to the next window;
    pub fn close_window(&mut self) -> Vec<u8> {
        for q in self.queues.iter_mut() {
            q.pop_front();
        }
        let barrier = self.barrier.take().unwrap_or_default();
        self.absorb_barriers();
        barrier
    }

    /// Next payload of the source at `pos` in the current window;
    pub fn pop(&mut self, pos: usize) -> Option<Payload<T>> {
        let q = &mut self.queues[pos];
        let payload = match q.front() {
            Some(Slot::Data(_)) => match q.pop_front() {
                Some(Slot::Data(p)) => p,
                _ => return None,
            },
            _ => return None,
        };
        while let Some(Slot::Barrier(_)) = q.front() {
            if let Some(Slot::Barrier(b)) = q.pop_front() {
                self.barrier = Some(b);
            }
        }
        Some(payload)
    }

    /// One payload of every source that has one in the current window, in source order;
    pub fn pop_round(&mut self) -> Vec<Payload<T>> {
        (0..self.queues.len())
            .filter_map(|pos| self.pop(pos))
            .collect()
    }

    pub fn sync_barrier(&mut self) -> Vec<u8> {
        self.barrier.take().unwrap_or_default()
    }

    fn clean(&mut self) {
        for q in self.queues.iter_mut() {
            q.clear();
        }
        self.finished.clear();
        self.done = false;
        self.barrier = None;
    }
}

/// Arena of per-target states indexed by the position of the target in the local
/// target list.
pub(crate) struct Targets<T> {
    source_pos: IntMap<TaskId, usize>,
    target_pos: IntMap<TaskId, usize>,
    states: Vec<TargetState<T>>,
    capacity: usize,
    streaming: bool,
}

impl<T> Targets<T> {
    pub fn new(sources: &[TaskId], targets: &[TaskId], capacity: usize, streaming: bool) -> Self {
        let source_pos = sources
            .iter()
            .enumerate()
            .map(|(i, s)| (*s, i))
            .collect();
        let target_pos = targets
            .iter()
            .enumerate()
            .map(|(i, t)| (*t, i))
            .collect();
        let states = targets
            .iter()
            .map(|t| TargetState::new(*t, sources.len()))
            .collect();
        Targets { source_pos, target_pos, states, capacity, streaming }
    }

    /// Queue a transfer of `source` for `target`; data is given back when the queue is
    /// full, signals and barriers are always accepted;
    pub fn offer(
        &mut self, source: TaskId, target: TaskId, flags: MessageFlags, msg: Incoming<T>,
    ) -> Result<(), Incoming<T>> {
        let (pos, tp) = match (self.source_pos.get(&source), self.target_pos.get(&target)) {
            (Some(pos), Some(tp)) => (*pos, *tp),
            _ => {
                warn!("drop transfer of unknown source {} or target {};", source, target);
                return Ok(());
            }
        };
        let state = &mut self.states[tp];
        if !self.streaming && state.finished.contains(pos as TaskId) {
            warn!("drop transfer {:?} of finished source {} for target {};", flags, source, target);
            return Ok(());
        }
        match msg {
            Incoming::Barrier(barrier) => {
                // a streaming barrier waits behind the end of the window before it;
                if self.streaming && !state.queues[pos].is_empty() {
                    state.queues[pos].push_back(Slot::Barrier(barrier));
                } else {
                    state.barrier = Some(barrier);
                }
                return Ok(());
            }
            Incoming::Empty => (),
            Incoming::Data(payload) => {
                if state.queues[pos].len() >= self.capacity {
                    return Err(Incoming::Data(payload));
                }
                state.queues[pos].push_back(Slot::Data(payload));
            }
        }
        if flags.intersects(MessageFlags::SYNC_MESSAGE | MessageFlags::SYNC_EMPTY) {
            trace!("source {} finished for target {};", source, target);
            if self.streaming {
                state.queues[pos].push_back(Slot::Sync);
            } else {
                state.finished.add(pos as TaskId);
            }
        }
        Ok(())
    }

    pub fn states_mut(&mut self) -> std::slice::IterMut<'_, TargetState<T>> {
        self.states.iter_mut()
    }

    pub fn get(&self, index: usize) -> &TargetState<T> {
        &self.states[index]
    }

    pub fn get_mut(&mut self, index: usize) -> &mut TargetState<T> {
        &mut self.states[index]
    }

    pub fn len(&self) -> usize {
        self.states.len()
    }

    pub fn all_done(&self) -> bool {
        self.states.iter().all(|s| s.done)
    }

    pub fn all_drained(&self) -> bool {
        self.states.iter().all(|s| s.drained())
    }

    pub fn clean(&mut self) {
        for s in self.states.iter_mut() {
            s.clean();
        }
    }
}

#[cfg(test)]
mod test {
    use super::*;

    fn data(v: u32) -> Incoming<u32> {
        Incoming::Data(Payload::Single(v))
    }

    #[test]
    fn batch_finish_and_rounds() {
        let mut targets = Targets::<u32>::new(&[0, 1, 2], &[5], 2, false);
        targets.offer(0, 5, MessageFlags::empty(), data(1)).unwrap();
        targets.offer(1, 5, MessageFlags::SYNC_MESSAGE, data(2)).unwrap();
        let state = targets.get_mut(0);
        assert!(!state.round_ready());
        targets
            .offer(2, 5, MessageFlags::END | MessageFlags::SYNC_EMPTY, Incoming::Empty)
            .unwrap();
        let state = targets.get_mut(0);
        assert!(state.round_ready());
        assert!(!state.all_finished());
        assert_eq!(state.pop_round().len(), 2);
        assert!(state.drained());
    }

    #[test]
    fn full_queue_gives_data_back() {
        let mut targets = Targets::<u32>::new(&[0], &[1], 2, false);
        targets.offer(0, 1, MessageFlags::empty(), data(1)).unwrap();
        targets.offer(0, 1, MessageFlags::empty(), data(2)).unwrap();
        assert_eq!(targets.offer(0, 1, MessageFlags::empty(), data(3)), Err(data(3)));
        // signals are never rejected;
        targets
            .offer(0, 1, MessageFlags::SYNC_EMPTY, Incoming::Empty)
            .unwrap();
        assert!(targets.get_mut(0).all_finished());
    }

    #[test]
    fn streaming_windows() {
        let mut targets = Targets::<u32>::new(&[0, 1], &[2], 8, true);
        targets.offer(0, 2, MessageFlags::SYNC_MESSAGE, data(1)).unwrap();
        // the next window of source 0 starts before source 1 closes the first one;
        targets.offer(0, 2, MessageFlags::empty(), data(10)).unwrap();
        targets.offer(1, 2, MessageFlags::empty(), data(2)).unwrap();
        let state = targets.get_mut(0);
        assert!(state.window_round_ready());
        let round = state.pop_round();
        assert_eq!(round, vec![Payload::Single(1), Payload::Single(2)]);
        assert!(!state.window_closed());
        targets
            .offer(1, 2, MessageFlags::SYNC_EMPTY, Incoming::Empty)
            .unwrap();
        let state = targets.get_mut(0);
        assert!(state.window_closed());
        state.close_window();
        assert_eq!(state.pop(0), Some(Payload::Single(10)));
        assert!(state.drained());
    }
}
