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
use std::sync::Arc;

use ahash::AHashMap;
use nohash_hasher::IntMap;

use super::{Forward, PartialReceiver};
use crate::api::ReduceFunction;
use crate::config::CommConfig;
use crate::errors::IOResult;
use crate::message::MessageFlags;
use crate::{Data, TaskId};

pub(crate) enum Pending<T> {
    Record(T),
    Barrier(Vec<u8>),
}

/// A transfer taken out of the queue, kept until buffers are available;
pub(crate) enum Staged<T> {
    Records(MessageFlags, Vec<T>),
    Barrier(Vec<u8>),
}

/// What one local source queued for one target.
pub(crate) struct Lane<T, S> {
    pub source: TaskId,
    pub target: TaskId,
    pub queue: VecDeque<Pending<T>>,
    pub staged: Option<Staged<T>>,
    pub finished: bool,
    /// The sync transfer was sent, batch only;
    pub synced: bool,
    /// Streaming: the window was synced and nothing was queued since;
    reopened: bool,
    streaming: bool,
    /// Combine state of the lane;
    pub state: S,
}

impl<T, S> Lane<T, S> {
    /// Try to send the staged transfer, `Ok(false)` if it is still waiting for buffers;
    pub fn send_staged(&mut self, out: &mut dyn Forward<T>) -> IOResult<bool> {
        let sent = match self.staged.as_ref() {
            None => return Ok(true),
            Some(Staged::Records(flags, records)) => out.forward(self.source, self.target, *flags, records)?,
            Some(Staged::Barrier(barrier)) => out.forward_barrier(self.source, self.target, barrier)?,
        };
        if sent {
            if let Some(Staged::Records(flags, _)) = self.staged.take() {
                if flags.intersects(MessageFlags::SYNC_MESSAGE | MessageFlags::SYNC_EMPTY) {
                    self.mark_synced();
                }
            }
        }
        Ok(sent)
    }

    /// Stage the final transfer of the lane: `records` if any, otherwise the empty sync;
    pub fn stage_final(&mut self, records: Vec<T>) {
        if records.is_empty() {
            self.staged = Some(Staged::Records(MessageFlags::FINAL_EMPTY, records));
        } else {
            self.staged = Some(Staged::Records(MessageFlags::FINAL, records));
        }
    }

    fn mark_synced(&mut self) {
        trace!("lane {} -> {} synced;", self.source, self.target);
        if self.streaming {
            // the next window starts;
            self.finished = false;
            self.synced = false;
            self.reopened = true;
        } else {
            self.synced = true;
        }
    }

    #[inline]
    pub fn needs_sync(&self) -> bool {
        self.finished && !self.synced
    }

    fn is_idle(&self) -> bool {
        self.queue.is_empty() && self.staged.is_none() && !self.needs_sync()
    }
}

/// All lanes of the local sources of an operation, every local source has one lane
/// per target.
pub(crate) struct Lanes<T, S> {
    lanes: Vec<Lane<T, S>>,
    index: AHashMap<(TaskId, TaskId), usize>,
    by_source: IntMap<TaskId, Vec<usize>>,
    capacity: usize,
    streaming: bool,
}

impl<T, S: Default> Lanes<T, S> {
    pub fn new(sources: &[TaskId], targets: &[TaskId], capacity: usize, streaming: bool) -> Self {
        let mut lanes = Vec::with_capacity(sources.len() * targets.len());
        let mut index = AHashMap::new();
        let mut by_source = IntMap::default();
        for s in sources {
            let mut of_source = Vec::with_capacity(targets.len());
            for t in targets {
                index.insert((*s, *t), lanes.len());
                of_source.push(lanes.len());
                lanes.push(Lane {
                    source: *s,
                    target: *t,
                    queue: VecDeque::new(),
                    staged: None,
                    finished: false,
                    synced: false,
                    reopened: false,
                    streaming,
                    state: S::default(),
                });
            }
            by_source.insert(*s, of_source);
        }
        Lanes { lanes, index, by_source, capacity, streaming }
    }

    pub fn offer(&mut self, source: TaskId, target: TaskId, flags: MessageFlags, msg: T) -> Result<(), T> {
        let lane = &mut self.lanes[self.index[&(source, target)]];
        if flags.contains(MessageFlags::SYNC_EMPTY) {
            lane.finished = true;
            lane.reopened = false;
            return Ok(());
        }
        if lane.finished {
            // streaming: the window is closing, records of the next one wait for the sync;
            if !self.streaming {
                warn!("source {} sends to target {} after finish, record rejected;", source, target);
            }
            return Err(msg);
        }
        if lane.queue.len() >= self.capacity {
            return Err(msg);
        }
        lane.queue.push_back(Pending::Record(msg));
        lane.reopened = false;
        if flags.contains(MessageFlags::SYNC_MESSAGE) {
            lane.finished = true;
        }
        Ok(())
    }

    pub fn offer_barrier(&mut self, source: TaskId, barrier: Vec<u8>) -> Result<(), Vec<u8>> {
        let of_source = match self.by_source.get(&source) {
            Some(lanes) => lanes,
            None => panic!("barrier of unknown source {};", source),
        };
        let blocked = of_source.iter().any(|i| {
            let lane = &self.lanes[*i];
            lane.queue.len() >= self.capacity || lane.finished
        });
        if blocked {
            return Err(barrier);
        }
        for i in of_source {
            let lane = &mut self.lanes[*i];
            lane.queue.push_back(Pending::Barrier(barrier.clone()));
            lane.reopened = false;
        }
        Ok(())
    }

    pub fn finish(&mut self, source: TaskId) {
        if let Some(of_source) = self.by_source.get(&source) {
            for i in of_source {
                let lane = &mut self.lanes[*i];
                // a window synced with nothing queued since is already finished;
                if !lane.finished && !lane.synced && !lane.reopened {
                    lane.finished = true;
                }
            }
        } else {
            warn!("finish unknown source {};", source);
        }
    }

    pub fn iter_mut(&mut self) -> std::slice::IterMut<'_, Lane<T, S>> {
        self.lanes.iter_mut()
    }

    pub fn has_pending(&self) -> bool {
        self.lanes.iter().any(|l| !l.is_idle())
    }

    pub fn is_complete(&self) -> bool {
        if self.streaming {
            !self.has_pending()
        } else {
            self.lanes.iter().all(|l| l.synced)
        }
    }

    pub fn clean(&mut self) {
        for lane in self.lanes.iter_mut() {
            lane.queue.clear();
            lane.staged = None;
            lane.finished = false;
            lane.synced = false;
            lane.reopened = false;
            lane.state = S::default();
        }
    }
}

/// Forwards records in batches without combining them; used by gather, partition
/// and join edges, and by streaming reduce with batches of one record.
///
/// A batch is flushed when it is full, when a barrier follows it, when the source
/// finished (tagged `LAST | SYNC_MESSAGE`), or at once in streaming mode. A source
/// that finished with nothing left sends an empty `END | SYNC_EMPTY` transfer.
pub struct GatherPartialReceiver<T> {
    lanes: Lanes<T, ()>,
    batch_size: usize,
}

impl<T: Data> GatherPartialReceiver<T> {
    pub fn new(conf: &CommConfig, sources: &[TaskId], targets: &[TaskId]) -> Self {
        Self::with_batch_size(conf, sources, targets, conf.partial_batch_size())
    }

    pub fn with_batch_size(conf: &CommConfig, sources: &[TaskId], targets: &[TaskId], batch_size: usize) -> Self {
        let capacity = conf.send_pending_max();
        let lanes = Lanes::new(sources, targets, capacity, conf.is_streaming());
        // a batch must fit into a full queue, or a full queue would never be flushed;
        let batch_size = std::cmp::max(std::cmp::min(batch_size, capacity), 1);
        GatherPartialReceiver { lanes, batch_size }
    }

    fn progress_lane(lane: &mut Lane<T, ()>, batch_size: usize, out: &mut dyn Forward<T>) -> IOResult<()> {
        loop {
            if !lane.send_staged(out)? {
                return Ok(());
            }
            match lane.queue.front() {
                Some(Pending::Barrier(_)) => {
                    if let Some(Pending::Barrier(barrier)) = lane.queue.pop_front() {
                        lane.staged = Some(Staged::Barrier(barrier));
                    }
                }
                Some(Pending::Record(_)) => {
                    let n = lane
                        .queue
                        .iter()
                        .take(batch_size)
                        .take_while(|p| matches!(p, Pending::Record(_)))
                        .count();
                    let barrier_next = n < batch_size && n < lane.queue.len();
                    let last = lane.finished && n == lane.queue.len();
                    if n < batch_size && !lane.streaming && !barrier_next && !last {
                        return Ok(());
                    }
                    let mut records = Vec::with_capacity(n);
                    for p in lane.queue.drain(..n) {
                        if let Pending::Record(r) = p {
                            records.push(r);
                        }
                    }
                    if last {
                        lane.stage_final(records);
                    } else {
                        lane.staged = Some(Staged::Records(MessageFlags::empty(), records));
                    }
                }
                None => {
                    if lane.needs_sync() {
                        lane.stage_final(vec![]);
                    } else {
                        return Ok(());
                    }
                }
            }
        }
    }
}

impl<T: Data> PartialReceiver<T> for GatherPartialReceiver<T> {
    fn on_message(&mut self, source: TaskId, target: TaskId, flags: MessageFlags, msg: T) -> Result<(), T> {
        self.lanes.offer(source, target, flags, msg)
    }

    fn on_barrier(&mut self, source: TaskId, barrier: Vec<u8>) -> Result<(), Vec<u8>> {
        self.lanes.offer_barrier(source, barrier)
    }

    fn on_finish(&mut self, source: TaskId) {
        self.lanes.finish(source)
    }

    fn progress(&mut self, out: &mut dyn Forward<T>) -> IOResult<bool> {
        let batch_size = self.batch_size;
        for lane in self.lanes.iter_mut() {
            Self::progress_lane(lane, batch_size, out)?;
        }
        Ok(self.lanes.has_pending())
    }

    fn is_complete(&self) -> bool {
        self.lanes.is_complete()
    }

    fn clean(&mut self) {
        self.lanes.clean()
    }
}

/// Folds the records of every lane into one partial value, sent when the source
/// finishes. Barriers flush the value folded so far ahead of them.
pub struct ReducePartialReceiver<T> {
    lanes: Lanes<T, Option<T>>,
    func: Arc<dyn ReduceFunction<T>>,
}

impl<T: Data> ReducePartialReceiver<T> {
    pub fn new(
        conf: &CommConfig, sources: &[TaskId], targets: &[TaskId], func: Arc<dyn ReduceFunction<T>>,
    ) -> Self {
        let lanes = Lanes::new(sources, targets, conf.send_pending_max(), conf.is_streaming());
        ReducePartialReceiver { lanes, func }
    }

    fn progress_lane(
        lane: &mut Lane<T, Option<T>>, func: &dyn ReduceFunction<T>, out: &mut dyn Forward<T>,
    ) -> IOResult<()> {
        loop {
            if !lane.send_staged(out)? {
                return Ok(());
            }
            match lane.queue.pop_front() {
                Some(Pending::Record(r)) => {
                    lane.state = Some(match lane.state.take() {
                        Some(acc) => func.reduce(acc, r),
                        None => r,
                    });
                }
                Some(Pending::Barrier(barrier)) => {
                    if let Some(acc) = lane.state.take() {
                        lane.staged = Some(Staged::Records(MessageFlags::empty(), vec![acc]));
                        lane.queue.push_front(Pending::Barrier(barrier));
                    } else {
                        lane.staged = Some(Staged::Barrier(barrier));
                    }
                }
                None => {
                    if lane.needs_sync() {
                        let records = lane.state.take().into_iter().collect();
                        lane.stage_final(records);
                    } else {
                        return Ok(());
                    }
                }
            }
        }
    }
}

impl<T: Data> PartialReceiver<T> for ReducePartialReceiver<T> {
    fn on_message(&mut self, source: TaskId, target: TaskId, flags: MessageFlags, msg: T) -> Result<(), T> {
        self.lanes.offer(source, target, flags, msg)
    }

    fn on_barrier(&mut self, source: TaskId, barrier: Vec<u8>) -> Result<(), Vec<u8>> {
        self.lanes.offer_barrier(source, barrier)
    }

    fn on_finish(&mut self, source: TaskId) {
        self.lanes.finish(source)
    }

    fn progress(&mut self, out: &mut dyn Forward<T>) -> IOResult<bool> {
        let func = self.func.as_ref();
        for lane in self.lanes.iter_mut() {
            Self::progress_lane(lane, func, out)?;
        }
        Ok(self.lanes.has_pending())
    }

    fn is_complete(&self) -> bool {
        self.lanes.is_complete()
    }

    fn clean(&mut self) {
        self.lanes.clean()
    }
}

#[cfg(test)]
pub(crate) mod test {
    use super::*;

    /// Records every forwarded transfer, refuses them while `blocked`;
    #[derive(Default)]
    pub(crate) struct Collect<T> {
        pub sent: Vec<(TaskId, TaskId, MessageFlags, Vec<T>)>,
        pub barriers: Vec<(TaskId, TaskId, Vec<u8>)>,
        pub blocked: bool,
    }

    impl<T: Clone> Forward<T> for Collect<T> {
        fn forward(&mut self, source: TaskId, target: TaskId, flags: MessageFlags, records: &[T]) -> IOResult<bool> {
            if self.blocked {
                return Ok(false);
            }
            self.sent.push((source, target, flags, records.to_vec()));
            Ok(true)
        }

        fn forward_barrier(&mut self, source: TaskId, target: TaskId, barrier: &[u8]) -> IOResult<bool> {
            if self.blocked {
                return Ok(false);
            }
            self.barriers.push((source, target, barrier.to_vec()));
            Ok(true)
        }
    }

    fn conf() -> CommConfig {
        CommConfig::default()
            .with_partial_batch_size(2)
            .with_send_pending_max(4)
    }

    #[test]
    fn gather_flushes_full_batches_then_the_last_one() {
        let mut partial = GatherPartialReceiver::<u32>::new(&conf(), &[0], &[1]);
        let mut out = Collect::<u32>::default();
        for i in 0..3 {
            partial.on_message(0, 1, MessageFlags::empty(), i).unwrap();
        }
        assert!(partial.progress(&mut out).unwrap());
        assert_eq!(out.sent, vec![(0, 1, MessageFlags::empty(), vec![0, 1])]);
        partial.on_finish(0);
        partial.on_finish(0);
        assert!(!partial.progress(&mut out).unwrap());
        assert_eq!(out.sent[1], (0, 1, MessageFlags::FINAL, vec![2]));
        assert!(partial.is_complete());
        assert!(!partial.progress(&mut out).unwrap());
        assert_eq!(out.sent.len(), 2);
    }

    #[test]
    fn finish_without_data_sends_empty_sync() {
        let mut partial = GatherPartialReceiver::<u32>::new(&conf(), &[0], &[1, 2]);
        let mut out = Collect::<u32>::default();
        partial
            .on_message(0, 2, MessageFlags::SYNC_EMPTY, 0)
            .unwrap();
        partial.on_finish(0);
        partial.progress(&mut out).unwrap();
        assert_eq!(out.sent, vec![(0, 1, MessageFlags::FINAL_EMPTY, vec![]), (0, 2, MessageFlags::FINAL_EMPTY, vec![])]);
        assert!(partial.is_complete());
    }

    #[test]
    fn full_lane_rejects_until_drained() {
        let mut partial = GatherPartialReceiver::<u32>::new(&conf(), &[0], &[1]);
        let mut out = Collect::<u32> { blocked: true, ..Default::default() };
        for i in 0..4 {
            partial.on_message(0, 1, MessageFlags::empty(), i).unwrap();
        }
        assert_eq!(partial.on_message(0, 1, MessageFlags::empty(), 4), Err(4));
        partial.progress(&mut out).unwrap();
        assert!(out.sent.is_empty());
        // the first batch is staged, the lane has room again;
        partial.on_message(0, 1, MessageFlags::empty(), 4).unwrap();
        partial.on_message(0, 1, MessageFlags::empty(), 5).unwrap();
        assert_eq!(partial.on_message(0, 1, MessageFlags::empty(), 6), Err(6));
        out.blocked = false;
        partial.progress(&mut out).unwrap();
        let sent = out
            .sent
            .iter()
            .flat_map(|s| s.3.clone())
            .collect::<Vec<_>>();
        assert_eq!(sent, vec![0, 1, 2, 3, 4, 5]);
    }

    #[test]
    fn barrier_flushes_the_batch_ahead() {
        let mut partial = GatherPartialReceiver::<u32>::new(&conf(), &[0], &[1]);
        let mut out = Collect::<u32>::default();
        partial.on_message(0, 1, MessageFlags::empty(), 7).unwrap();
        partial.on_barrier(0, vec![1, 2]).unwrap();
        partial.progress(&mut out).unwrap();
        assert_eq!(out.sent, vec![(0, 1, MessageFlags::empty(), vec![7])]);
        assert_eq!(out.barriers, vec![(0, 1, vec![1, 2])]);
    }

    #[test]
    fn streaming_lane_reopens_after_sync() {
        let conf = conf().with_streaming(true);
        let mut partial = GatherPartialReceiver::<u32>::new(&conf, &[0], &[1]);
        let mut out = Collect::<u32>::default();
        partial
            .on_message(0, 1, MessageFlags::SYNC_MESSAGE, 1)
            .unwrap();
        assert_eq!(partial.on_message(0, 1, MessageFlags::empty(), 2), Err(2));
        partial.progress(&mut out).unwrap();
        assert_eq!(out.sent, vec![(0, 1, MessageFlags::FINAL, vec![1])]);
        partial.on_message(0, 1, MessageFlags::empty(), 2).unwrap();
        partial.progress(&mut out).unwrap();
        assert_eq!(out.sent[1], (0, 1, MessageFlags::empty(), vec![2]));
        assert!(partial.is_complete());
    }

    #[test]
    fn streaming_finish_twice_closes_one_window() {
        let conf = conf().with_streaming(true);
        let mut partial = GatherPartialReceiver::<u32>::new(&conf, &[0], &[1]);
        let mut out = Collect::<u32>::default();
        partial.on_message(0, 1, MessageFlags::empty(), 1).unwrap();
        partial.on_finish(0);
        for _ in 0..3 {
            partial.progress(&mut out).unwrap();
        }
        partial.on_finish(0);
        partial.progress(&mut out).unwrap();
        assert_eq!(out.sent, vec![(0, 1, MessageFlags::FINAL, vec![1])]);
        assert!(partial.is_complete());
        // new data opens the next window, which can be finished again;
        partial.on_message(0, 1, MessageFlags::empty(), 2).unwrap();
        partial.on_finish(0);
        partial.on_finish(0);
        partial.progress(&mut out).unwrap();
        partial.on_finish(0);
        partial.progress(&mut out).unwrap();
        assert_eq!(out.sent.len(), 2);
        assert_eq!(out.sent[1], (0, 1, MessageFlags::FINAL, vec![2]));
    }

    #[test]
    fn batch_send_after_finish_is_rejected() {
        let mut partial = GatherPartialReceiver::<u32>::new(&conf(), &[0], &[1]);
        let mut out = Collect::<u32>::default();
        partial.on_message(0, 1, MessageFlags::empty(), 1).unwrap();
        partial.on_finish(0);
        assert_eq!(partial.on_message(0, 1, MessageFlags::empty(), 2), Err(2));
        partial.progress(&mut out).unwrap();
        assert_eq!(out.sent, vec![(0, 1, MessageFlags::FINAL, vec![1])]);
        assert_eq!(partial.on_message(0, 1, MessageFlags::empty(), 3), Err(3));
        assert!(partial.is_complete());
    }

    #[test]
    fn reduce_sends_one_value_per_lane() {
        let sum: Arc<dyn ReduceFunction<u64>> = Arc::new(|a: u64, b: u64| a + b);
        let mut partial = ReducePartialReceiver::new(&conf(), &[0, 1], &[9], sum);
        let mut out = Collect::<u64>::default();
        for v in [1u64, 2, 3] {
            partial.on_message(0, 9, MessageFlags::empty(), v).unwrap();
            partial.progress(&mut out).unwrap();
        }
        partial.on_finish(0);
        partial.on_finish(1);
        partial.progress(&mut out).unwrap();
        assert_eq!(out.sent, vec![(0, 9, MessageFlags::FINAL, vec![6]), (1, 9, MessageFlags::FINAL_EMPTY, vec![])]);
        assert!(partial.is_complete());
    }
}
