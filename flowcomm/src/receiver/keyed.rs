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


use std::hash::Hash;
use std::sync::Arc;

use ahash::AHashMap;

use super::partial::{Lane, Lanes, Pending, Staged};
use super::state::Targets;
use super::{FinalReceiver, Forward, PartialReceiver};
use crate::api::{BulkReceiver, Comparator, ReduceFunction};
use crate::config::CommConfig;
use crate::errors::IOResult;
use crate::message::{Incoming, MessageFlags};
use crate::{Data, TaskId};

fn fold_into<K: Hash + Eq, V>(map: &mut AHashMap<K, V>, key: K, value: V, func: &dyn ReduceFunction<V>) {
    let folded = match map.remove(&key) {
        Some(acc) => func.reduce(acc, value),
        None => value,
    };
    map.insert(key, folded);
}

/// Folds the values of every lane by key, the folded pairs are sent when the number
/// of keys reaches the configured limit, ahead of a barrier, and when the source
/// finishes.
pub struct KeyedReducePartialReceiver<K, V> {
    lanes: Lanes<(K, V), AHashMap<K, V>>,
    func: Arc<dyn ReduceFunction<V>>,
    key_limit: usize,
}

impl<K: Data + Hash + Eq, V: Data> KeyedReducePartialReceiver<K, V> {
    pub fn new(
        conf: &CommConfig, sources: &[TaskId], targets: &[TaskId], func: Arc<dyn ReduceFunction<V>>,
    ) -> Self {
        let lanes = Lanes::new(sources, targets, conf.send_pending_max(), conf.is_streaming());
        KeyedReducePartialReceiver { lanes, func, key_limit: std::cmp::max(conf.partial_key_limit(), 1) }
    }

    fn progress_lane(
        lane: &mut Lane<(K, V), AHashMap<K, V>>, func: &dyn ReduceFunction<V>, key_limit: usize,
        out: &mut dyn Forward<(K, V)>,
    ) -> IOResult<()> {
        loop {
            if !lane.send_staged(out)? {
                return Ok(());
            }
            match lane.queue.pop_front() {
                Some(Pending::Record((k, v))) => {
                    fold_into(&mut lane.state, k, v, func);
                    if lane.state.len() >= key_limit {
                        let pairs = lane.state.drain().collect();
                        lane.staged = Some(Staged::Records(MessageFlags::empty(), pairs));
                    }
                }
                Some(Pending::Barrier(barrier)) => {
                    if lane.state.is_empty() {
                        lane.staged = Some(Staged::Barrier(barrier));
                    } else {
                        let pairs = lane.state.drain().collect();
                        lane.staged = Some(Staged::Records(MessageFlags::empty(), pairs));
                        lane.queue.push_front(Pending::Barrier(barrier));
                    }
                }
                None => {
                    if lane.needs_sync() {
                        let pairs = lane.state.drain().collect();
                        lane.stage_final(pairs);
                    } else {
                        return Ok(());
                    }
                }
            }
        }
    }
}

impl<K: Data + Hash + Eq, V: Data> PartialReceiver<(K, V)> for KeyedReducePartialReceiver<K, V> {
    fn on_message(
        &mut self, source: TaskId, target: TaskId, flags: MessageFlags, msg: (K, V),
    ) -> Result<(), (K, V)> {
        self.lanes.offer(source, target, flags, msg)
    }

    fn on_barrier(&mut self, source: TaskId, barrier: Vec<u8>) -> Result<(), Vec<u8>> {
        self.lanes.offer_barrier(source, barrier)
    }

    fn on_finish(&mut self, source: TaskId) {
        self.lanes.finish(source)
    }

    fn progress(&mut self, out: &mut dyn Forward<(K, V)>) -> IOResult<bool> {
        let func = self.func.as_ref();
        let key_limit = self.key_limit;
        for lane in self.lanes.iter_mut() {
            Self::progress_lane(lane, func, key_limit, out)?;
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

/// Folds the pairs arriving for a target by key; once every source finished the
/// pairs are delivered, sorted by key when a comparator was given.
pub struct KeyedReduceBatchFinalReceiver<K, V> {
    targets: Targets<(K, V)>,
    values: Vec<AHashMap<K, V>>,
    func: Arc<dyn ReduceFunction<V>>,
    key_cmp: Option<Comparator<K>>,
    receiver: Box<dyn BulkReceiver<(K, V)>>,
}

impl<K: Data + Hash + Eq, V: Data> KeyedReduceBatchFinalReceiver<K, V> {
    pub fn new(
        conf: &CommConfig, sources: &[TaskId], targets: &[TaskId], func: Arc<dyn ReduceFunction<V>>,
        key_cmp: Option<Comparator<K>>, mut receiver: Box<dyn BulkReceiver<(K, V)>>,
    ) -> Self {
        receiver.init(conf, targets);
        KeyedReduceBatchFinalReceiver {
            targets: Targets::new(sources, targets, conf.send_pending_max(), false),
            values: targets.iter().map(|_| AHashMap::new()).collect(),
            func,
            key_cmp,
            receiver,
        }
    }
}

impl<K: Data + Hash + Eq, V: Data> FinalReceiver<(K, V)> for KeyedReduceBatchFinalReceiver<K, V> {
    fn on_message(
        &mut self, source: TaskId, target: TaskId, flags: MessageFlags, msg: Incoming<(K, V)>,
    ) -> Result<(), Incoming<(K, V)>> {
        self.targets.offer(source, target, flags, msg)
    }

    fn progress(&mut self) -> IOResult<()> {
        let func = self.func.as_ref();
        for (i, state) in self.targets.states_mut().enumerate() {
            if state.done {
                continue;
            }
            let map = &mut self.values[i];
            for pos in 0..state.queues.len() {
                while let Some(payload) = state.pop(pos) {
                    for (k, v) in payload {
                        fold_into(map, k, v, func);
                    }
                }
            }
            if state.all_finished() && state.drained() {
                state.done = true;
                let mut pairs = map.drain().collect::<Vec<_>>();
                if let Some(cmp) = self.key_cmp.as_ref() {
                    pairs.sort_by(|a, b| cmp(&a.0, &b.0));
                }
                debug!("keyed reduce of target {} done with {} keys;", state.target, pairs.len());
                self.receiver
                    .receive(state.target, Box::new(pairs.into_iter().map(Ok)));
                let barrier = state.sync_barrier();
                self.receiver.sync(state.target, &barrier);
            }
        }
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.targets.all_done()
    }

    fn clean(&mut self) {
        self.targets.clean();
        for m in self.values.iter_mut() {
            m.clear();
        }
    }
}
