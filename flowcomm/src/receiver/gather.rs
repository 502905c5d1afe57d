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


use super::state::Targets;
use super::FinalReceiver;
use crate::api::{BulkReceiver, Comparator, RecordIter};
use crate::config::CommConfig;
use crate::errors::IOResult;
use crate::message::{Incoming, MessageFlags};
use crate::shuffle::SpillMerger;
use crate::{Data, TaskId};

/// Per-target queues feeding one spill merger per target; shared by the batch
/// gather, partition and join receivers.
pub(crate) struct Collector<T> {
    targets: Targets<T>,
    mergers: Vec<SpillMerger<T>>,
}

impl<T: Data> Collector<T> {
    pub fn new(
        name: &str, conf: &CommConfig, sources: &[TaskId], targets: &[TaskId], cmp: Option<Comparator<T>>,
    ) -> Self {
        let mergers = targets
            .iter()
            .map(|t| SpillMerger::new(name, *t, conf, cmp.clone()))
            .collect();
        Collector { targets: Targets::new(sources, targets, conf.send_pending_max(), false), mergers }
    }

    #[inline]
    pub fn offer(
        &mut self, source: TaskId, target: TaskId, flags: MessageFlags, msg: Incoming<T>,
    ) -> Result<(), Incoming<T>> {
        self.targets.offer(source, target, flags, msg)
    }

    /// Move queued records into the mergers. With `round_robin` a round takes one
    /// payload of every source and only starts when every source has data queued or
    /// finished, otherwise every queue is drained;
    pub fn collect(&mut self, round_robin: bool) -> IOResult<()> {
        for (i, state) in self.targets.states_mut().enumerate() {
            if state.done {
                continue;
            }
            let merger = &mut self.mergers[i];
            if round_robin {
                while state.round_ready() {
                    let round = state.pop_round();
                    if round.is_empty() {
                        break;
                    }
                    for payload in round {
                        for record in payload {
                            merger.add(&record)?;
                        }
                    }
                }
            } else {
                for pos in 0..state.queues.len() {
                    while let Some(payload) = state.pop(pos) {
                        for record in payload {
                            merger.add(&record)?;
                        }
                    }
                }
            }
        }
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.targets.len()
    }

    pub fn target(&self, index: usize) -> TaskId {
        self.targets.get(index).target
    }

    /// Every source of the target finished and everything it sent is in the merger;
    pub fn is_ready(&self, index: usize) -> bool {
        let state = self.targets.get(index);
        !state.done && state.all_finished() && state.drained()
    }

    /// Seal a ready target, the records stay readable until the collector is cleaned;
    pub fn seal(&mut self, index: usize) -> IOResult<RecordIter<T>> {
        self.targets.get_mut(index).done = true;
        let merger = &mut self.mergers[index];
        merger.switch_to_reading()?;
        debug!("target {} sealed with {} records;", self.targets.get(index).target, merger.len());
        merger.read_iterator()
    }

    pub fn take_barrier(&mut self, index: usize) -> Vec<u8> {
        self.targets.get_mut(index).sync_barrier()
    }

    pub fn is_complete(&self) -> bool {
        self.targets.all_done()
    }

    pub fn clean(&mut self) {
        self.targets.clean();
        for m in self.mergers.iter_mut() {
            m.clean();
        }
    }
}

/// Deliver every sealed target of `collector` to `receiver`;
fn deliver_ready<T: Data>(collector: &mut Collector<T>, receiver: &mut dyn BulkReceiver<T>) -> IOResult<()> {
    for i in 0..collector.len() {
        if collector.is_ready(i) {
            let records = collector.seal(i)?;
            let target = collector.target(i);
            receiver.receive(target, records);
            let barrier = collector.take_barrier(i);
            receiver.sync(target, &barrier);
        }
    }
    Ok(())
}

/// Batch gather: entries are taken round-robin, one payload of every source per
/// round, into the spill merger of the target; once every source finished, the
/// merged records are handed over as one lazy iterator, sorted if a comparator was
/// given.
pub struct GatherBatchFinalReceiver<T> {
    collector: Collector<T>,
    receiver: Box<dyn BulkReceiver<T>>,
}

impl<T: Data> GatherBatchFinalReceiver<T> {
    pub fn new(
        name: &str, conf: &CommConfig, sources: &[TaskId], targets: &[TaskId], cmp: Option<Comparator<T>>,
        mut receiver: Box<dyn BulkReceiver<T>>,
    ) -> Self {
        receiver.init(conf, targets);
        GatherBatchFinalReceiver { collector: Collector::new(name, conf, sources, targets, cmp), receiver }
    }
}

impl<T: Data> FinalReceiver<T> for GatherBatchFinalReceiver<T> {
    fn on_message(
        &mut self, source: TaskId, target: TaskId, flags: MessageFlags, msg: Incoming<T>,
    ) -> Result<(), Incoming<T>> {
        self.collector.offer(source, target, flags, msg)
    }

    fn progress(&mut self) -> IOResult<()> {
        self.collector.collect(true)?;
        deliver_ready(&mut self.collector, self.receiver.as_mut())
    }

    fn is_complete(&self) -> bool {
        self.collector.is_complete()
    }

    fn clean(&mut self) {
        self.collector.clean();
    }
}

/// Streaming gather: every round delivers the head payload of each source, in
/// source order; `sync` once all sources closed the window.
pub struct GatherStreamingFinalReceiver<T> {
    targets: Targets<T>,
    receiver: Box<dyn BulkReceiver<T>>,
}

impl<T: Data> GatherStreamingFinalReceiver<T> {
    pub fn new(
        conf: &CommConfig, sources: &[TaskId], targets: &[TaskId], mut receiver: Box<dyn BulkReceiver<T>>,
    ) -> Self {
        receiver.init(conf, targets);
        GatherStreamingFinalReceiver {
            targets: Targets::new(sources, targets, conf.send_pending_max(), true),
            receiver,
        }
    }
}

impl<T: Data> FinalReceiver<T> for GatherStreamingFinalReceiver<T> {
    fn on_message(
        &mut self, source: TaskId, target: TaskId, flags: MessageFlags, msg: Incoming<T>,
    ) -> Result<(), Incoming<T>> {
        self.targets.offer(source, target, flags, msg)
    }

    fn progress(&mut self) -> IOResult<()> {
        for state in self.targets.states_mut() {
            loop {
                if state.window_closed() {
                    let barrier = state.close_window();
                    self.receiver.sync(state.target, &barrier);
                } else if state.window_round_ready() {
                    let records = state
                        .pop_round()
                        .into_iter()
                        .flatten()
                        .collect::<Vec<_>>();
                    self.receiver
                        .receive(state.target, Box::new(records.into_iter().map(Ok)));
                } else {
                    break;
                }
            }
        }
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.targets.all_drained()
    }

    fn clean(&mut self) {
        self.targets.clean();
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::api::natural_order;
    use crate::message::Payload;
    use crate::receiver::reduce::test::Sink;

    fn data(values: Vec<u32>) -> Incoming<u32> {
        Incoming::Data(Payload::from(values))
    }

    #[test]
    fn gather_batch_sorted_with_spill() {
        let dir = tempfile::tempdir().unwrap();
        let conf = CommConfig::default()
            .with_shuffle_dirs(vec![dir.path().to_path_buf()])
            .with_shuffle_max_records_in_memory(4);
        let sink = Sink::<Vec<u32>>::default();
        let mut fin =
            GatherBatchFinalReceiver::new("gather-0", &conf, &[0, 1], &[2], Some(natural_order()), Box::new(sink.clone()));
        fin.on_message(0, 2, MessageFlags::empty(), data(vec![9, 3, 5]))
            .unwrap();
        fin.progress().unwrap();
        // source 1 has sent nothing, no round yet;
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
        fin.on_message(1, 2, MessageFlags::empty(), data(vec![8, 1]))
            .unwrap();
        fin.on_message(0, 2, MessageFlags::FINAL, data(vec![4, 7]))
            .unwrap();
        fin.on_message(1, 2, MessageFlags::FINAL, data(vec![2, 6, 0]))
            .unwrap();
        fin.progress().unwrap();
        assert!(fin.is_complete());
        assert_eq!(*sink.received.lock().unwrap(), vec![(2, (0..10).collect::<Vec<_>>())]);
        assert_eq!(sink.synced.lock().unwrap().len(), 1);
        fin.close();
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 0);
    }

    #[test]
    fn gather_batch_without_comparator_keeps_every_record() {
        let sink = Sink::<Vec<u32>>::default();
        let conf = CommConfig::default();
        let mut fin = GatherBatchFinalReceiver::new("gather-1", &conf, &[0, 1], &[2], None, Box::new(sink.clone()));
        fin.on_message(1, 2, MessageFlags::FINAL, data(vec![3, 4]))
            .unwrap();
        fin.on_message(0, 2, MessageFlags::FINAL, data(vec![1, 2]))
            .unwrap();
        fin.progress().unwrap();
        let received = sink.received.lock().unwrap();
        let mut records = received[0].1.clone();
        records.sort_unstable();
        assert_eq!(records, vec![1, 2, 3, 4]);
    }

    #[test]
    fn gather_streaming_rounds() {
        let sink = Sink::<Vec<u32>>::default();
        let conf = CommConfig::default().with_streaming(true);
        let mut fin = GatherStreamingFinalReceiver::new(&conf, &[0, 1], &[2], Box::new(sink.clone()));
        fin.on_message(0, 2, MessageFlags::FINAL, data(vec![1]))
            .unwrap();
        fin.on_message(1, 2, MessageFlags::FINAL, data(vec![2, 3]))
            .unwrap();
        fin.progress().unwrap();
        assert_eq!(*sink.received.lock().unwrap(), vec![(2, vec![1, 2, 3])]);
        assert_eq!(*sink.synced.lock().unwrap(), vec![(2, vec![])]);
        assert!(fin.is_complete());
    }
}
