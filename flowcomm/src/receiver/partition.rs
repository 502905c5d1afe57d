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


use super::gather::Collector;
use super::state::Targets;
use super::FinalReceiver;
use crate::api::{BulkReceiver, Comparator};
use crate::config::CommConfig;
use crate::errors::IOResult;
use crate::message::{Incoming, MessageFlags};
use crate::{Data, TaskId};

/// Batch partition: everything queued goes to the spill merger of the target on each
/// progress; the partition is delivered once every source finished.
pub struct PartitionBatchFinalReceiver<T> {
    collector: Collector<T>,
    receiver: Box<dyn BulkReceiver<T>>,
}

impl<T: Data> PartitionBatchFinalReceiver<T> {
    pub fn new(
        name: &str, conf: &CommConfig, sources: &[TaskId], targets: &[TaskId], cmp: Option<Comparator<T>>,
        mut receiver: Box<dyn BulkReceiver<T>>,
    ) -> Self {
        receiver.init(conf, targets);
        PartitionBatchFinalReceiver { collector: Collector::new(name, conf, sources, targets, cmp), receiver }
    }
}

impl<T: Data> FinalReceiver<T> for PartitionBatchFinalReceiver<T> {
    fn on_message(
        &mut self, source: TaskId, target: TaskId, flags: MessageFlags, msg: Incoming<T>,
    ) -> Result<(), Incoming<T>> {
        self.collector.offer(source, target, flags, msg)
    }

    fn progress(&mut self) -> IOResult<()> {
        self.collector.collect(false)?;
        for i in 0..self.collector.len() {
            if self.collector.is_ready(i) {
                let records = self.collector.seal(i)?;
                let target = self.collector.target(i);
                self.receiver.receive(target, records);
                let barrier = self.collector.take_barrier(i);
                self.receiver.sync(target, &barrier);
            }
        }
        Ok(())
    }

    fn is_complete(&self) -> bool {
        self.collector.is_complete()
    }

    fn clean(&mut self) {
        self.collector.clean();
    }
}

/// Streaming partition: payloads are delivered as they arrive, `sync` once every
/// source closed the window.
pub struct PartitionStreamingFinalReceiver<T> {
    targets: Targets<T>,
    receiver: Box<dyn BulkReceiver<T>>,
}

impl<T: Data> PartitionStreamingFinalReceiver<T> {
    pub fn new(
        conf: &CommConfig, sources: &[TaskId], targets: &[TaskId], mut receiver: Box<dyn BulkReceiver<T>>,
    ) -> Self {
        receiver.init(conf, targets);
        PartitionStreamingFinalReceiver {
            targets: Targets::new(sources, targets, conf.send_pending_max(), true),
            receiver,
        }
    }
}

impl<T: Data> FinalReceiver<T> for PartitionStreamingFinalReceiver<T> {
    fn on_message(
        &mut self, source: TaskId, target: TaskId, flags: MessageFlags, msg: Incoming<T>,
    ) -> Result<(), Incoming<T>> {
        self.targets.offer(source, target, flags, msg)
    }

    fn progress(&mut self) -> IOResult<()> {
        for state in self.targets.states_mut() {
            loop {
                for pos in 0..state.queues.len() {
                    while let Some(payload) = state.pop(pos) {
                        let records = payload.into_vec();
                        self.receiver
                            .receive(state.target, Box::new(records.into_iter().map(Ok)));
                    }
                }
                if state.window_closed() {
                    let barrier = state.close_window();
                    self.receiver.sync(state.target, &barrier);
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
    use crate::message::Payload;
    use crate::receiver::reduce::test::Sink;

    fn data(values: Vec<u32>) -> Incoming<u32> {
        Incoming::Data(Payload::from(values))
    }

    #[test]
    fn partition_batch_drains_every_queue() {
        let sink = Sink::<Vec<u32>>::default();
        let conf = CommConfig::default().with_send_pending_max(1);
        let mut fin = PartitionBatchFinalReceiver::new("partition-0", &conf, &[0, 1], &[2, 3], None, Box::new(sink.clone()));
        fin.on_message(0, 2, MessageFlags::empty(), data(vec![1]))
            .unwrap();
        // one payload per queue;
        assert!(fin.on_message(0, 2, MessageFlags::empty(), data(vec![2])).is_err());
        fin.progress().unwrap();
        fin.on_message(0, 2, MessageFlags::FINAL, data(vec![2]))
            .unwrap();
        for (s, t) in [(1, 2), (0, 3), (1, 3)] {
            fin.on_message(s, t, MessageFlags::FINAL_EMPTY, Incoming::Empty)
                .unwrap();
        }
        fin.progress().unwrap();
        assert!(fin.is_complete());
        assert_eq!(*sink.received.lock().unwrap(), vec![(2, vec![1, 2]), (3, vec![])]);
    }

    #[test]
    fn partition_streaming_delivers_at_once() {
        let sink = Sink::<Vec<u32>>::default();
        let conf = CommConfig::default().with_streaming(true);
        let mut fin = PartitionStreamingFinalReceiver::new(&conf, &[0, 1], &[2], Box::new(sink.clone()));
        fin.on_message(1, 2, MessageFlags::empty(), data(vec![5, 6]))
            .unwrap();
        fin.progress().unwrap();
        assert_eq!(*sink.received.lock().unwrap(), vec![(2, vec![5, 6])]);
        fin.on_message(0, 2, MessageFlags::FINAL_EMPTY, Incoming::Empty)
            .unwrap();
        fin.on_message(1, 2, MessageFlags::FINAL, data(vec![7]))
            .unwrap();
        // the next window of source 0 waits behind its end marker;
        fin.on_message(0, 2, MessageFlags::empty(), data(vec![8]))
            .unwrap();
        fin.progress().unwrap();
        assert_eq!(*sink.received.lock().unwrap(), vec![(2, vec![5, 6]), (2, vec![7]), (2, vec![8])]);
        assert_eq!(sink.synced.lock().unwrap().len(), 1);
    }
}
