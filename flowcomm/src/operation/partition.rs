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


use super::{check, delegate_operation, Collective};
use crate::api::{by_key, BulkReceiver, Comparator};
use crate::channel::Channel;
use crate::config::CommConfig;
use crate::errors::BuildOpError;
use crate::message::MessageFlags;
use crate::plan::LogicalPlan;
use crate::receiver::{GatherPartialReceiver, PartitionBatchFinalReceiver, PartitionStreamingFinalReceiver};
use crate::selector::DestinationSelector;
use crate::{Data, TaskId};

/// Batch partition, the caller picks the target of every record.
pub struct BPartition<T> {
    inner: Collective<T, GatherPartialReceiver<T>, PartitionBatchFinalReceiver<T>>,
}

impl<T: Data> BPartition<T> {
    pub fn new<R>(
        conf: &CommConfig, plan: LogicalPlan, channel: Box<dyn Channel>, cmp: Option<Comparator<T>>, receiver: R,
    ) -> Result<Self, BuildOpError>
    where
        R: BulkReceiver<T> + 'static,
    {
        let conf = conf.with_streaming(false);
        check(&conf, &plan)?;
        let partial = GatherPartialReceiver::new(&conf, &plan.local_sources(), plan.targets());
        let fin = PartitionBatchFinalReceiver::new(
            &format!("partition-{}", plan.edge()),
            &conf,
            plan.sources(),
            &plan.local_targets(),
            cmp,
            Box::new(receiver),
        );
        let inner = Collective::new(&conf, plan, channel, partial, fin)?;
        Ok(BPartition { inner })
    }

    pub fn partition(&mut self, source: TaskId, msg: T, flags: MessageFlags, target: TaskId) -> Result<(), T> {
        self.inner.send(source, target, flags, msg)
    }
}

delegate_operation!(BPartition<T> where T: Data);

/// Streaming partition, records reach the application as soon as they arrive.
pub struct SPartition<T> {
    inner: Collective<T, GatherPartialReceiver<T>, PartitionStreamingFinalReceiver<T>>,
}

impl<T: Data> SPartition<T> {
    pub fn new<R>(conf: &CommConfig, plan: LogicalPlan, channel: Box<dyn Channel>, receiver: R) -> Result<Self, BuildOpError>
    where
        R: BulkReceiver<T> + 'static,
    {
        let conf = conf.with_streaming(true);
        check(&conf, &plan)?;
        let partial = GatherPartialReceiver::new(&conf, &plan.local_sources(), plan.targets());
        let fin = PartitionStreamingFinalReceiver::new(&conf, plan.sources(), &plan.local_targets(), Box::new(receiver));
        let inner = Collective::new(&conf, plan, channel, partial, fin)?;
        Ok(SPartition { inner })
    }

    pub fn partition(&mut self, source: TaskId, msg: T, flags: MessageFlags, target: TaskId) -> Result<(), T> {
        self.inner.send(source, target, flags, msg)
    }
}

delegate_operation!(SPartition<T> where T: Data);

/// Batch partition of `(key, value)` records routed by a [`DestinationSelector`]; the
/// partitions are sorted by key when a key comparator is given.
pub struct BKeyedPartition<K, V> {
    inner: Collective<(K, V), GatherPartialReceiver<(K, V)>, PartitionBatchFinalReceiver<(K, V)>>,
    selector: Box<dyn DestinationSelector<K>>,
}

impl<K: Data, V: Data> BKeyedPartition<K, V> {
    pub fn new<R>(
        conf: &CommConfig, plan: LogicalPlan, channel: Box<dyn Channel>, mut selector: Box<dyn DestinationSelector<K>>,
        key_cmp: Option<Comparator<K>>, receiver: R,
    ) -> Result<Self, BuildOpError>
    where
        R: BulkReceiver<(K, V)> + 'static,
    {
        let conf = conf.with_streaming(false);
        check(&conf, &plan)?;
        selector.prepare(plan.sources(), plan.targets());
        let partial = GatherPartialReceiver::new(&conf, &plan.local_sources(), plan.targets());
        let fin = PartitionBatchFinalReceiver::new(
            &format!("keyed-partition-{}", plan.edge()),
            &conf,
            plan.sources(),
            &plan.local_targets(),
            key_cmp.map(by_key),
            Box::new(receiver),
        );
        let inner = Collective::new(&conf, plan, channel, partial, fin)?;
        Ok(BKeyedPartition { inner, selector })
    }

    pub fn partition(&mut self, source: TaskId, key: K, value: V, flags: MessageFlags) -> Result<(), (K, V)> {
        let target = self.selector.next(source, &key);
        self.inner.send(source, target, flags, (key, value))
    }
}

delegate_operation!(BKeyedPartition<K, V> where K: Data, V: Data);
