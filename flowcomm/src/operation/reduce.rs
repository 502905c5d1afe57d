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

use super::{check, delegate_operation, single_target, Collective};
use crate::api::{BulkReceiver, Comparator, ReduceFunction, SingularReceiver};
use crate::channel::Channel;
use crate::config::CommConfig;
use crate::errors::BuildOpError;
use crate::message::MessageFlags;
use crate::plan::LogicalPlan;
use crate::receiver::{
    GatherPartialReceiver, KeyedReduceBatchFinalReceiver, KeyedReducePartialReceiver, ReduceBatchFinalReceiver,
    ReducePartialReceiver, ReduceStreamingFinalReceiver,
};
use crate::selector::DestinationSelector;
use crate::{Data, TaskId};

/// Batch reduce of every source into the single target of the edge.
///
/// Each local source folds its records before sending one partial value; the target
/// folds the partial values in arrival order, so `func` should be associative and
/// commutative.
pub struct BReduce<T> {
    inner: Collective<T, ReducePartialReceiver<T>, ReduceBatchFinalReceiver<T>>,
    target: TaskId,
}

impl<T: Data> BReduce<T> {
    pub fn new<F, R>(
        conf: &CommConfig, plan: LogicalPlan, channel: Box<dyn Channel>, func: F, receiver: R,
    ) -> Result<Self, BuildOpError>
    where
        F: ReduceFunction<T> + 'static,
        R: SingularReceiver<T> + 'static,
    {
        let conf = conf.with_streaming(false);
        check(&conf, &plan)?;
        let target = single_target(&plan, "reduce")?;
        let func: Arc<dyn ReduceFunction<T>> = Arc::new(func);
        let partial = ReducePartialReceiver::new(&conf, &plan.local_sources(), plan.targets(), func.clone());
        let fin =
            ReduceBatchFinalReceiver::new(&conf, plan.sources(), &plan.local_targets(), func, Box::new(receiver));
        let inner = Collective::new(&conf, plan, channel, partial, fin)?;
        Ok(BReduce { inner, target })
    }

    /// Hands `msg` back when the queue of `source` is full;
    pub fn reduce(&mut self, source: TaskId, msg: T, flags: MessageFlags) -> Result<(), T> {
        self.inner.send(source, self.target, flags, msg)
    }
}

delegate_operation!(BReduce<T> where T: Data);

/// Streaming reduce: records are forwarded one by one, the target folds one record
/// of every source per round and delivers each folded value.
pub struct SReduce<T> {
    inner: Collective<T, GatherPartialReceiver<T>, ReduceStreamingFinalReceiver<T>>,
    target: TaskId,
}

impl<T: Data> SReduce<T> {
    pub fn new<F, R>(
        conf: &CommConfig, plan: LogicalPlan, channel: Box<dyn Channel>, func: F, receiver: R,
    ) -> Result<Self, BuildOpError>
    where
        F: ReduceFunction<T> + 'static,
        R: SingularReceiver<T> + 'static,
    {
        let conf = conf.with_streaming(true);
        check(&conf, &plan)?;
        let target = single_target(&plan, "streaming reduce")?;
        let partial = GatherPartialReceiver::with_batch_size(&conf, &plan.local_sources(), plan.targets(), 1);
        let fin = ReduceStreamingFinalReceiver::new(
            &conf,
            plan.sources(),
            &plan.local_targets(),
            Arc::new(func),
            Box::new(receiver),
        );
        let inner = Collective::new(&conf, plan, channel, partial, fin)?;
        Ok(SReduce { inner, target })
    }

    pub fn reduce(&mut self, source: TaskId, msg: T, flags: MessageFlags) -> Result<(), T> {
        self.inner.send(source, self.target, flags, msg)
    }
}

delegate_operation!(SReduce<T> where T: Data);

/// Batch reduce by key: the selector routes every key to one target, values of the
/// same key are folded at the sources and again at the target.
pub struct BKeyedReduce<K, V> {
    inner: Collective<(K, V), KeyedReducePartialReceiver<K, V>, KeyedReduceBatchFinalReceiver<K, V>>,
    selector: Box<dyn DestinationSelector<K>>,
}

impl<K: Data + Hash + Eq, V: Data> BKeyedReduce<K, V> {
    #[allow(clippy::too_many_arguments)]
    pub fn new<F, R>(
        conf: &CommConfig, plan: LogicalPlan, channel: Box<dyn Channel>, mut selector: Box<dyn DestinationSelector<K>>,
        func: F, key_cmp: Option<Comparator<K>>, receiver: R,
    ) -> Result<Self, BuildOpError>
    where
        F: ReduceFunction<V> + 'static,
        R: BulkReceiver<(K, V)> + 'static,
    {
        let conf = conf.with_streaming(false);
        check(&conf, &plan)?;
        selector.prepare(plan.sources(), plan.targets());
        let func: Arc<dyn ReduceFunction<V>> = Arc::new(func);
        let partial = KeyedReducePartialReceiver::new(&conf, &plan.local_sources(), plan.targets(), func.clone());
        let fin = KeyedReduceBatchFinalReceiver::new(
            &conf,
            plan.sources(),
            &plan.local_targets(),
            func,
            key_cmp,
            Box::new(receiver),
        );
        let inner = Collective::new(&conf, plan, channel, partial, fin)?;
        Ok(BKeyedReduce { inner, selector })
    }

    pub fn reduce(&mut self, source: TaskId, key: K, value: V, flags: MessageFlags) -> Result<(), (K, V)> {
        let target = self.selector.next(source, &key);
        self.inner.send(source, target, flags, (key, value))
    }
}

delegate_operation!(BKeyedReduce<K, V> where K: Data + Hash + Eq, V: Data);
