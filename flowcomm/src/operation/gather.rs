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


use super::{check, delegate_operation, single_target, Collective};
use crate::api::{BulkReceiver, Comparator};
use crate::channel::Channel;
use crate::config::CommConfig;
use crate::errors::BuildOpError;
use crate::message::MessageFlags;
use crate::plan::LogicalPlan;
use crate::receiver::{GatherBatchFinalReceiver, GatherPartialReceiver, GatherStreamingFinalReceiver};
use crate::{Data, TaskId};

/// Batch gather of every source into the single target of the edge; records are
/// buffered in a spill merger, and handed over sorted if a comparator is given.
pub struct BGather<T> {
    inner: Collective<T, GatherPartialReceiver<T>, GatherBatchFinalReceiver<T>>,
    target: TaskId,
}

impl<T: Data> BGather<T> {
    pub fn new<R>(
        conf: &CommConfig, plan: LogicalPlan, channel: Box<dyn Channel>, cmp: Option<Comparator<T>>, receiver: R,
    ) -> Result<Self, BuildOpError>
    where
        R: BulkReceiver<T> + 'static,
    {
        let conf = conf.with_streaming(false);
        check(&conf, &plan)?;
        let target = single_target(&plan, "gather")?;
        let partial = GatherPartialReceiver::new(&conf, &plan.local_sources(), plan.targets());
        let fin = GatherBatchFinalReceiver::new(
            &format!("gather-{}", plan.edge()),
            &conf,
            plan.sources(),
            &plan.local_targets(),
            cmp,
            Box::new(receiver),
        );
        let inner = Collective::new(&conf, plan, channel, partial, fin)?;
        Ok(BGather { inner, target })
    }

    pub fn gather(&mut self, source: TaskId, msg: T, flags: MessageFlags) -> Result<(), T> {
        self.inner.send(source, self.target, flags, msg)
    }
}

delegate_operation!(BGather<T> where T: Data);

/// Streaming gather: each round delivers the next payload of every source.
pub struct SGather<T> {
    inner: Collective<T, GatherPartialReceiver<T>, GatherStreamingFinalReceiver<T>>,
    target: TaskId,
}

impl<T: Data> SGather<T> {
    pub fn new<R>(conf: &CommConfig, plan: LogicalPlan, channel: Box<dyn Channel>, receiver: R) -> Result<Self, BuildOpError>
    where
        R: BulkReceiver<T> + 'static,
    {
        let conf = conf.with_streaming(true);
        check(&conf, &plan)?;
        let target = single_target(&plan, "streaming gather")?;
        let partial = GatherPartialReceiver::new(&conf, &plan.local_sources(), plan.targets());
        let fin = GatherStreamingFinalReceiver::new(&conf, plan.sources(), &plan.local_targets(), Box::new(receiver));
        let inner = Collective::new(&conf, plan, channel, partial, fin)?;
        Ok(SGather { inner, target })
    }

    pub fn gather(&mut self, source: TaskId, msg: T, flags: MessageFlags) -> Result<(), T> {
        self.inner.send(source, self.target, flags, msg)
    }
}

delegate_operation!(SGather<T> where T: Data);
