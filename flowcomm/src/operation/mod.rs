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


//! Collective operations: a partial receiver per local source, a transport per edge
//! and a final receiver per local target, driven by cooperative `progress` calls.

use crate::channel::Channel;
use crate::config::CommConfig;
use crate::errors::{BuildOpError, IOResult};
use crate::message::MessageFlags;
use crate::plan::LogicalPlan;
use crate::receiver::{FinalReceiver, PartialReceiver};
use crate::{Data, TaskId};

mod gather;
mod join;
mod partition;
mod reduce;
mod transport;

pub use gather::{BGather, SGather};
pub use join::BJoin;
pub use partition::{BKeyedPartition, BPartition, SPartition};
pub use reduce::{BKeyedReduce, BReduce, SReduce};
pub use transport::EdgeTransport;

/// Uniform surface of every collective operation. No method blocks: sends hand the
/// record back when the operation can't take it, and all work happens in `progress`.
pub trait DataFlowOperation: Send {
    /// Advance the operation, returns `true` while it is not complete;
    fn progress(&mut self) -> IOResult<bool>;

    fn is_complete(&self) -> bool;

    /// `source` has nothing more to send; calling it again has no effect. For streaming
    /// operations this ends the current window of the source, a window is only opened
    /// again by a record or a barrier;
    fn finish(&mut self, source: TaskId);

    /// Send a barrier from `source` to every target, it reaches the application with
    /// the next `sync`;
    fn send_barrier(&mut self, source: TaskId, barrier: Vec<u8>) -> Result<(), Vec<u8>>;

    /// Release queued records, buffers and spill files, and deregister from the channel;
    fn close(&mut self);

    /// Clear all state for another run on the same edge;
    fn reset(&mut self);

    /// Spin on `progress` at most `max_rounds` times, returns whether the operation
    /// completed. Blocks the calling thread for every other operation sharing it;
    fn wait_for_completion(&mut self, max_rounds: usize) -> IOResult<bool> {
        for _ in 0..max_rounds {
            if !self.progress()? {
                return Ok(true);
            }
        }
        Ok(self.is_complete())
    }
}

/// Validate the shared part of every operation;
pub(crate) fn check(conf: &CommConfig, plan: &LogicalPlan) -> Result<(), BuildOpError> {
    conf.validate()?;
    plan.validate()
}

pub(crate) fn single_target(plan: &LogicalPlan, op: &str) -> Result<TaskId, BuildOpError> {
    match plan.targets() {
        [target] => Ok(*target),
        targets => BuildOpError::invalid_plan(format!(
            "{} on edge {} expects exactly one target, got {}",
            op,
            plan.edge(),
            targets.len()
        )),
    }
}

/// The engine shared by the single-edge operations.
pub(crate) struct Collective<T, P, F> {
    plan: LogicalPlan,
    partial: P,
    transport: EdgeTransport<T>,
    fin: F,
    closed: bool,
}

impl<T, P, F> Collective<T, P, F>
where
    T: Data,
    P: PartialReceiver<T>,
    F: FinalReceiver<T>,
{
    pub fn new(
        conf: &CommConfig, plan: LogicalPlan, channel: Box<dyn Channel>, partial: P, fin: F,
    ) -> Result<Self, BuildOpError> {
        let transport = EdgeTransport::new(plan.clone(), channel, conf)?;
        info!("build operation {};", plan);
        Ok(Collective { plan, partial, transport, fin, closed: false })
    }

    pub fn send(&mut self, source: TaskId, target: TaskId, flags: MessageFlags, msg: T) -> Result<(), T> {
        assert!(
            self.plan.is_local_source(source),
            "{} is not a local source of edge {};",
            source,
            self.plan.edge()
        );
        assert!(self.plan.is_target(target), "{} is not a target of edge {};", target, self.plan.edge());
        self.partial.on_message(source, target, flags, msg)
    }
}

impl<T, P, F> DataFlowOperation for Collective<T, P, F>
where
    T: Data,
    P: PartialReceiver<T>,
    F: FinalReceiver<T>,
{
    fn progress(&mut self) -> IOResult<bool> {
        if self.closed {
            return Ok(false);
        }
        self.partial.progress(&mut self.transport)?;
        self.transport.progress_channel();
        self.transport.pull()?;
        let fin = &mut self.fin;
        self.transport
            .deliver(|source, target, flags, msg| fin.on_message(source, target, flags, msg));
        self.fin.progress()?;
        Ok(!self.is_complete())
    }

    fn is_complete(&self) -> bool {
        self.closed || (self.partial.is_complete() && self.transport.is_idle() && self.fin.is_complete())
    }

    fn finish(&mut self, source: TaskId) {
        if self.plan.is_local_source(source) {
            self.partial.on_finish(source);
        } else {
            warn!("finish {} which is not a local source of edge {};", source, self.plan.edge());
        }
    }

    fn send_barrier(&mut self, source: TaskId, barrier: Vec<u8>) -> Result<(), Vec<u8>> {
        assert!(
            self.plan.is_local_source(source),
            "{} is not a local source of edge {};",
            source,
            self.plan.edge()
        );
        self.partial.on_barrier(source, barrier)
    }

    fn close(&mut self) {
        if !self.closed {
            self.partial.clean();
            self.transport.close();
            self.fin.close();
            self.closed = true;
            debug!("operation on edge {} closed;", self.plan.edge());
        }
    }

    fn reset(&mut self) {
        self.partial.clean();
        self.transport.reset();
        self.fin.clean();
    }
}

/// Implement [`DataFlowOperation`] for a wrapper holding a [`Collective`] in `inner`;
macro_rules! delegate_operation {
    ($name: ident < $($gen: ident),+ > where $($bound: tt)+) => {
        impl<$($gen),+> $crate::operation::DataFlowOperation for $name<$($gen),+> where $($bound)+ {
            fn progress(&mut self) -> $crate::errors::IOResult<bool> {
                $crate::operation::DataFlowOperation::progress(&mut self.inner)
            }

            fn is_complete(&self) -> bool {
                $crate::operation::DataFlowOperation::is_complete(&self.inner)
            }

            fn finish(&mut self, source: $crate::TaskId) {
                $crate::operation::DataFlowOperation::finish(&mut self.inner, source)
            }

            fn send_barrier(&mut self, source: $crate::TaskId, barrier: Vec<u8>) -> Result<(), Vec<u8>> {
                $crate::operation::DataFlowOperation::send_barrier(&mut self.inner, source, barrier)
            }

            fn close(&mut self) {
                $crate::operation::DataFlowOperation::close(&mut self.inner)
            }

            fn reset(&mut self) {
                $crate::operation::DataFlowOperation::reset(&mut self.inner)
            }
        }
    };
}

pub(crate) use delegate_operation;
