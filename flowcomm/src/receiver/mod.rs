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


//! Partial receivers buffer what local sources send and forward it to the targets,
//! final receivers assemble what arrived for local targets and hand it to the
//! application.

use crate::errors::IOResult;
use crate::message::{Incoming, MessageFlags};
use crate::TaskId;

mod gather;
mod join;
mod keyed;
mod partial;
mod partition;
mod peers;
mod reduce;
mod state;

pub use gather::{GatherBatchFinalReceiver, GatherStreamingFinalReceiver};
pub use join::{JoinBatchFinalReceiver, JoinIter, JoinType, JoinedTuple};
pub use keyed::{KeyedReduceBatchFinalReceiver, KeyedReducePartialReceiver};
pub use partial::{GatherPartialReceiver, ReducePartialReceiver};
pub use partition::{PartitionBatchFinalReceiver, PartitionStreamingFinalReceiver};
pub use peers::PeerSet;
pub use reduce::{ReduceBatchFinalReceiver, ReduceStreamingFinalReceiver};

/// Outbound path of partial receivers;
pub trait Forward<T> {
    /// Send `records` as one transfer from `source` to `target`; `Ok(false)` means no
    /// buffer is available now and the same transfer should be retried later;
    fn forward(&mut self, source: TaskId, target: TaskId, flags: MessageFlags, records: &[T]) -> IOResult<bool>;

    fn forward_barrier(&mut self, source: TaskId, target: TaskId, barrier: &[u8]) -> IOResult<bool>;
}

/// Source side of an operation: one lane per (local source, target).
pub trait PartialReceiver<T>: Send {
    /// Queue `msg` of `source` for `target`, gives the record back if the lane is full;
    fn on_message(&mut self, source: TaskId, target: TaskId, flags: MessageFlags, msg: T) -> Result<(), T>;

    /// Queue a barrier of `source` for every target, all or nothing;
    fn on_barrier(&mut self, source: TaskId, barrier: Vec<u8>) -> Result<(), Vec<u8>>;

    /// `source` has nothing more to send (in the current window for streaming);
    fn on_finish(&mut self, source: TaskId);

    /// Push out what is ready; returns `true` if something is left in the lanes;
    fn progress(&mut self, out: &mut dyn Forward<T>) -> IOResult<bool>;

    fn is_complete(&self) -> bool;

    fn clean(&mut self);
}

/// Target side of an operation, fed with reassembled transfers.
pub trait FinalReceiver<T>: Send {
    /// Gives the transfer back if the queue of `source` is full, it should be offered
    /// again later in the same order;
    fn on_message(
        &mut self, source: TaskId, target: TaskId, flags: MessageFlags, msg: Incoming<T>,
    ) -> Result<(), Incoming<T>>;

    fn progress(&mut self) -> IOResult<()>;

    /// Batch: every local target delivered its result. Streaming: nothing is queued;
    fn is_complete(&self) -> bool;

    /// Forget all state so that the receiver can be used again;
    fn clean(&mut self);

    /// Release everything, spill files included;
    fn close(&mut self) {
        self.clean();
    }
}
