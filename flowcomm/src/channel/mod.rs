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

//! The byte transport collective operations are built upon.

mod buffer;
mod local;

pub use buffer::DataBuffer;
pub use local::LocalChannel;

use crate::errors::{BuildOpError, PullError, PushError};
use crate::{EdgeId, TaskId};

/// One physical buffer addressed to `target` on `edge`;
#[derive(Debug)]
pub struct Envelope {
    pub edge: EdgeId,
    pub source: TaskId,
    pub target: TaskId,
    pub buffer: DataBuffer,
}

/// Ordered, reliable delivery of byte buffers between endpoints named by
/// `(edge, target)`.
///
/// Every method is non-blocking. Buffers sent from one source to one endpoint are
/// received in the order they were sent.
pub trait Channel: Send {
    /// Start receiving buffers addressed to `target` on `edge` through this handle;
    fn register(&mut self, edge: EdgeId, target: TaskId) -> Result<(), BuildOpError>;

    fn deregister(&mut self, edge: EdgeId, target: TaskId);

    /// Capacity of every buffer handed out by [`try_acquire`](Channel::try_acquire);
    fn buffer_size(&self) -> usize;

    /// Whether a buffer could be acquired right now;
    fn can_send(&self) -> bool;

    /// Acquire `count` empty buffers at once, or none of them;
    fn try_acquire(&mut self, count: usize) -> Option<Vec<DataBuffer>>;

    fn send(&mut self, envelope: Envelope) -> Result<(), PushError>;

    fn receive(&mut self, edge: EdgeId, target: TaskId) -> Result<Option<Envelope>, PullError>;

    /// Give back a buffer whose bytes were fully consumed;
    fn release(&mut self, buffer: DataBuffer);

    /// Advance the underlying I/O;
    fn progress(&mut self) {}

    /// Another handle on the same transport;
    fn fork(&self) -> Box<dyn Channel>;
}
