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

use crate::config::CommConfig;
use crate::errors::IOResult;
use crate::TaskId;

/// Lazily produced records of one target; reading records back from spill files
/// may fail, which is reported through the items;
pub type RecordIter<T> = Box<dyn Iterator<Item = IOResult<T>> + Send>;

/// Application sink of operations delivering one value per target (reduce);
pub trait SingularReceiver<T>: Send {
    fn init(&mut self, _conf: &CommConfig, _targets: &[TaskId]) {}

    fn receive(&mut self, target: TaskId, value: T);

    /// Invoked once after the last value of a target (of a window, for streaming
    /// operations) was received, with the latest barrier payload seen;
    fn sync(&mut self, _target: TaskId, _barrier: &[u8]) {}
}

/// Application sink of operations delivering a collection per target (gather,
/// partition, join);
pub trait BulkReceiver<T>: Send {
    fn init(&mut self, _conf: &CommConfig, _targets: &[TaskId]) {}

    fn receive(&mut self, target: TaskId, records: RecordIter<T>);

    fn sync(&mut self, _target: TaskId, _barrier: &[u8]) {}
}
