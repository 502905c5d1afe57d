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

//! Data-flow communication core.
//!
//! Collective operations (reduce, gather, partition, keyed partition, keyed
//! reduce and join, in batch and streaming flavors) are decomposed into
//! point-to-point transfers over a [`Channel`](channel::Channel). Every operation
//! is driven by repeated, non-blocking calls to `progress()`:
//!
//! ```text
//!  send ─▶ partial receiver ─▶ framing ─▶ channel ─▶ reassembly ─▶ final receiver ─▶ application
//! ```
//!
//! Final receivers that need to buffer a whole partition (gather, partition, join)
//! spill packed records to disk through the [`SpillMerger`](shuffle::SpillMerger)
//! when the configured memory bounds are exceeded.

#[macro_use]
extern crate log;
#[macro_use]
extern crate lazy_static;

#[macro_use]
pub mod errors;
#[macro_use]
pub mod config;
pub mod api;
pub mod channel;
pub mod message;
pub mod operation;
pub mod plan;
pub mod receiver;
pub mod selector;
pub mod shuffle;

use std::fmt::Debug;

pub use flowcomm_common::codec;
pub use flowcomm_common::packer::{self, DataType, Packer};

pub use crate::config::{CommConfig, Configuration};
pub use crate::errors::{BuildOpError, IOError, IOErrorKind, IOResult};
pub use crate::message::MessageFlags;
pub use crate::operation::DataFlowOperation;
pub use crate::plan::LogicalPlan;

/// Index of a parallel task instance taking part in an operation;
pub type TaskId = u32;
/// Numeric id of the logical edge an operation instance communicates on;
pub type EdgeId = u16;
/// Id of the worker process hosting a set of tasks;
pub type WorkerId = u32;

/// Records that can travel through a collective operation.
pub trait Data: Packer + Send + Debug + 'static {}

impl<T: Packer + Send + Debug + 'static> Data for T {}
